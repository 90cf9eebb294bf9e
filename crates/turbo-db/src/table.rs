//! Tables of rows guarded by per-row async locks.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::transaction::Participant;
use crate::DbError;

/// Bounds required of a table key.
///
/// Keys must be totally ordered so that multi-row locks are always taken in
/// the same order by every caller.
pub trait Key: Eq + Hash + Ord + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> Key for T where T: Eq + Hash + Ord + Clone + fmt::Debug + Send + Sync + 'static {}

/// A stored row.
///
/// `live` is cleared when the row is deleted, or when the transaction that
/// inserted it rolls back, so tasks queued on the lock observe it as gone.
#[derive(Debug)]
struct Row<V> {
    value: V,
    live: bool,
}

type Cell<V> = Arc<Mutex<Row<V>>>;

/// What a non-blocking read of a row saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peek<V> {
    Missing,
    /// A transaction holds the row.
    Held,
    Committed(V),
}

const LOCK_OR_INSERT_ATTEMPTS: usize = 3;

struct TableInner<K, V> {
    name: &'static str,
    rows: RwLock<HashMap<K, Cell<V>>>,
}

/// A named table of rows.
///
/// Cloning a table is cheap: clones share the same rows.
pub struct Table<K, V> {
    inner: Arc<TableInner<K, V>>,
}

impl<K, V> Clone for Table<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for Table<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table").field("name", &self.inner.name).finish()
    }
}

impl<K, V> Table<K, V>
where
    K: Key,
    V: Clone + Send + 'static,
{
    /// Create an empty table.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(TableInner {
                name,
                rows: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// The table name, used in errors and logs.
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Read a committed row.
    ///
    /// Waits if a transaction currently holds the row.
    pub async fn get(&self, key: &K) -> Option<V> {
        let cell = self.cell(key)?;
        let row = cell.lock().await;
        row.live.then(|| row.value.clone())
    }

    /// Read a row without waiting for its lock.
    pub fn peek(&self, key: &K) -> Peek<V> {
        let Some(cell) = self.cell(key) else {
            return Peek::Missing;
        };
        let peek = match cell.try_lock() {
            Ok(row) if row.live => Peek::Committed(row.value.clone()),
            Ok(_) => Peek::Missing,
            Err(_) => Peek::Held,
        };
        peek
    }

    /// Check whether a key is present (including rows an open transaction
    /// is inserting).
    pub fn contains(&self, key: &K) -> bool {
        self.read_rows().contains_key(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.read_rows().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.read_rows().len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect every committed row matching a predicate, in key order.
    pub async fn find<F>(&self, pred: F) -> Vec<V>
    where
        F: Fn(&V) -> bool,
    {
        let mut found = Vec::new();
        for key in self.keys() {
            if let Some(value) = self.get(&key).await {
                if pred(&value) {
                    found.push(value);
                }
            }
        }
        found
    }

    /// Insert a new row outside of any transaction.
    pub fn insert(&self, key: K, value: V) -> Result<(), DbError> {
        let mut rows = self.write_rows();
        if rows.contains_key(&key) {
            return Err(self.duplicate(&key));
        }
        rows.insert(key, Arc::new(Mutex::new(Row { value, live: true })));
        Ok(())
    }

    /// Apply a change to a single row and keep it immediately.
    pub async fn update<F, R>(&self, key: &K, f: F) -> Result<R, DbError>
    where
        F: FnOnce(&mut V) -> R,
    {
        let mut guard = self.lock(key).await?;
        let result = f(&mut *guard);
        guard.settle(false);
        Ok(result)
    }

    /// Delete a row outside of any transaction, returning its last value.
    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.lock(key).await.ok()?;
        let value = V::clone(&guard);
        guard.delete();
        guard.settle(false);
        Some(value)
    }

    /// Lock a row for exclusive use.
    ///
    /// The guard must be enlisted in a [`crate::Transaction`] for its changes
    /// to survive; dropping it restores the original value.
    pub async fn lock(&self, key: &K) -> Result<RowGuard<K, V>, DbError> {
        let cell = self.cell(key).ok_or_else(|| self.not_found(key))?;
        let guard = cell.lock_owned().await;
        if !guard.live {
            return Err(self.not_found(key));
        }
        let original = Some(guard.value.clone());
        Ok(RowGuard {
            table: self.clone(),
            key: key.clone(),
            guard,
            original,
            delete: false,
            settled: false,
        })
    }

    /// Lock several rows in key order.
    ///
    /// Keys are sorted and de-duplicated first so that concurrent callers
    /// competing for overlapping rows cannot deadlock.
    pub async fn lock_all<I>(&self, keys: I) -> Result<Vec<RowGuard<K, V>>, DbError>
    where
        I: IntoIterator<Item = K>,
    {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.lock(key).await?);
        }
        Ok(guards)
    }

    /// Insert a row that stays locked until its transaction settles.
    ///
    /// Readers wait for the lock, so they only ever see the row once it has
    /// been committed. On rollback the row disappears.
    pub fn insert_locked(&self, key: K, value: V) -> Result<RowGuard<K, V>, DbError> {
        let cell: Cell<V> = Arc::new(Mutex::new(Row { value, live: true }));
        let guard = Arc::clone(&cell)
            .try_lock_owned()
            .map_err(|_| self.duplicate(&key))?;

        let mut rows = self.write_rows();
        if rows.contains_key(&key) {
            return Err(self.duplicate(&key));
        }
        rows.insert(key.clone(), cell);
        drop(rows);

        Ok(RowGuard {
            table: self.clone(),
            key,
            guard,
            original: None,
            delete: false,
            settled: false,
        })
    }

    /// Lock a row, creating it with `default` if it does not exist yet.
    ///
    /// Two callers racing to create the same row both end up holding it in
    /// turn: the loser of the insert waits for the winner's row instead.
    pub async fn lock_or_insert_with<F>(&self, key: &K, default: F) -> Result<RowGuard<K, V>, DbError>
    where
        F: Fn() -> V,
    {
        let mut last = None;
        for _ in 0..LOCK_OR_INSERT_ATTEMPTS {
            match self.lock(key).await {
                Ok(guard) => return Ok(guard),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            match self.insert_locked(key.clone(), default()) {
                Ok(guard) => return Ok(guard),
                Err(e) if e.is_unique_violation() => {
                    tracing::trace!(table = self.inner.name, ?key, "row created concurrently, retrying");
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| self.duplicate(key)))
    }

    fn cell(&self, key: &K) -> Option<Cell<V>> {
        self.read_rows().get(key).cloned()
    }

    /// Drop the map entry for `key` if it still points at `cell`.
    fn detach(&self, key: &K, cell: &Cell<V>) {
        let mut rows = self.write_rows();
        if rows.get(key).is_some_and(|current| Arc::ptr_eq(current, cell)) {
            rows.remove(key);
        }
    }

    fn read_rows(&self) -> std::sync::RwLockReadGuard<'_, HashMap<K, Cell<V>>> {
        self.inner.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rows(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<K, Cell<V>>> {
        self.inner.rows.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_found(&self, key: &K) -> DbError {
        DbError::NotFound {
            table: self.inner.name,
            key: format!("{:?}", key),
        }
    }

    fn duplicate(&self, key: &K) -> DbError {
        DbError::UniqueViolation {
            table: self.inner.name,
            key: format!("{:?}", key),
        }
    }
}

/// Exclusive, transactional access to one row.
///
/// Dereferences to the row value. A guard that is dropped without being
/// committed puts the original value back; a freshly inserted row vanishes.
pub struct RowGuard<K, V>
where
    K: Key,
    V: Clone + Send + 'static,
{
    table: Table<K, V>,
    key: K,
    guard: OwnedMutexGuard<Row<V>>,
    /// `None` when this guard inserted the row.
    original: Option<V>,
    delete: bool,
    settled: bool,
}

impl<K, V> RowGuard<K, V>
where
    K: Key,
    V: Clone + Send + 'static,
{
    /// The row key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// The value as it was when the lock was taken.
    pub fn original(&self) -> Option<&V> {
        self.original.as_ref()
    }

    /// Whether this guard created the row.
    pub fn is_insert(&self) -> bool {
        self.original.is_none()
    }

    /// Mark the row for deletion when the transaction commits.
    pub fn delete(&mut self) {
        self.delete = true;
    }

    /// Whether the row is marked for deletion.
    pub fn is_deleted(&self) -> bool {
        self.delete
    }

    fn settle(&mut self, rollback: bool) {
        if self.settled {
            return;
        }
        self.settled = true;

        if rollback {
            match self.original.take() {
                Some(original) => self.guard.value = original,
                None => self.vanish(),
            }
        } else if self.delete {
            self.vanish();
        }
    }

    fn vanish(&mut self) {
        self.guard.live = false;
        let cell = Arc::clone(OwnedMutexGuard::mutex(&self.guard));
        self.table.detach(&self.key, &cell);
    }
}

impl<K, V> Deref for RowGuard<K, V>
where
    K: Key,
    V: Clone + Send + 'static,
{
    type Target = V;

    fn deref(&self) -> &V {
        &self.guard.value
    }
}

impl<K, V> DerefMut for RowGuard<K, V>
where
    K: Key,
    V: Clone + Send + 'static,
{
    fn deref_mut(&mut self) -> &mut V {
        &mut self.guard.value
    }
}

impl<K, V> fmt::Debug for RowGuard<K, V>
where
    K: Key,
    V: Clone + Send + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowGuard")
            .field("table", &self.table.name())
            .field("key", &self.key)
            .field("value", &self.guard.value)
            .field("delete", &self.delete)
            .finish()
    }
}

impl<K, V> Participant for RowGuard<K, V>
where
    K: Key,
    V: Clone + Send + 'static,
{
    fn commit(mut self: Box<Self>) {
        self.settle(false);
    }

    fn rollback(mut self: Box<Self>) {
        self.settle(true);
    }
}

impl<K, V> Drop for RowGuard<K, V>
where
    K: Key,
    V: Clone + Send + 'static,
{
    fn drop(&mut self) {
        self.settle(true);
    }
}
