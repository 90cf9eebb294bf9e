//! Unit-of-work transactions.

use std::sync::atomic::{AtomicU64, Ordering};

/// Something whose changes are kept or undone together with a transaction.
///
/// Both methods must be infallible: by the time a transaction commits every
/// check has already passed.
pub trait Participant: Send {
    /// Keep the changes.
    fn commit(self: Box<Self>);

    /// Undo the changes.
    fn rollback(self: Box<Self>);
}

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// A unit of work spanning any number of rows and external participants.
///
/// Participants are committed in enlistment order. Dropping a transaction
/// that was not committed rolls every participant back in reverse order, so
/// an early return through `?` can never leave partial writes behind.
pub struct Transaction {
    id: u64,
    participants: Vec<Box<dyn Participant>>,
    finished: bool,
}

impl Transaction {
    /// Start a new transaction.
    pub fn begin() -> Self {
        let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(tx = id, "transaction started");
        Self {
            id,
            participants: Vec::new(),
            finished: false,
        }
    }

    /// The transaction id (for logs).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of enlisted participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Check if nothing has been enlisted.
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Hand a participant to the transaction.
    pub fn enlist<P>(&mut self, participant: P)
    where
        P: Participant + 'static,
    {
        self.participants.push(Box::new(participant));
    }

    /// Hand several participants to the transaction.
    pub fn enlist_all<P, I>(&mut self, participants: I)
    where
        P: Participant + 'static,
        I: IntoIterator<Item = P>,
    {
        for participant in participants {
            self.enlist(participant);
        }
    }

    /// Keep every enlisted change.
    pub fn commit(mut self) {
        let participants = std::mem::take(&mut self.participants);
        let count = participants.len();
        for participant in participants {
            participant.commit();
        }
        self.finished = true;
        tracing::debug!(tx = self.id, participants = count, "transaction committed");
    }

    /// Undo every enlisted change.
    pub fn rollback(self) {
        drop(self);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let count = self.participants.len();
        while let Some(participant) = self.participants.pop() {
            participant.rollback();
        }
        tracing::debug!(tx = self.id, participants = count, "transaction rolled back");
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("participants", &self.participants.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Table;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Participant for Recorder {
        fn commit(self: Box<Self>) {
            self.log.lock().unwrap().push(format!("commit {}", self.name));
        }

        fn rollback(self: Box<Self>) {
            self.log.lock().unwrap().push(format!("rollback {}", self.name));
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Recorder {
        Recorder {
            name,
            log: Arc::clone(log),
        }
    }

    #[test]
    fn test_commit_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tx = Transaction::begin();
        tx.enlist(recorder("a", &log));
        tx.enlist(recorder("b", &log));
        tx.commit();

        assert_eq!(*log.lock().unwrap(), vec!["commit a", "commit b"]);
    }

    #[test]
    fn test_drop_rolls_back_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut tx = Transaction::begin();
            tx.enlist(recorder("a", &log));
            tx.enlist(recorder("b", &log));
        }

        assert_eq!(*log.lock().unwrap(), vec!["rollback b", "rollback a"]);
    }

    #[test]
    fn test_transaction_ids_increase() {
        let a = Transaction::begin();
        let b = Transaction::begin();
        assert!(b.id() > a.id());
    }

    #[tokio::test]
    async fn test_rows_commit_together() {
        let table: Table<&'static str, i64> = Table::new("accounts");
        table.insert("alice", 100).unwrap();
        table.insert("bob", 0).unwrap();

        let mut tx = Transaction::begin();
        let mut rows = table.lock_all(["bob", "alice"]).await.unwrap();
        *rows[0] -= 40;
        *rows[1] += 40;
        tx.enlist_all(rows);
        tx.commit();

        assert_eq!(table.get(&"alice").await, Some(60));
        assert_eq!(table.get(&"bob").await, Some(40));
    }

    #[tokio::test]
    async fn test_rows_roll_back_together() {
        let table: Table<&'static str, i64> = Table::new("accounts");
        table.insert("alice", 100).unwrap();

        let mut tx = Transaction::begin();
        let mut alice = table.lock(&"alice").await.unwrap();
        *alice = 0;
        tx.enlist(alice);
        let created = table.insert_locked("carol", 5).unwrap();
        tx.enlist(created);
        tx.rollback();

        assert_eq!(table.get(&"alice").await, Some(100));
        assert!(!table.contains(&"carol"));
    }

    #[tokio::test]
    async fn test_deleted_row_is_gone_after_commit() {
        let table: Table<&'static str, i64> = Table::new("accounts");
        table.insert("alice", 100).unwrap();

        let mut tx = Transaction::begin();
        let mut alice = table.lock(&"alice").await.unwrap();
        alice.delete();
        tx.enlist(alice);
        tx.commit();

        assert_eq!(table.get(&"alice").await, None);
        assert!(table.is_empty());
    }
}
