//! Addresses, address books and customers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FieldErrors;
use crate::ids::{AddressId, UserId};

const REQUIRED: &str = "This field is required.";

/// A postal address.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Address {
    /// Address ID (None for unsaved addresses).
    pub id: Option<AddressId>,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Company name.
    pub company: Option<String>,
    /// Address line 1.
    pub address1: String,
    /// Address line 2 (apt, suite, etc.).
    pub address2: Option<String>,
    /// City.
    pub city: String,
    /// State/province code (e.g., "CA").
    pub province_code: Option<String>,
    /// Country code (e.g., "US").
    pub country_code: String,
    /// Postal/ZIP code.
    pub zip: String,
    /// Phone number.
    pub phone: Option<String>,
}

impl Address {
    /// Create a new address.
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        address1: impl Into<String>,
        city: impl Into<String>,
        country_code: impl Into<String>,
        zip: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            address1: address1.into(),
            city: city.into(),
            country_code: country_code.into(),
            zip: zip.into(),
            ..Self::default()
        }
    }

    /// Get full name.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Check the required fields.
    pub fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        let required = [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("address1", &self.address1),
            ("city", &self.city),
            ("zip", &self.zip),
            ("country_code", &self.country_code),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                errors.add(field, REQUIRED);
            }
        }
        let country = self.country_code.trim();
        if !country.is_empty() && (country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic())) {
            errors.add("country_code", "Enter a two-letter country code.");
        }
        errors.into_result()
    }

    /// Check if address is complete.
    pub fn is_complete(&self) -> bool {
        self.validate().is_ok()
    }

    /// Compare the postal content, ignoring the id.
    pub fn same_as(&self, other: &Address) -> bool {
        Address { id: None, ..self.clone() } == Address { id: None, ..other.clone() }
    }

    /// A detached copy with a fresh id, for storing on an order.
    ///
    /// Orders never share address rows with an address book, so later edits
    /// to a saved address do not touch placed orders.
    pub fn copy_for_order(&self) -> Address {
        Address {
            id: Some(AddressId::generate()),
            ..self.clone()
        }
    }
}

/// A customer's saved addresses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AddressBook {
    /// Saved addresses, each with an id.
    pub addresses: Vec<Address>,
    /// Default shipping address.
    pub default_shipping: Option<AddressId>,
    /// Default billing address.
    pub default_billing: Option<AddressId>,
}

impl AddressBook {
    /// Create an empty address book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Save an address, returning the id of the stored copy.
    ///
    /// An address that is already in the book is not stored twice.
    pub fn store(&mut self, address: &Address) -> AddressId {
        if let Some(existing) = self.addresses.iter().find(|a| a.same_as(address)) {
            if let Some(id) = &existing.id {
                return id.clone();
            }
        }
        let id = AddressId::generate();
        self.addresses.push(Address {
            id: Some(id.clone()),
            ..address.clone()
        });
        id
    }

    /// Get a saved address.
    pub fn get(&self, id: &AddressId) -> Option<&Address> {
        self.addresses.iter().find(|a| a.id.as_ref() == Some(id))
    }

    /// The default shipping address, if set.
    pub fn default_shipping(&self) -> Option<&Address> {
        self.default_shipping.as_ref().and_then(|id| self.get(id))
    }

    /// The default billing address, if set.
    pub fn default_billing(&self) -> Option<&Address> {
        self.default_billing.as_ref().and_then(|id| self.get(id))
    }

    /// Store an address and make it the default shipping address unless one
    /// is already set. Returns whether the default was set.
    pub fn store_shipping_default(&mut self, address: &Address) -> bool {
        let id = self.store(address);
        if self.default_shipping().is_some() {
            return false;
        }
        self.default_shipping = Some(id);
        true
    }

    /// Store an address and make it the default billing address unless one
    /// is already set. Returns whether the default was set.
    pub fn store_billing_default(&mut self, address: &Address) -> bool {
        let id = self.store(address);
        if self.default_billing().is_some() {
            return false;
        }
        self.default_billing = Some(id);
        true
    }
}

/// Errors that can occur when parsing an [`Email`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EmailError {
    /// The input string is empty.
    #[error("Email cannot be empty.")]
    Empty,
    /// The input string is too long.
    #[error("Email must be at most {max} characters.")]
    TooLong { max: usize },
    /// The input is not `local@domain`.
    #[error("Enter a valid email address.")]
    Malformed,
}

/// An email address.
///
/// Only the structure is checked: one `@` with something on both sides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    /// Maximum length of an email address (RFC 5321).
    pub const MAX_LENGTH: usize = 254;

    /// Parse an `Email` from a string, trimming surrounding whitespace.
    pub fn parse(s: &str) -> Result<Self, EmailError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EmailError::Empty);
        }
        if s.len() > Self::MAX_LENGTH {
            return Err(EmailError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        match s.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
            {
                Ok(Self(s.to_owned()))
            }
            _ => Err(EmailError::Malformed),
        }
    }

    /// Returns the email address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An authenticated customer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// User ID.
    pub id: UserId,
    /// Account email.
    pub email: Email,
}

impl User {
    /// Create a user.
    pub fn new(id: UserId, email: Email) -> Self {
        Self { id, email }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> Address {
        Address::new("Ada", "Lovelace", "12 St James's Square", "London", "GB", "SW1Y 4JH")
    }

    #[test]
    fn test_full_name() {
        assert_eq!(home().full_name(), "Ada Lovelace");
    }

    #[test]
    fn test_validate_complete_address() {
        assert!(home().validate().is_ok());
        assert!(home().is_complete());
    }

    #[test]
    fn test_validate_reports_fields() {
        let mut address = home();
        address.city = "  ".to_string();
        address.zip.clear();
        address.country_code = "GBR".to_string();

        let errors = address.validate().unwrap_err();
        assert!(errors.contains("city"));
        assert!(errors.contains("zip"));
        assert!(errors.contains("country_code"));
        assert!(!errors.contains("first_name"));
    }

    #[test]
    fn test_copy_for_order_is_detached() {
        let mut saved = home();
        saved.id = Some(AddressId::new("saved"));
        let copy = saved.copy_for_order();

        assert_ne!(copy.id, saved.id);
        assert!(copy.same_as(&saved));
    }

    #[test]
    fn test_address_book_deduplicates() {
        let mut book = AddressBook::new();
        let a = book.store(&home());
        let b = book.store(&home());
        assert_eq!(a, b);
        assert_eq!(book.addresses.len(), 1);
    }

    #[test]
    fn test_address_book_defaults() {
        let mut book = AddressBook::new();
        assert!(book.store_shipping_default(&home()));

        let mut office = home();
        office.address1 = "1 Office Road".to_string();
        assert!(!book.store_shipping_default(&office));

        assert_eq!(book.addresses.len(), 2);
        assert!(book.default_shipping().unwrap().same_as(&home()));
        assert!(book.default_billing().is_none());
        assert!(book.store_billing_default(&office));
        assert!(book.default_billing().unwrap().same_as(&office));
    }

    #[test]
    fn test_email_parse() {
        assert!(Email::parse("ada@example.com").is_ok());
        assert_eq!(Email::parse(" ada@example.com ").unwrap().as_str(), "ada@example.com");
        assert_eq!(Email::parse(""), Err(EmailError::Empty));
        assert_eq!(Email::parse("no-at"), Err(EmailError::Malformed));
        assert_eq!(Email::parse("@example.com"), Err(EmailError::Malformed));
        assert_eq!(Email::parse("ada@"), Err(EmailError::Malformed));
        assert_eq!(Email::parse("a@b@c"), Err(EmailError::Malformed));
    }
}
