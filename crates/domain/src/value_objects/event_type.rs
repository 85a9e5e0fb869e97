//! Event type and selector
//!
//! An event type names one kind of business occurrence
//! (e.g. `PATIENT_REGISTERED`). Integrations carry an event-type *selector*
//! which is either a concrete type or the wildcard `*` that matches any.
//!
//! # Examples
//!
//! ```
//! use domain::value_objects::EventType;
//!
//! let selector = EventType::wildcard();
//! assert!(selector.selects(&EventType::new("PATIENT_REGISTERED")));
//!
//! let narrow = EventType::new("APPOINTMENT_CREATED");
//! assert!(!narrow.selects(&EventType::new("PATIENT_REGISTERED")));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// The wildcard selector matching every event type
pub const WILDCARD: &str = "*";

/// An event type name, also used as an integration's selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    /// Create an event type from its canonical name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The wildcard selector (`*`)
    #[must_use]
    pub fn wildcard() -> Self {
        Self(WILDCARD.to_string())
    }

    /// Validate a selector: non-empty, no interior whitespace
    pub fn validated(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() || name.contains(char::is_whitespace) {
            return Err(DomainError::InvalidEventType(name));
        }
        Ok(Self(name))
    }

    /// Whether this is the wildcard selector
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    /// Whether this selector matches the given concrete event type
    ///
    /// The wildcard selects everything; otherwise matching is exact.
    #[must_use]
    pub fn selects(&self, event_type: &Self) -> bool {
        self.is_wildcard() || self.0 == event_type.0
    }

    /// Get the name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
