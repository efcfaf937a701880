//! Interface for services
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidName {
    #[error("Service name is empty")]
    Empty,

    #[error("Service name {0:?} may not contain '/' or whitespace")]
    IllegalCharacter(String),
}

/// Describes the logical id of a service.
///
/// A service is a group of backends reachable under one target. Names are
/// opaque, but must be non-empty and usable as the final path component of a
/// target string.
#[derive(Clone, Debug, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct Name(pub Arc<str>);

impl Name {
    pub fn new(s: impl ToString) -> Self {
        Self(Arc::from(s.to_string()))
    }

    /// Validates a name before it's used as a registration id.
    pub fn parse(s: impl ToString) -> Result<Self, InvalidName> {
        let s = s.to_string();
        if s.is_empty() {
            return Err(InvalidName::Empty);
        }
        if s.contains(|c: char| c == '/' || c.is_whitespace()) {
            return Err(InvalidName::IllegalCharacter(s));
        }
        Ok(Self(Arc::from(s)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&'_ str> for Name {
    fn from(s: &'_ str) -> Self {
        Self(Arc::from(s))
    }
}

impl std::borrow::Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Name {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}
