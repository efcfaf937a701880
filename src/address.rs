//! The interface for identifying backend addresses, and the ways probing them can fail.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Reasons a single probe of an [Address] may fail.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Other(anyhow::Error),
}

/// A single network endpoint of a service.
///
/// `addr` is the "host:port" string used to reach the backend. The
/// `server_name` is the label used for TLS / identity matching, which
/// defaults to `addr` itself.
#[derive(Clone, PartialEq, Eq, Ord, PartialOrd, Debug, Hash)]
pub struct Address {
    pub addr: Arc<str>,
    pub server_name: Arc<str>,
}

impl Address {
    pub fn new(addr: impl ToString) -> Self {
        let addr: Arc<str> = addr.to_string().into();
        Self {
            server_name: addr.clone(),
            addr,
        }
    }

    /// Replaces the identity label used to match this backend.
    pub fn with_server_name(self, server_name: impl ToString) -> Self {
        Self {
            addr: self.addr,
            server_name: server_name.to_string().into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.addr
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Address", 2)?;
        state.serialize_field("addr", &*self.addr)?;
        state.serialize_field("server_name", &*self.server_name)?;
        state.end()
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&'_ str> for Address {
    fn from(s: &'_ str) -> Self {
        Self::new(s)
    }
}

impl From<SocketAddr> for Address {
    fn from(address: SocketAddr) -> Self {
        Self::new(address)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.addr.fmt(f)
    }
}

/// Formats a slice of addresses as `[a, b, c]`.
pub(crate) struct AddressList<'a>(pub &'a [Address]);

impl std::fmt::Display for AddressList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (i, address) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            address.fmt(f)?;
        }
        f.write_str("]")
    }
}

/// Converts anything address-like into a list of [Address].
pub fn addresses<I, A>(iter: I) -> Vec<Address>
where
    I: IntoIterator<Item = A>,
    A: Into<Address>,
{
    iter.into_iter().map(Into::into).collect()
}
