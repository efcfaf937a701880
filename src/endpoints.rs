//! The table of raw backend lists, keyed by service.

use crate::address::Address;
use crate::service;

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{event, Level};

/// Maps each [service::Name] to the backends most recently supplied for it.
///
/// Lists are stored exactly as given: unfiltered, unprobed, possibly with
/// duplicates. Health is the business of each [crate::resolver::Resolver].
///
/// This is shared by every builder and updater which should observe the same
/// services; construct one and hand an `Arc` of it to each of them.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    backends: Mutex<HashMap<service::Name, Vec<Address>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the list of backends for `service`.
    pub fn set(&self, service: &service::Name, backends: Vec<Address>) {
        event!(Level::DEBUG, %service, count = backends.len(), "Storing backends");
        self.backends
            .lock()
            .unwrap()
            .insert(service.clone(), backends);
    }

    /// Returns the backends for `service`, or an empty list if it is unknown.
    pub fn get(&self, service: &service::Name) -> Vec<Address> {
        self.backends
            .lock()
            .unwrap()
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns true if `service` has ever been set and not removed.
    ///
    /// Note that a known service may still have an empty list.
    pub fn contains(&self, service: &service::Name) -> bool {
        self.backends.lock().unwrap().contains_key(service)
    }

    /// Inserts `backends` only if `service` is not yet known.
    ///
    /// Returns false if the service already existed, leaving it untouched.
    pub(crate) fn insert_new(&self, service: &service::Name, backends: Vec<Address>) -> bool {
        use std::collections::hash_map::Entry;
        match self.backends.lock().unwrap().entry(service.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(backends);
                true
            }
        }
    }

    /// Forgets `service`, returning the list it held.
    pub fn remove(&self, service: &service::Name) -> Option<Vec<Address>> {
        self.backends.lock().unwrap().remove(service)
    }

    /// Lists all known services.
    pub fn services(&self) -> Vec<service::Name> {
        self.backends.lock().unwrap().keys().cloned().collect()
    }
}
