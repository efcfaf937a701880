//! Change detection for published address sets.

use crate::address::Address;

use std::collections::BTreeSet;
use std::sync::Arc;

/// A canonical summary of a set of alive addresses.
///
/// The canonical form is the sorted, de-duplicated membership of the set, so
/// two sets with the same members compare equal regardless of the order (or
/// repetition) in which they were supplied, and any difference in membership
/// compares unequal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(Arc<[Address]>);

impl Fingerprint {
    pub fn of<'a>(alive: impl IntoIterator<Item = &'a Address>) -> Self {
        let members: BTreeSet<&Address> = alive.into_iter().collect();
        Self(members.into_iter().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
