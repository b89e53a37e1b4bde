//! Collection allow-list types.
//!
//! An agent may only read a collection that is a member of its allow-list.
//! The list is fixed for the duration of a turn and is never widened at
//! runtime.

use serde::{Deserialize, Serialize};

/// The ordered, duplicate-free set of collections granted to an agent.
///
/// Order is significant: the query planner falls back to the first granted
/// collection when a question names none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct CollectionSet {
    inner: Vec<String>,
}

impl CollectionSet {
    /// Grant a collection. Granting an existing member is a no-op.
    pub fn grant(&mut self, collection: impl Into<String>) {
        let collection = collection.into();
        if !self.inner.contains(&collection) {
            self.inner.push(collection);
        }
    }

    /// Return true if `collection` is on the allow-list.
    pub fn has(&self, collection: &str) -> bool {
        self.inner.iter().any(|c| c == collection)
    }

    /// Iterate granted collections in grant order.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.inner.iter().map(String::as_str)
    }

    pub fn first(&self) -> Option<&str> {
        self.inner.first().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.inner.clone()
    }
}

impl From<Vec<String>> for CollectionSet {
    fn from(collections: Vec<String>) -> Self {
        collections.into_iter().collect()
    }
}

impl From<CollectionSet> for Vec<String> {
    fn from(set: CollectionSet) -> Self {
        set.inner
    }
}

impl<S: Into<String>> FromIterator<S> for CollectionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = CollectionSet::default();
        for c in iter {
            set.grant(c);
        }
        set
    }
}
