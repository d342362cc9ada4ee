//! Set of currently blocked sources.
//!
//! Only the detection engine mutates the registry; the admission gate reads it
//! on every request.

use dashmap::DashSet;

#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocked: DashSet<String>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `id` was not already blocked
    pub(crate) fn add(&self, id: &str) -> bool {
        self.blocked.insert(id.to_owned())
    }

    /// Returns `true` if `id` was blocked
    pub(crate) fn remove(&self, id: &str) -> bool {
        self.blocked.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.blocked.contains(id)
    }

    /// Blocked sources in no particular order
    pub fn snapshot(&self) -> Vec<String> {
        self.blocked.iter().map(|id| id.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.blocked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}
