//! Store key layout.

use crate::domain::RequestId;

pub const DEFAULT_PREFIX: &str = "htq";

/// Namespaced keys: `{prefix}:requests:{id}`, `{prefix}:responses:{id}` and
/// the queue list `{prefix}:send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    prefix: String,
}

impl Keyspace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn request(&self, id: RequestId) -> String {
        format!("{}:requests:{id}", self.prefix)
    }

    pub fn response(&self, id: RequestId) -> String {
        format!("{}:responses:{id}", self.prefix)
    }

    pub fn queue(&self) -> String {
        format!("{}:send", self.prefix)
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}
