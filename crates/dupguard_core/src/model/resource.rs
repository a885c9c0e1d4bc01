//! Resource domain model.
//!
//! # Responsibility
//! - Define the persisted record guarded by the creation services.
//! - Define the ephemeral request shape callers submit.
//!
//! # Invariants
//! - `id` is generated once on creation and never reused or changed.
//! - `name` is the uniqueness key: no two committed resources share it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier assigned to a resource on creation.
pub type ResourceId = Uuid;

/// Persisted resource record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    /// Human-chosen uniqueness key.
    pub name: String,
    /// Free-form descriptive content.
    pub content: String,
}

impl Resource {
    /// Creates a new resource with a generated stable ID.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name, content)
    }

    /// Creates a resource with a caller-provided ID.
    ///
    /// Used when rebuilding records read back from storage.
    pub fn with_id(id: ResourceId, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Caller input for one creation. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationRequest {
    pub name: String,
    pub content: String,
}

impl CreationRequest {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Resource;

    #[test]
    fn new_resources_get_distinct_ids() {
        let first = Resource::new("item", "a");
        let second = Resource::new("item", "a");
        assert_ne!(first.id, second.id);
        assert_eq!(first.name, second.name);
    }
}
