//! Remote API Client abstraction
//!
//! Transport, authentication and request marshaling live behind these traits;
//! the reconciliation core only sees typed objects and [`ApiError`]s.

use crate::error::ApiError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a remote object, as returned by a create call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// Provider-specific object ID
    pub id: String,

    /// Object type (e.g., "volume", "share", "route-table")
    pub kind: String,
}

impl ResourceHandle {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }
}

/// Renders as `kind:id`
impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A pool member that may be claimed by an allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationCandidate {
    pub object_id: String,

    /// Project that owns the object, if the remote reports one
    pub owner_project_id: Option<String>,

    pub display_name: String,
}

impl AllocationCandidate {
    pub fn new(object_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            owner_project_id: None,
            display_name: display_name.into(),
        }
    }

    pub fn with_owner(mut self, project_id: impl Into<String>) -> Self {
        self.owner_project_id = Some(project_id.into());
        self
    }
}

/// The association record claiming one pool member for one requester
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: String,
    pub object_id: String,
    pub requester_id: String,
    pub created_at: DateTime<Utc>,
}

/// Remote operations the optimistic allocator needs
///
/// The remote store offers list/create/delete but no compare-and-swap, so
/// exclusivity has to be established by the caller.
#[async_trait]
pub trait AllocationApi: Send + Sync {
    /// List the whole candidate pool
    async fn list_candidates(&self) -> Result<Vec<AllocationCandidate>, ApiError>;

    /// List allocations, optionally scoped to a single object
    async fn list_allocations(&self, object_id: Option<&str>)
    -> Result<Vec<Allocation>, ApiError>;

    /// Create an allocation of `object_id` for `requester_id`
    async fn create_allocation(
        &self,
        object_id: &str,
        requester_id: &str,
    ) -> Result<Allocation, ApiError>;

    /// Delete an allocation by its own ID
    async fn delete_allocation(&self, allocation_id: &str) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        let handle = ResourceHandle::new("volume", "vol-123");
        assert_eq!(handle.to_string(), "volume:vol-123");
    }

    #[test]
    fn test_candidate_owner() {
        let candidate = AllocationCandidate::new("obj-1", "share-a").with_owner("proj-9");
        assert_eq!(candidate.owner_project_id.as_deref(), Some("proj-9"));
    }
}
