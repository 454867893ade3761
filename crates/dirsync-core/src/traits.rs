//! Collaborator interfaces consumed by the convergence engine.

use async_trait::async_trait;

use crate::error::{DirectoryResult, GatewayResult};
use crate::types::{
    DirectoryPrincipal, NewUser, Page, RemoteGroup, RemoteId, RemoteUser, UserChanges,
};

/// Read-only source of directory principals (users plus their group
/// memberships).
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// List all principals matching the given base filter.
    ///
    /// Any failure here is fatal to the run: the engine never writes from
    /// an incomplete directory snapshot.
    async fn list_principals(&self, base_filter: &str) -> DirectoryResult<Vec<DirectoryPrincipal>>;
}

/// Authenticated, paginated client for the remote TestOps platform.
///
/// Listings return opaque cursors which must be followed until
/// [`crate::types::PageCursor::Done`]. Write operations return a tagged
/// [`crate::error::GatewayError`] on failure; the engine classifies it for
/// retry.
#[async_trait]
pub trait TestOpsGateway: Send + Sync {
    /// Fetch one page of remote users.
    async fn list_users(&self, cursor: Option<&str>) -> GatewayResult<Page<RemoteUser>>;

    /// Fetch one page of remote groups.
    async fn list_groups(&self, cursor: Option<&str>) -> GatewayResult<Page<RemoteGroup>>;

    /// Create a user. `idempotency_key` is passed to the remote when the
    /// deployment supports natural idempotency (see
    /// [`TestOpsGateway::supports_idempotency_keys`]); otherwise callers
    /// must pre-check before retrying a create whose outcome is unknown.
    async fn create_user(&self, user: &NewUser, idempotency_key: &str)
        -> GatewayResult<RemoteUser>;

    /// Apply changed fields to an existing user.
    async fn update_user(&self, id: &RemoteId, changes: &UserChanges) -> GatewayResult<()>;

    /// Delete a user.
    async fn delete_user(&self, id: &RemoteId) -> GatewayResult<()>;

    /// Create a group, keyed by its globally unique name.
    async fn create_group(&self, name: &str, idempotency_key: &str) -> GatewayResult<RemoteGroup>;

    /// Add a user to a group.
    async fn add_member(&self, group: &RemoteId, user: &RemoteId) -> GatewayResult<()>;

    /// Remove a user from a group.
    async fn remove_member(&self, group: &RemoteId, user: &RemoteId) -> GatewayResult<()>;

    /// Look up a user by correlation key. Used by the executor's
    /// pre-check-then-act path when retrying creates.
    async fn find_user_by_external_id(&self, external_id: &str)
        -> GatewayResult<Option<RemoteUser>>;

    /// Look up a group by name.
    async fn find_group_by_name(&self, name: &str) -> GatewayResult<Option<RemoteGroup>>;

    /// Whether this deployment honors idempotency keys on create calls.
    ///
    /// Capability flag per deployment; when false the engine falls back to
    /// pre-check-then-act before retrying creates.
    fn supports_idempotency_keys(&self) -> bool {
        false
    }
}
