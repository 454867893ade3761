//! Shared data model and collaborator interfaces for dirsync.
//!
//! The engine (`dirsync-engine`) consumes two collaborators through the
//! traits defined here: a [`DirectorySource`] (the source of truth for
//! identity and group membership) and a [`TestOpsGateway`] (the remote
//! test-management platform being converged).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::SyncSettings;
pub use error::{DirectoryError, DirectoryResult, GatewayError, GatewayResult};
pub use traits::{DirectorySource, TestOpsGateway};
pub use types::{
    DirectoryPrincipal, NewUser, Page, PageCursor, RemoteGroup, RemoteId, RemoteSnapshot,
    RemoteUser, UserChanges,
};
