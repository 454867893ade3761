//! Core entity types shared between the directory side and the remote side.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A user principal as read from the directory.
///
/// Immutable within a run. The `external_id` is the sole correlation key
/// between the directory and remote entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryPrincipal {
    /// Unique, stable identifier across runs (directory uid attribute).
    pub external_id: String,
    /// Human-readable display name.
    pub display_name: String,
    /// Primary email address.
    pub email: String,
    /// Names of the groups this principal belongs to.
    ///
    /// `BTreeSet` keeps membership iteration deterministic, which in turn
    /// keeps generated plans deterministic for identical snapshots.
    pub groups: BTreeSet<String>,
}

/// Opaque identifier assigned by the remote system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub String);

impl RemoteId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user as it exists in the remote system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUser {
    /// Remote identifier, opaque to the engine.
    pub id: RemoteId,
    /// Correlation key back to the directory. Absent for users created
    /// manually in the remote system.
    pub external_id: Option<String>,
    pub display_name: String,
    pub email: String,
    /// Whether this user is owned by the sync engine. Unmanaged users are
    /// never targeted by any generated change.
    pub managed: bool,
}

impl RemoteUser {
    /// Derive the managed flag from correlation key presence.
    ///
    /// A remote user carrying an `external_id` was created by the engine;
    /// one without it was created manually and must be left alone.
    #[must_use]
    pub fn managed_by_correlation(external_id: &Option<String>) -> bool {
        external_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// A group as it exists in the remote system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteGroup {
    pub id: RemoteId,
    /// Group name, globally unique in the remote system.
    pub name: String,
    /// Whether this group is owned by the sync engine.
    pub managed: bool,
    /// Remote user ids of the current members.
    pub members: BTreeSet<RemoteId>,
}

/// Immutable snapshot of the remote state, assembled once per run by
/// draining the gateway's paginated listings to exhaustion.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    pub users: Vec<RemoteUser>,
    pub groups: Vec<RemoteGroup>,
}

/// Opaque pagination cursor returned by the remote system.
///
/// Never assume a fixed page count: a listing is exhausted only when the
/// remote returns [`PageCursor::Done`] (or a short page, which gateways
/// translate to `Done`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// More pages follow; pass the token back to fetch the next one.
    More(String),
    /// Listing exhausted.
    Done,
}

/// One page of a remote listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: PageCursor,
}

impl<T> Page<T> {
    /// A final page carrying the given items.
    #[must_use]
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next: PageCursor::Done,
        }
    }
}

/// Payload for a user creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub external_id: String,
    pub display_name: String,
    pub email: String,
}

/// Changed fields for a user update. `None` means "leave untouched".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.email.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_flag_requires_nonempty_external_id() {
        assert!(RemoteUser::managed_by_correlation(&Some("u1".into())));
        assert!(!RemoteUser::managed_by_correlation(&Some(String::new())));
        assert!(!RemoteUser::managed_by_correlation(&None));
    }

    #[test]
    fn user_changes_empty() {
        assert!(UserChanges::default().is_empty());
        assert!(!UserChanges {
            display_name: Some("A".into()),
            email: None,
        }
        .is_empty());
    }

    #[test]
    fn remote_id_roundtrip() {
        let id = RemoteId::new("42");
        assert_eq!(id.as_str(), "42");
        assert_eq!(id.to_string(), "42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"42\"");
    }
}
