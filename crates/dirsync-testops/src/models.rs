//! Wire representations of the TestOps API.
//!
//! The API uses camelCase JSON. Conversions into the engine's entity types
//! live here so the client stays a thin HTTP layer.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use dirsync_core::{NewUser, RemoteGroup, RemoteId, RemoteUser, UserChanges};

/// One page of a listing response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// Opaque continuation token; absent on the final page.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
}

impl From<UserDto> for RemoteUser {
    fn from(dto: UserDto) -> Self {
        // Correlation key presence is the managed marker: only the sync
        // engine writes externalId.
        let managed = RemoteUser::managed_by_correlation(&dto.external_id);
        RemoteUser {
            id: RemoteId::new(dto.id),
            external_id: dto.external_id,
            display_name: dto.display_name,
            email: dto.email,
            managed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDto {
    pub id: String,
    pub name: String,
    /// Set by the server on groups created through the sync API.
    #[serde(default)]
    pub managed: bool,
    /// Remote user ids of the current members.
    #[serde(default)]
    pub member_ids: Vec<String>,
}

impl From<GroupDto> for RemoteGroup {
    fn from(dto: GroupDto) -> Self {
        RemoteGroup {
            id: RemoteId::new(dto.id),
            name: dto.name,
            managed: dto.managed,
            members: dto
                .member_ids
                .into_iter()
                .map(RemoteId::new)
                .collect::<BTreeSet<_>>(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest<'a> {
    pub external_id: &'a str,
    pub display_name: &'a str,
    pub email: &'a str,
}

impl<'a> From<&'a NewUser> for CreateUserRequest<'a> {
    fn from(user: &'a NewUser) -> Self {
        Self {
            external_id: &user.external_id,
            display_name: &user.display_name,
            email: &user.email,
        }
    }
}

/// Partial user update; omitted fields stay untouched server-side.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchUserRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<&'a str>,
}

impl<'a> From<&'a UserChanges> for PatchUserRequest<'a> {
    fn from(changes: &'a UserChanges) -> Self {
        Self {
            display_name: changes.display_name.as_deref(),
            email: changes.email.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest<'a> {
    pub name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest<'a> {
    pub user_id: &'a str,
}
