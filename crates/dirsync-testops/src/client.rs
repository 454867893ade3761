//! TestOps HTTP client (reqwest-based).

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use dirsync_core::{
    GatewayError, GatewayResult, NewUser, Page, PageCursor, RemoteGroup, RemoteId, RemoteUser,
    TestOpsGateway, UserChanges,
};

use crate::auth::TestOpsAuth;
use crate::config::TestOpsConfig;
use crate::models::{
    AddMemberRequest, CreateGroupRequest, CreateUserRequest, GroupDto, ListResponse,
    PatchUserRequest, UserDto,
};

/// HTTP gateway to a TestOps instance.
///
/// Wraps `reqwest::Client` with the API's endpoints, authentication, and
/// translation of HTTP failures into [`GatewayError`].
#[derive(Debug, Clone)]
pub struct TestOpsClient {
    base_url: String,
    auth: TestOpsAuth,
    http_client: Client,
    page_size: usize,
    idempotency_keys: bool,
}

impl TestOpsClient {
    /// Build a client from connection settings.
    pub fn new(config: TestOpsConfig) -> GatewayResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.insecure)
            .user_agent(concat!("dirsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Protocol(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(config, http_client))
    }

    /// Build a client around a pre-built `reqwest::Client` (for testing).
    #[must_use]
    pub fn with_http_client(config: TestOpsConfig, http_client: Client) -> Self {
        // Normalize base URL: strip trailing slash.
        let base_url = config.endpoint.trim_end_matches('/').to_string();
        Self {
            base_url,
            auth: config.auth,
            http_client,
            page_size: config.page_size,
            idempotency_keys: config.idempotency_keys,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ── Internal HTTP methods ─────────────────────────────────────────

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> GatewayResult<T> {
        let response = self
            .auth
            .apply(builder)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if status.is_success() {
            let body = response.text().await.map_err(request_error)?;
            serde_json::from_str(&body)
                .map_err(|e| GatewayError::Protocol(format!("failed to parse response: {e}")))
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Send a request whose success response carries no useful body.
    async fn send_empty(&self, builder: RequestBuilder) -> GatewayResult<()> {
        let response = self
            .auth
            .apply(builder)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn list_page<D>(&self, path: &str, cursor: Option<&str>) -> GatewayResult<ListResponse<D>>
    where
        D: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("TestOps GET {} (cursor={:?})", url, cursor);
        let mut builder = self
            .http_client
            .get(&url)
            .query(&[("limit", self.page_size.to_string())]);
        if let Some(cursor) = cursor {
            builder = builder.query(&[("cursor", cursor)]);
        }
        self.send(builder).await
    }

    async fn find_one<D>(&self, path: &str, param: (&str, &str)) -> GatewayResult<Option<D>>
    where
        D: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("TestOps GET {} ({}={})", url, param.0, param.1);
        let builder = self
            .http_client
            .get(&url)
            .query(&[param, ("limit", "1")]);
        let response: ListResponse<D> = self.send(builder).await?;
        Ok(response.items.into_iter().next())
    }
}

fn to_page<D, T: From<D>>(response: ListResponse<D>) -> Page<T> {
    Page {
        items: response.items.into_iter().map(T::from).collect(),
        next: match response.next_cursor {
            Some(cursor) => PageCursor::More(cursor),
            None => PageCursor::Done,
        },
    }
}

fn request_error(error: reqwest::Error) -> GatewayError {
    let message = error.to_string();
    GatewayError::network_with_source(message, error)
}

async fn error_from_response(response: reqwest::Response) -> GatewayError {
    let status = response.status();

    // Retry-After header accompanies rate-limit responses.
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            warn!("TestOps rate limited, retry after {:?}s", retry_after);
            GatewayError::RateLimited {
                retry_after_secs: retry_after,
            }
        }
        StatusCode::NOT_FOUND => GatewayError::NotFound(body),
        StatusCode::CONFLICT => GatewayError::Conflict(body),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GatewayError::AuthFailed(format!("authentication failed ({status}): {body}"))
        }
        _ if status.is_server_error() => GatewayError::ServerError {
            status: status.as_u16(),
            detail: if body.is_empty() {
                format!("HTTP {status}")
            } else {
                body
            },
        },
        _ if status.is_client_error() => {
            GatewayError::ValidationFailed(format!("HTTP {status}: {body}"))
        }
        _ => GatewayError::Protocol(format!("unexpected status {status}: {body}")),
    }
}

#[async_trait]
impl TestOpsGateway for TestOpsClient {
    async fn list_users(&self, cursor: Option<&str>) -> GatewayResult<Page<RemoteUser>> {
        let response: ListResponse<UserDto> = self.list_page("/api/v2/users", cursor).await?;
        Ok(to_page(response))
    }

    async fn list_groups(&self, cursor: Option<&str>) -> GatewayResult<Page<RemoteGroup>> {
        let response: ListResponse<GroupDto> = self.list_page("/api/v2/groups", cursor).await?;
        Ok(to_page(response))
    }

    async fn create_user(
        &self,
        user: &NewUser,
        idempotency_key: &str,
    ) -> GatewayResult<RemoteUser> {
        let url = self.url("/api/v2/users");
        debug!("TestOps POST {} (external_id={})", url, user.external_id);
        let mut builder = self
            .http_client
            .post(&url)
            .json(&CreateUserRequest::from(user));
        if self.idempotency_keys {
            builder = builder.header("Idempotency-Key", idempotency_key);
        }
        let created: UserDto = self.send(builder).await?;
        Ok(created.into())
    }

    async fn update_user(&self, id: &RemoteId, changes: &UserChanges) -> GatewayResult<()> {
        let url = self.url(&format!("/api/v2/users/{id}"));
        debug!("TestOps PATCH {}", url);
        let builder = self
            .http_client
            .patch(&url)
            .json(&PatchUserRequest::from(changes));
        self.send_empty(builder).await
    }

    async fn delete_user(&self, id: &RemoteId) -> GatewayResult<()> {
        let url = self.url(&format!("/api/v2/users/{id}"));
        debug!("TestOps DELETE {}", url);
        self.send_empty(self.http_client.delete(&url)).await
    }

    async fn create_group(&self, name: &str, idempotency_key: &str) -> GatewayResult<RemoteGroup> {
        let url = self.url("/api/v2/groups");
        debug!("TestOps POST {} (name={})", url, name);
        let mut builder = self
            .http_client
            .post(&url)
            .json(&CreateGroupRequest { name });
        if self.idempotency_keys {
            builder = builder.header("Idempotency-Key", idempotency_key);
        }
        let created: GroupDto = self.send(builder).await?;
        Ok(created.into())
    }

    async fn add_member(&self, group: &RemoteId, user: &RemoteId) -> GatewayResult<()> {
        let url = self.url(&format!("/api/v2/groups/{group}/members"));
        debug!("TestOps POST {} (user={})", url, user);
        let builder = self
            .http_client
            .post(&url)
            .json(&AddMemberRequest {
                user_id: user.as_str(),
            });
        self.send_empty(builder).await
    }

    async fn remove_member(&self, group: &RemoteId, user: &RemoteId) -> GatewayResult<()> {
        let url = self.url(&format!("/api/v2/groups/{group}/members/{user}"));
        debug!("TestOps DELETE {}", url);
        self.send_empty(self.http_client.delete(&url)).await
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> GatewayResult<Option<RemoteUser>> {
        let found: Option<UserDto> = self
            .find_one("/api/v2/users", ("externalId", external_id))
            .await?;
        Ok(found.map(Into::into))
    }

    async fn find_group_by_name(&self, name: &str) -> GatewayResult<Option<RemoteGroup>> {
        let found: Option<GroupDto> = self.find_one("/api/v2/groups", ("name", name)).await?;
        Ok(found.map(Into::into))
    }

    fn supports_idempotency_keys(&self) -> bool {
        self.idempotency_keys
    }
}
