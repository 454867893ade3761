//! Request authentication.

use reqwest::RequestBuilder;

/// Credentials for the TestOps API.
///
/// Basic auth carries a username and an API token as the password, which is
/// how TestOps service accounts are provisioned; bearer tokens are accepted
/// for deployments fronted by an OAuth2 proxy.
#[derive(Debug, Clone)]
pub enum TestOpsAuth {
    Basic { username: String, token: String },
    Bearer { token: String },
}

impl TestOpsAuth {
    #[must_use]
    pub fn basic(username: impl Into<String>, token: impl Into<String>) -> Self {
        TestOpsAuth::Basic {
            username: username.into(),
            token: token.into(),
        }
    }

    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        TestOpsAuth::Bearer {
            token: token.into(),
        }
    }

    /// Attach credentials to an outgoing request.
    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self {
            TestOpsAuth::Basic { username, token } => builder.basic_auth(username, Some(token)),
            TestOpsAuth::Bearer { token } => builder.bearer_auth(token),
        }
    }
}
