//! Gateway configuration.

use crate::auth::TestOpsAuth;

/// Connection settings for the TestOps API.
#[derive(Debug, Clone)]
pub struct TestOpsConfig {
    /// Base URL of the TestOps instance (e.g. `https://testops.example.com`).
    pub endpoint: String,
    /// API credentials.
    pub auth: TestOpsAuth,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Skip TLS certificate verification. Only for instances with
    /// self-signed certificates.
    pub insecure: bool,
    /// Listing page size requested from the server.
    pub page_size: usize,
    /// Whether the deployment honors `Idempotency-Key` headers on creates.
    /// When false the executor falls back to pre-check-then-act on retries
    /// with unknown outcome.
    pub idempotency_keys: bool,
}

impl TestOpsConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, auth: TestOpsAuth) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth,
            timeout_secs: 30,
            insecure: false,
            page_size: 200,
            idempotency_keys: false,
        }
    }

    #[must_use]
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_idempotency_keys(mut self, enabled: bool) -> Self {
        self.idempotency_keys = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = TestOpsConfig::new("https://testops.example.com", TestOpsAuth::bearer("t"));
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.page_size, 200);
        assert!(!config.insecure);
        assert!(!config.idempotency_keys);
    }
}
