//! LDAP connection and schema mapping configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the LDAP directory source.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// LDAP server hostname or IP address.
    pub host: String,

    /// LDAP server port (389 for LDAP, 636 for LDAPS).
    #[serde(default = "default_ldap_port")]
    pub port: u16,

    /// Use SSL/TLS (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,

    /// Use STARTTLS upgrade on a plain LDAP connection.
    #[serde(default)]
    pub use_starttls: bool,

    /// Base DN for the user search (e.g. "ou=people,dc=example,dc=com").
    pub base_dn: String,

    /// Bind DN for authentication.
    pub bind_dn: String,

    /// Bind password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<String>,

    /// Attribute carrying the stable unique identifier.
    #[serde(default = "default_uid_attribute")]
    pub uid_attribute: String,

    /// Attribute carrying the display name.
    #[serde(default = "default_name_attribute")]
    pub name_attribute: String,

    /// Attribute carrying the primary email address.
    #[serde(default = "default_mail_attribute")]
    pub mail_attribute: String,

    /// Attribute listing group membership DNs.
    #[serde(default = "default_member_of_attribute")]
    pub member_of_attribute: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Page size for paged search.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("use_starttls", &self.use_starttls)
            .field("base_dn", &self.base_dn)
            .field("bind_dn", &self.bind_dn)
            .field(
                "bind_password",
                &self.bind_password.as_ref().map(|_| "***REDACTED***"),
            )
            .field("uid_attribute", &self.uid_attribute)
            .field("name_attribute", &self.name_attribute)
            .field("mail_attribute", &self.mail_attribute)
            .field("member_of_attribute", &self.member_of_attribute)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("page_size", &self.page_size)
            .finish()
    }
}

fn default_ldap_port() -> u16 {
    389
}

fn default_uid_attribute() -> String {
    "uid".to_string()
}

fn default_name_attribute() -> String {
    "cn".to_string()
}

fn default_mail_attribute() -> String {
    "mail".to_string()
}

fn default_member_of_attribute() -> String {
    "memberOf".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_page_size() -> u32 {
    1000
}

impl LdapConfig {
    /// Create a config with required fields and default attribute mapping.
    pub fn new(
        host: impl Into<String>,
        base_dn: impl Into<String>,
        bind_dn: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_ldap_port(),
            use_ssl: false,
            use_starttls: false,
            base_dn: base_dn.into(),
            bind_dn: bind_dn.into(),
            bind_password: None,
            uid_attribute: default_uid_attribute(),
            name_attribute: default_name_attribute(),
            mail_attribute: default_mail_attribute(),
            member_of_attribute: default_member_of_attribute(),
            connect_timeout_secs: default_connect_timeout_secs(),
            page_size: default_page_size(),
        }
    }

    /// Set the bind password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.bind_password = Some(password.into());
        self
    }

    /// Server URL derived from host, port and TLS mode.
    #[must_use]
    pub fn url(&self) -> String {
        if self.use_ssl {
            format!("ldaps://{}:{}", self.host, self.port)
        } else {
            format!("ldap://{}:{}", self.host, self.port)
        }
    }
}
