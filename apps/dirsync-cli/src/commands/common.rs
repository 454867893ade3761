//! Connection arguments shared between subcommands.

use clap::Args;
use regex::Regex;
use tracing::info;

use dirsync_core::{DirectoryPrincipal, DirectorySource, RemoteSnapshot};
use dirsync_engine::fetch_remote_snapshot;
use dirsync_ldap::{LdapConfig, LdapDirectory};
use dirsync_testops::{TestOpsAuth, TestOpsClient, TestOpsConfig};

use crate::error::CliResult;

#[derive(Debug, Args)]
pub struct LdapArgs {
    /// LDAP server hostname
    #[arg(long = "ldap-host", env = "LDAP_HOST")]
    pub host: String,

    /// LDAP server port
    #[arg(long = "ldap-port", env = "LDAP_PORT", default_value_t = 389)]
    pub port: u16,

    /// Connect over LDAPS
    #[arg(long = "ldap-ssl", env = "LDAP_SSL")]
    pub ssl: bool,

    /// Upgrade a plain connection with STARTTLS
    #[arg(long = "ldap-starttls", env = "LDAP_STARTTLS")]
    pub starttls: bool,

    /// Base DN for the user search
    #[arg(long = "ldap-base-dn", env = "LDAP_BASE_DN")]
    pub base_dn: String,

    /// Bind DN
    #[arg(long = "ldap-bind-dn", env = "LDAP_BIND_DN")]
    pub bind_dn: String,

    /// Bind password
    #[arg(long = "ldap-bind-password", env = "LDAP_BIND_PASSWORD", hide_env_values = true)]
    pub bind_password: Option<String>,

    /// LDAP filter selecting user entries
    #[arg(
        long = "ldap-filter",
        env = "LDAP_USER_FILTER",
        default_value = "(objectClass=inetOrgPerson)"
    )]
    pub user_filter: String,

    /// Attribute carrying the stable unique identifier
    #[arg(long = "uid-attribute", env = "LDAP_UID_ATTRIBUTE", default_value = "uid")]
    pub uid_attribute: String,

    /// Attribute carrying the display name
    #[arg(long = "name-attribute", env = "LDAP_NAME_ATTRIBUTE", default_value = "cn")]
    pub name_attribute: String,

    /// Attribute carrying the email address
    #[arg(long = "mail-attribute", env = "LDAP_MAIL_ATTRIBUTE", default_value = "mail")]
    pub mail_attribute: String,

    /// Only sync groups whose name matches this regex
    #[arg(long = "group-filter", env = "GROUP_FILTER")]
    pub group_filter: Option<String>,
}

impl LdapArgs {
    fn to_config(&self) -> LdapConfig {
        let mut config = LdapConfig::new(&self.host, &self.base_dn, &self.bind_dn);
        config.port = self.port;
        config.use_ssl = self.ssl;
        config.use_starttls = self.starttls;
        config.bind_password = self.bind_password.clone();
        config.uid_attribute = self.uid_attribute.clone();
        config.name_attribute = self.name_attribute.clone();
        config.mail_attribute = self.mail_attribute.clone();
        config
    }

    /// Read all matching principals from the directory.
    pub async fn read_directory(&self) -> CliResult<Vec<DirectoryPrincipal>> {
        let mut directory = LdapDirectory::new(self.to_config());
        if let Some(pattern) = &self.group_filter {
            directory = directory.with_group_filter(Regex::new(pattern)?);
        }
        let principals = directory.list_principals(&self.user_filter).await?;
        info!(count = principals.len(), "directory principals loaded");
        Ok(principals)
    }
}

#[derive(Debug, Args)]
pub struct TestOpsArgs {
    /// TestOps base URL
    #[arg(long = "testops-endpoint", env = "TESTOPS_ENDPOINT")]
    pub endpoint: String,

    /// Service account username (basic auth)
    #[arg(long = "testops-username", env = "TESTOPS_USERNAME")]
    pub username: Option<String>,

    /// API token: basic auth password, or bearer token when no username is set
    #[arg(long = "testops-token", env = "TESTOPS_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Skip TLS certificate verification
    #[arg(long, env = "TESTOPS_INSECURE")]
    pub insecure: bool,

    /// The deployment honors Idempotency-Key headers on creates
    #[arg(long = "idempotency-keys", env = "TESTOPS_IDEMPOTENCY_KEYS")]
    pub idempotency_keys: bool,
}

impl TestOpsArgs {
    /// Build the gateway client.
    pub fn to_client(&self) -> CliResult<TestOpsClient> {
        let auth = match &self.username {
            Some(username) => TestOpsAuth::basic(username, &self.token),
            None => TestOpsAuth::bearer(&self.token),
        };
        let config = TestOpsConfig::new(&self.endpoint, auth)
            .with_insecure(self.insecure)
            .with_idempotency_keys(self.idempotency_keys);
        Ok(TestOpsClient::new(config)?)
    }
}

/// Fetch the full remote snapshot through the gateway.
pub async fn read_remote(client: &TestOpsClient) -> CliResult<RemoteSnapshot> {
    let snapshot = fetch_remote_snapshot(client).await?;
    info!(
        users = snapshot.users.len(),
        groups = snapshot.groups.len(),
        "remote snapshot loaded"
    );
    Ok(snapshot)
}
