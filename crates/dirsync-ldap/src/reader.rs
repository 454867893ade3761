//! LDAP search and entry mapping.

use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use regex::Regex;
use tracing::{debug, info, warn};

use dirsync_core::{DirectoryError, DirectoryPrincipal, DirectoryResult, DirectorySource};

use crate::config::LdapConfig;

/// LDAP result code for invalid credentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// Directory source backed by an LDAP server.
///
/// A fresh connection is established per listing; the run reads the
/// directory exactly once, so pooling buys nothing.
pub struct LdapDirectory {
    config: LdapConfig,
    /// Only group names matching this pattern are carried onto principals.
    group_filter: Option<Regex>,
}

impl LdapDirectory {
    #[must_use]
    pub fn new(config: LdapConfig) -> Self {
        Self {
            config,
            group_filter: None,
        }
    }

    /// Restrict synced groups to names matching the pattern.
    #[must_use]
    pub fn with_group_filter(mut self, filter: Regex) -> Self {
        self.group_filter = Some(filter);
        self
    }

    async fn connect(&self) -> DirectoryResult<Ldap> {
        let url = self.config.url();
        debug!(url = %url, "connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(std::time::Duration::from_secs(
                self.config.connect_timeout_secs,
            ))
            .set_starttls(self.config.use_starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| {
                DirectoryError::unavailable_with_source(
                    format!("failed to connect to LDAP server at {url}"),
                    e,
                )
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        let password = self.config.bind_password.as_deref().unwrap_or("");
        debug!(bind_dn = %self.config.bind_dn, "performing LDAP bind");

        let result = ldap
            .simple_bind(&self.config.bind_dn, password)
            .await
            .map_err(|e| {
                DirectoryError::unavailable_with_source(
                    format!("LDAP bind failed for {}", self.config.bind_dn),
                    e,
                )
            })?;

        if result.rc != 0 {
            if result.rc == RC_INVALID_CREDENTIALS {
                return Err(DirectoryError::AuthFailed);
            }
            return Err(DirectoryError::unavailable(format!(
                "LDAP bind failed with code {}: {}",
                result.rc, result.text
            )));
        }

        info!(host = %self.config.host, "LDAP connection established");
        Ok(ldap)
    }
}

#[async_trait]
impl DirectorySource for LdapDirectory {
    async fn list_principals(&self, base_filter: &str) -> DirectoryResult<Vec<DirectoryPrincipal>> {
        let mut ldap = self.connect().await?;

        let attrs = vec![
            self.config.uid_attribute.as_str(),
            self.config.name_attribute.as_str(),
            self.config.mail_attribute.as_str(),
            self.config.member_of_attribute.as_str(),
        ];

        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(self.config.page_size as i32)),
        ];

        let mut search = ldap
            .streaming_search_with(
                adapters,
                &self.config.base_dn,
                Scope::Subtree,
                base_filter,
                attrs,
            )
            .await
            .map_err(|e| {
                DirectoryError::unavailable_with_source("LDAP search failed to start", e)
            })?;

        let mut principals = Vec::new();
        let mut skipped = 0usize;
        while let Some(entry) = search.next().await.map_err(|e| {
            DirectoryError::unavailable_with_source("LDAP search stream failed", e)
        })? {
            let entry = SearchEntry::construct(entry);
            match principal_from_entry(&entry, &self.config, self.group_filter.as_ref()) {
                Some(principal) => principals.push(principal),
                None => skipped += 1,
            }
        }

        search
            .finish()
            .await
            .success()
            .map_err(|e| DirectoryError::unavailable_with_source("LDAP search failed", e))?;

        info!(
            principals = principals.len(),
            skipped, "directory listing complete"
        );
        Ok(principals)
    }
}

/// Map one LDAP entry onto a principal.
///
/// Entries missing the uid or mail attribute cannot be synced and are
/// dropped with a warning. The display name falls back to the uid.
fn principal_from_entry(
    entry: &SearchEntry,
    config: &LdapConfig,
    group_filter: Option<&Regex>,
) -> Option<DirectoryPrincipal> {
    let first = |attr: &str| {
        entry
            .attrs
            .get(attr)
            .and_then(|values| values.first())
            .map(String::as_str)
    };

    let Some(external_id) = first(&config.uid_attribute) else {
        warn!(dn = %entry.dn, attr = %config.uid_attribute, "entry has no uid attribute, skipping");
        return None;
    };
    let Some(email) = first(&config.mail_attribute) else {
        warn!(
            dn = %entry.dn,
            attr = %config.mail_attribute,
            "entry has no mail attribute, skipping"
        );
        return None;
    };
    let display_name = first(&config.name_attribute).unwrap_or(external_id);

    let groups = entry
        .attrs
        .get(&config.member_of_attribute)
        .map(|dns| {
            dns.iter()
                .filter_map(|dn| group_name_from_dn(dn))
                .filter(|name| group_filter.map_or(true, |f| f.is_match(name)))
                .collect()
        })
        .unwrap_or_default();

    Some(DirectoryPrincipal {
        external_id: external_id.to_string(),
        display_name: display_name.to_string(),
        email: email.to_string(),
        groups,
    })
}

/// Extract the group name from a membership DN, i.e. the value of the
/// first RDN of `cn=QA Team,ou=groups,dc=example,dc=com`.
fn group_name_from_dn(dn: &str) -> Option<String> {
    let mut rdn_end = dn.len();
    let mut prev_escape = false;
    for (i, ch) in dn.char_indices() {
        if ch == ',' && !prev_escape {
            rdn_end = i;
            break;
        }
        prev_escape = ch == '\\' && !prev_escape;
    }
    let rdn = &dn[..rdn_end];
    let (_, value) = rdn.split_once('=')?;
    let value = value.trim().replace("\\,", ",");
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
