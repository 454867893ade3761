//! LDAP directory source.
//!
//! Reads user principals and their group memberships from an LDAP server
//! and exposes them through [`dirsync_core::DirectorySource`]. All read
//! failures are fatal to the run.

pub mod config;
pub mod reader;

pub use config::LdapConfig;
pub use reader::LdapDirectory;
