//! Group Sync LDAP -- directory adapters over `ldap3`.
//!
//! Two flavors implement [`DirectoryAdapter`]: Active Directory and generic
//! LDAP. The flavor is chosen from configuration.

pub mod active_directory;
pub mod client;
pub mod dn;
pub mod filter;
pub mod generic;

use std::sync::Arc;

use groupsync_core::config::{DirectoryFlavor, GroupSyncConfig};
use groupsync_core::directory::DirectoryAdapter;
use groupsync_core::error::Result;
use tracing::info;

pub use active_directory::ActiveDirectory;
pub use client::LdapClient;
pub use generic::GenericLdap;

/// Connect to the configured directory and return the adapter for its
/// flavor.
pub async fn connect(config: &GroupSyncConfig) -> Result<Arc<dyn DirectoryAdapter>> {
    let client = LdapClient::connect(&config.ldap).await?;
    let adapter: Arc<dyn DirectoryAdapter> = match config.ldap.flavor {
        DirectoryFlavor::ActiveDirectory => {
            Arc::new(ActiveDirectory::new(client, config.ad.clone()))
        }
        DirectoryFlavor::Generic => Arc::new(GenericLdap::new(client, config.openldap.clone())),
    };
    info!(uri = %config.ldap.uri, flavor = adapter.flavor_name(), "Connected to directory");
    Ok(adapter)
}
