//! Read-only vault inspection.

use crate::store::{ArchiveStore, StoreError, VaultInfo};
use crate::utils::errors::{ArchiveError, Result};
use tracing::info;

/// Fetch aggregate metadata for `vault`. Never touches the manifest.
pub async fn describe_vault(store: &dyn ArchiveStore, vault: &str) -> Result<VaultInfo> {
    info!("Getting vault information for {}", vault);

    store.describe_vault(vault).await.map_err(|e| match e {
        StoreError::NotFound(_) => ArchiveError::VaultNotFound(vault.to_string()),
        other => ArchiveError::Store(other),
    })
}
