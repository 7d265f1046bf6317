//! Imported pool addresses, persisted as a JSON file.

use crate::errors::Result;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    pools: BTreeSet<Address>,
}

#[derive(Debug)]
pub struct PoolRegistry {
    path: PathBuf,
    pools: BTreeSet<Address>,
}

impl PoolRegistry {
    /// Read the registry at `path`. A missing file is an empty registry.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pools = if fs::try_exists(&path).await? {
            let raw = fs::read(&path).await?;
            serde_json::from_slice::<RegistryFile>(&raw)?.pools
        } else {
            debug!(path = %path.display(), "[INIT] no pool registry yet");
            BTreeSet::new()
        };
        info!(path = %path.display(), pools = pools.len(), "[INIT] pool registry loaded");
        Ok(Self { path, pools })
    }

    pub fn addresses(&self) -> impl Iterator<Item = Address> + '_ {
        self.pools.iter().copied()
    }

    pub fn contains(&self, pool: &Address) -> bool {
        self.pools.contains(pool)
    }

    /// Add pools and write the file if anything new was added.
    /// Returns the number of newly adopted pools.
    pub async fn adopt(&mut self, pools: impl IntoIterator<Item = Address>) -> Result<usize> {
        let added = pools
            .into_iter()
            .filter(|pool| self.pools.insert(*pool))
            .count();
        if added > 0 {
            self.save().await?;
            info!(added, total = self.pools.len(), "[INIT] pools adopted");
        }
        Ok(added)
    }

    async fn save(&self) -> Result<()> {
        let file = RegistryFile {
            pools: self.pools.clone(),
        };
        let raw = serde_json::to_vec_pretty(&file)?;
        fs::write(&self.path, raw).await?;
        Ok(())
    }
}
