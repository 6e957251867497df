//! Rule persistence seam.
//!
//! The engine keeps rules in memory and calls [`ConfigStore::persist`]
//! after every mutation. [`MemoryStore`] backs tests and embedders that
//! persist elsewhere; [`JsonFileStore`] writes one JSON document per
//! community.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::platform::CommunityId;
use crate::registry::ProtectionRule;

/// Durable storage for protection rules, keyed by community.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Loads the rule snapshot for a community. Unknown communities
    /// yield an empty snapshot.
    async fn load(&self, community: CommunityId) -> Result<Vec<ProtectionRule>, StoreError>;

    /// Replaces the stored snapshot for a community.
    async fn persist(
        &self,
        community: CommunityId,
        rules: &[ProtectionRule],
    ) -> Result<(), StoreError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: DashMap<CommunityId, Vec<ProtectionRule>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load(&self, community: CommunityId) -> Result<Vec<ProtectionRule>, StoreError> {
        Ok(self
            .snapshots
            .get(&community)
            .map(|rules| rules.clone())
            .unwrap_or_default())
    }

    async fn persist(
        &self,
        community: CommunityId,
        rules: &[ProtectionRule],
    ) -> Result<(), StoreError> {
        self.snapshots.insert(community, rules.to_vec());
        Ok(())
    }
}

/// File-backed store writing `<dir>/<community>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Creates a store rooted at `dir`. The directory is created lazily
    /// on first persist.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, community: CommunityId) -> PathBuf {
        self.dir.join(format!("{community}.json"))
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn load(&self, community: CommunityId) -> Result<Vec<ProtectionRule>, StoreError> {
        let path = self.path_for(community);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn persist(
        &self,
        community: CommunityId,
        rules: &[ProtectionRule],
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(rules)?;
        tokio::fs::write(self.path_for(community), bytes).await?;
        Ok(())
    }
}
