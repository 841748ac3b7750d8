//! Target directory port: resolves target ids to connection parameters and
//! records each target's last-known status.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetscan_model::{ResolvedTarget, Target, TargetHealth, TargetId, TenantId};
use tokio::sync::RwLock;

use crate::error::{Result, ScanError};

#[async_trait]
pub trait TargetDirectory: Send + Sync {
    /// Resolve `ids` for `tenant`, preserving request order. Unknown ids and
    /// ids owned by another tenant are left out.
    async fn resolve_by_ids(
        &self,
        tenant: TenantId,
        ids: &[TargetId],
    ) -> Result<Vec<ResolvedTarget>>;

    async fn update_last_status(
        &self,
        tenant: TenantId,
        id: TargetId,
        status: TargetHealth,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Process-local directory seeded from an inventory.
#[derive(Default)]
pub struct InMemoryTargetDirectory {
    targets: RwLock<HashMap<TargetId, Target>>,
}

impl fmt::Debug for InMemoryTargetDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.targets.try_read().ok().map(|guard| guard.len());
        f.debug_struct("InMemoryTargetDirectory")
            .field("targets", &count)
            .finish()
    }
}

impl InMemoryTargetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        let map = targets.into_iter().map(|t| (t.id, t)).collect();
        Self {
            targets: RwLock::new(map),
        }
    }

    pub async fn insert(&self, target: Target) {
        self.targets.write().await.insert(target.id, target);
    }

    pub async fn get(&self, tenant: TenantId, id: TargetId) -> Option<Target> {
        self.targets
            .read()
            .await
            .get(&id)
            .filter(|target| target.tenant == tenant)
            .cloned()
    }

    pub async fn list(&self, tenant: TenantId) -> Vec<Target> {
        let mut targets: Vec<Target> = self
            .targets
            .read()
            .await
            .values()
            .filter(|target| target.tenant == tenant)
            .cloned()
            .collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        targets
    }
}

#[async_trait]
impl TargetDirectory for InMemoryTargetDirectory {
    async fn resolve_by_ids(
        &self,
        tenant: TenantId,
        ids: &[TargetId],
    ) -> Result<Vec<ResolvedTarget>> {
        let guard = self.targets.read().await;
        let mut seen = HashSet::with_capacity(ids.len());
        Ok(ids
            .iter()
            .filter(|id| seen.insert(**id))
            .filter_map(|id| guard.get(id))
            .filter(|target| target.tenant == tenant)
            .map(Target::resolved)
            .collect())
    }

    async fn update_last_status(
        &self,
        tenant: TenantId,
        id: TargetId,
        status: TargetHealth,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut guard = self.targets.write().await;
        let target = guard
            .get_mut(&id)
            .filter(|target| target.tenant == tenant)
            .ok_or_else(|| ScanError::NotFound(format!("target {id}")))?;
        target.last_status = status;
        target.last_scanned_at = Some(at);
        Ok(())
    }
}
