use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::models::{LicenseTier, Limit, ResourceKind};

/// key: usage-snapshot -> per-organization counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub organization_id: i32,
    pub users: u64,
    pub incidents: u64,
    pub assets: u64,
    pub runbooks: u64,
    pub templates: u64,
    pub storage_mb: u64,
    pub fetched_at: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn empty(organization_id: i32) -> Self {
        Self {
            organization_id,
            users: 0,
            incidents: 0,
            assets: 0,
            runbooks: 0,
            templates: 0,
            storage_mb: 0,
            fetched_at: Utc::now(),
        }
    }

    pub fn get(&self, resource: ResourceKind) -> u64 {
        match resource {
            ResourceKind::Users => self.users,
            ResourceKind::Incidents => self.incidents,
            ResourceKind::Assets => self.assets,
            ResourceKind::Runbooks => self.runbooks,
            ResourceKind::Templates => self.templates,
            ResourceKind::StorageMb => self.storage_mb,
        }
    }

    pub fn set(&mut self, resource: ResourceKind, quantity: u64) {
        let slot = match resource {
            ResourceKind::Users => &mut self.users,
            ResourceKind::Incidents => &mut self.incidents,
            ResourceKind::Assets => &mut self.assets,
            ResourceKind::Runbooks => &mut self.runbooks,
            ResourceKind::Templates => &mut self.templates,
            ResourceKind::StorageMb => &mut self.storage_mb,
        };
        *slot = quantity;
    }
}

/// Result of a guarded counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    Applied { previous: u64, current: u64 },
    Rejected { current: u64 },
}

/// key: usage-store -> counting collaborator + tier lookup
///
/// The authoritative source of usage counts and organization tiers. Implementations
/// must make `try_increment` a single atomic step so concurrent reservations cannot
/// both pass the ceiling.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn usage_summary(&self, organization_id: i32) -> Result<UsageSnapshot>;

    /// `None` when the organization is unknown.
    async fn organization_tier(&self, organization_id: i32) -> Result<Option<LicenseTier>>;

    async fn set_organization_tier(&self, organization_id: i32, tier: LicenseTier) -> Result<()>;

    /// Adds `amount` to the counter only if the new total stays within `limit`.
    async fn try_increment(
        &self,
        organization_id: i32,
        resource: ResourceKind,
        amount: u64,
        limit: Limit,
    ) -> Result<IncrementOutcome>;

    /// Subtracts `amount`, saturating at zero. Returns the new total.
    async fn release(&self, organization_id: i32, resource: ResourceKind, amount: u64)
        -> Result<u64>;
}

/// Process-local store backed by `DashMap`; used for `USAGE_STORE=memory` and tests.
#[derive(Default)]
pub struct InMemoryUsageStore {
    tiers: DashMap<i32, LicenseTier>,
    counters: DashMap<(i32, ResourceKind), u64>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_organization(self, organization_id: i32, tier: LicenseTier) -> Self {
        self.tiers.insert(organization_id, tier);
        self
    }

    pub fn with_usage(self, organization_id: i32, resource: ResourceKind, quantity: u64) -> Self {
        self.counters.insert((organization_id, resource), quantity);
        self
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn usage_summary(&self, organization_id: i32) -> Result<UsageSnapshot> {
        if !self.tiers.contains_key(&organization_id) {
            return Err(anyhow!("organization {organization_id} has no usage record"));
        }
        let mut snapshot = UsageSnapshot::empty(organization_id);
        for resource in ResourceKind::ALL {
            let quantity = self
                .counters
                .get(&(organization_id, resource))
                .map(|entry| *entry)
                .unwrap_or(0);
            snapshot.set(resource, quantity);
        }
        Ok(snapshot)
    }

    async fn organization_tier(&self, organization_id: i32) -> Result<Option<LicenseTier>> {
        Ok(self.tiers.get(&organization_id).map(|entry| *entry))
    }

    async fn set_organization_tier(&self, organization_id: i32, tier: LicenseTier) -> Result<()> {
        self.tiers.insert(organization_id, tier);
        Ok(())
    }

    async fn try_increment(
        &self,
        organization_id: i32,
        resource: ResourceKind,
        amount: u64,
        limit: Limit,
    ) -> Result<IncrementOutcome> {
        // The entry guard holds the shard lock for the whole read-compare-write.
        let mut entry = self.counters.entry((organization_id, resource)).or_insert(0);
        let previous = *entry;
        let next = previous.saturating_add(amount);
        if !limit.admits(next) {
            return Ok(IncrementOutcome::Rejected { current: previous });
        }
        *entry = next;
        Ok(IncrementOutcome::Applied {
            previous,
            current: next,
        })
    }

    async fn release(
        &self,
        organization_id: i32,
        resource: ResourceKind,
        amount: u64,
    ) -> Result<u64> {
        let mut entry = self.counters.entry((organization_id, resource)).or_insert(0);
        *entry = entry.saturating_sub(amount);
        Ok(*entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn increments_stop_at_the_ceiling() {
        let store = InMemoryUsageStore::new()
            .with_organization(1, LicenseTier::Starter)
            .with_usage(1, ResourceKind::Users, 4);

        let first = store
            .try_increment(1, ResourceKind::Users, 1, Limit::Finite(5))
            .await
            .unwrap();
        assert_eq!(
            first,
            IncrementOutcome::Applied {
                previous: 4,
                current: 5
            }
        );

        let second = store
            .try_increment(1, ResourceKind::Users, 1, Limit::Finite(5))
            .await
            .unwrap();
        assert_eq!(second, IncrementOutcome::Rejected { current: 5 });
    }

    #[tokio::test]
    async fn concurrent_reservations_never_overshoot() {
        let store = Arc::new(InMemoryUsageStore::new().with_organization(9, LicenseTier::Starter));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_increment(9, ResourceKind::Assets, 1, Limit::Finite(10))
                    .await
                    .unwrap()
            }));
        }
        let mut applied = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), IncrementOutcome::Applied { .. }) {
                applied += 1;
            }
        }
        assert_eq!(applied, 10);
        let snapshot = store.usage_summary(9).await.unwrap();
        assert_eq!(snapshot.assets, 10);
    }

    #[tokio::test]
    async fn release_saturates_at_zero() {
        let store = InMemoryUsageStore::new()
            .with_organization(2, LicenseTier::Professional)
            .with_usage(2, ResourceKind::Templates, 3);
        assert_eq!(store.release(2, ResourceKind::Templates, 2).await.unwrap(), 1);
        assert_eq!(store.release(2, ResourceKind::Templates, 5).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_organization_has_no_summary() {
        let store = InMemoryUsageStore::new();
        assert!(store.usage_summary(404).await.is_err());
        assert_eq!(store.organization_tier(404).await.unwrap(), None);
    }
}
