use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use super::catalog::PlanCatalog;
use super::models::{FeatureKey, LicenseTier, Limit, ResourceKind};
use super::usage::UsageSnapshot;

/// key: entitlement-gate -> quota,feature,plan-change decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaReason {
    WithinLimit,
    LimitReached,
    Unlimited,
    TierUnconfigured,
}

/// Outcome of a quota evaluation. Computed per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaDecision {
    pub tier: LicenseTier,
    pub resource: ResourceKind,
    pub allowed: bool,
    pub current: u64,
    pub requested: u64,
    pub limit: Limit,
    pub remaining: Option<u64>,
    pub ratio: f64,
    pub reason: QuotaReason,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanChangeDirection {
    Upgrade,
    Downgrade,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanChange {
    pub from: LicenseTier,
    pub to: LicenseTier,
    pub direction: PlanChangeDirection,
    pub allowed: bool,
    /// Resources whose current usage does not fit the target tier.
    pub violations: Vec<QuotaDecision>,
    pub features_gained: Vec<FeatureKey>,
    pub features_lost: Vec<FeatureKey>,
}

/// Stateless evaluator over an injected [`PlanCatalog`]. Performs no I/O.
#[derive(Debug, Clone)]
pub struct EntitlementGate {
    catalog: Arc<PlanCatalog>,
}

impl EntitlementGate {
    pub fn new(catalog: Arc<PlanCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Can an organization at `current` usage create one more `resource` on `tier`?
    pub fn evaluate_quota(
        &self,
        resource: ResourceKind,
        current: u64,
        tier: LicenseTier,
    ) -> QuotaDecision {
        self.evaluate_quota_for(resource, current, 1, tier)
    }

    /// Generalized check: allowed when `current + requested` stays within the limit.
    /// `requested == 0` is a read-only probe that passes at exactly the limit.
    pub fn evaluate_quota_for(
        &self,
        resource: ResourceKind,
        current: u64,
        requested: u64,
        tier: LicenseTier,
    ) -> QuotaDecision {
        let Some(limit) = self.catalog.limit(tier, resource) else {
            warn!(%tier, %resource, "tier missing from plan catalog; denying");
            return QuotaDecision {
                tier,
                resource,
                allowed: false,
                current,
                requested,
                limit: Limit::Finite(0),
                remaining: Some(0),
                ratio: 1.0,
                reason: QuotaReason::TierUnconfigured,
                notes: vec![format!("entitlements:tier-unconfigured:{tier}")],
            };
        };

        let Limit::Finite(max) = limit else {
            return QuotaDecision {
                tier,
                resource,
                allowed: true,
                current,
                requested,
                limit,
                remaining: None,
                ratio: 0.0,
                reason: QuotaReason::Unlimited,
                notes: vec![format!("entitlements:quota:{resource}:unlimited")],
            };
        };

        let ratio = if max == 0 {
            1.0
        } else {
            current as f64 / max as f64
        };
        let future = current.saturating_add(requested);
        let allowed = future <= max;
        let (reason, note) = if allowed {
            (
                QuotaReason::WithinLimit,
                format!("entitlements:quota:{resource}:{future}/{max}"),
            )
        } else {
            (
                QuotaReason::LimitReached,
                format!("entitlements:quota-exceeded:{resource}"),
            )
        };

        QuotaDecision {
            tier,
            resource,
            allowed,
            current,
            requested,
            limit,
            remaining: Some(max.saturating_sub(current)),
            ratio,
            reason,
            notes: vec![note],
        }
    }

    /// Fails closed: an unconfigured tier has every feature disabled.
    pub fn evaluate_feature(&self, feature: FeatureKey, tier: LicenseTier) -> bool {
        match self.catalog.plan(tier) {
            Some(plan) => plan.features.is_enabled(feature),
            None => {
                warn!(%tier, %feature, "tier missing from plan catalog; feature disabled");
                false
            }
        }
    }

    /// Checks whether current usage fits the target tier. Any change that would leave a
    /// resource over its new ceiling is refused.
    pub fn evaluate_plan_change(
        &self,
        from: LicenseTier,
        to: LicenseTier,
        usage: &UsageSnapshot,
    ) -> PlanChange {
        let direction = match to.cmp(&from) {
            std::cmp::Ordering::Greater => PlanChangeDirection::Upgrade,
            std::cmp::Ordering::Less => PlanChangeDirection::Downgrade,
            std::cmp::Ordering::Equal => PlanChangeDirection::Unchanged,
        };
        let violations: Vec<_> = ResourceKind::ALL
            .into_iter()
            .map(|resource| self.evaluate_quota_for(resource, usage.get(resource), 0, to))
            .filter(|decision| !decision.allowed)
            .collect();
        let (features_gained, features_lost): (Vec<_>, Vec<_>) = FeatureKey::ALL
            .into_iter()
            .filter(|feature| {
                self.evaluate_feature(*feature, from) != self.evaluate_feature(*feature, to)
            })
            .partition(|feature| self.evaluate_feature(*feature, to));

        PlanChange {
            from,
            to,
            direction,
            allowed: violations.is_empty(),
            violations,
            features_gained,
            features_lost,
        }
    }
}
