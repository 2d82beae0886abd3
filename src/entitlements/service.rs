use std::sync::Arc;

use serde::Serialize;

use super::catalog::ResourceLimits;
use super::gate::{EntitlementGate, PlanChange, QuotaDecision};
use super::models::{FeatureKey, LicenseTier, Limit, ResourceKind};
use super::presentation::{FeaturePresentation, Presenter, QuotaPresentation};
use super::usage::{IncrementOutcome, UsageSnapshot, UsageStore};
use crate::error::{AppError, AppResult};
use crate::telemetry::{self, GateEvent};

/// Decision plus its UI rendering, as returned to both call sites.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaCheck {
    pub decision: QuotaDecision,
    pub presentation: QuotaPresentation,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitlementSummary {
    pub organization_id: i32,
    pub tier: LicenseTier,
    pub usage_available: bool,
    pub usage: Option<UsageSnapshot>,
    pub limits: ResourceLimits,
    pub resources: Vec<QuotaCheck>,
    pub features: Vec<FeaturePresentation>,
}

/// key: entitlement-service -> fetch usage + tier, then evaluate
///
/// All I/O happens here, before the gate is invoked. Writes fail closed when usage
/// cannot be fetched; the read-only summary fails open.
#[derive(Clone)]
pub struct EntitlementService {
    gate: EntitlementGate,
    presenter: Presenter,
    store: Arc<dyn UsageStore>,
}

impl EntitlementService {
    pub fn new(gate: EntitlementGate, presenter: Presenter, store: Arc<dyn UsageStore>) -> Self {
        Self {
            gate,
            presenter,
            store,
        }
    }

    pub fn gate(&self) -> &EntitlementGate {
        &self.gate
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    async fn tier(&self, organization_id: i32, write: bool) -> AppResult<LicenseTier> {
        self.store
            .organization_tier(organization_id)
            .await
            .map_err(|err| unavailable(organization_id, write, err))?
            .ok_or(AppError::NotFound)
    }

    fn check(&self, decision: QuotaDecision) -> QuotaCheck {
        let presentation = self.presenter.present_quota(self.gate.catalog(), &decision);
        QuotaCheck {
            decision,
            presentation,
        }
    }

    /// Check-only evaluation against freshly fetched usage. Nothing is reserved, so two
    /// concurrent callers may both see room for the last unit; use [`Self::reserve`] on
    /// the write path.
    pub async fn check_quota(
        &self,
        organization_id: i32,
        resource: ResourceKind,
        requested: u64,
    ) -> AppResult<QuotaCheck> {
        let tier = self.tier(organization_id, true).await?;
        let usage = self
            .store
            .usage_summary(organization_id)
            .await
            .map_err(|err| unavailable(organization_id, true, err))?;
        let decision =
            self.gate
                .evaluate_quota_for(resource, usage.get(resource), requested, tier);
        Ok(self.check(decision))
    }

    /// Authoritative write-path check: atomically adds `quantity` to the counter, or
    /// rejects with `QUOTA_EXCEEDED` without writing.
    pub async fn reserve(
        &self,
        organization_id: i32,
        resource: ResourceKind,
        quantity: u64,
    ) -> AppResult<QuotaCheck> {
        if quantity == 0 {
            return Err(AppError::BadRequest("quantity must be positive".into()));
        }
        let tier = self.tier(organization_id, true).await?;
        let Some(limit) = self.gate.catalog().limit(tier, resource) else {
            let decision = self.gate.evaluate_quota_for(resource, 0, quantity, tier);
            return Err(self.denied(organization_id, &decision));
        };

        let outcome = self
            .store
            .try_increment(organization_id, resource, quantity, limit)
            .await
            .map_err(|err| unavailable(organization_id, true, err))?;

        match outcome {
            IncrementOutcome::Applied { previous, current } => {
                telemetry::record(&GateEvent::QuotaReserved {
                    organization_id,
                    tier,
                    resource,
                    current,
                    limit,
                });
                let decision = self
                    .gate
                    .evaluate_quota_for(resource, previous, quantity, tier);
                Ok(self.check(decision))
            }
            IncrementOutcome::Rejected { current } => {
                let decision = self
                    .gate
                    .evaluate_quota_for(resource, current, quantity, tier);
                Err(self.denied(organization_id, &decision))
            }
        }
    }

    fn denied(&self, organization_id: i32, decision: &QuotaDecision) -> AppError {
        telemetry::record(&GateEvent::QuotaDenied {
            organization_id,
            tier: decision.tier,
            resource: decision.resource,
            current: decision.current,
            limit: decision.limit,
        });
        AppError::QuotaExceeded {
            resource: decision.resource,
            current: decision.current,
            limit: decision.limit,
        }
    }

    pub async fn release(
        &self,
        organization_id: i32,
        resource: ResourceKind,
        quantity: u64,
    ) -> AppResult<u64> {
        self.tier(organization_id, true).await?;
        self.store
            .release(organization_id, resource, quantity)
            .await
            .map_err(|err| AppError::Message(format!("failed to release usage: {err}")))
    }

    pub async fn feature(
        &self,
        organization_id: i32,
        feature: FeatureKey,
    ) -> AppResult<FeaturePresentation> {
        let tier = self.tier(organization_id, false).await?;
        let enabled = self.gate.evaluate_feature(feature, tier);
        Ok(self
            .presenter
            .present_feature(self.gate.catalog(), feature, tier, enabled))
    }

    /// Server-side feature enforcement.
    pub async fn require_feature(&self, organization_id: i32, feature: FeatureKey) -> AppResult<()> {
        let tier = self.tier(organization_id, true).await?;
        if self.gate.evaluate_feature(feature, tier) {
            return Ok(());
        }
        telemetry::record(&GateEvent::FeatureRestricted {
            organization_id,
            tier,
            feature,
        });
        Err(AppError::FeatureRestricted { feature })
    }

    /// Dashboard view. A failed usage fetch still returns limits and features.
    pub async fn summary(&self, organization_id: i32) -> AppResult<EntitlementSummary> {
        let tier = self.tier(organization_id, false).await?;
        let plan = self.gate.catalog().plan(tier);
        let limits = plan
            .map(|plan| plan.limits)
            .unwrap_or_else(|| ResourceLimits::uniform(Limit::Finite(0)));

        let usage = match self.store.usage_summary(organization_id).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                telemetry::record(&GateEvent::UsageUnavailable {
                    organization_id,
                    write: false,
                    error: err.to_string(),
                });
                None
            }
        };

        let resources = match &usage {
            Some(snapshot) => ResourceKind::ALL
                .into_iter()
                .map(|resource| {
                    self.check(self.gate.evaluate_quota(resource, snapshot.get(resource), tier))
                })
                .collect(),
            None => Vec::new(),
        };

        let features = FeatureKey::ALL
            .into_iter()
            .map(|feature| {
                let enabled = self.gate.evaluate_feature(feature, tier);
                self.presenter
                    .present_feature(self.gate.catalog(), feature, tier, enabled)
            })
            .collect();

        Ok(EntitlementSummary {
            organization_id,
            tier,
            usage_available: usage.is_some(),
            usage,
            limits,
            resources,
            features,
        })
    }

    /// Moves an organization to `to`. Refused while any resource exceeds the target
    /// ceiling. An organization without a plan is simply assigned one.
    pub async fn change_tier(&self, organization_id: i32, to: LicenseTier) -> AppResult<PlanChange> {
        let current = self
            .store
            .organization_tier(organization_id)
            .await
            .map_err(|err| unavailable(organization_id, true, err))?;

        let change = match current {
            Some(from) => {
                let usage = self
                    .store
                    .usage_summary(organization_id)
                    .await
                    .map_err(|err| unavailable(organization_id, true, err))?;
                self.gate.evaluate_plan_change(from, to, &usage)
            }
            None => self
                .gate
                .evaluate_plan_change(to, to, &UsageSnapshot::empty(organization_id)),
        };

        if !change.allowed {
            let resources: Vec<_> = change.violations.iter().map(|d| d.resource).collect();
            telemetry::record(&GateEvent::PlanChangeBlocked {
                organization_id,
                from: change.from,
                to,
                resources: resources.clone(),
            });
            return Err(AppError::DowngradeBlocked { resources });
        }

        self.store
            .set_organization_tier(organization_id, to)
            .await
            .map_err(|err| AppError::Message(format!("failed to update plan: {err}")))?;
        telemetry::record(&GateEvent::PlanChanged {
            organization_id,
            from: current,
            to,
        });
        Ok(change)
    }
}

fn unavailable(organization_id: i32, write: bool, err: anyhow::Error) -> AppError {
    telemetry::record(&GateEvent::UsageUnavailable {
        organization_id,
        write,
        error: err.to_string(),
    });
    AppError::UsageUnavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::catalog::PlanCatalog;
    use crate::entitlements::presentation::{Thresholds, UsageLevel};
    use crate::entitlements::usage::InMemoryUsageStore;

    fn service(store: InMemoryUsageStore) -> EntitlementService {
        EntitlementService::new(
            EntitlementGate::new(Arc::new(PlanCatalog::builtin())),
            Presenter::new(Thresholds::default(), "/upgrade"),
            Arc::new(store),
        )
    }

    #[tokio::test]
    async fn reserve_denies_the_unit_past_the_limit_without_writing() {
        let service = service(
            InMemoryUsageStore::new()
                .with_organization(1, LicenseTier::Starter)
                .with_usage(1, ResourceKind::Users, 4),
        );

        let granted = service.reserve(1, ResourceKind::Users, 1).await.unwrap();
        assert!(granted.decision.allowed);
        assert_eq!(granted.decision.current, 4);

        let err = service.reserve(1, ResourceKind::Users, 1).await.unwrap_err();
        match err {
            AppError::QuotaExceeded {
                resource,
                current,
                limit,
            } => {
                assert_eq!(resource, ResourceKind::Users);
                assert_eq!(current, 5);
                assert_eq!(limit, Limit::Finite(5));
            }
            other => panic!("unexpected error {other:?}"),
        }

        let check = service.check_quota(1, ResourceKind::Users, 1).await.unwrap();
        assert_eq!(check.decision.current, 5);
        assert!(check.presentation.submit_disabled);
    }

    #[tokio::test]
    async fn unknown_organization_is_not_found() {
        let service = service(InMemoryUsageStore::new());
        assert!(matches!(
            service.check_quota(77, ResourceKind::Assets, 1).await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            service.require_feature(77, FeatureKey::Sso).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn features_are_enforced_by_tier() {
        let service = service(
            InMemoryUsageStore::new()
                .with_organization(1, LicenseTier::Starter)
                .with_organization(2, LicenseTier::Professional),
        );
        assert!(matches!(
            service.require_feature(1, FeatureKey::CustomDomains).await,
            Err(AppError::FeatureRestricted {
                feature: FeatureKey::CustomDomains
            })
        ));
        assert!(service
            .require_feature(2, FeatureKey::CustomDomains)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn summary_marks_warning_resources() {
        let service = service(
            InMemoryUsageStore::new()
                .with_organization(3, LicenseTier::Starter)
                .with_usage(3, ResourceKind::Assets, 400),
        );
        let summary = service.summary(3).await.unwrap();
        assert!(summary.usage_available);
        let assets = summary
            .resources
            .iter()
            .find(|check| check.decision.resource == ResourceKind::Assets)
            .unwrap();
        assert_eq!(assets.presentation.level, UsageLevel::Warning);
        assert_eq!(summary.features.len(), FeatureKey::ALL.len());
    }

    #[tokio::test]
    async fn downgrade_is_blocked_until_usage_fits() {
        let service = service(
            InMemoryUsageStore::new()
                .with_organization(4, LicenseTier::Professional)
                .with_usage(4, ResourceKind::Runbooks, 11),
        );
        let err = service
            .change_tier(4, LicenseTier::Starter)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::DowngradeBlocked { ref resources } if resources == &vec![ResourceKind::Runbooks]
        ));

        service.release(4, ResourceKind::Runbooks, 1).await.unwrap();
        let change = service.change_tier(4, LicenseTier::Starter).await.unwrap();
        assert!(change.allowed);
        let summary = service.summary(4).await.unwrap();
        assert_eq!(summary.tier, LicenseTier::Starter);
    }

    #[tokio::test]
    async fn new_organization_gets_assigned_a_plan() {
        let service = service(InMemoryUsageStore::new());
        let change = service
            .change_tier(12, LicenseTier::Professional)
            .await
            .unwrap();
        assert!(change.allowed);
        let summary = service.summary(12).await.unwrap();
        assert_eq!(summary.tier, LicenseTier::Professional);
    }
}
