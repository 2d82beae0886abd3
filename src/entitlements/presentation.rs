use serde::Serialize;

use super::catalog::PlanCatalog;
use super::gate::{QuotaDecision, QuotaReason};
use super::models::{FeatureKey, LicenseTier, Limit, ResourceKind};

// key: entitlement-presentation -> badges,alerts,upgrade prompts

pub const WARNING_RATIO: f64 = 0.8;
pub const EXCEEDED_RATIO: f64 = 1.0;

/// Usage ratios at which the UI escalates. Presentation only; denial is the gate's call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub warning: f64,
    pub exceeded: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: WARNING_RATIO,
            exceeded: EXCEEDED_RATIO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLevel {
    Normal,
    Warning,
    Exceeded,
    Unlimited,
}

impl Thresholds {
    pub fn classify(&self, ratio: f64) -> UsageLevel {
        if ratio >= self.exceeded {
            UsageLevel::Exceeded
        } else if ratio >= self.warning {
            UsageLevel::Warning
        } else {
            UsageLevel::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Warning,
    Blocking,
}

/// Where an upsell CTA should send the user. `target_tier` is `None` when no
/// self-serve tier would help.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpgradePrompt {
    pub target_tier: Option<LicenseTier>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaPresentation {
    pub resource: ResourceKind,
    pub level: UsageLevel,
    pub percent_used: Option<u32>,
    pub submit_disabled: bool,
    pub badge: Option<Badge>,
    pub message: String,
    pub upgrade: Option<UpgradePrompt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeaturePresentation {
    pub feature: FeatureKey,
    pub tier: LicenseTier,
    pub enabled: bool,
    pub upgrade: Option<UpgradePrompt>,
}

/// Maps gate decisions onto the UI vocabulary (badges, disabled submits, upsell links).
#[derive(Debug, Clone)]
pub struct Presenter {
    thresholds: Thresholds,
    upgrade_url: String,
}

impl Presenter {
    pub fn new(thresholds: Thresholds, upgrade_url: impl Into<String>) -> Self {
        Self {
            thresholds,
            upgrade_url: upgrade_url.into(),
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn present_quota(
        &self,
        catalog: &PlanCatalog,
        decision: &QuotaDecision,
    ) -> QuotaPresentation {
        let level = match decision.reason {
            QuotaReason::Unlimited => UsageLevel::Unlimited,
            QuotaReason::TierUnconfigured => UsageLevel::Exceeded,
            QuotaReason::WithinLimit | QuotaReason::LimitReached => {
                self.thresholds.classify(decision.ratio)
            }
        };
        let percent_used = match decision.limit {
            Limit::Finite(_) => Some((decision.ratio * 100.0).round() as u32),
            Limit::Unlimited => None,
        };
        let blocked = !decision.allowed;
        let badge = if blocked || level == UsageLevel::Exceeded {
            Some(Badge::Blocking)
        } else if level == UsageLevel::Warning {
            Some(Badge::Warning)
        } else {
            None
        };
        let upgrade = blocked.then(|| {
            let needed = decision.current.saturating_add(decision.requested);
            let target = catalog.lowest_tier_admitting(decision.tier, decision.resource, needed);
            self.prompt(target, "resource", decision.resource.as_str())
        });

        QuotaPresentation {
            resource: decision.resource,
            level,
            percent_used,
            submit_disabled: blocked,
            badge,
            message: quota_message(decision, blocked),
            upgrade,
        }
    }

    pub fn present_feature(
        &self,
        catalog: &PlanCatalog,
        feature: FeatureKey,
        tier: LicenseTier,
        enabled: bool,
    ) -> FeaturePresentation {
        let upgrade = (!enabled).then(|| {
            let target = catalog.lowest_tier_enabling(tier, feature);
            self.prompt(target, "feature", feature.as_str())
        });
        FeaturePresentation {
            feature,
            tier,
            enabled,
            upgrade,
        }
    }

    fn prompt(&self, target: Option<LicenseTier>, subject: &str, key: &str) -> UpgradePrompt {
        let separator = if self.upgrade_url.contains('?') { '&' } else { '?' };
        let url = match target {
            Some(tier) => format!(
                "{}{separator}plan={}&{subject}={key}",
                self.upgrade_url,
                tier.as_str().to_ascii_lowercase()
            ),
            None => format!("{}{separator}contact=sales&{subject}={key}", self.upgrade_url),
        };
        UpgradePrompt {
            target_tier: target,
            url,
        }
    }
}

fn quota_message(decision: &QuotaDecision, blocked: bool) -> String {
    let resource = decision.resource.as_str().replace('_', " ");
    match (decision.reason, decision.limit) {
        (QuotaReason::TierUnconfigured, _) => {
            format!("plan {} is not configured", decision.tier)
        }
        (_, Limit::Unlimited) => format!("{} {resource} (unlimited)", decision.current),
        (_, Limit::Finite(max)) if blocked => format!("{resource} limit of {max} reached"),
        (_, Limit::Finite(max)) => format!("{} of {max} {resource} used", decision.current),
    }
}
