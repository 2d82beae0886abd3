use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::models::{FeatureKey, LicenseTier, Limit, ResourceKind};

/// key: plan-catalog -> tier limits,feature flags
/// Numeric ceilings of one tier. Every resource is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceLimits {
    pub users: Limit,
    pub incidents: Limit,
    pub assets: Limit,
    pub runbooks: Limit,
    pub templates: Limit,
    pub storage_mb: Limit,
}

impl ResourceLimits {
    pub fn get(&self, resource: ResourceKind) -> Limit {
        match resource {
            ResourceKind::Users => self.users,
            ResourceKind::Incidents => self.incidents,
            ResourceKind::Assets => self.assets,
            ResourceKind::Runbooks => self.runbooks,
            ResourceKind::Templates => self.templates,
            ResourceKind::StorageMb => self.storage_mb,
        }
    }

    /// Same ceiling for every resource. Mostly useful for test tiers.
    pub fn uniform(limit: Limit) -> Self {
        Self {
            users: limit,
            incidents: limit,
            assets: limit,
            runbooks: limit,
            templates: limit,
            storage_mb: limit,
        }
    }

    fn from_map(
        tier: LicenseTier,
        map: &BTreeMap<ResourceKind, Limit>,
    ) -> Result<Self, PlanCatalogError> {
        let lookup = |resource: ResourceKind| {
            map.get(&resource)
                .copied()
                .ok_or(PlanCatalogError::MissingLimit { tier, resource })
        };
        Ok(Self {
            users: lookup(ResourceKind::Users)?,
            incidents: lookup(ResourceKind::Incidents)?,
            assets: lookup(ResourceKind::Assets)?,
            runbooks: lookup(ResourceKind::Runbooks)?,
            templates: lookup(ResourceKind::Templates)?,
            storage_mb: lookup(ResourceKind::StorageMb)?,
        })
    }
}

/// Feature switches of one tier. Features without an explicit entry take `default`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureFlags {
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub enabled: BTreeMap<FeatureKey, bool>,
}

impl FeatureFlags {
    pub fn with(features: impl IntoIterator<Item = FeatureKey>) -> Self {
        Self {
            default: false,
            enabled: features.into_iter().map(|feature| (feature, true)).collect(),
        }
    }

    pub fn is_enabled(&self, feature: FeatureKey) -> bool {
        self.enabled.get(&feature).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierPlan {
    pub limits: ResourceLimits,
    pub features: FeatureFlags,
}

#[derive(Debug, Error)]
pub enum PlanCatalogError {
    #[error("failed to read plan catalog from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid plan catalog JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid plan catalog YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("tier {tier} is missing a limit for `{resource}`")]
    MissingLimit {
        tier: LicenseTier,
        resource: ResourceKind,
    },
    #[error("plan catalog configures no tiers")]
    Empty,
}

/// A place where a higher tier grants less than a lower one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogViolation {
    LimitDecreases {
        resource: ResourceKind,
        lower: LicenseTier,
        lower_limit: Limit,
        higher: LicenseTier,
        higher_limit: Limit,
    },
    FeatureRevoked {
        feature: FeatureKey,
        lower: LicenseTier,
        higher: LicenseTier,
    },
}

impl fmt::Display for CatalogViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogViolation::LimitDecreases {
                resource,
                lower,
                lower_limit,
                higher,
                higher_limit,
            } => write!(
                f,
                "{resource}: {lower} allows {lower_limit} but {higher} only {higher_limit}"
            ),
            CatalogViolation::FeatureRevoked {
                feature,
                lower,
                higher,
            } => write!(f, "{feature}: enabled at {lower} but disabled at {higher}"),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCatalog {
    tiers: BTreeMap<LicenseTier, RawTierPlan>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTierPlan {
    limits: BTreeMap<ResourceKind, Limit>,
    #[serde(default)]
    features: FeatureFlags,
}

/// Immutable tier -> limits/features table, built once at startup and shared by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanCatalog {
    tiers: BTreeMap<LicenseTier, TierPlan>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PlanCatalog {
    pub fn new(tiers: impl IntoIterator<Item = (LicenseTier, TierPlan)>) -> Self {
        Self {
            tiers: tiers.into_iter().collect(),
        }
    }

    /// The shipped plan table.
    pub fn builtin() -> Self {
        use FeatureKey::*;
        use Limit::{Finite, Unlimited};

        Self::new([
            (
                LicenseTier::Starter,
                TierPlan {
                    limits: ResourceLimits {
                        users: Finite(5),
                        incidents: Finite(100),
                        assets: Finite(500),
                        runbooks: Finite(10),
                        templates: Finite(20),
                        storage_mb: Finite(1024),
                    },
                    features: FeatureFlags::default(),
                },
            ),
            (
                LicenseTier::Professional,
                TierPlan {
                    limits: ResourceLimits {
                        users: Finite(25),
                        incidents: Finite(1000),
                        assets: Finite(5000),
                        runbooks: Finite(100),
                        templates: Finite(200),
                        storage_mb: Finite(10 * 1024),
                    },
                    features: FeatureFlags::with([
                        CustomDomains,
                        BulkOperations,
                        ApiAccess,
                        AdvancedAnalytics,
                    ]),
                },
            ),
            (
                LicenseTier::Enterprise,
                TierPlan {
                    limits: ResourceLimits {
                        users: Unlimited,
                        incidents: Unlimited,
                        assets: Unlimited,
                        runbooks: Unlimited,
                        templates: Unlimited,
                        storage_mb: Finite(100 * 1024),
                    },
                    features: FeatureFlags {
                        default: true,
                        enabled: BTreeMap::new(),
                    },
                },
            ),
        ])
    }

    pub fn from_json_str(raw: &str) -> Result<Self, PlanCatalogError> {
        Self::from_raw(serde_json::from_str(raw)?)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, PlanCatalogError> {
        Self::from_raw(serde_yaml::from_str(raw)?)
    }

    /// Loads a catalog file; `.yaml`/`.yml` are read as YAML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, PlanCatalogError> {
        let contents = fs::read_to_string(path).map_err(|source| PlanCatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            _ => Self::from_json_str(&contents),
        }
    }

    fn from_raw(raw: RawCatalog) -> Result<Self, PlanCatalogError> {
        if raw.tiers.is_empty() {
            return Err(PlanCatalogError::Empty);
        }
        let mut tiers = BTreeMap::new();
        for (tier, plan) in raw.tiers {
            let limits = ResourceLimits::from_map(tier, &plan.limits)?;
            tiers.insert(
                tier,
                TierPlan {
                    limits,
                    features: plan.features,
                },
            );
        }
        Ok(Self { tiers })
    }

    pub fn plan(&self, tier: LicenseTier) -> Option<&TierPlan> {
        self.tiers.get(&tier)
    }

    pub fn tiers(&self) -> impl Iterator<Item = (LicenseTier, &TierPlan)> {
        self.tiers.iter().map(|(tier, plan)| (*tier, plan))
    }

    pub fn limit(&self, tier: LicenseTier, resource: ResourceKind) -> Option<Limit> {
        self.plan(tier).map(|plan| plan.limits.get(resource))
    }

    /// Lowest tier above `current` whose ceiling admits `quantity` of `resource`.
    pub fn lowest_tier_admitting(
        &self,
        current: LicenseTier,
        resource: ResourceKind,
        quantity: u64,
    ) -> Option<LicenseTier> {
        current.higher().find(|tier| {
            self.limit(*tier, resource)
                .map(|limit| limit.admits(quantity))
                .unwrap_or(false)
        })
    }

    /// Lowest tier above `current` that enables `feature`.
    pub fn lowest_tier_enabling(
        &self,
        current: LicenseTier,
        feature: FeatureKey,
    ) -> Option<LicenseTier> {
        current.higher().find(|tier| {
            self.plan(*tier)
                .map(|plan| plan.features.is_enabled(feature))
                .unwrap_or(false)
        })
    }

    /// Reports every pair of configured tiers where the higher one grants less.
    /// The shipped table has none; custom tables are checked at startup.
    pub fn validate(&self) -> Vec<CatalogViolation> {
        let mut violations = Vec::new();
        let configured: Vec<_> = self.tiers().collect();
        for (index, (lower, lower_plan)) in configured.iter().enumerate() {
            for (higher, higher_plan) in configured.iter().skip(index + 1) {
                for resource in ResourceKind::ALL {
                    let lower_limit = lower_plan.limits.get(resource);
                    let higher_limit = higher_plan.limits.get(resource);
                    if lower_limit > higher_limit {
                        violations.push(CatalogViolation::LimitDecreases {
                            resource,
                            lower: *lower,
                            lower_limit,
                            higher: *higher,
                            higher_limit,
                        });
                    }
                }
                for feature in FeatureKey::ALL {
                    if lower_plan.features.is_enabled(feature)
                        && !higher_plan.features.is_enabled(feature)
                    {
                        violations.push(CatalogViolation::FeatureRevoked {
                            feature,
                            lower: *lower,
                            higher: *higher,
                        });
                    }
                }
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_configures_every_tier() {
        let catalog = PlanCatalog::builtin();
        for tier in LicenseTier::ALL {
            assert!(catalog.plan(tier).is_some(), "{tier} missing");
        }
        assert_eq!(
            catalog.limit(LicenseTier::Starter, ResourceKind::Assets),
            Some(Limit::Finite(500))
        );
        assert_eq!(
            catalog.limit(LicenseTier::Enterprise, ResourceKind::Assets),
            Some(Limit::Unlimited)
        );
    }

    #[test]
    fn builtin_catalog_is_monotonic() {
        assert!(PlanCatalog::builtin().validate().is_empty());
    }

    #[test]
    fn unlimited_only_appears_at_enterprise() {
        let catalog = PlanCatalog::builtin();
        for (tier, plan) in catalog.tiers() {
            if tier == LicenseTier::Enterprise {
                continue;
            }
            for resource in ResourceKind::ALL {
                assert!(!plan.limits.get(resource).is_unlimited());
            }
        }
    }

    #[test]
    fn json_catalog_normalizes_unlimited_spellings() {
        let catalog = PlanCatalog::from_json_str(
            r#"{
                "tiers": {
                    "STARTER": {
                        "limits": {"users": 2, "incidents": 10, "assets": 0,
                                   "runbooks": 1, "templates": 1, "storage_mb": 64}
                    },
                    "ENTERPRISE": {
                        "limits": {"users": -1, "incidents": null, "assets": "unlimited",
                                   "runbooks": -1, "templates": -1, "storage_mb": 4096},
                        "features": {"default": true, "enabled": {"sso": false}}
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            catalog.limit(LicenseTier::Starter, ResourceKind::Assets),
            Some(Limit::Finite(0))
        );
        assert_eq!(
            catalog.limit(LicenseTier::Enterprise, ResourceKind::Incidents),
            Some(Limit::Unlimited)
        );
        assert_eq!(catalog.plan(LicenseTier::Professional), None);
        let enterprise = catalog.plan(LicenseTier::Enterprise).unwrap();
        assert!(enterprise.features.is_enabled(FeatureKey::AuditExport));
        assert!(!enterprise.features.is_enabled(FeatureKey::Sso));
    }

    #[test]
    fn missing_limit_fails_loudly() {
        let err = PlanCatalog::from_json_str(
            r#"{"tiers": {"STARTER": {"limits": {"users": 1}}}}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlanCatalogError::MissingLimit {
                tier: LicenseTier::Starter,
                resource: ResourceKind::Incidents,
            }
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = PlanCatalog::from_json_str(
            r#"{"tiers": {"GOLD": {"limits": {}}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlanCatalogError::Json(_)));

        let err = PlanCatalog::from_json_str(r#"{"tiers": {}}"#).unwrap_err();
        assert!(matches!(err, PlanCatalogError::Empty));
    }

    #[test]
    fn yaml_catalog_is_accepted() {
        let catalog = PlanCatalog::from_yaml_str(
            r#"
tiers:
  PROFESSIONAL:
    limits:
      users: 25
      incidents: 1000
      assets: 5000
      runbooks: 100
      templates: 200
      storage_mb: 10240
    features:
      enabled:
        custom_domains: true
"#,
        )
        .unwrap();
        let plan = catalog.plan(LicenseTier::Professional).unwrap();
        assert!(plan.features.is_enabled(FeatureKey::CustomDomains));
        assert!(!plan.features.is_enabled(FeatureKey::Sso));
    }

    #[test]
    fn validate_reports_decreasing_limits_and_revoked_features() {
        let catalog = PlanCatalog::new([
            (
                LicenseTier::Starter,
                TierPlan {
                    limits: ResourceLimits::uniform(Limit::Unlimited),
                    features: FeatureFlags::with([FeatureKey::Sso]),
                },
            ),
            (
                LicenseTier::Professional,
                TierPlan {
                    limits: ResourceLimits::uniform(Limit::Finite(10)),
                    features: FeatureFlags::default(),
                },
            ),
        ]);

        let violations = catalog.validate();
        assert_eq!(violations.len(), ResourceKind::ALL.len() + 1);
        assert!(violations.contains(&CatalogViolation::FeatureRevoked {
            feature: FeatureKey::Sso,
            lower: LicenseTier::Starter,
            higher: LicenseTier::Professional,
        }));
    }

    #[test]
    fn upgrade_targets_skip_tiers_that_do_not_help() {
        let catalog = PlanCatalog::builtin();
        assert_eq!(
            catalog.lowest_tier_admitting(LicenseTier::Starter, ResourceKind::Assets, 501),
            Some(LicenseTier::Professional)
        );
        assert_eq!(
            catalog.lowest_tier_admitting(LicenseTier::Starter, ResourceKind::Assets, 5001),
            Some(LicenseTier::Enterprise)
        );
        assert_eq!(
            catalog.lowest_tier_admitting(
                LicenseTier::Professional,
                ResourceKind::StorageMb,
                200 * 1024
            ),
            None
        );
        assert_eq!(
            catalog.lowest_tier_enabling(LicenseTier::Starter, FeatureKey::Sso),
            Some(LicenseTier::Enterprise)
        );
        assert_eq!(
            catalog.lowest_tier_enabling(LicenseTier::Enterprise, FeatureKey::Sso),
            None
        );
    }
}
