use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// key: entitlement-models -> tiers,resources,features,limits

/// Subscription level of an organization. Variant order is the upgrade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseTier {
    Starter,
    Professional,
    Enterprise,
}

impl LicenseTier {
    pub const ALL: [LicenseTier; 3] = [
        LicenseTier::Starter,
        LicenseTier::Professional,
        LicenseTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseTier::Starter => "STARTER",
            LicenseTier::Professional => "PROFESSIONAL",
            LicenseTier::Enterprise => "ENTERPRISE",
        }
    }

    /// Next tier up, `None` at the top of the ladder.
    pub fn next(&self) -> Option<LicenseTier> {
        match self {
            LicenseTier::Starter => Some(LicenseTier::Professional),
            LicenseTier::Professional => Some(LicenseTier::Enterprise),
            LicenseTier::Enterprise => None,
        }
    }

    /// Tiers strictly above this one, lowest first.
    pub fn higher(&self) -> impl Iterator<Item = LicenseTier> + '_ {
        LicenseTier::ALL.into_iter().filter(move |tier| tier > self)
    }
}

impl fmt::Display for LicenseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseTier {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STARTER" => Ok(LicenseTier::Starter),
            "PROFESSIONAL" => Ok(LicenseTier::Professional),
            "ENTERPRISE" => Ok(LicenseTier::Enterprise),
            _ => Err(UnknownKey::tier(s)),
        }
    }
}

/// Countable resources an organization owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Users,
    Incidents,
    Assets,
    Runbooks,
    Templates,
    StorageMb,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Users,
        ResourceKind::Incidents,
        ResourceKind::Assets,
        ResourceKind::Runbooks,
        ResourceKind::Templates,
        ResourceKind::StorageMb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Users => "users",
            ResourceKind::Incidents => "incidents",
            ResourceKind::Assets => "assets",
            ResourceKind::Runbooks => "runbooks",
            ResourceKind::Templates => "templates",
            ResourceKind::StorageMb => "storage_mb",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKey::resource(s))
    }
}

/// Binary capabilities gated by tier, independent of numeric quotas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    CustomDomains,
    Sso,
    BulkOperations,
    AuditExport,
    ApiAccess,
    AdvancedAnalytics,
    PrioritySupport,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 7] = [
        FeatureKey::CustomDomains,
        FeatureKey::Sso,
        FeatureKey::BulkOperations,
        FeatureKey::AuditExport,
        FeatureKey::ApiAccess,
        FeatureKey::AdvancedAnalytics,
        FeatureKey::PrioritySupport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKey::CustomDomains => "custom_domains",
            FeatureKey::Sso => "sso",
            FeatureKey::BulkOperations => "bulk_operations",
            FeatureKey::AuditExport => "audit_export",
            FeatureKey::ApiAccess => "api_access",
            FeatureKey::AdvancedAnalytics => "advanced_analytics",
            FeatureKey::PrioritySupport => "priority_support",
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureKey {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureKey::ALL
            .into_iter()
            .find(|feature| feature.as_str() == s)
            .ok_or_else(|| UnknownKey::feature(s))
    }
}

/// Raised when a string at the API boundary names no known tier, resource or feature.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownKey {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownKey {
    fn tier(value: &str) -> Self {
        Self {
            kind: "tier",
            value: value.to_string(),
        }
    }

    fn resource(value: &str) -> Self {
        Self {
            kind: "resource",
            value: value.to_string(),
        }
    }

    fn feature(value: &str) -> Self {
        Self {
            kind: "feature",
            value: value.to_string(),
        }
    }
}

/// Ceiling for one resource at one tier. Serialized as a number, or `null` when unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Limit {
    Finite(u64),
    Unlimited,
}

impl Limit {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited)
    }

    pub fn finite(&self) -> Option<u64> {
        match self {
            Limit::Finite(value) => Some(*value),
            Limit::Unlimited => None,
        }
    }

    /// Whether `quantity` fits under this ceiling.
    pub fn admits(&self, quantity: u64) -> bool {
        match self {
            Limit::Finite(max) => quantity <= *max,
            Limit::Unlimited => true,
        }
    }
}

impl PartialOrd for Limit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Limit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Limit::Finite(a), Limit::Finite(b)) => a.cmp(b),
            (Limit::Finite(_), Limit::Unlimited) => Ordering::Less,
            (Limit::Unlimited, Limit::Finite(_)) => Ordering::Greater,
            (Limit::Unlimited, Limit::Unlimited) => Ordering::Equal,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Finite(value) => write!(f, "{value}"),
            Limit::Unlimited => f.write_str("unlimited"),
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Limit::Finite(value) => serializer.serialize_u64(*value),
            Limit::Unlimited => serializer.serialize_none(),
        }
    }
}

/// Accepted on load: a non-negative count, or `null`, `-1` and `"unlimited"` for no ceiling.
impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawLimit {
            Count(i64),
            Keyword(String),
        }

        match Option::<RawLimit>::deserialize(deserializer)? {
            None | Some(RawLimit::Count(-1)) => Ok(Limit::Unlimited),
            Some(RawLimit::Count(value)) if value >= 0 => Ok(Limit::Finite(value as u64)),
            Some(RawLimit::Count(value)) => Err(de::Error::custom(format!(
                "limit {value} is negative; use -1, null or \"unlimited\" for no ceiling"
            ))),
            Some(RawLimit::Keyword(word)) if word.eq_ignore_ascii_case("unlimited") => {
                Ok(Limit::Unlimited)
            }
            Some(RawLimit::Keyword(word)) => Err(de::Error::custom(format!(
                "unrecognised limit `{word}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ordered_for_upgrades() {
        assert!(LicenseTier::Starter < LicenseTier::Professional);
        assert!(LicenseTier::Professional < LicenseTier::Enterprise);
        assert_eq!(LicenseTier::Starter.next(), Some(LicenseTier::Professional));
        assert_eq!(LicenseTier::Enterprise.next(), None);
        let higher: Vec<_> = LicenseTier::Starter.higher().collect();
        assert_eq!(
            higher,
            vec![LicenseTier::Professional, LicenseTier::Enterprise]
        );
    }

    #[test]
    fn tier_parsing_is_case_insensitive() {
        assert_eq!(
            "professional".parse::<LicenseTier>(),
            Ok(LicenseTier::Professional)
        );
        assert_eq!(" ENTERPRISE ".parse::<LicenseTier>(), Ok(LicenseTier::Enterprise));
        let err = "gold".parse::<LicenseTier>().unwrap_err();
        assert_eq!(err.kind, "tier");
    }

    #[test]
    fn resource_and_feature_keys_round_trip_their_wire_names() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>(), Ok(kind));
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::json!(kind.as_str())
            );
        }
        for feature in FeatureKey::ALL {
            assert_eq!(feature.as_str().parse::<FeatureKey>(), Ok(feature));
        }
        assert!("customDomains".parse::<FeatureKey>().is_err());
    }

    #[test]
    fn unlimited_sorts_above_every_finite_limit() {
        assert!(Limit::Finite(u64::MAX) < Limit::Unlimited);
        assert!(Limit::Finite(0) < Limit::Finite(1));
        assert!(Limit::Unlimited.admits(u64::MAX));
        assert!(!Limit::Finite(0).admits(1));
        assert_eq!(serde_json::to_value(Limit::Unlimited).unwrap(), serde_json::Value::Null);
        assert_eq!(serde_json::to_value(Limit::Finite(7)).unwrap(), serde_json::json!(7));
    }

    #[test]
    fn unlimited_spellings_normalize_to_one_variant() {
        for raw in ["null", "-1", "\"unlimited\"", "\"UNLIMITED\""] {
            let limit: Limit = serde_json::from_str(raw).unwrap();
            assert_eq!(limit, Limit::Unlimited, "{raw}");
        }
        let zero: Limit = serde_json::from_str("0").unwrap();
        assert_eq!(zero, Limit::Finite(0));
        assert!(serde_json::from_str::<Limit>("-5").is_err());
        assert!(serde_json::from_str::<Limit>("\"lots\"").is_err());
    }
}
