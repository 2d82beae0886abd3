//! Tenant resource quotas and feature entitlements.

pub mod api;
pub mod catalog;
pub mod gate;
pub mod models;
pub mod presentation;
pub mod service;
pub mod store;
pub mod usage;

pub use catalog::{
    CatalogViolation, FeatureFlags, PlanCatalog, PlanCatalogError, ResourceLimits, TierPlan,
};
pub use gate::{EntitlementGate, PlanChange, PlanChangeDirection, QuotaDecision, QuotaReason};
pub use models::{FeatureKey, LicenseTier, Limit, ResourceKind, UnknownKey};
pub use presentation::{
    Badge, FeaturePresentation, Presenter, QuotaPresentation, Thresholds, UpgradePrompt,
    UsageLevel, EXCEEDED_RATIO, WARNING_RATIO,
};
pub use service::{EntitlementService, EntitlementSummary, QuotaCheck};
pub use store::PgUsageStore;
pub use usage::{InMemoryUsageStore, IncrementOutcome, UsageSnapshot, UsageStore};
