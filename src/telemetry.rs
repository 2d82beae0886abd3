use serde::Serialize;
use tracing::{info, warn};

use crate::entitlements::{FeatureKey, LicenseTier, Limit, ResourceKind};

/// key: entitlement-telemetry -> structured gate events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum GateEvent {
    QuotaReserved {
        organization_id: i32,
        tier: LicenseTier,
        resource: ResourceKind,
        current: u64,
        limit: Limit,
    },
    QuotaDenied {
        organization_id: i32,
        tier: LicenseTier,
        resource: ResourceKind,
        current: u64,
        limit: Limit,
    },
    FeatureRestricted {
        organization_id: i32,
        tier: LicenseTier,
        feature: FeatureKey,
    },
    PlanChanged {
        organization_id: i32,
        from: Option<LicenseTier>,
        to: LicenseTier,
    },
    PlanChangeBlocked {
        organization_id: i32,
        from: LicenseTier,
        to: LicenseTier,
        resources: Vec<ResourceKind>,
    },
    UsageUnavailable {
        organization_id: i32,
        /// Whether the caller was about to write. Writes fail closed, reads fail open.
        write: bool,
        error: String,
    },
}

impl GateEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            GateEvent::QuotaReserved { .. } => "quota_reserved",
            GateEvent::QuotaDenied { .. } => "quota_denied",
            GateEvent::FeatureRestricted { .. } => "feature_restricted",
            GateEvent::PlanChanged { .. } => "plan_changed",
            GateEvent::PlanChangeBlocked { .. } => "plan_change_blocked",
            GateEvent::UsageUnavailable { .. } => "usage_unavailable",
        }
    }
}

pub fn record(event: &GateEvent) {
    let event_type = event.event_type();
    match event {
        GateEvent::QuotaReserved {
            organization_id,
            tier,
            resource,
            current,
            limit,
        } => info!(
            event_type,
            organization_id,
            %tier,
            %resource,
            current,
            %limit,
            "quota reserved"
        ),
        GateEvent::QuotaDenied {
            organization_id,
            tier,
            resource,
            current,
            limit,
        } => warn!(
            event_type,
            organization_id,
            %tier,
            %resource,
            current,
            %limit,
            "quota exceeded"
        ),
        GateEvent::FeatureRestricted {
            organization_id,
            tier,
            feature,
        } => warn!(event_type, organization_id, %tier, %feature, "feature restricted"),
        GateEvent::PlanChanged {
            organization_id,
            from,
            to,
        } => info!(event_type, organization_id, ?from, %to, "plan changed"),
        GateEvent::PlanChangeBlocked {
            organization_id,
            from,
            to,
            resources,
        } => warn!(
            event_type,
            organization_id,
            %from,
            %to,
            ?resources,
            "plan change blocked by current usage"
        ),
        GateEvent::UsageUnavailable {
            organization_id,
            write,
            error,
        } => warn!(
            event_type,
            organization_id,
            write,
            %error,
            "usage summary unavailable"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_their_type_tag() {
        let event = GateEvent::QuotaDenied {
            organization_id: 3,
            tier: LicenseTier::Starter,
            resource: ResourceKind::Assets,
            current: 500,
            limit: Limit::Finite(500),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event_type": "quota_denied",
                "organization_id": 3,
                "tier": "STARTER",
                "resource": "assets",
                "current": 500,
                "limit": 500,
            })
        );
        assert_eq!(event.event_type(), "quota_denied");
    }

    #[test]
    fn usage_outage_records_the_write_flag() {
        let event = GateEvent::UsageUnavailable {
            organization_id: 1,
            write: false,
            error: "connection refused".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], json!("usage_unavailable"));
        assert_eq!(value["write"], json!(false));
    }
}
