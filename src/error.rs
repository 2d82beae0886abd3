use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::entitlements::{FeatureKey, Limit, ResourceKind, UnknownKey};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{resource} quota exceeded ({current}/{limit})")]
    QuotaExceeded {
        resource: ResourceKind,
        current: u64,
        limit: Limit,
    },
    #[error("feature `{feature}` is not included in the current plan")]
    FeatureRestricted { feature: FeatureKey },
    #[error("plan change blocked: usage exceeds the target plan for {}", join(.resources))]
    DowngradeBlocked { resources: Vec<ResourceKind> },
    #[error("usage data unavailable: {0}")]
    UsageUnavailable(String),
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Message(String),
}

impl From<UnknownKey> for AppError {
    fn from(err: UnknownKey) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

fn join(resources: &[ResourceKind]) -> String {
    resources
        .iter()
        .map(ResourceKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Wire form of every error. `code` lets clients tell plan denials apart from
/// validation failures and render an upgrade prompt instead of a form error.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<Limit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<ResourceKind>>,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            AppError::FeatureRestricted { .. } => "FEATURE_RESTRICTED",
            AppError::DowngradeBlocked { .. } => "DOWNGRADE_BLOCKED",
            AppError::UsageUnavailable(_) => "USAGE_UNAVAILABLE",
            AppError::NotFound => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Message(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::QuotaExceeded { .. } | AppError::FeatureRestricted { .. } => {
                StatusCode::FORBIDDEN
            }
            AppError::DowngradeBlocked { .. } => StatusCode::CONFLICT,
            AppError::UsageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let mut body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
            resource: None,
            current: None,
            limit: None,
            feature: None,
            violations: None,
        };
        match self {
            AppError::QuotaExceeded {
                resource,
                current,
                limit,
            } => {
                body.resource = Some(*resource);
                body.current = Some(*current);
                body.limit = Some(*limit);
            }
            AppError::FeatureRestricted { feature } => body.feature = Some(*feature),
            AppError::DowngradeBlocked { resources } => body.violations = Some(resources.clone()),
            // Internal details stay in the logs.
            AppError::Message(_) => body.message = "internal error".into(),
            _ => {}
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(?self);
        }
        (status, Json(self.body())).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quota_errors_carry_resource_details() {
        let err = AppError::QuotaExceeded {
            resource: ResourceKind::Assets,
            current: 500,
            limit: Limit::Finite(500),
        };
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            serde_json::to_value(err.body()).unwrap(),
            json!({
                "code": "QUOTA_EXCEEDED",
                "message": "assets quota exceeded (500/500)",
                "resource": "assets",
                "current": 500,
                "limit": 500,
            })
        );
    }

    #[test]
    fn feature_errors_are_distinct_from_validation_errors() {
        let restricted = AppError::FeatureRestricted {
            feature: FeatureKey::Sso,
        };
        let invalid: AppError = "sso2".parse::<FeatureKey>().unwrap_err().into();
        assert_eq!(restricted.code(), "FEATURE_RESTRICTED");
        assert_eq!(invalid.code(), "BAD_REQUEST");
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            serde_json::to_value(restricted.body()).unwrap()["feature"],
            json!("sso")
        );
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = AppError::Message("pool exhausted".into());
        let body = err.body();
        assert_eq!(body.code, "INTERNAL");
        assert_eq!(body.message, "internal error");
    }

    #[test]
    fn downgrade_errors_list_offending_resources() {
        let err = AppError::DowngradeBlocked {
            resources: vec![ResourceKind::Users, ResourceKind::Assets],
        };
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(
            err.to_string(),
            "plan change blocked: usage exceeds the target plan for users, assets"
        );
    }
}
