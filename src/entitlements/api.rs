use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::catalog::PlanCatalog;
use super::gate::PlanChange;
use super::models::{FeatureKey, LicenseTier, ResourceKind};
use super::presentation::{FeaturePresentation, Thresholds};
use super::service::{EntitlementService, EntitlementSummary, QuotaCheck};
use crate::error::{AppError, AppResult};

/// key: entitlements-api -> rest endpoints
pub fn routes() -> Router {
    Router::new()
        .route("/api/plans", get(list_plans))
        .route("/api/orgs/:id/entitlements", get(get_entitlements))
        .route("/api/orgs/:id/quota-check", post(check_quota))
        .route(
            "/api/orgs/:id/resources/:resource/reserve",
            post(reserve_resource),
        )
        .route(
            "/api/orgs/:id/resources/:resource/release",
            post(release_resource),
        )
        .route("/api/orgs/:id/features/:feature", get(get_feature))
        .route(
            "/api/orgs/:id/features/:feature/authorize",
            post(authorize_feature),
        )
        .route("/api/orgs/:id/tier", put(change_tier))
}

#[derive(Debug, Serialize)]
pub struct PlanCatalogExport {
    #[serde(flatten)]
    pub catalog: PlanCatalog,
    pub thresholds: Thresholds,
}

pub async fn list_plans(
    Extension(service): Extension<Arc<EntitlementService>>,
) -> Json<PlanCatalogExport> {
    Json(PlanCatalogExport {
        catalog: service.gate().catalog().clone(),
        thresholds: service.presenter().thresholds(),
    })
}

pub async fn get_entitlements(
    Extension(service): Extension<Arc<EntitlementService>>,
    Path(organization_id): Path<i32>,
) -> AppResult<Json<EntitlementSummary>> {
    Ok(Json(service.summary(organization_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct QuotaCheckRequest {
    pub resource: String,
    #[serde(default)]
    pub requested_quantity: Option<u64>,
}

pub async fn check_quota(
    Extension(service): Extension<Arc<EntitlementService>>,
    Path(organization_id): Path<i32>,
    Json(payload): Json<QuotaCheckRequest>,
) -> AppResult<Json<QuotaCheck>> {
    let resource: ResourceKind = payload.resource.parse()?;
    let requested = payload.requested_quantity.unwrap_or(1);
    let check = service
        .check_quota(organization_id, resource, requested)
        .await?;
    Ok(Json(check))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuantityRequest {
    #[serde(default)]
    pub quantity: Option<u64>,
}

/// An empty body means one unit. Anything else must parse, so a malformed quantity is
/// rejected instead of silently becoming a one-unit write.
fn requested_quantity(body: &[u8]) -> AppResult<u64> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(1);
    }
    let request: QuantityRequest = serde_json::from_slice(body)
        .map_err(|err| AppError::BadRequest(format!("invalid quantity body: {err}")))?;
    Ok(request.quantity.unwrap_or(1))
}

pub async fn reserve_resource(
    Extension(service): Extension<Arc<EntitlementService>>,
    Path((organization_id, resource)): Path<(i32, String)>,
    body: Bytes,
) -> AppResult<Json<QuotaCheck>> {
    let resource: ResourceKind = resource.parse()?;
    let quantity = requested_quantity(&body)?;
    let check = service.reserve(organization_id, resource, quantity).await?;
    Ok(Json(check))
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub resource: ResourceKind,
    pub current: u64,
}

pub async fn release_resource(
    Extension(service): Extension<Arc<EntitlementService>>,
    Path((organization_id, resource)): Path<(i32, String)>,
    body: Bytes,
) -> AppResult<Json<ReleaseResponse>> {
    let resource: ResourceKind = resource.parse()?;
    let quantity = requested_quantity(&body)?;
    let current = service.release(organization_id, resource, quantity).await?;
    Ok(Json(ReleaseResponse { resource, current }))
}

pub async fn get_feature(
    Extension(service): Extension<Arc<EntitlementService>>,
    Path((organization_id, feature)): Path<(i32, String)>,
) -> AppResult<Json<FeaturePresentation>> {
    let feature: FeatureKey = feature.parse()?;
    Ok(Json(service.feature(organization_id, feature).await?))
}

pub async fn authorize_feature(
    Extension(service): Extension<Arc<EntitlementService>>,
    Path((organization_id, feature)): Path<(i32, String)>,
) -> AppResult<StatusCode> {
    let feature: FeatureKey = feature.parse()?;
    service.require_feature(organization_id, feature).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct TierChangeRequest {
    pub tier: String,
}

pub async fn change_tier(
    Extension(service): Extension<Arc<EntitlementService>>,
    Path(organization_id): Path<i32>,
    Json(payload): Json<TierChangeRequest>,
) -> AppResult<Json<PlanChange>> {
    let tier: LicenseTier = payload.tier.parse()?;
    Ok(Json(service.change_tier(organization_id, tier).await?))
}
