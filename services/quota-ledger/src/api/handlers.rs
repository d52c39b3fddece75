use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info};

use crate::quota::QuotaError;
use crate::reconcile::ReconciliationReport;
use crate::storage::QuotaKey;

use super::types::{
    ErrorResponse, OrgQuotaResponse, ProjectQuotaResponse, UpsertOrgQuotaRequest,
    UpsertProjectQuotaRequest,
};
use super::ApiState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub async fn upsert_org_quota(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<UpsertOrgQuotaRequest>,
) -> ApiResult<OrgQuotaResponse> {
    info!(
        org_id = request.org_id,
        max_bytes = request.max_bytes,
        "upsert organisation quota"
    );
    let organisation = state
        .quota_manager
        .upsert_organisation_quota(request.org_id, request.max_bytes)
        .map_err(quota_error)?;

    Ok(Json(organisation.into()))
}

pub async fn get_org_quota(
    State(state): State<Arc<ApiState>>,
    Path(org_id): Path<i64>,
) -> ApiResult<OrgQuotaResponse> {
    match state.quota_manager.organisation_quota(org_id) {
        Ok(Some(organisation)) => Ok(Json(organisation.into())),
        Ok(None) => Err(not_found(
            "quota_not_found",
            &format!("org quota not found for org={org_id}"),
        )),
        Err(err) => Err(quota_error(err)),
    }
}

pub async fn list_org_projects(
    State(state): State<Arc<ApiState>>,
    Path(org_id): Path<i64>,
) -> ApiResult<Vec<ProjectQuotaResponse>> {
    let projects = state
        .quota_manager
        .organisation_projects(org_id)
        .map_err(quota_error)?;

    Ok(Json(projects.into_iter().map(Into::into).collect()))
}

pub async fn upsert_project_quota(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<UpsertProjectQuotaRequest>,
) -> ApiResult<ProjectQuotaResponse> {
    info!(
        org_id = request.org_id,
        project_id = request.project_id,
        max_bytes = request.max_bytes,
        "upsert project quota"
    );
    let key = QuotaKey::new(request.org_id, request.project_id);
    let project = state
        .quota_manager
        .upsert_project_quota(key, request.max_bytes)
        .map_err(quota_error)?;

    Ok(Json(project.into()))
}

pub async fn get_project_quota(
    State(state): State<Arc<ApiState>>,
    Path((org_id, project_id)): Path<(i64, i64)>,
) -> ApiResult<ProjectQuotaResponse> {
    match state
        .quota_manager
        .project_quota(QuotaKey::new(org_id, project_id))
    {
        Ok(Some(project)) => Ok(Json(project.into())),
        Ok(None) => Err(not_found(
            "quota_not_found",
            &format!("project quota not found for org={org_id} project={project_id}"),
        )),
        Err(err) => Err(quota_error(err)),
    }
}

pub async fn run_reconciliation(
    State(state): State<Arc<ApiState>>,
) -> ApiResult<ReconciliationReport> {
    let reconciler = Arc::clone(&state.reconciler);
    let report = tokio::task::spawn_blocking(move || reconciler.run_once())
        .await
        .map_err(internal_error)?
        .map_err(internal_error)?;

    Ok(Json(report))
}

pub async fn health_check(State(state): State<Arc<ApiState>>) -> ApiResult<serde_json::Value> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "quota-ledger",
        "strategy": state.config.strategy.to_string(),
    })))
}

fn quota_error(err: QuotaError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        QuotaError::NotProvisioned { .. } => not_found("quota_not_provisioned", &err.to_string()),
        QuotaError::Exceeded { remaining, .. } => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: err.to_string(),
                code: "quota_exceeded".to_string(),
                details: Some(serde_json::json!({ "remaining_bytes": remaining })),
            }),
        ),
        QuotaError::ConcurrencyConflict { attempts, .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: err.to_string(),
                code: "concurrency_conflict".to_string(),
                details: Some(serde_json::json!({ "attempts": attempts })),
            }),
        ),
        QuotaError::StorageError(crate::storage::StorageError::InvalidQuotaValue(ref message)) => {
            bad_request("invalid_quota_value", message)
        }
        other => internal_error(other),
    }
}

fn bad_request(code: &str, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn not_found(code: &str, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.to_string(),
            code: code.to_string(),
            details: None,
        }),
    )
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, Json<ErrorResponse>) {
    error!(error = %err, "quota API internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "internal server error".to_string(),
            code: "internal_error".to_string(),
            details: Some(serde_json::json!({ "message": err.to_string() })),
        }),
    )
}
