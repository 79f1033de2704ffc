use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{debug, error};

use crate::auth::{UserContext, REQUEST_ID_HEADER};
use crate::quota::{FinalizeUpload, FinalizedUpload, QuotaError, SlotReservation, UploadStatus};

use super::types::{ErrorResponse, FinalizeUploadRequest, HealthResponse};
use super::ApiState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub async fn get_upload_status(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> ApiResult<UploadStatus> {
    let user = authenticate(&state, &headers)?;
    let status = state
        .quota_service
        .get_status(&user)
        .await
        .map_err(quota_error)?;

    Ok(Json(status))
}

pub async fn reserve_upload_slot(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> ApiResult<SlotReservation> {
    let user = authenticate(&state, &headers)?;
    let reservation = state
        .quota_service
        .reserve_slot(&user)
        .await
        .map_err(quota_error)?;

    Ok(Json(reservation))
}

pub async fn finalize_upload(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    payload: Result<Json<FinalizeUploadRequest>, JsonRejection>,
) -> ApiResult<FinalizedUpload> {
    let user = authenticate(&state, &headers)?;
    let upload = parse_finalize(payload).map_err(quota_error)?;

    let finalized = state
        .quota_service
        .finalize_upload(&user, upload)
        .await
        .map_err(quota_error)?;

    Ok(Json(finalized))
}

pub async fn health_check() -> ApiResult<HealthResponse> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        service: "upload-quota".to_string(),
    }))
}

fn authenticate(
    state: &ApiState,
    headers: &HeaderMap,
) -> Result<UserContext, (StatusCode, Json<ErrorResponse>)> {
    let user = state.identity.extract_from_request(headers).map_err(|err| {
        debug!(error = %err, "request rejected as unauthenticated");
        quota_error(QuotaError::Unauthenticated)
    })?;

    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty());
    Ok(match request_id {
        Some(id) => user.with_request_id(id.to_string()),
        None => user,
    })
}

fn parse_finalize(
    payload: Result<Json<FinalizeUploadRequest>, JsonRejection>,
) -> Result<FinalizeUpload, QuotaError> {
    const MISSING: &str = "Missing required fields: reservationId, fullPath, size";

    let Json(request) = payload.map_err(|rejection| {
        QuotaError::InvalidArgument(format!("{MISSING} ({})", rejection.body_text()))
    })?;

    match (request.reservation_id, request.full_path, request.size) {
        (Some(reservation_id), Some(full_path), Some(size)) => Ok(FinalizeUpload {
            reservation_id,
            full_path,
            size,
        }),
        _ => Err(QuotaError::InvalidArgument(MISSING.to_string())),
    }
}

fn quota_error(err: QuotaError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        QuotaError::Unauthenticated => StatusCode::UNAUTHORIZED,
        QuotaError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        QuotaError::NotFound(_) => StatusCode::NOT_FOUND,
        QuotaError::PermissionDenied => StatusCode::FORBIDDEN,
        QuotaError::FailedPrecondition(_) => StatusCode::PRECONDITION_FAILED,
        QuotaError::ResourceExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
        QuotaError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        QuotaError::StorageError(_) | QuotaError::Internal(_) => {
            error!(error = %err, "upload quota API internal error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal server error".to_string(),
                    code: err.code().to_string(),
                    details: None,
                }),
            );
        }
    };

    let details = match &err {
        QuotaError::ResourceExhausted { limit } => Some(serde_json::json!({ "limit": limit })),
        QuotaError::Unavailable(_) => Some(serde_json::json!({ "retryable": true })),
        _ => None,
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
            details,
        }),
    )
}
