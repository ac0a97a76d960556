//! HTTP handlers
//!
//! Thin translation between JSON and [`TransferService`](crate::transfer::TransferService).

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

use super::state::AppState;
use super::types::{
    ApiError, ApiResponse, ApiResult, CreateTransferRequest, HealthResponse, created, ok,
};
use crate::transfer::{Account, AccountId, Transfer, TransferId};

/// POST /api/transfers
pub async fn create_transfer(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateTransferRequest>, JsonRejection>,
) -> ApiResult<Transfer> {
    let Json(req) = body?;
    tracing::debug!(
        from = %req.from_account_id,
        to = %req.to_account_id,
        amount = req.amount,
        "Transfer request"
    );

    let transfer = state
        .service
        .create_transfer(
            &AccountId::new(req.from_account_id),
            &AccountId::new(req.to_account_id),
            req.amount,
        )
        .await?;
    created(transfer)
}

/// GET /api/transfers
pub async fn list_transfers(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Transfer>> {
    ok(state.service.list_transfers().await?)
}

/// GET /api/transfers/{id}
pub async fn get_transfer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Transfer> {
    ok(state.service.get_transfer(&TransferId::new(id)).await?)
}

/// GET /api/accounts
pub async fn list_accounts(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Account>> {
    ok(state.service.list_accounts().await?)
}

/// GET /api/accounts/{id}
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Account> {
    ok(state.service.account_by_id(&AccountId::new(id)).await?)
}

/// GET /health
///
/// Pings the database when one is configured.
/// - Healthy: 200 + {code: 0, data: {status, timestamp_ms}}
/// - Unhealthy: 503 + {code: 5001, msg}
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<ApiResponse<HealthResponse>>), ApiError> {
    if let Some(pool) = &state.pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::error!(error = %e, "Health check database ping failed");
            return Err(ApiError::service_unavailable("unavailable"));
        }
    }

    ok(HealthResponse {
        status: "ok".to_string(),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    })
}
