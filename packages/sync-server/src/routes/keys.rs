use axum::extract::{Path, State};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;

use crate::ledger::{LedgerError, TokenRecord};
use crate::middleware::auth::require_admin_key;
use crate::response::{json_success, AppError};
use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(list_keys).post(create_key))
        .route("/:token/revoke", post(revoke_key))
        .route_layer(middleware::from_fn_with_state(state, require_admin_key))
}

#[derive(Debug, Serialize)]
struct KeyData {
    api_key: String,
}

#[derive(Debug, Serialize)]
struct KeyList {
    keys: Vec<TokenRecord>,
}

async fn create_key(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let record = state.ledger().create().await.map_err(AppError::system)?;
    tracing::info!("api key created");
    Ok(json_success("API密钥创建成功", KeyData { api_key: record.token }))
}

async fn list_keys(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let keys = state.ledger().list().await.map_err(AppError::system)?;
    Ok(json_success(format!("共{}个API密钥", keys.len()), KeyList { keys }))
}

async fn revoke_key(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    match state.ledger().revoke(&token).await {
        Ok(()) => {
            tracing::info!("api key revoked");
            Ok(json_success("API密钥已停用", KeyData { api_key: token }))
        }
        Err(LedgerError::UnknownToken) => Err(AppError::invalid_api_key()),
        Err(err) => Err(AppError::system(err)),
    }
}
