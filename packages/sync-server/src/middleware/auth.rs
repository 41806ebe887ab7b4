use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::{admin_key_matches, authenticate, extract_admin_key, extract_token};
use crate::response::AppError;
use crate::state::AppState;

/// 校验 API 密钥
///
/// multipart 请求可以把 `api_key` 放在表单字段里，此时交给上传处理函数校验。
pub async fn require_api_key(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_token(req.headers(), req.uri()) else {
        if is_multipart(&req) {
            return next.run(req).await;
        }
        return AppError::missing_parameters("缺少api_key参数").into_response();
    };

    match authenticate(state.ledger(), &token).await {
        Ok(api_token) => {
            req.extensions_mut().insert(api_token);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

pub async fn require_admin_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config().admin_key.as_deref() else {
        return AppError::missing_admin_key("服务器未配置管理员密钥").into_response();
    };

    let Some(provided) = extract_admin_key(req.headers(), req.uri()) else {
        return AppError::missing_admin_key("缺少admin_key参数").into_response();
    };

    if !admin_key_matches(&provided, expected) {
        tracing::warn!(path = %req.uri().path(), "admin key rejected");
        return AppError::unauthorized("无权限管理API密钥").into_response();
    }

    next.run(req).await
}

fn is_multipart(req: &Request<Body>) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}
