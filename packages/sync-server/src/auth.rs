use std::collections::HashMap;

use axum::extract::Query;
use axum::http::{header, HeaderMap, Uri};
use subtle::ConstantTimeEq;

use crate::ledger::{LedgerError, TokenLedger};
use crate::response::AppError;

pub const API_KEY_PARAM: &str = "api_key";
pub const ADMIN_KEY_PARAM: &str = "admin_key";
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// 通过校验的 API 密钥，由中间件放入请求扩展
#[derive(Debug, Clone)]
pub struct ApiToken(pub String);

/// 先取 `Authorization: Bearer`，再取查询参数 `api_key`
pub fn extract_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    bearer.or_else(|| query_param(uri, API_KEY_PARAM))
}

pub fn extract_admin_key(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let header_value = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    header_value.or_else(|| query_param(uri, ADMIN_KEY_PARAM))
}

pub fn admin_key_matches(provided: &str, expected: &str) -> bool {
    bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}

/// 校验密钥并转换为接口错误
pub async fn authenticate(ledger: &TokenLedger, token: &str) -> Result<ApiToken, AppError> {
    match ledger.validate(token).await {
        Ok(()) => Ok(ApiToken(token.to_string())),
        Err(LedgerError::UnknownToken) => Err(AppError::invalid_api_key()),
        Err(LedgerError::InactiveToken) => Err(AppError::inactive_api_key()),
        Err(err) => Err(AppError::system(err)),
    }
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params
        .get(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
