use axum::body::Body;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde::Serialize;
use tokio_util::io::ReaderStream;

use crate::archive_store::is_zip;
use crate::auth::{authenticate, ApiToken, API_KEY_PARAM};
use crate::middleware::auth::require_api_key;
use crate::response::{json_success, AppError};
use crate::state::AppState;

const DOWNLOAD_FILE_NAME: &str = "quiz_data.zip";
/// multipart 边界与其它字段的余量
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn router(state: AppState) -> Router<AppState> {
    let body_limit = state.config().max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/download", get(download))
        .route_layer(middleware::from_fn_with_state(state, require_api_key))
}

#[derive(Debug, Serialize)]
struct UploadData {
    filename: String,
    size: u64,
}

async fn upload(
    State(state): State<AppState>,
    api_token: Option<Extension<ApiToken>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let mut multipart = multipart.map_err(|_| AppError::missing_parameters("未找到上传文件"))?;
    let max_bytes = state.config().max_upload_bytes;
    let mut file: Option<Vec<u8>> = None;
    let mut form_token: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(|e| multipart_error(e, max_bytes))? {
        match field.name() {
            Some("file") => {
                let mut data = Vec::new();
                while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, max_bytes))? {
                    if data.len() + chunk.len() > max_bytes {
                        return Err(AppError::file_too_large(max_bytes));
                    }
                    data.extend_from_slice(&chunk);
                }
                file = Some(data);
            }
            Some(API_KEY_PARAM) => {
                let value = field.text().await.map_err(|e| multipart_error(e, max_bytes))?;
                form_token = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            }
            _ => {}
        }
    }

    let ApiToken(token) = match api_token {
        Some(Extension(token)) => token,
        None => {
            let token = form_token.ok_or_else(|| AppError::missing_parameters("缺少api_key参数"))?;
            authenticate(state.ledger(), &token).await?
        }
    };

    let data = file.ok_or_else(|| AppError::missing_parameters("未找到上传文件"))?;
    if data.is_empty() {
        return Err(AppError::file_upload("上传的文件为空"));
    }
    if !is_zip(&data) {
        return Err(AppError::invalid_file_type());
    }

    let stored = state
        .archives()
        .store(&token, &data)
        .await
        .map_err(AppError::storage)?;

    Ok(json_success(
        "数据上传成功",
        UploadData {
            filename: stored.filename,
            size: stored.size,
        },
    ))
}

async fn download(
    State(state): State<AppState>,
    Extension(ApiToken(token)): Extension<ApiToken>,
) -> Result<Response, AppError> {
    let (file, len) = state
        .archives()
        .open(&token)
        .await
        .map_err(AppError::storage)?
        .ok_or_else(AppError::file_not_found)?;

    let disposition = format!("attachment; filename=\"{}\"", DOWNLOAD_FILE_NAME);
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn multipart_error(err: MultipartError, max_bytes: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::file_too_large(max_bytes);
    }
    AppError::file_upload(format!("文件上传失败: {}", err.body_text()))
}
