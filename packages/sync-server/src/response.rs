use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error_code: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub data: T,
}

#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    is_operational: bool,
}

impl AppError {
    pub fn missing_parameters(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "MISSING_PARAMETERS", message)
    }

    pub fn invalid_api_key() -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "INVALID_API_KEY", "无效的API密钥")
    }

    pub fn inactive_api_key() -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "INACTIVE_API_KEY", "API密钥已停用")
    }

    pub fn file_upload(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "FILE_UPLOAD_ERROR", message)
    }

    pub fn file_too_large(limit: usize) -> Self {
        Self::operational(
            StatusCode::BAD_REQUEST,
            "FILE_TOO_LARGE",
            format!("文件太大，最大允许{}MB", limit / (1024 * 1024)),
        )
    }

    pub fn invalid_file_type() -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "INVALID_FILE_TYPE", "只允许上传ZIP文件")
    }

    pub fn file_not_found() -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "FILE_NOT_FOUND", "文件不存在")
    }

    pub fn missing_admin_key(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "MISSING_ADMIN_KEY", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 存储失败，细节只写日志
    pub fn storage(detail: impl std::fmt::Display) -> Self {
        tracing::error!(error = %detail, "storage failure");
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "STORAGE_ERROR".to_string(),
            message: detail.to_string(),
            is_operational: false,
        }
    }

    pub fn system(detail: impl std::fmt::Display) -> Self {
        tracing::error!(error = %detail, "system failure");
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "SYSTEM_ERROR".to_string(),
            message: detail.to_string(),
            is_operational: false,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    fn operational(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            is_operational: true,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = if self.is_operational {
            self.message
        } else {
            "服务器内部错误".to_string()
        };

        let body = ErrorResponse {
            success: false,
            message,
            error_code: self.code,
        };

        (self.status, Json(body)).into_response()
    }
}

pub fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> AppError {
    AppError {
        status,
        code: code.into(),
        message: message.into(),
        is_operational: true,
    }
}

pub fn json_success<T: Serialize>(message: impl Into<String>, data: T) -> Json<SuccessResponse<T>> {
    Json(SuccessResponse {
        success: true,
        message: message.into(),
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        data,
    })
}
