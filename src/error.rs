//! 统一的 API 错误类型与状态码映射。

use axum::extract::multipart::MultipartError;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::io::ErrorKind;
use tracing::error;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(HeaderMap),
    NotFound(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 面向用户的简短说明；内部错误不暴露细节。
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::PayloadTooLarge(msg) => {
                msg
            }
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Internal(_) => "internal server error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Unauthorized(headers) => (status, headers, "unauthorized").into_response(),
            ApiError::Internal(detail) => {
                error!(detail = %detail, "request failed");
                (status, "internal server error").into_response()
            }
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::PayloadTooLarge(msg) => {
                (status, msg).into_response()
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::EmptyName
            | StorageError::InvalidName
            | StorageError::ExtensionNotAllowed => ApiError::BadRequest(error.to_string()),
            StorageError::PayloadTooLarge { .. } => ApiError::PayloadTooLarge(error.to_string()),
            StorageError::NotFound => ApiError::NotFound(error.to_string()),
            // 读取路径已在存储层转为 NotFound；这里剩下的 NotFound 是目录本身丢失。
            StorageError::Io(err) => match err.kind() {
                ErrorKind::InvalidData | ErrorKind::UnexpectedEof => {
                    ApiError::BadRequest(format!("Malformed upload: {err}"))
                }
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        match error.status() {
            StatusCode::PAYLOAD_TOO_LARGE => ApiError::PayloadTooLarge(error.body_text()),
            status if status.is_client_error() => ApiError::BadRequest(error.body_text()),
            _ => ApiError::Internal(error.body_text()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_documented_statuses() {
        let cases = [
            (StorageError::EmptyName, StatusCode::BAD_REQUEST),
            (StorageError::InvalidName, StatusCode::BAD_REQUEST),
            (StorageError::ExtensionNotAllowed, StatusCode::BAD_REQUEST),
            (
                StorageError::PayloadTooLarge { limit: 1 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (StorageError::NotFound, StatusCode::NOT_FOUND),
            (
                StorageError::Io(std::io::Error::from(ErrorKind::PermissionDenied)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                StorageError::Io(std::io::Error::from(ErrorKind::NotFound)),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }

    #[test]
    fn validation_messages_are_user_facing() {
        let error = ApiError::from(StorageError::ExtensionNotAllowed);
        assert_eq!(error.message(), "File type not allowed");
        let error = ApiError::from(StorageError::Io(std::io::Error::other("disk on fire")));
        assert_eq!(error.message(), "internal server error");
    }
}
