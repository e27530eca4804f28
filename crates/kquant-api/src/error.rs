//! 통합 API 에러 응답.
//!
//! 모든 엔드포인트에서 일관된 에러 형식을 제공합니다:
//!
//! ```json
//! { "code": "NOT_FOUND", "message": "position: 005930", "timestamp": 1770000000 }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kquant_core::KquantError;
use serde::{Deserialize, Serialize};

/// API 에러 응답.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// 에러 코드 (예: "DB_ERROR", "INVALID_INPUT", "NOT_FOUND")
    pub code: String,
    /// 사람이 읽을 수 있는 메시지
    pub message: String,
    /// 발생 타임스탬프 (Unix)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ApiErrorResponse {
    /// 에러 응답을 생성합니다.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            timestamp: Some(chrono::Utc::now().timestamp()),
        }
    }
}

/// 핸들러 에러 (상태 코드 + 응답 본문).
#[derive(Debug)]
pub struct ApiError {
    /// HTTP 상태 코드
    pub status: StatusCode,
    /// 응답 본문
    pub body: ApiErrorResponse,
}

impl ApiError {
    /// 임의 코드/메시지로 에러를 생성합니다.
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorResponse::new(code, message),
        }
    }

    /// 404 Not Found.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// 400 Bad Request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_INPUT", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<KquantError> for ApiError {
    fn from(err: KquantError) -> Self {
        match &err {
            KquantError::NotFound(_) => Self::not_found(err.to_string()),
            KquantError::InvalidInput(_) | KquantError::Validation(_) => {
                Self::bad_request(err.to_string())
            }
            KquantError::Database(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "DB_ERROR",
                err.to_string(),
            ),
            _ => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        }
    }
}

impl From<kquant_data::DataError> for ApiError {
    fn from(err: kquant_data::DataError) -> Self {
        ApiError::from(KquantError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let err = ApiErrorResponse::new("NOT_FOUND", "position: 005930");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn test_status_mapping() {
        let err = ApiError::from(KquantError::NotFound("x".to_string()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = ApiError::from(KquantError::Validation("y".to_string()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
