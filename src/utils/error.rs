use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::db::store::StoreError;
use crate::utils::api_response::ApiResponse;

/// Errors raised by handlers and services. Server-side failures keep their
/// detail on the response; `expose_error_detail` decides whether clients see it.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}: {detail}")]
    Upstream { message: String, detail: String },

    #[error("Server error: {0}")]
    Store(StoreError),

    #[error("{message}: {detail}")]
    Internal { message: String, detail: String },
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => AppError::Conflict(message),
            other => AppError::Store(other),
        }
    }
}

impl From<AppError> for ApiResponse<()> {
    fn from(err: AppError) -> Self {
        let status = err.status();
        match err {
            AppError::Validation(message)
            | AppError::Unauthorized(message)
            | AppError::Forbidden(message)
            | AppError::NotFound(message)
            | AppError::Conflict(message) => ApiResponse::error(status, message, None),
            AppError::Upstream { message, detail } | AppError::Internal { message, detail } => {
                error!("{message}: {detail}");
                ApiResponse::error(status, message, Some(detail))
            }
            AppError::Store(err) => {
                error!("Store failure: {err}");
                ApiResponse::error(status, "Server error", Some(err.to_string()))
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        ApiResponse::<()>::from(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_http_statuses() {
        assert_eq!(AppError::validation("userId is required").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::not_found("User not found").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::from(StoreError::Conflict("taken".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(StoreError::Corrupt("bad role".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn not_found_carries_message_without_detail() {
        let response = ApiResponse::<()>::from(AppError::not_found("Category not found in database"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.message, "Category not found in database");
        assert!(response.error.is_none());
    }

    #[test]
    fn store_failures_keep_their_detail() {
        let response = ApiResponse::<()>::from(AppError::from(StoreError::Corrupt("bad role".into())));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.message, "Server error");
        assert_eq!(response.error.as_deref(), Some("Stored value is invalid: bad role"));
    }
}
