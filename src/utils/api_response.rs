use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

/// JSON envelope shared by every endpoint.
///
/// Serializes as `{ "message": ..., "error"?: ..., ...payload }`: the payload's
/// own fields are flattened next to the message, so a `RequestList` renders as
/// `{ "message": "Request sent", "requests": [...] }`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    #[serde(skip)]
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Option<T>,
}

/// Error detail kept out of the body and carried in the response
/// extensions. `expose_error_detail` writes it back outside production.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(mut self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let detail = self.error.take();
        let mut response = (status, Json(self)).into_response();
        if let Some(detail) = detail {
            response.extensions_mut().insert(ErrorDetail(detail));
        }
        response
    }
}

impl<T: Serialize> ApiResponse<T> {
    /// Response with an explicit status and payload
    pub fn new(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        ApiResponse {
            status_code: status.as_u16(),
            message: message.into(),
            error: None,
            data: Some(data),
        }
    }

    /// Create a success response
    pub fn success(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        Self::new(status, message, data)
    }

    /// Create an error response
    pub fn error(status: StatusCode, message: impl Into<String>, error: Option<String>) -> Self {
        ApiResponse {
            status_code: status.as_u16(),
            message: message.into(),
            error,
            data: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Payload {
        requests: Vec<u8>,
    }

    #[test]
    fn payload_fields_sit_next_to_the_message() {
        let response = ApiResponse::success(
            StatusCode::CREATED,
            "Request sent",
            Payload { requests: vec![1, 2] },
        );
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "message": "Request sent", "requests": [1, 2] })
        );
    }

    #[test]
    fn detail_moves_from_body_to_extensions() {
        let response = ApiResponse::<()>::error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server error",
            Some("connection reset".to_string()),
        )
        .into_response();
        let detail = response.extensions().get::<ErrorDetail>().unwrap();
        assert_eq!(detail.0, "connection reset");
    }

    #[test]
    fn error_omits_absent_detail() {
        let response = ApiResponse::<()>::error(StatusCode::NOT_FOUND, "User not found", None);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "message": "User not found" })
        );
    }
}
