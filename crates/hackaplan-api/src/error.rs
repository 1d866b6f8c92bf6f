use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use hackaplan_core::error::{AppError, ErrorCode};

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match code {
            ErrorCode::InvalidUrl => StatusCode::BAD_REQUEST,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::JobNotFound => StatusCode::NOT_FOUND,
            ErrorCode::FetchError => StatusCode::BAD_GATEWAY,
            ErrorCode::ParseError | ErrorCode::Timeout | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = %code, "Request failed");
        }

        // Round up so clients never retry early.
        let retry_after = match &self.0 {
            AppError::RateLimited { retry_after } => {
                Some(retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0))
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: code.to_string(),
            message: self.0.to_string(),
            retry_after,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
