use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::render::escape_html;

/// Errors raised by the stream log core
///
/// Both variants are caller bugs: they are reported at construction or call
/// time and never retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StreamLogError {
    /// A log was constructed with a non-positive subscriber queue depth
    #[error("stream log '{name}' requires a positive capacity, got {capacity}")]
    InvalidCapacity { name: String, capacity: usize },
    /// A windowed read was requested with a malformed bound
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed request parameters
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>querylogz error</title></head>\n\
             <body>\n<h1 class=\"error\">error</h1>\n<p>{}</p>\n<p>type: {}</p>\n</body>\n</html>\n",
            escape_html(&self.to_string()),
            error_type_name(&self),
        );

        (status, Html(body)).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::BadRequest(_) => "bad_request",
        AppError::ConfigError(_) => "config_error",
    }
}

impl From<StreamLogError> for AppError {
    fn from(err: StreamLogError) -> Self {
        match err {
            StreamLogError::InvalidArgument(_) => Self::BadRequest(err.to_string()),
            StreamLogError::InvalidCapacity { .. } => Self::ConfigError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = StreamLogError::InvalidCapacity {
            name: "querylogz".to_string(),
            capacity: 0,
        };
        assert_eq!(
            error.to_string(),
            "stream log 'querylogz' requires a positive capacity, got 0"
        );
    }

    #[test]
    fn test_error_type_name() {
        assert_eq!(error_type_name(&AppError::BadRequest("x".to_string())), "bad_request");
        assert_eq!(error_type_name(&AppError::ConfigError("x".to_string())), "config_error");
    }

    #[test]
    fn test_invalid_argument_maps_to_bad_request() {
        let error: AppError = StreamLogError::InvalidArgument("limit must be >= 0".to_string()).into();
        assert!(matches!(error, AppError::BadRequest(_)));
    }

    #[test]
    fn test_invalid_capacity_maps_to_config_error() {
        let error: AppError = StreamLogError::InvalidCapacity {
            name: "querylogz".to_string(),
            capacity: 0,
        }
        .into();
        assert!(matches!(error, AppError::ConfigError(_)));
        assert_eq!(error.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_error_response_is_html_page() {
        let error = AppError::BadRequest("timeout <abc> is not a number".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let page = String::from_utf8(body.to_vec()).unwrap();
        assert!(page.contains("error"));
        assert!(page.contains("&lt;abc&gt;"));
    }
}
