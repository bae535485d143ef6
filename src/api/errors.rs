use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use super::dto::ErrorDto;

/// Failures visible to HTTP clients. Internal details never reach the body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("No temperature data available")]
    NoData,
    #[error("Object storage not configured")]
    StorageUnavailable,
}

impl AppError {
    fn message(&self) -> &'static str {
        match self {
            AppError::NoData => {
                "Unable to retrieve fresh temperature data from senseBoxes. \
                 Data may be unavailable or older than 1 hour."
            }
            AppError::StorageUnavailable => "Unable to flush temperature data to object storage.",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NoData | AppError::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(ErrorDto {
            error: self.to_string(),
            message: self.message().to_owned(),
        });
        (status, body).into_response()
    }
}
