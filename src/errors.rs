use crate::services::{
    media_service::MediaError, path_organizer::PathError, rental_days::RentalDaysError,
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Every failure a handler can report, mapped onto one HTTP status each.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid `{field}`: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Storage(_) | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Storage(_) => "storage",
            AppError::Other(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::PhotoNotFound(_) | MediaError::ObjectNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            MediaError::InvalidObjectKey => AppError::validation("key", err.to_string()),
            MediaError::KeyConflict(_) => AppError::Conflict(err.to_string()),
            MediaError::Path(path) => path.into(),
            MediaError::Sqlx(_) | MediaError::Io(_) | MediaError::Json(_) => {
                AppError::Storage(err.to_string())
            }
        }
    }
}

impl From<PathError> for AppError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::InvalidCategory(_) => AppError::validation("category", err.to_string()),
            PathError::PathTooLong { .. } => AppError::validation("path", err.to_string()),
            // Templates come from configuration, not from the request.
            PathError::UnknownPlaceholder(_) | PathError::MalformedTemplate(_) => {
                AppError::Other(err.to_string())
            }
        }
    }
}

impl From<RentalDaysError> for AppError {
    fn from(err: RentalDaysError) -> Self {
        AppError::validation("end", err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::validation("multipart", err.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::io;

    #[tokio::test]
    async fn renders_json_body_with_kind_and_status() {
        let response = AppError::validation("category", "category `x` is not allowed").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(body["kind"], "validation");
        assert_eq!(body["status"], 400);
        assert_eq!(body["error"], "invalid `category`: category `x` is not allowed");
    }

    #[test]
    fn media_errors_map_to_statuses() {
        let cases = [
            (MediaError::PhotoNotFound("p".into()), StatusCode::NOT_FOUND),
            (MediaError::ObjectNotFound("k".into()), StatusCode::NOT_FOUND),
            (MediaError::InvalidObjectKey, StatusCode::BAD_REQUEST),
            (MediaError::KeyConflict("k".into()), StatusCode::CONFLICT),
            (
                MediaError::Path(PathError::InvalidCategory("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                MediaError::Path(PathError::MalformedTemplate("bad".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                MediaError::Io(io::Error::other("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }
}
