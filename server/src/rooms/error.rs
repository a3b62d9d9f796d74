//! Room API Error Types

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum RoomApiError {
    /// The room table refused the operation.
    #[error(transparent)]
    Rejected(#[from] huddle_common::Error),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<JsonRejection> for RoomApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

impl RoomApiError {
    const fn status(&self) -> StatusCode {
        use huddle_common::Error;

        match self {
            Self::Rejected(Error::RoomNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Rejected(
                Error::RoomInactive(_)
                | Error::AlreadyInRoom { .. }
                | Error::AlreadyParticipant(_)
                | Error::VersionConflict { .. },
            ) => StatusCode::CONFLICT,
            Self::Rejected(Error::EmptyRoom) | Self::InvalidBody(_) | Self::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            Self::Rejected(e) => e.code(),
            Self::InvalidBody(_) => "INVALID_BODY",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}

impl IntoResponse for RoomApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_client_error() {
            tracing::debug!(code = self.code(), error = %self, "Room request rejected");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_common::Error;
    use uuid::Uuid;

    #[test]
    fn test_status_per_rejection() {
        let id = Uuid::new_v4();
        let cases = [
            (Error::RoomNotFound(id), StatusCode::NOT_FOUND),
            (Error::RoomInactive(id), StatusCode::CONFLICT),
            (Error::AlreadyParticipant(id), StatusCode::CONFLICT),
            (
                Error::VersionConflict {
                    expected: 1,
                    actual: 2,
                },
                StatusCode::CONFLICT,
            ),
            (Error::EmptyRoom, StatusCode::BAD_REQUEST),
        ];
        for (error, status) in cases {
            assert_eq!(RoomApiError::from(error).status(), status);
        }
    }

    #[test]
    fn test_code_passes_through() {
        let error = RoomApiError::from(Error::EmptyRoom);
        assert_eq!(error.code(), "EMPTY_ROOM");
        assert_eq!(
            RoomApiError::Validation("x".into()).code(),
            "VALIDATION_ERROR"
        );
    }
}
