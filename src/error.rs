use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use thiserror::Error;

use crate::quiz::QuizError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("missing or invalid learner session")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Locked(String),
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Store(StoreError),
}

impl ApiError {
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        ApiError::Validation(vec![msg.into()])
    }

    pub fn not_found<T: Into<String>>(what: T) -> Self {
        ApiError::NotFound(what.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            // a module without a quiz is an empty state, not a bad request
            ApiError::Quiz(QuizError::NotAvailable) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::Quiz(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Locked(_) => StatusCode::LOCKED,
            ApiError::Store(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Store(e) = &self {
            tracing::error!(error = %e, "backend call failed");
        }
        let body = match &self {
            ApiError::Validation(errors) => serde_json::json!({ "error": self.to_string(), "fields": errors }),
            // backend details stay in the log
            ApiError::Store(_) => serde_json::json!({ "error": "the training backend is unavailable, try again" }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_from_the_store_become_409() {
        let e: ApiError = StoreError::Conflict("module already has a quiz".into()).into();
        assert_eq!(e.status(), StatusCode::CONFLICT);
        let e: ApiError = StoreError::Decode("bad".into()).into();
        assert_eq!(e.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn quiz_errors_map_to_client_statuses() {
        assert_eq!(ApiError::from(QuizError::NotAvailable).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(QuizError::Unanswered(2)).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(QuizError::RetakeNotAllowed).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn validation_lists_every_field() {
        let e = ApiError::Validation(vec!["title is required".into(), "at least one role is required".into()]);
        assert_eq!(
            e.to_string(),
            "invalid request: title is required; at least one role is required"
        );
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
    }
}
