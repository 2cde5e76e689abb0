use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use matchday_scheduler::SchedulerError;
use serde_json::json;
use tracing::error;

/// Scheduler errors rendered as `{"error": ..., "code": ...}`.
#[derive(Debug)]
pub struct ApiError(pub SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            SchedulerError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
            SchedulerError::InvalidTransition { .. } => StatusCode::CONFLICT,
            SchedulerError::InvalidSchedule(_)
            | SchedulerError::InvalidTask(_)
            | SchedulerError::InvalidLimit(_)
            | SchedulerError::MissingCredential => StatusCode::UNPROCESSABLE_ENTITY,
            SchedulerError::Database(_)
            | SchedulerError::Serialization(_)
            | SchedulerError::StorePoisoned => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, code = self.0.code(), "request failed");
        }
        let body = json!({ "error": self.0.to_string(), "code": self.0.code() });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
