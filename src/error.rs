use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::checkin::CheckinError;
use crate::payload::PayloadError;

/// Every failure a handler can report. None of them is fatal: the operator
/// repeats the one action that failed.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MalformedPayload(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Database(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
        }
        (status, self.to_string()).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".into()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => AppError::Conflict(db_err.message().to_string()),
                Some("23503") => AppError::NotFound("Referenced resource not found".into()),
                Some("23514") => AppError::Validation(db_err.message().to_string()),
                _ => AppError::Database(err.to_string()),
            },
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .errors()
            .iter()
            .flat_map(|(field, kind)| match kind {
                validator::ValidationErrorsKind::Field(errs) => errs
                    .iter()
                    .map(|e| describe(field, e))
                    .collect::<Vec<_>>(),
                _ => Vec::new(),
            })
            .collect();
        messages.sort();
        if messages.is_empty() {
            messages.push(errors.to_string());
        }
        AppError::Validation(messages.join("; "))
    }
}

fn describe(field: &str, err: &validator::ValidationError) -> String {
    match &err.message {
        Some(msg) => msg.to_string(),
        None if field == "__all__" => err.code.to_string(),
        None => format!("{field}: invalid value"),
    }
}

impl From<PayloadError> for AppError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::Encode(_) => AppError::Internal(err.to_string()),
            _ => AppError::MalformedPayload(err.to_string()),
        }
    }
}

impl From<CheckinError> for AppError {
    fn from(err: CheckinError) -> Self {
        match err {
            CheckinError::Payload(e) => e.into(),
            CheckinError::EventNotFound(_) | CheckinError::StudentNotFound => {
                AppError::NotFound(err.to_string())
            }
            CheckinError::Store(e) => e.into(),
        }
    }
}
