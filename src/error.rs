use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use serde::Serialize;

use std::sync::PoisonError;

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    Constraint(String),

    #[error("Board revision mismatch: expected {expected}, stored {actual}")]
    Conflict { expected: i64, actual: i64 },

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Persistence failure: {0}")]
    Persistence(String),
}

pub type BoardResult<T> = Result<T, BoardError>;

impl BoardError {
    pub fn validation(field: &str, reason: impl Into<String>) -> BoardError {
        BoardError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: &str) -> BoardError {
        BoardError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn constraint(what: impl Into<String>) -> BoardError {
        BoardError::Constraint(what.into())
    }

    pub fn status(&self) -> Status {
        match self {
            BoardError::Validation { .. } => Status::BadRequest,
            BoardError::NotFound { .. } => Status::NotFound,
            BoardError::Constraint(_) => Status::UnprocessableEntity,
            BoardError::Conflict { .. } => Status::PreconditionFailed,
            BoardError::Unauthenticated => Status::Unauthorized,
            BoardError::Persistence(_) => Status::InternalServerError,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BoardError::Validation { .. } => "validation",
            BoardError::NotFound { .. } => "not_found",
            BoardError::Constraint(_) => "constraint",
            BoardError::Conflict { .. } => "conflict",
            BoardError::Unauthenticated => "unauthenticated",
            BoardError::Persistence(_) => "server_error",
        }
    }

    /// Storage details stay in the log, the client only learns that the server failed.
    pub fn public_message(&self) -> String {
        match self {
            BoardError::Persistence(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<rusqlite::Error> for BoardError {
    fn from(e: rusqlite::Error) -> BoardError {
        BoardError::Persistence(e.to_string())
    }
}

impl<T> From<PoisonError<T>> for BoardError {
    fn from(e: PoisonError<T>) -> BoardError {
        BoardError::Persistence(e.to_string())
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, kind: &'static str) -> ErrorBody {
        ErrorBody {
            error: error.into(),
            kind,
        }
    }
}

impl<'r> Responder<'r, 'static> for BoardError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();

        if status == Status::InternalServerError {
            log::error!("{} {} failed: {}", request.method(), request.uri(), self);
        } else {
            log::warn!("{} {} rejected: {}", request.method(), request.uri(), self);
        }

        let body = ErrorBody::new(self.public_message(), self.kind());
        (status, Json(body)).respond_to(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_detail_is_hidden_from_clients() {
        let error = BoardError::Persistence("disk I/O error".to_string());

        assert_eq!(error.status(), Status::InternalServerError);
        assert_eq!(error.public_message(), "Internal server error");
        assert!(error.to_string().contains("disk I/O error"));
    }

    #[test]
    fn each_kind_keeps_a_distinct_status() {
        let errors = vec![
            BoardError::validation("title", "must not be empty"),
            BoardError::not_found("Task", "task-1"),
            BoardError::constraint("Cannot delete the last column"),
            BoardError::Conflict {
                expected: 1,
                actual: 2,
            },
            BoardError::Unauthenticated,
            BoardError::Persistence(String::new()),
        ];

        let mut statuses: Vec<u16> = errors.iter().map(|e| e.status().code).collect();
        statuses.sort_unstable();
        statuses.dedup();

        assert_eq!(statuses.len(), errors.len());
    }

    #[test]
    fn messages_name_the_offending_field_or_id() {
        assert_eq!(
            BoardError::validation("title", "must not be empty").to_string(),
            "Invalid title: must not be empty"
        );
        assert_eq!(
            BoardError::not_found("Column", "backlog").to_string(),
            "Column not found: backlog"
        );
    }
}
