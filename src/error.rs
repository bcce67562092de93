use http::StatusCode;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// error taxonomy shared by services and route handlers
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Unauthorized(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Unexpected(String),
}

impl AppError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        AppError::NotFound(format!("{} not found: {}", what, id))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(_) | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// message sent to the client; database details stay in the logs
    pub fn public_message(&self) -> String {
        match self {
            AppError::Database(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

// warp's blanket `From<T: Reject>` lets handlers use `?` on `AppError`
impl warp::reject::Reject for AppError {}

/// json body of every error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub status: u16,
    pub error: String,
}

impl<'a> From<&'a AppError> for ErrorMsg {
    fn from(e: &'a AppError) -> Self {
        Self {
            status: e.status().as_u16(),
            error: e.public_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_status_codes_for_each_error_kind() {
        assert_eq!(AppError::not_found("workout", 1).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Forbidden("no".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Validation("bad".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthorized("sig".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Unexpected("boom".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn check_app_errors_convert_into_rejections() {
        fn handler() -> Result<(), warp::Rejection> {
            Err::<(), _>(AppError::Forbidden("no".into()))?;
            Ok(())
        }
        let rejection = handler().unwrap_err();
        assert!(matches!(rejection.find::<AppError>(), Some(AppError::Forbidden(_))));
        assert!(!rejection.is_not_found());
    }

    #[test]
    fn database_errors_do_not_leak_details() {
        let e = AppError::Database(sqlx::Error::RowNotFound);
        let msg = ErrorMsg::from(&e);
        assert_eq!(msg.status, 500);
        assert_eq!(msg.error, "internal error");

        let e = AppError::not_found("exercise", "abc");
        assert_eq!(ErrorMsg::from(&e).error, "exercise not found: abc");
    }
}
