use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Errors raised by the account, catalog, order, settings and maintenance operations.
#[derive(Debug, Error)]
pub enum ShopError {
    #[error("{0}")]
    Validation(String),
    #[error("{}", .0.join(" "))]
    Invalid(Vec<String>),
    #[error("access denied")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Store(#[from] sqlx::Error),
}

impl ShopError {
    /// Message safe to show to the caller. Store failures are logged and replaced
    /// with a generic text.
    pub fn user_message(&self) -> String {
        match self {
            ShopError::Store(err) => {
                log::error!("Store failure: {err}");
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Individual messages, used when a form is re-rendered with its errors.
    pub fn messages(&self) -> Vec<String> {
        match self {
            ShopError::Invalid(errors) => errors.clone(),
            other => vec![other.user_message()],
        }
    }
}

impl ResponseError for ShopError {
    fn status_code(&self) -> StatusCode {
        match self {
            ShopError::Validation(_) | ShopError::Invalid(_) => StatusCode::BAD_REQUEST,
            ShopError::Forbidden => StatusCode::FORBIDDEN,
            ShopError::NotFound(_) => StatusCode::NOT_FOUND,
            ShopError::Conflict(_) => StatusCode::CONFLICT,
            ShopError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "ok": false,
            "error": self.user_message(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_do_not_leak_details() {
        let err = ShopError::Store(sqlx::Error::RowNotFound);
        assert_eq!(err.user_message(), "Something went wrong. Please try again.");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_keeps_every_message() {
        let err = ShopError::Invalid(vec!["Username is required.".into(), "CPF is required.".into()]);
        assert_eq!(err.messages().len(), 2);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
