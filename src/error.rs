use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: &'static str,
    pub message: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")] Validation(String),
    #[error("not found")] NotFound,
    #[error("{0}")] Conflict(String),
    #[error("not authorized")] Forbidden,
    #[error("rate limit exceeded")] RateLimited,
    #[error("datastore unavailable")] Unavailable,
    #[error("internal error")] Internal,
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::NotFound => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Forbidden => "forbidden",
            ApiError::RateLimited => "rate_limited",
            // the only retryable kind; everything above is deterministic
            ApiError::Unavailable => "unavailable",
            ApiError::Internal => "internal",
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Validation(m) => ApiError::Validation(m.to_string()),
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict(m) => ApiError::Conflict(m.to_string()),
            RepoError::Forbidden => ApiError::Forbidden,
            RepoError::Unavailable(m) => {
                log::error!("datastore unavailable: {m}");
                ApiError::Unavailable
            }
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status)
            .json(ApiErrorBody { error: self.kind(), message: self.to_string() })
    }
}
