use domain::{DomainError, ErrorKind, RepositoryError};
use thiserror::Error;

use crate::object_storage::ObjectStorageError;
use crate::rate_limiter::RateLimitError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("object storage error: {0}")]
    ObjectStorage(#[from] ObjectStorageError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
    #[error("authentication failed")]
    Authentication,
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplicationError::Domain(err) => err.kind(),
            ApplicationError::Repository(RepositoryError::NotFound) => ErrorKind::NotFound,
            ApplicationError::RateLimited(RateLimitError::Exceeded { .. }) => ErrorKind::RateLimited,
            ApplicationError::Authentication => ErrorKind::Unauthorized,
            ApplicationError::Repository(_)
            | ApplicationError::RateLimited(_)
            | ApplicationError::ObjectStorage(_)
            | ApplicationError::Infrastructure(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Domain(err) => err.code(),
            ApplicationError::Repository(RepositoryError::NotFound) => "NOT_FOUND",
            ApplicationError::RateLimited(RateLimitError::Exceeded { .. }) => "RATE_LIMITED",
            ApplicationError::Authentication => "UNAUTHORIZED",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
