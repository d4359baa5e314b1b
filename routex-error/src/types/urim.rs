use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode, StorageError};

/// URI не соответствует синтаксису `segment(.segment)*`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid URI '{uri}'")]
pub struct UriError {
    pub uri: String,
}

/// Ошибки URI-матчера (дерево ресурсов + индекс по автору).
#[derive(Debug, Error)]
pub enum UrimError {
    #[error(transparent)]
    InvalidUri(#[from] UriError),

    /// Индекс по автору не удалось сохранить, дерево не изменено.
    #[error("author index update failed: {0}")]
    Storage(#[from] StorageError),

    /// У автора уже `limit` ресурсов.
    #[error("resource limit {limit} reached")]
    LimitReached { limit: usize },
}

impl ErrorExt for UriError {
    fn status_code(&self) -> StatusCode {
        StatusCode::InvalidUri
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for UrimError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidUri(e) => e.status_code(),
            Self::Storage(e) => e.status_code(),
            Self::LimitReached { .. } => StatusCode::QuotaExceeded,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
