use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, PendingError, StatusCode, UriError, UrimError};

/// Ошибки, видимые вызывающему через error-ответ.
///
/// На проводе передаётся только имя ошибки ([`RouterError::code`]); детали
/// остаются в логах маршрутизатора.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("procedure not found")]
    ProcedureNotFound,

    #[error("denied")]
    Denied,

    #[error("timed out")]
    TimedOut,

    #[error("protocol error")]
    Protocol,

    #[error("internal error")]
    Internal,

    /// Ошибка уровня приложения, возвращённая исполнителем.
    #[error("remote error: {0}")]
    Remote(String),
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RouterError {
    /// Имя ошибки в том виде, в каком оно уходит в error-ответ.
    pub fn code(&self) -> &str {
        match self {
            Self::InvalidUri(_) => "InvalidURI",
            Self::InvalidPayload(_) => "InvalidPayload",
            Self::ProcedureNotFound => "ProcedureNotFound",
            Self::Denied => "Denied",
            Self::TimedOut => "TimedOut",
            Self::Protocol => "ProtocolError",
            Self::Internal => "InternalError",
            Self::Remote(name) => name.as_str(),
        }
    }

    /// Восстанавливает ошибку по имени из error-ответа.
    ///
    /// Неизвестные имена считаются ошибками приложения.
    pub fn from_code(code: &str) -> Self {
        match code {
            "InvalidURI" => Self::InvalidUri(String::new()),
            "InvalidPayload" => Self::InvalidPayload(String::new()),
            "ProcedureNotFound" => Self::ProcedureNotFound,
            "Denied" => Self::Denied,
            "TimedOut" => Self::TimedOut,
            "ProtocolError" => Self::Protocol,
            "InternalError" | "" => Self::Internal,
            other => Self::Remote(other.to_string()),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для RouterError
////////////////////////////////////////////////////////////////////////////////

impl ErrorExt for RouterError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidUri(_) => StatusCode::InvalidUri,
            Self::InvalidPayload(_) => StatusCode::InvalidPayload,
            Self::ProcedureNotFound => StatusCode::ProcedureNotFound,
            Self::Denied => StatusCode::Denied,
            Self::TimedOut => StatusCode::Timeout,
            Self::Protocol => StatusCode::ProtocolError,
            Self::Internal => StatusCode::Internal,
            Self::Remote(_) => StatusCode::Unknown,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<UriError> for RouterError {
    fn from(err: UriError) -> Self {
        Self::InvalidUri(err.uri)
    }
}

impl From<UrimError> for RouterError {
    fn from(err: UrimError) -> Self {
        match err {
            UrimError::InvalidUri(e) => e.into(),
            UrimError::Storage(_) => Self::Protocol,
            UrimError::LimitReached { .. } => Self::Denied,
        }
    }
}

impl From<PendingError> for RouterError {
    fn from(err: PendingError) -> Self {
        match err {
            PendingError::TimedOut => Self::TimedOut,
            PendingError::Discarded => Self::Internal,
        }
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
