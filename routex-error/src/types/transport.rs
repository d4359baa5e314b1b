use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки отправки события пиру.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Противоположная сторона закрыла соединение.
    #[error("transport is closed")]
    Closed,

    /// Отправка не завершилась за отведённое время.
    #[error("send timed out")]
    Timeout,

    /// Событие не удалось закодировать для передачи.
    #[error("encoding failed: {0}")]
    Encoding(String),
}

/// Исход ожидания коррелированного ответа (`PendingMap`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PendingError {
    /// Истёк таймаут ожидания.
    #[error("pending event timed out")]
    TimedOut,

    /// Ожидание отменено: запись удалена из реестра до срабатывания.
    #[error("pending event discarded")]
    Discarded,
}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Closed => StatusCode::ConnectionClosed,
            Self::Timeout => StatusCode::Timeout,
            Self::Encoding(_) => StatusCode::SerializationFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for PendingError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::TimedOut => StatusCode::Timeout,
            Self::Discarded => StatusCode::ConnectionClosed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
