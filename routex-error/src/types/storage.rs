use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки слоя хранения (персистентный индекс ресурсов по автору).
#[derive(Debug, Error)]
pub enum StorageError {
    /// Ошибка ввода-вывода при чтении или записи снапшота.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Запись не удалось сериализовать или десериализовать.
    #[error("serialization failed for {bucket}/{key}: {reason}")]
    Serialization {
        bucket: String,
        key: String,
        reason: String,
    },

    /// Файл хранилища существует, но его содержимое повреждено.
    #[error("storage file {path} is corrupted: {reason}")]
    Corrupted { path: String, reason: String },

    /// Хранилище уже закрыто.
    #[error("storage is closed")]
    Closed,
}

impl ErrorExt for StorageError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Io(_) | Self::Closed => StatusCode::StorageUnavailable,
            Self::Serialization { .. } => StatusCode::SerializationFailed,
            Self::Corrupted { .. } => StatusCode::CorruptedData,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
