//! Хранилище индекса ресурсов по автору.
//!
//! - `memory`: данные живут только в памяти процесса.
//! - `file`: JSON-снимок на диске, перезаписываемый атомарно.

pub mod file;
pub mod memory;

use std::sync::Arc;

use routex_error::StorageError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub use file::FileStorage;
pub use memory::InMemoryStorage;

use crate::config::{StorageKind, StorageSettings};

/// Ключ-значение с разбиением на бакеты.
pub trait Storage: Send + Sync {
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<Value>, StorageError>;

    fn set(
        &self,
        bucket: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StorageError>;

    /// Удаляет запись; отсутствие записи ошибкой не считается.
    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(), StorageError>;

    /// Удаляет все данные и закрывает хранилище.
    fn destroy(&self) -> Result<(), StorageError>;
}

/// Типизированные операции поверх [`Storage`].
pub trait StorageExt: Storage {
    fn get_as<T: DeserializeOwned>(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        match self.get(bucket, key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| serialization_error(bucket, key, e)),
            None => Ok(None),
        }
    }

    fn set_as<T: Serialize>(
        &self,
        bucket: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let value = serde_json::to_value(value).map_err(|e| serialization_error(bucket, key, e))?;
        self.set(bucket, key, value)
    }
}

impl<S: Storage + ?Sized> StorageExt for S {}

fn serialization_error(
    bucket: &str,
    key: &str,
    e: serde_json::Error,
) -> StorageError {
    StorageError::Serialization {
        bucket: bucket.to_string(),
        key: key.to_string(),
        reason: e.to_string(),
    }
}

/// Конкретная реализация хранилища, выбранная конфигурацией.
pub enum StorageEngine {
    InMemory(InMemoryStorage),
    File(FileStorage),
}

impl StorageEngine {
    /// Создаёт хранилище по настройкам.
    pub fn initialize(settings: &StorageSettings) -> Result<Self, StorageError> {
        match settings.kind {
            StorageKind::Memory => Ok(Self::InMemory(InMemoryStorage::new())),
            StorageKind::File => Ok(Self::File(FileStorage::open(&settings.path)?)),
        }
    }

    pub fn get_store(&self) -> &dyn Storage {
        match self {
            Self::InMemory(store) => store,
            Self::File(store) => store,
        }
    }
}

impl Storage for StorageEngine {
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<Value>, StorageError> {
        self.get_store().get(bucket, key)
    }

    fn set(
        &self,
        bucket: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StorageError> {
        self.get_store().set(bucket, key, value)
    }

    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(), StorageError> {
        self.get_store().delete(bucket, key)
    }

    fn destroy(&self) -> Result<(), StorageError> {
        self.get_store().destroy()
    }
}

/// Открывает хранилище для маршрутизатора.
pub fn open_storage(settings: &StorageSettings) -> Result<Arc<dyn Storage>, StorageError> {
    Ok(Arc::new(StorageEngine::initialize(settings)?))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use tempfile::tempdir;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        hops: u32,
    }

    /// Тест проверяет типизированную запись и чтение через обе реализации.
    #[test]
    fn test_typed_roundtrip_for_every_engine() {
        let dir = tempdir().unwrap();
        let engines = [
            StorageEngine::initialize(&StorageSettings::memory()).unwrap(),
            StorageEngine::initialize(&StorageSettings::file(dir.path().join("db.json"))).unwrap(),
        ];

        for engine in &engines {
            let record = Record {
                name: "alpha".into(),
                hops: 2,
            };
            engine.set_as("bucket", "k", &record).unwrap();
            assert_eq!(engine.get_as::<Record>("bucket", "k").unwrap(), Some(record));
            assert_eq!(engine.get_as::<Record>("bucket", "missing").unwrap(), None);
            assert_eq!(engine.get_as::<Record>("other", "k").unwrap(), None);
        }
    }

    /// Тест проверяет, что запись неверного типа даёт ошибку сериализации.
    #[test]
    fn test_type_mismatch_is_serialization_error() {
        let storage = InMemoryStorage::new();
        storage.set("b", "k", serde_json::json!("text")).unwrap();
        let err = storage.get_as::<Record>("b", "k").unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }
}
