use dashmap::DashMap;
use routex_error::StorageError;
use serde_json::Value;

use super::Storage;

/// Хранилище в памяти процесса. Содержимое теряется при перезапуске.
#[derive(Default)]
pub struct InMemoryStorage {
    data: DashMap<(String, String), Value>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Storage for InMemoryStorage {
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<Value>, StorageError> {
        Ok(self
            .data
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.value().clone()))
    }

    fn set(
        &self,
        bucket: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StorageError> {
        self.data
            .insert((bucket.to_string(), key.to_string()), value);
        Ok(())
    }

    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(), StorageError> {
        self.data.remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    fn destroy(&self) -> Result<(), StorageError> {
        self.data.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Тест проверяет, что бакеты изолированы друг от друга.
    #[test]
    fn test_buckets_are_isolated() {
        let storage = InMemoryStorage::new();
        storage.set("registrations", "peer", json!([1])).unwrap();
        storage.set("subscriptions", "peer", json!([2])).unwrap();

        assert_eq!(
            storage.get("registrations", "peer").unwrap(),
            Some(json!([1]))
        );
        assert_eq!(
            storage.get("subscriptions", "peer").unwrap(),
            Some(json!([2]))
        );
    }

    /// Тест проверяет удаление, в том числе отсутствующего ключа.
    #[test]
    fn test_delete_is_idempotent() {
        let storage = InMemoryStorage::new();
        storage.set("b", "k", json!(1)).unwrap();
        storage.delete("b", "k").unwrap();
        storage.delete("b", "k").unwrap();
        assert_eq!(storage.get("b", "k").unwrap(), None);
        assert!(storage.is_empty());
    }

    /// Тест проверяет, что destroy очищает всё.
    #[test]
    fn test_destroy_clears() {
        let storage = InMemoryStorage::new();
        storage.set("a", "1", json!(1)).unwrap();
        storage.set("b", "2", json!(2)).unwrap();
        assert_eq!(storage.len(), 2);
        storage.destroy().unwrap();
        assert!(storage.is_empty());
    }
}
