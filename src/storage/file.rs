use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use routex_error::StorageError;
use serde_json::Value;
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    task::block_in_place,
};
use tracing::{debug, info};

use super::Storage;

type Snapshot = BTreeMap<String, BTreeMap<String, Value>>;

/// Хранилище с JSON-снимком на диске.
///
/// Данные держатся в памяти; после каждой мутации снимок целиком пишется во
/// временный файл и переименовывается поверх основного. Если запись на диск
/// не удалась, изменение в памяти откатывается.
///
/// Каждое изменение переписывает весь снимок, поэтому бэкенд рассчитан на
/// небольшие пространства имён. На многопоточном рантайме tokio запись идёт
/// через `block_in_place`, чтобы не занимать рабочий поток планировщика.
pub struct FileStorage {
    path: PathBuf,
    state: Mutex<Option<Snapshot>>,
}

impl FileStorage {
    /// Открывает существующий снимок или создаёт пустой.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let snapshot = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Snapshot::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupted {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)?;
                }
                Snapshot::new()
            }
            Err(e) => return Err(e.into()),
        };

        let storage = Self {
            path,
            state: Mutex::new(None),
        };
        // Сразу проверяем, что каталог доступен на запись.
        storage.write_snapshot(&snapshot)?;
        *storage.state.lock() = Some(snapshot);

        info!(
            target: "routex::storage",
            path = %storage.path.display(),
            "file storage opened"
        );
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_snapshot(
        &self,
        snapshot: &Snapshot,
    ) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(snapshot).map_err(|e| StorageError::Serialization {
            bucket: "*".to_string(),
            key: "*".to_string(),
            reason: e.to_string(),
        })?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        debug!(target: "routex::storage", path = %self.path.display(), "snapshot written");
        Ok(())
    }

    /// Применяет изменение и сохраняет снимок; при ошибке записи
    /// восстанавливает прежнее значение.
    fn mutate(
        &self,
        bucket: &str,
        key: &str,
        value: Option<Value>,
    ) -> Result<(), StorageError> {
        let mut guard = self.state.lock();
        let snapshot = guard.as_mut().ok_or(StorageError::Closed)?;

        let entries = snapshot.entry(bucket.to_string()).or_default();
        let previous = match value {
            Some(value) => entries.insert(key.to_string(), value),
            None => entries.remove(key),
        };
        if entries.is_empty() {
            snapshot.remove(bucket);
        }

        if let Err(e) = blocking(|| self.write_snapshot(snapshot)) {
            let entries = snapshot.entry(bucket.to_string()).or_default();
            match previous {
                Some(previous) => {
                    entries.insert(key.to_string(), previous);
                }
                None => {
                    entries.remove(key);
                }
            }
            if entries.is_empty() {
                snapshot.remove(bucket);
            }
            return Err(e);
        }
        Ok(())
    }
}

/// Выполняет блокирующую запись, освобождая рабочий поток tokio, если он
/// есть. На однопоточном рантайме и вне рантайма вызов идёт напрямую.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => block_in_place(f),
        _ => f(),
    }
}

impl Storage for FileStorage {
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<Value>, StorageError> {
        let guard = self.state.lock();
        let snapshot = guard.as_ref().ok_or(StorageError::Closed)?;
        Ok(snapshot
            .get(bucket)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn set(
        &self,
        bucket: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StorageError> {
        self.mutate(bucket, key, Some(value))
    }

    fn delete(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(), StorageError> {
        self.mutate(bucket, key, None)
    }

    fn destroy(&self) -> Result<(), StorageError> {
        let mut guard = self.state.lock();
        *guard = None;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
