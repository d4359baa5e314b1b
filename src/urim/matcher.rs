use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use routex_error::UrimError;
use tracing::{debug, warn};

use super::{parse_uri, UriSegment};
use crate::{
    protocol::{Resource, ResourceOptions},
    storage::{Storage, StorageExt},
};

/// Бакет хранилища для регистраций.
pub const REGISTRATIONS_BUCKET: &str = "registrations";
/// Бакет хранилища для подписок.
pub const SUBSCRIPTIONS_BUCKET: &str = "subscriptions";

/// Индекс ресурсов по URI с поддержкой шаблонов.
///
/// Кроме дерева хранит в [`Storage`] список ресурсов каждого автора. Дерево
/// и список изменяются под блокировкой автора: сначала пишется хранилище, и
/// только после успешной записи меняется дерево.
pub struct Urim<O: ResourceOptions> {
    root: Arc<UriSegment<Arc<Resource<O>>>>,
    storage: Arc<dyn Storage>,
    bucket: String,
    authors: DashMap<String, Arc<Mutex<()>>>,
}

impl<O: ResourceOptions> Urim<O> {
    pub fn new(
        storage: Arc<dyn Storage>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            root: Arc::new(UriSegment::new()),
            storage,
            bucket: bucket.into(),
            authors: DashMap::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Добавляет ресурс.
    ///
    /// Ошибка синтаксиса URI или записи в хранилище оставляет индекс без
    /// изменений.
    pub fn add(
        &self,
        resource: Resource<O>,
    ) -> Result<Arc<Resource<O>>, UrimError> {
        self.add_within(resource, None)
    }

    /// Добавляет ресурс, если у автора их меньше `limit`.
    ///
    /// Подсчёт и запись идут под одной блокировкой автора, поэтому
    /// параллельные добавления не превышают лимит.
    pub fn add_within(
        &self,
        resource: Resource<O>,
        limit: Option<usize>,
    ) -> Result<Arc<Resource<O>>, UrimError> {
        let resource = Arc::new(resource);
        let path = parse_uri(&resource.uri)?;

        let lock = self.author_lock(&resource.author_id);
        let guard = lock.lock();
        let inserted = self.insert_locked(&resource, &path, limit);
        drop(guard);
        self.release_author_lock(&resource.author_id, lock);
        inserted?;

        debug!(
            target: "routex::urim",
            bucket = %self.bucket,
            uri = %resource.uri,
            resource_id = %resource.id,
            author_id = %resource.author_id,
            "resource added"
        );
        Ok(resource)
    }

    /// Ресурсы, чей шаблон совпадает с `uri`.
    ///
    /// Для некорректного URI возвращает пустой список.
    pub fn match_uri(
        &self,
        uri: &str,
    ) -> Vec<Arc<Resource<O>>> {
        let Ok(path) = parse_uri(uri) else {
            return Vec::new();
        };
        self.root
            .matches(&path)
            .iter()
            .flat_map(|node| node.values())
            .collect()
    }

    /// Удаляет ресурсы автора: один по `resource_id` или все при `None`.
    ///
    /// Возвращает удалённые ресурсы. Если у автора ничего не осталось,
    /// запись в хранилище удаляется целиком.
    pub fn delete_by_author(
        &self,
        author_id: &str,
        resource_id: Option<&str>,
    ) -> Result<Vec<Arc<Resource<O>>>, UrimError> {
        let lock = self.author_lock(author_id);
        let guard = lock.lock();

        let list = self.load_author(author_id)?;
        let (removed, kept): (Vec<_>, Vec<_>) = list
            .into_iter()
            .partition(|resource| resource_id.map_or(true, |id| id == resource.id));

        if removed.is_empty() {
            drop(guard);
            self.release_author_lock(author_id, lock);
            return Ok(Vec::new());
        }

        if kept.is_empty() {
            self.storage.delete(&self.bucket, author_id)?;
        } else {
            self.storage.set_as(&self.bucket, author_id, &kept)?;
        }

        let removed = removed
            .into_iter()
            .map(|resource| self.detach(resource))
            .collect::<Vec<_>>();

        debug!(
            target: "routex::urim",
            bucket = %self.bucket,
            author_id,
            removed = removed.len(),
            "resources deleted"
        );

        drop(guard);
        self.release_author_lock(author_id, lock);
        Ok(removed)
    }

    /// Возвращает в дерево сохранённые ресурсы автора.
    ///
    /// Уже загруженные ресурсы пропускаются. Возвращает число вставленных.
    pub fn restore_author(
        &self,
        author_id: &str,
    ) -> Result<usize, UrimError> {
        let lock = self.author_lock(author_id);
        let _guard = lock.lock();

        let mut restored = 0;
        for resource in self.load_author(author_id)? {
            let Ok(path) = parse_uri(&resource.uri) else {
                warn!(
                    target: "routex::urim",
                    bucket = %self.bucket,
                    uri = %resource.uri,
                    "stored resource has invalid URI, skipped"
                );
                continue;
            };
            let node = self.root.get_or_insert(&path);
            if !node.contains(&resource.id) {
                node.insert(resource.id.clone(), Arc::new(resource));
                restored += 1;
            }
        }
        Ok(restored)
    }

    /// Сохранённые ресурсы автора.
    pub fn get_by_author(
        &self,
        author_id: &str,
    ) -> Result<Vec<Resource<O>>, UrimError> {
        self.load_author(author_id)
    }

    pub fn count_by_author(
        &self,
        author_id: &str,
    ) -> Result<usize, UrimError> {
        Ok(self.load_author(author_id)?.len())
    }

    /// Количество ресурсов, совпадающих с `uri`.
    pub fn count(
        &self,
        uri: &str,
    ) -> usize {
        self.match_uri(uri).len()
    }

    /// Общее количество ресурсов в дереве.
    pub fn len(&self) -> usize {
        self.root.total()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// URI всех непустых узлов дерева.
    pub fn dump_uri_list(&self) -> Vec<String> {
        self.root
            .dump()
            .into_iter()
            .map(|path| path.join("."))
            .collect()
    }

    /// Ресурсы, зарегистрированные ровно под шаблоном `uri`.
    pub fn get_exact(
        &self,
        uri: &str,
    ) -> Vec<Arc<Resource<O>>> {
        let Ok(path) = parse_uri(uri) else {
            return Vec::new();
        };
        self.root
            .find(&path)
            .map(|node| node.values())
            .unwrap_or_default()
    }

    fn detach(
        &self,
        resource: Resource<O>,
    ) -> Arc<Resource<O>> {
        let detached = parse_uri(&resource.uri)
            .ok()
            .and_then(|path| self.root.find(&path))
            .and_then(|node| node.remove(&resource.id));
        detached.unwrap_or_else(|| Arc::new(resource))
    }

    /// Вызывается под блокировкой автора: сначала хранилище, затем дерево.
    fn insert_locked(
        &self,
        resource: &Arc<Resource<O>>,
        path: &[&str],
        limit: Option<usize>,
    ) -> Result<(), UrimError> {
        let mut list = self.load_author(&resource.author_id)?;
        if let Some(limit) = limit {
            if list.len() >= limit {
                return Err(UrimError::LimitReached { limit });
            }
        }
        list.push(resource.as_ref().clone());
        self.storage
            .set_as(&self.bucket, &resource.author_id, &list)?;

        self.root
            .get_or_insert(path)
            .insert(resource.id.clone(), Arc::clone(resource));
        Ok(())
    }

    fn load_author(
        &self,
        author_id: &str,
    ) -> Result<Vec<Resource<O>>, UrimError> {
        Ok(self
            .storage
            .get_as::<Vec<Resource<O>>>(&self.bucket, author_id)?
            .unwrap_or_default())
    }

    fn author_lock(
        &self,
        author_id: &str,
    ) -> Arc<Mutex<()>> {
        Arc::clone(
            self.authors
                .entry(author_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Убирает блокировку автора, если её больше никто не держит.
    fn release_author_lock(
        &self,
        author_id: &str,
        lock: Arc<Mutex<()>>,
    ) {
        drop(lock);
        self.authors
            .remove_if(author_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use routex_error::StorageError;
    use serde_json::Value;

    use super::*;
    use crate::{
        protocol::{RegisterOptions, Registration},
        storage::InMemoryStorage,
    };

    fn urim() -> (Urim<RegisterOptions>, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        (
            Urim::new(storage.clone() as Arc<dyn Storage>, REGISTRATIONS_BUCKET),
            storage,
        )
    }

    fn registration(
        uri: &str,
        author: &str,
    ) -> Registration {
        Registration::new(uri, author, RegisterOptions::default())
    }

    /// Тест проверяет добавление, поиск и запись в индекс автора.
    #[test]
    fn test_add_and_match() {
        let (urim, storage) = urim();
        let added = urim.add(registration("net.example", "alpha")).unwrap();

        let found = urim.match_uri("net.example");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, added.id);
        assert_eq!(urim.count_by_author("alpha").unwrap(), 1);
        assert!(storage.get(REGISTRATIONS_BUCKET, "alpha").unwrap().is_some());
    }

    /// Тест проверяет лимит ресурсов автора: лишний ресурс не попадает ни в
    /// дерево, ни в хранилище, а чужие ресурсы в лимит не входят.
    #[test]
    fn test_add_within_limit() {
        let (urim, _) = urim();
        urim.add_within(registration("a.b", "alpha"), Some(2)).unwrap();
        urim.add_within(registration("a.c", "alpha"), Some(2)).unwrap();
        urim.add_within(registration("a.d", "beta"), Some(2)).unwrap();

        let err = urim
            .add_within(registration("a.e", "alpha"), Some(2))
            .unwrap_err();
        assert!(matches!(err, UrimError::LimitReached { limit: 2 }));
        assert!(urim.match_uri("a.e").is_empty());
        assert_eq!(urim.count_by_author("alpha").unwrap(), 2);
        assert!(urim.authors.is_empty());
    }

    /// Тест проверяет, что параллельные добавления одного автора не
    /// превышают лимит.
    #[test]
    fn test_add_within_limit_concurrent() {
        let (urim, _) = urim();
        for round in 0..20 {
            let author = format!("peer{round}");
            let added = std::thread::scope(|scope| {
                let workers: Vec<_> = (0..8)
                    .map(|i| {
                        let urim = &urim;
                        let author = author.as_str();
                        scope.spawn(move || {
                            urim.add_within(registration(&format!("a.n{i}"), author), Some(1))
                                .is_ok()
                        })
                    })
                    .collect();
                workers
                    .into_iter()
                    .map(|worker| worker.join().unwrap())
                    .filter(|ok| *ok)
                    .count()
            });
            assert_eq!(added, 1);
            assert_eq!(urim.count_by_author(&author).unwrap(), 1);
        }
        assert_eq!(urim.len(), 20);
    }

    /// Тест проверяет, что некорректный URI не попадает ни в дерево, ни в
    /// хранилище.
    #[test]
    fn test_add_invalid_uri() {
        let (urim, storage) = urim();
        let err = urim.add(registration("Net..x", "alpha")).unwrap_err();
        assert!(matches!(err, UrimError::InvalidUri(_)));
        assert!(urim.is_empty());
        assert!(storage.is_empty());
    }

    /// Тест проверяет, что поиск по некорректному URI возвращает пусто.
    #[test]
    fn test_match_invalid_uri_is_empty() {
        let (urim, _) = urim();
        urim.add(registration("a.b", "alpha")).unwrap();
        assert!(urim.match_uri("a..b").is_empty());
    }

    /// Тест проверяет удаление одного ресурса по ID.
    #[test]
    fn test_delete_single() {
        let (urim, _) = urim();
        let first = urim.add(registration("a.b", "alpha")).unwrap();
        let second = urim.add(registration("a.c", "alpha")).unwrap();

        let removed = urim.delete_by_author("alpha", Some(&first.id)).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, first.id);
        assert!(urim.match_uri("a.b").is_empty());
        assert_eq!(urim.match_uri("a.c")[0].id, second.id);
        assert_eq!(urim.count_by_author("alpha").unwrap(), 1);
    }

    /// Тест проверяет, что удаление всех ресурсов автора стирает запись в
    /// хранилище.
    #[test]
    fn test_delete_all_removes_record() {
        let (urim, storage) = urim();
        urim.add(registration("a.b", "alpha")).unwrap();
        urim.add(registration("a.*", "alpha")).unwrap();
        urim.add(registration("a.b", "beta")).unwrap();

        let removed = urim.delete_by_author("alpha", None).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(storage.get(REGISTRATIONS_BUCKET, "alpha").unwrap(), None);
        let rest = urim.match_uri("a.b");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].author_id, "beta");
        assert!(urim.authors.get("alpha").is_none());
    }

    /// Тест проверяет, что чужой ID ничего не удаляет.
    #[test]
    fn test_delete_foreign_id_is_noop() {
        let (urim, _) = urim();
        let alien = urim.add(registration("a.b", "beta")).unwrap();
        let removed = urim.delete_by_author("alpha", Some(&alien.id)).unwrap();
        assert!(removed.is_empty());
        assert_eq!(urim.count("a.b"), 1);
    }

    /// Тест проверяет ленивую загрузку ресурсов автора из хранилища.
    #[test]
    fn test_restore_author_from_storage() {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let id = {
            let urim = Urim::<RegisterOptions>::new(storage.clone(), REGISTRATIONS_BUCKET);
            urim.add(registration("net.example", "alpha")).unwrap().id.clone()
        };

        let urim = Urim::<RegisterOptions>::new(storage, REGISTRATIONS_BUCKET);
        assert!(urim.match_uri("net.example").is_empty());
        assert_eq!(urim.restore_author("alpha").unwrap(), 1);
        assert_eq!(urim.restore_author("alpha").unwrap(), 0);
        assert_eq!(urim.match_uri("net.example")[0].id, id);
    }

    /// Тест проверяет выгрузку списка URI.
    #[test]
    fn test_dump_uri_list() {
        let (urim, _) = urim();
        let tmp = urim.add(registration("wamp.test", "alpha")).unwrap();
        urim.add(registration("wamp.registration.new", "alpha"))
            .unwrap();
        urim.delete_by_author("alpha", Some(&tmp.id)).unwrap();
        assert_eq!(urim.dump_uri_list(), vec!["wamp.registration.new"]);
        assert_eq!(urim.get_exact("wamp.registration.new").len(), 1);
        assert_eq!(urim.len(), 1);
    }

    struct FailingStorage;

    impl Storage for FailingStorage {
        fn get(
            &self,
            _bucket: &str,
            _key: &str,
        ) -> Result<Option<Value>, StorageError> {
            Ok(None)
        }

        fn set(
            &self,
            _bucket: &str,
            _key: &str,
            _value: Value,
        ) -> Result<(), StorageError> {
            Err(StorageError::Closed)
        }

        fn delete(
            &self,
            _bucket: &str,
            _key: &str,
        ) -> Result<(), StorageError> {
            Err(StorageError::Closed)
        }

        fn destroy(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    /// Тест проверяет, что ресурс не попадает в дерево, если запись в
    /// хранилище не удалась.
    #[test]
    fn test_failed_persist_leaves_trie_untouched() {
        let urim = Urim::<RegisterOptions>::new(Arc::new(FailingStorage), REGISTRATIONS_BUCKET);
        let err = urim.add(registration("a.b", "alpha")).unwrap_err();
        assert!(matches!(err, UrimError::Storage(_)));
        assert!(urim.match_uri("a.b").is_empty());
        assert!(urim.dump_uri_list().is_empty());
    }
}
