use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;

use super::uri::{MULTI_WILDCARD, WILDCARD};

/// Узел дерева URI.
///
/// Дочерние узлы и данные лежат в отдельных `DashMap`, поэтому вставка в
/// одну ветку не блокирует поиск в другой. Пустые узлы не удаляются, но
/// пропускаются при выгрузке.
pub struct UriSegment<T> {
    children: DashMap<String, Arc<UriSegment<T>>>,
    data: DashMap<String, T>,
}

impl<T: Clone> UriSegment<T> {
    pub fn new() -> Self {
        Self {
            children: DashMap::new(),
            data: DashMap::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn insert(
        &self,
        id: impl Into<String>,
        value: T,
    ) {
        self.data.insert(id.into(), value);
    }

    pub fn remove(
        &self,
        id: &str,
    ) -> Option<T> {
        self.data.remove(id).map(|(_, value)| value)
    }

    pub fn contains(
        &self,
        id: &str,
    ) -> bool {
        self.data.contains_key(id)
    }

    pub fn values(&self) -> Vec<T> {
        self.data.iter().map(|entry| entry.value().clone()).collect()
    }

    fn child(
        &self,
        key: &str,
    ) -> Option<Arc<Self>> {
        self.children.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Возвращает узел по точному пути, создавая недостающие.
    pub fn get_or_insert(
        self: &Arc<Self>,
        path: &[&str],
    ) -> Arc<Self> {
        let mut node = Arc::clone(self);
        for key in path {
            let next = Arc::clone(
                node.children
                    .entry((*key).to_string())
                    .or_insert_with(|| Arc::new(Self::new()))
                    .value(),
            );
            node = next;
        }
        node
    }

    /// Возвращает узел по точному пути без создания.
    pub fn find(
        self: &Arc<Self>,
        path: &[&str],
    ) -> Option<Arc<Self>> {
        let mut node = Arc::clone(self);
        for key in path {
            node = node.child(key)?;
        }
        Some(node)
    }

    /// Все узлы, шаблон которых совпадает с `path`.
    ///
    /// На каждом уровне обходятся литеральный потомок, `*` и `**`; один и
    /// тот же узел в результат попадает один раз.
    pub fn matches(
        self: &Arc<Self>,
        path: &[&str],
    ) -> Vec<Arc<Self>> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        self.collect(path, &mut found, &mut seen);
        found
    }

    fn collect(
        self: &Arc<Self>,
        path: &[&str],
        found: &mut Vec<Arc<Self>>,
        seen: &mut HashSet<*const Self>,
    ) {
        let Some((key, rest)) = path.split_first() else {
            if seen.insert(Arc::as_ptr(self)) {
                found.push(Arc::clone(self));
            }
            return;
        };
        if self.is_leaf() {
            return;
        }

        if *key != WILDCARD && *key != MULTI_WILDCARD {
            if let Some(child) = self.child(key) {
                child.collect(rest, found, seen);
            }
        }
        if let Some(child) = self.child(WILDCARD) {
            child.collect(rest, found, seen);
        }
        if let Some(child) = self.child(MULTI_WILDCARD) {
            for skip in 1..=path.len() {
                child.collect(&path[skip..], found, seen);
            }
        }
    }

    /// Пути всех непустых узлов в порядке обхода в глубину.
    pub fn dump(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        self.dump_into(&mut prefix, &mut out);
        out
    }

    fn dump_into(
        &self,
        prefix: &mut Vec<String>,
        out: &mut Vec<Vec<String>>,
    ) {
        if !self.is_empty() {
            out.push(prefix.clone());
        }
        let mut children: Vec<(String, Arc<Self>)> = self
            .children
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, child) in children {
            prefix.push(key);
            child.dump_into(prefix, out);
            prefix.pop();
        }
    }

    /// Общее количество значений в поддереве.
    pub fn total(&self) -> usize {
        let nested: usize = self
            .children
            .iter()
            .map(|entry| entry.value().total())
            .sum();
        self.data.len() + nested
    }
}

impl<T: Clone> Default for UriSegment<T> {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(entries: &[(&str, &str)]) -> Arc<UriSegment<String>> {
        let root = Arc::new(UriSegment::new());
        for (uri, id) in entries {
            let path: Vec<&str> = uri.split('.').collect();
            root.get_or_insert(&path).insert(*id, id.to_string());
        }
        root
    }

    fn matched(
        root: &Arc<UriSegment<String>>,
        uri: &str,
    ) -> Vec<String> {
        let path: Vec<&str> = uri.split('.').collect();
        let mut ids: Vec<String> = root
            .matches(&path)
            .iter()
            .flat_map(|node| node.values())
            .collect();
        ids.sort();
        ids
    }

    /// Тест проверяет параллельный обход литерального и `*` потомков.
    #[test]
    fn test_literal_and_wildcard_branches() {
        let root = tree(&[
            ("net.example.greeting", "exact"),
            ("net.*.greeting", "star"),
            ("net.example.*", "tail"),
            ("net.other.greeting", "other"),
        ]);
        assert_eq!(
            matched(&root, "net.example.greeting"),
            vec!["exact", "star", "tail"]
        );
        assert_eq!(matched(&root, "net.other.greeting"), vec!["other", "star"]);
        assert!(matched(&root, "net.example").is_empty());
        assert!(matched(&root, "net.example.greeting.more").is_empty());
    }

    /// Тест проверяет `**`: один и более сегментов, без дублей.
    #[test]
    fn test_multi_wildcard() {
        let root = tree(&[
            ("wamp.**", "all"),
            ("wamp.**.new", "new"),
            ("wamp.**.**", "twice"),
        ]);
        assert!(matched(&root, "wamp").is_empty());
        assert_eq!(matched(&root, "wamp.x"), vec!["all"]);
        assert_eq!(
            matched(&root, "wamp.registration.new"),
            vec!["all", "new", "twice"]
        );
        assert_eq!(matched(&root, "wamp.a.b.c"), vec!["all", "twice"]);
    }

    /// Тест проверяет, что выгрузка пропускает опустевшие узлы.
    #[test]
    fn test_dump_skips_empty_nodes() {
        let root = tree(&[
            ("wamp.test", "tmp"),
            ("wamp.subscription.new", "s"),
            ("wamp.registration.new", "r"),
        ]);
        let node = root.find(&["wamp", "test"]).unwrap();
        assert_eq!(node.remove("tmp"), Some("tmp".to_string()));

        let dump: Vec<String> = root.dump().iter().map(|p| p.join(".")).collect();
        assert_eq!(dump, vec!["wamp.registration.new", "wamp.subscription.new"]);
        assert_eq!(root.total(), 2);
    }

    /// Тест проверяет, что внутренний узел с данными тоже выгружается.
    #[test]
    fn test_dump_includes_inner_nodes() {
        let root = tree(&[("a", "1"), ("a.b", "2")]);
        let dump: Vec<String> = root.dump().iter().map(|p| p.join(".")).collect();
        assert_eq!(dump, vec!["a", "a.b"]);
    }

    /// Тест проверяет, что find не создаёт узлы.
    #[test]
    fn test_find_does_not_create() {
        let root = tree(&[("a.b", "1")]);
        assert!(root.find(&["a", "c"]).is_none());
        assert!(root.find(&["a", "b"]).is_some());
        assert!(root.find(&["a"]).unwrap().child("c").is_none());
    }
}
