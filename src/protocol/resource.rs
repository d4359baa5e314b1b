use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use once_cell::sync::OnceCell;
use routex_error::RouterError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::new_id;

/// Подписка или регистрация, привязанная к URI.
///
/// После создания меняется только маршрут (`options.route`) при
/// распространении между маршрутизаторами.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource<O> {
    pub id: String,
    pub uri: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub options: O,
}

pub type Registration = Resource<RegisterOptions>;
pub type Subscription = Resource<SubscribeOptions>;

/// Общий интерфейс опций ресурса.
pub trait ResourceOptions:
    Clone + Default + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Маршрутизаторы, через которые прошёл ресурс.
    fn route(&self) -> &[String];

    fn route_mut(&mut self) -> &mut Vec<String>;

    /// Длина маршрута; чем больше, тем дальше исполнитель.
    fn distance(&self) -> usize {
        self.route().len()
    }

    /// Ограничение по ролям для противоположной стороны.
    fn policy(&self) -> &RolePolicy;
}

/// Набор glob-шаблонов ролей.
///
/// Роль отклоняется, если совпала хотя бы с одним `exclude_roles`.
/// При непустом `include_roles` роль должна совпасть хотя бы с одним из них.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolePolicy {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_roles: Vec<String>,
    #[serde(skip)]
    compiled: OnceCell<CompiledPolicy>,
}

#[derive(Debug, Clone)]
struct CompiledPolicy {
    include: GlobSet,
    exclude: GlobSet,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterOptions {
    #[serde(default)]
    pub route: Vec<String>,
    #[serde(flatten)]
    pub policy: RolePolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeOptions {
    #[serde(default)]
    pub route: Vec<String>,
    #[serde(flatten)]
    pub policy: RolePolicy,
}

/// Payload мета-процедур `register` / `subscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewResourcePayload<O> {
    pub uri: String,
    #[serde(default)]
    pub options: O,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<O: ResourceOptions> Resource<O> {
    pub fn new(
        uri: impl Into<String>,
        author_id: impl Into<String>,
        options: O,
    ) -> Self {
        Self {
            id: new_id(),
            uri: uri.into(),
            author_id: author_id.into(),
            created_at: Utc::now(),
            options,
        }
    }

    pub fn distance(&self) -> usize {
        self.options.distance()
    }
}

impl RolePolicy {
    pub fn new(
        include_roles: Vec<String>,
        exclude_roles: Vec<String>,
    ) -> Self {
        Self {
            include_roles,
            exclude_roles,
            compiled: OnceCell::new(),
        }
    }

    /// Политика, пропускающая только перечисленные роли.
    pub fn only<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(roles.into_iter().map(Into::into).collect(), Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.include_roles.is_empty() && self.exclude_roles.is_empty()
    }

    /// Проверяет, что все шаблоны компилируются.
    pub fn validate(&self) -> Result<(), RouterError> {
        self.compiled().map(|_| ())
    }

    /// Разрешена ли указанная роль.
    ///
    /// Политика с некорректными шаблонами не пропускает никого.
    pub fn allows(
        &self,
        role: &str,
    ) -> bool {
        if self.is_empty() {
            return true;
        }
        let Ok(compiled) = self.compiled() else {
            return false;
        };
        if compiled.exclude.is_match(role) {
            return false;
        }
        self.include_roles.is_empty() || compiled.include.is_match(role)
    }

    fn compiled(&self) -> Result<&CompiledPolicy, RouterError> {
        self.compiled.get_or_try_init(|| {
            Ok(CompiledPolicy {
                include: build_set(&self.include_roles)?,
                exclude: build_set(&self.exclude_roles)?,
            })
        })
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet, RouterError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| RouterError::InvalidPayload(format!("role pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RouterError::InvalidPayload(e.to_string()))
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для опций
////////////////////////////////////////////////////////////////////////////////

impl PartialEq for RolePolicy {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.include_roles == other.include_roles && self.exclude_roles == other.exclude_roles
    }
}

impl ResourceOptions for RegisterOptions {
    fn route(&self) -> &[String] {
        &self.route
    }

    fn route_mut(&mut self) -> &mut Vec<String> {
        &mut self.route
    }

    fn policy(&self) -> &RolePolicy {
        &self.policy
    }
}

impl ResourceOptions for SubscribeOptions {
    fn route(&self) -> &[String] {
        &self.route
    }

    fn route_mut(&mut self) -> &mut Vec<String> {
        &mut self.route
    }

    fn policy(&self) -> &RolePolicy {
        &self.policy
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
