use std::time::Duration;

use routex_error::RouterError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Полезная нагрузка события: произвольный JSON.
pub type Payload = serde_json::Value;

/// Таймаут вызова, если вызывающий не указал свой.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Максимальное время жизни генератора без активности.
pub const DEFAULT_GENERATOR_LIFETIME: Duration = Duration::from_secs(3600);
/// Количество повторных попыток доставки события.
pub const DEFAULT_RESEND_COUNT: u32 = 3;

/// Генерирует новый идентификатор события или ресурса.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn decode<T: DeserializeOwned>(payload: &Payload) -> Result<T, RouterError> {
    serde_json::from_value(payload.clone()).map_err(RouterError::from)
}

////////////////////////////////////////////////////////////////////////////////
// Publish
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishFeatures {
    pub uri: String,
    /// Если не пусто, доставлять только этим подписчикам.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_subscribers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_subscribers: Vec<String>,
    /// Glob-шаблоны ролей подписчиков, которым разрешена доставка.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishRoute {
    pub publisher_id: String,
    pub subscriber_id: String,
    pub endpoint_id: String,
    #[serde(default)]
    pub visited_routers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishEvent {
    pub id: String,
    pub features: PublishFeatures,
    #[serde(default)]
    pub route: PublishRoute,
    #[serde(default)]
    pub payload: Payload,
}

impl PublishFeatures {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }
}

impl PublishEvent {
    pub fn new(
        features: PublishFeatures,
        payload: Payload,
    ) -> Self {
        Self {
            id: new_id(),
            features,
            route: PublishRoute::default(),
            payload,
        }
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, RouterError> {
        decode(&self.payload)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Call
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallFeatures {
    pub uri: String,
    /// Таймаут в миллисекундах; при `0` используется значение маршрутизатора.
    #[serde(default)]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallRoute {
    pub caller_id: String,
    pub executor_id: String,
    pub endpoint_id: String,
    #[serde(default)]
    pub visited_routers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEvent {
    pub id: String,
    pub features: CallFeatures,
    #[serde(default)]
    pub route: CallRoute,
    #[serde(default)]
    pub payload: Payload,
}

impl CallFeatures {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            timeout_ms: 0,
        }
    }

    pub fn with_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Объявленный таймаут либо `fallback`, если он не задан.
    pub fn timeout_or(
        &self,
        fallback: Duration,
    ) -> Duration {
        if self.timeout_ms == 0 {
            fallback
        } else {
            Duration::from_millis(self.timeout_ms)
        }
    }
}

impl CallEvent {
    pub fn new(
        features: CallFeatures,
        payload: Payload,
    ) -> Self {
        Self {
            id: new_id(),
            features,
            route: CallRoute::default(),
            payload,
        }
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, RouterError> {
        decode(&self.payload)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Reply / Error / Yield
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyKind {
    Reply,
    Error,
    Yield,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyFeatures {
    /// ID события (call или next), на которое это ответ.
    pub invocation_id: String,
    /// Заполняется исполнителем в yield-ответах.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_id: Option<String>,
    #[serde(default)]
    pub visited_routers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEvent {
    pub id: String,
    pub kind: ReplyKind,
    pub features: ReplyFeatures,
    #[serde(default)]
    pub payload: Payload,
}

impl ReplyEvent {
    fn with_kind(
        kind: ReplyKind,
        invocation_id: &str,
        generator_id: Option<String>,
        payload: Payload,
    ) -> Self {
        Self {
            id: new_id(),
            kind,
            features: ReplyFeatures {
                invocation_id: invocation_id.to_string(),
                generator_id,
                visited_routers: Vec::new(),
            },
            payload,
        }
    }

    /// Терминальный успешный ответ.
    pub fn reply(
        invocation_id: &str,
        payload: Payload,
    ) -> Self {
        Self::with_kind(ReplyKind::Reply, invocation_id, None, payload)
    }

    /// Терминальный ответ с ошибкой; в payload имя ошибки.
    pub fn error(
        invocation_id: &str,
        error: &RouterError,
    ) -> Self {
        Self::with_kind(
            ReplyKind::Error,
            invocation_id,
            None,
            Payload::String(error.code().to_string()),
        )
    }

    /// Промежуточный результат генератора.
    pub fn yield_value(
        invocation_id: &str,
        generator_id: &str,
        payload: Payload,
    ) -> Self {
        Self::with_kind(
            ReplyKind::Yield,
            invocation_id,
            Some(generator_id.to_string()),
            payload,
        )
    }

    pub fn is_yield(&self) -> bool {
        self.kind == ReplyKind::Yield
    }

    /// Ошибка, если это error-ответ.
    pub fn error_kind(&self) -> Option<RouterError> {
        match self.kind {
            ReplyKind::Error => Some(RouterError::from_code(
                self.payload.as_str().unwrap_or_default(),
            )),
            _ => None,
        }
    }

    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, RouterError> {
        decode(&self.payload)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Next / Cancel
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NextFeatures {
    /// ID yield-события, после которого запрошен следующий шаг.
    pub yield_id: String,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub visited_routers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextEvent {
    pub id: String,
    pub features: NextFeatures,
}

impl NextEvent {
    pub fn new(
        yield_id: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            id: new_id(),
            features: NextFeatures {
                yield_id: yield_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
                visited_routers: Vec::new(),
            },
        }
    }

    pub fn timeout_or(
        &self,
        fallback: Duration,
    ) -> Duration {
        if self.features.timeout_ms == 0 {
            fallback
        } else {
            Duration::from_millis(self.features.timeout_ms)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelFeatures {
    /// ID отменяемого вызова либо ID генератора для stop.
    pub invocation_id: String,
    #[serde(default)]
    pub visited_routers: Vec<String>,
}

/// Отмена вызова или остановка генератора.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelEvent {
    pub id: String,
    pub features: CancelFeatures,
}

impl CancelEvent {
    pub fn new(invocation_id: &str) -> Self {
        Self {
            id: new_id(),
            features: CancelFeatures {
                invocation_id: invocation_id.to_string(),
                visited_routers: Vec::new(),
            },
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Event
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "event", rename_all = "lowercase")]
pub enum Event {
    Publish(PublishEvent),
    Call(CallEvent),
    Reply(ReplyEvent),
    Next(NextEvent),
    Cancel(CancelEvent),
}

impl Event {
    pub fn id(&self) -> &str {
        match self {
            Self::Publish(e) => &e.id,
            Self::Call(e) => &e.id,
            Self::Reply(e) => &e.id,
            Self::Next(e) => &e.id,
            Self::Cancel(e) => &e.id,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Publish(_) => "publish",
            Self::Call(_) => "call",
            Self::Reply(e) => match e.kind {
                ReplyKind::Reply => "reply",
                ReplyKind::Error => "error",
                ReplyKind::Yield => "yield",
            },
            Self::Next(_) => "next",
            Self::Cancel(_) => "cancel",
        }
    }
}

impl From<PublishEvent> for Event {
    fn from(e: PublishEvent) -> Self {
        Self::Publish(e)
    }
}

impl From<CallEvent> for Event {
    fn from(e: CallEvent) -> Self {
        Self::Call(e)
    }
}

impl From<ReplyEvent> for Event {
    fn from(e: ReplyEvent) -> Self {
        Self::Reply(e)
    }
}

impl From<NextEvent> for Event {
    fn from(e: NextEvent) -> Self {
        Self::Next(e)
    }
}

impl From<CancelEvent> for Event {
    fn from(e: CancelEvent) -> Self {
        Self::Cancel(e)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
