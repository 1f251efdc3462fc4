use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use unisync_common::error::{ErrorInfo, ErrorType};
use unisync_common::types::Vertical;

/// The tenant connection a page is fetched for. Credentials are resolved by
/// the credential proxy from these two keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRef {
    pub customer_id: String,
    pub provider_name: String,
}

impl ConnectionRef {
    pub fn new(customer_id: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            provider_name: provider_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub vertical: Vertical,
    pub stream: String,
    pub cursor: Option<String>,
    /// `None` lets the provider pick its own page size.
    pub page_size: Option<u32>,
}

/// One object already mapped to the common schema.
///
/// `raw_data` is the untouched provider payload; every other key is part of
/// the unified payload.
#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedItem {
    pub id: String,
    pub raw_data: Option<Value>,
    pub fields: Map<String, Value>,
}

impl UnifiedItem {
    pub fn updated_at(&self) -> Option<&str> {
        self.fields.get("updated_at").and_then(Value::as_str)
    }

    pub fn is_deleted(&self) -> bool {
        self.fields
            .get("is_deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Unified payload including `id`, without `raw_data`.
    pub fn unified_data(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(map)
    }
}

impl<'de> Deserialize<'de> for UnifiedItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut map = Map::<String, Value>::deserialize(deserializer)?;
        let id = match map.remove("id") {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(serde::de::Error::missing_field("id")),
        };
        let raw_data = map.remove("raw_data").filter(|v| !v.is_null());
        Ok(Self {
            id,
            raw_data,
            fields: map,
        })
    }
}

impl Serialize for UnifiedItem {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = match self.unified_data() {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        if let Some(raw) = &self.raw_data {
            map.insert("raw_data".to_string(), raw.clone());
        }
        map.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub items: Vec<UnifiedItem>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

impl Page {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_next_page: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider has no implementation for this stream. Not an error for
    /// the run: the stream simply has zero pages.
    #[error("{provider_name} does not implement {stream}")]
    NotImplemented {
        provider_name: String,
        stream: String,
    },

    #[error("connection is no longer authenticated: {0}")]
    Unauthorized(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport failed: {0}")]
    Transport(String),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("invalid response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, ProviderError::NotImplemented { .. })
    }

    /// Operator classification; `None` for the not-implemented signal.
    pub fn error_type(&self) -> Option<ErrorType> {
        match self {
            ProviderError::NotImplemented { .. } => None,
            ProviderError::Unauthorized(_) => Some(ErrorType::UserError),
            ProviderError::Http { status, .. } if *status >= 500 => Some(ErrorType::RemoteError),
            ProviderError::Http { .. } => Some(ErrorType::InternalError),
            ProviderError::Transport(_) | ProviderError::MaxRetriesExceeded { .. } => {
                Some(ErrorType::RemoteError)
            }
            ProviderError::Decode(_) => Some(ErrorType::InternalError),
        }
    }

    pub fn error_info(&self) -> Option<ErrorInfo> {
        self.error_type()
            .map(|error_type| ErrorInfo::new(error_type, self.to_string()))
    }
}

/// A connector exposing its objects through the common schema.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Streams this provider serves for a vertical. Anything else resolves to
    /// "unsupported" without calling [`Provider::list_page`].
    fn streams(&self, vertical: Vertical) -> Vec<String>;

    /// Fetch one page of `request.stream` starting at `request.cursor`.
    /// `has_next_page = false` ends the stream whatever `next_cursor` says.
    async fn list_page(
        &self,
        connection: &ConnectionRef,
        request: &PageRequest,
    ) -> Result<Page, ProviderError>;
}
