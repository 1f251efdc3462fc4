use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use unisync_common::error::{UnisyncError, UnisyncResult};
use unisync_common::types::Vertical;

use crate::provider::Provider;

const VERTICALS: [Vertical; 2] = [Vertical::Crm, Vertical::Engagement];

/// Outcome of looking up the handler for one stream of one connection.
#[derive(Clone)]
pub enum StreamHandler {
    Supported(Arc<dyn Provider>),
    /// Known provider, stream not served. Synced as zero pages.
    Unsupported,
}

impl std::fmt::Debug for StreamHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamHandler::Supported(p) => write!(f, "Supported({})", p.name()),
            StreamHandler::Unsupported => f.write_str("Unsupported"),
        }
    }
}

/// Maps provider names to implementations. Stream tables are validated once
/// at registration so dispatch never fails on a lookup at sync time.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    fallback: Option<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider used for names without an explicit registration, e.g. a
    /// unified API that fronts every connector.
    pub fn with_fallback(mut self, provider: Arc<dyn Provider>) -> UnisyncResult<Self> {
        validate_streams(provider.as_ref())?;
        self.fallback = Some(provider);
        Ok(self)
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) -> UnisyncResult<()> {
        let name = provider.name().to_string();
        if name.is_empty() {
            return Err(UnisyncError::Validation(
                "provider name must not be empty".to_string(),
            ));
        }
        if name.trim() != name {
            return Err(UnisyncError::Validation(format!(
                "provider name '{name}' has surrounding whitespace"
            )));
        }
        if self.providers.contains_key(&name) {
            return Err(UnisyncError::Validation(format!(
                "provider '{name}' is already registered"
            )));
        }
        validate_streams(provider.as_ref())?;

        tracing::debug!(provider = %name, "registered provider");
        self.providers.insert(name, provider);
        Ok(())
    }

    pub fn resolve(
        &self,
        provider_name: &str,
        vertical: Vertical,
        stream: &str,
    ) -> UnisyncResult<StreamHandler> {
        let provider = self
            .providers
            .get(provider_name)
            .or(self.fallback.as_ref())
            .ok_or_else(|| {
                UnisyncError::NotFound(format!("provider '{provider_name}' not registered"))
            })?;

        if provider.streams(vertical).iter().any(|s| s == stream) {
            Ok(StreamHandler::Supported(Arc::clone(provider)))
        } else {
            Ok(StreamHandler::Unsupported)
        }
    }
}

fn validate_streams(provider: &dyn Provider) -> UnisyncResult<()> {
    for vertical in VERTICALS {
        let mut seen = HashSet::new();
        for stream in provider.streams(vertical) {
            if stream.trim().is_empty() {
                return Err(UnisyncError::Validation(format!(
                    "provider '{}' declares an empty {vertical} stream name",
                    provider.name()
                )));
            }
            if !vertical.common_streams().contains(&stream.as_str()) {
                return Err(UnisyncError::Validation(format!(
                    "provider '{}' declares unknown {vertical} stream '{stream}'",
                    provider.name()
                )));
            }
            if !seen.insert(stream.clone()) {
                return Err(UnisyncError::Validation(format!(
                    "provider '{}' declares {vertical} stream '{stream}' twice",
                    provider.name()
                )));
            }
        }
    }
    Ok(())
}
