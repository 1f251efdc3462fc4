use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use unisync_common::error::ErrorInfo;
use uuid::Uuid;

/// Progress of one stream inside [`SyncState::state`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Per-connection resume state: stream name -> [`StreamState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub id: Uuid,
    pub customer_id: String,
    pub provider_name: String,
    pub state: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    /// Streams whose entries parse; anything else is treated as absent.
    pub fn stream_states(&self) -> BTreeMap<String, StreamState> {
        match &self.state {
            Value::Object(map) => map
                .iter()
                .filter_map(|(stream, v)| {
                    serde_json::from_value::<StreamState>(v.clone())
                        .ok()
                        .map(|s| (stream.clone(), s))
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Write-only audit record of one trigger execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: Uuid,
    pub input_event: Value,
    pub initial_state: Value,
    pub final_state: Option<Value>,
    pub metrics: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_type: Option<String>,
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunCompletion {
    pub final_state: Value,
    pub metrics: Value,
    pub error: Option<ErrorInfo>,
}
