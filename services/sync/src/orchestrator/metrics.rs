use serde_json::{Map, Value};
use unisync_common::types::SyncMode;

/// Counters of one stream, owned by the task syncing it.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetrics {
    stream: String,
    pub item_count: u64,
    pub page_count: u64,
    pub sync_mode: SyncMode,
}

impl StreamMetrics {
    /// `sync_mode` reflects the effective cursor: no cursor means a full pass.
    pub fn new(stream: impl Into<String>, starting_cursor: Option<&str>) -> Self {
        let sync_mode = if starting_cursor.is_some() {
            SyncMode::Incremental
        } else {
            SyncMode::Full
        };
        Self {
            stream: stream.into(),
            item_count: 0,
            page_count: 0,
            sync_mode,
        }
    }

    pub fn record_page(&mut self, items: usize) {
        self.item_count += items as u64;
        self.page_count += 1;
    }

    /// `<stream>_count`, `<stream>_page_count`, `<stream>_sync_mode`.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(format!("{}_count", self.stream), self.item_count.into());
        map.insert(format!("{}_page_count", self.stream), self.page_count.into());
        map.insert(
            format!("{}_sync_mode", self.stream),
            Value::String(sync_mode_str(self.sync_mode).to_string()),
        );
        map
    }
}

fn sync_mode_str(mode: SyncMode) -> &'static str {
    match mode {
        SyncMode::Full => "full",
        SyncMode::Incremental => "incremental",
    }
}

/// Metrics of a whole run, folded from each stream as it finishes.
#[derive(Debug, Clone, Default)]
pub struct RunMetrics {
    values: Map<String, Value>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, stream: &StreamMetrics) {
        self.values.extend(stream.to_map());
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}
