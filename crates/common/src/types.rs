use serde::{Deserialize, Serialize};

/// Category of a connection. Only these verticals are synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vertical {
    Crm,
    Engagement,
}

impl Vertical {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vertical::Crm => "crm",
            Vertical::Engagement => "engagement",
        }
    }

    /// Parse a connection category; `None` for categories that are not synced.
    pub fn from_category(category: &str) -> Option<Self> {
        match category {
            "crm" => Some(Vertical::Crm),
            "engagement" => Some(Vertical::Engagement),
            _ => None,
        }
    }

    /// Streams of the common schema for this vertical.
    pub fn common_streams(&self) -> &'static [&'static str] {
        match self {
            Vertical::Crm => &["account", "contact", "lead", "opportunity", "user"],
            Vertical::Engagement => &[
                "contact",
                "mailbox",
                "sequence",
                "sequence_state",
                "user",
            ],
        }
    }
}

impl std::fmt::Display for Vertical {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Ignore persisted cursors and restart every stream from the beginning.
    Full,
    #[default]
    Incremental,
}

/// The event that starts one sync run for one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTrigger {
    pub customer_id: String,
    pub provider_name: String,
    pub vertical: Vertical,
    #[serde(default)]
    pub common_objects: Vec<String>,
    #[serde(default)]
    pub standard_objects: Vec<String>,
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_schema: Option<String>,
}

impl SyncTrigger {
    pub fn new(
        customer_id: impl Into<String>,
        provider_name: impl Into<String>,
        vertical: Vertical,
    ) -> Self {
        Self {
            customer_id: customer_id.into(),
            provider_name: provider_name.into(),
            vertical,
            common_objects: Vec::new(),
            standard_objects: Vec::new(),
            sync_mode: SyncMode::default(),
            destination_schema: None,
        }
    }
}
