use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A customer's authorized link to one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub customer_id: String,
    pub provider_name: String,
    /// Vertical of the provider, e.g. `crm`. Free-form on the wire.
    pub category: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub object: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfigBody {
    #[serde(default)]
    pub common_objects: Vec<ObjectConfig>,
    #[serde(default)]
    pub standard_objects: Vec<ObjectConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub provider_name: String,
    #[serde(default)]
    pub config: SyncConfigBody,
}

impl SyncConfig {
    pub fn common_objects(&self) -> Vec<String> {
        self.config
            .common_objects
            .iter()
            .map(|o| o.object.clone())
            .collect()
    }

    pub fn standard_objects(&self) -> Vec<String> {
        self.config
            .standard_objects
            .iter()
            .map(|o| o.object.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_lists_object_names() {
        let sc: SyncConfig = serde_json::from_value(serde_json::json!({
            "provider_name": "hubspot",
            "config": {
                "common_objects": [{"object": "contact"}, {"object": "account"}],
                "standard_objects": [{"object": "company"}]
            }
        }))
        .unwrap();
        assert_eq!(sc.common_objects(), vec!["contact", "account"]);
        assert_eq!(sc.standard_objects(), vec!["company"]);
    }

    #[test]
    fn sync_config_without_body_has_no_objects() {
        let sc: SyncConfig =
            serde_json::from_value(serde_json::json!({"provider_name": "salesforce"})).unwrap();
        assert!(sc.common_objects().is_empty());
        assert!(sc.standard_objects().is_empty());
    }
}
