use serde::Deserialize;
use unisync_vdk::{Page, UnifiedItem};

/// One page of a list endpoint (`GET /{vertical}/v2/{stream}`).
#[derive(Debug, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub items: Vec<UnifiedItem>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

impl From<ListResponse> for Page {
    fn from(resp: ListResponse) -> Self {
        Page {
            items: resp.items,
            next_cursor: resp.next_cursor,
            has_next_page: resp.has_next_page,
        }
    }
}

/// Error body the unified API returns for failures raised on its side.
#[derive(Debug, Deserialize)]
pub struct ErrorShape {
    pub class: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorShape {
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }

    /// Token refresh failed or access was revoked.
    pub fn is_no_longer_authenticated(&self) -> bool {
        self.class == "NoLongerAuthenticatedError"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_response_defaults_to_last_empty_page() {
        let resp: ListResponse = serde_json::from_str("{}").unwrap();
        let page: Page = resp.into();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
        assert!(!page.has_next_page);
    }

    #[test]
    fn list_response_keeps_cursor_and_items() {
        let resp: ListResponse = serde_json::from_value(serde_json::json!({
            "items": [{"id": "1", "updated_at": "2024-01-01T00:00:00Z"}],
            "next_cursor": "abc",
            "has_next_page": true
        }))
        .unwrap();
        assert_eq!(resp.items.len(), 1);
        assert_eq!(resp.next_cursor.as_deref(), Some("abc"));
        assert!(resp.has_next_page);
    }

    #[test]
    fn error_shape_detects_revoked_access() {
        let shape = ErrorShape::parse(
            r#"{"class":"NoLongerAuthenticatedError","code":"UNAUTHORIZED","message":"cus_1/hubspot: refresh failed"}"#,
        )
        .unwrap();
        assert!(shape.is_no_longer_authenticated());
        assert_eq!(shape.message.as_deref(), Some("cus_1/hubspot: refresh failed"));
        assert!(ErrorShape::parse("not json").is_none());
    }
}
