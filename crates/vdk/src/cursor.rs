//! Opaque resume tokens for incremental pagination.
//!
//! A cursor carries a high-watermark timestamp plus an optional provider
//! offset. The encoded form is URL-safe base64 of a small JSON object, so it
//! can travel through query strings and be stored verbatim in sync state.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<String>,
}

impl CursorPosition {
    pub fn new(last_updated_at: Option<String>, next_offset: Option<String>) -> Self {
        Self {
            last_updated_at,
            next_offset,
        }
    }

    /// The start-of-stream position.
    pub fn is_null(&self) -> bool {
        self.last_updated_at.is_none() && self.next_offset.is_none()
    }
}

/// Decode a resume token. Absent, empty or malformed input yields the null
/// position, which callers treat as "start of stream".
pub fn decode(raw: Option<&str>) -> CursorPosition {
    let raw = match raw.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return CursorPosition::default(),
    };

    let parsed = URL_SAFE_NO_PAD
        .decode(raw)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<CursorPosition>(&bytes).ok());

    match parsed {
        Some(pos) => pos,
        None => {
            tracing::debug!(cursor = raw, "ignoring undecodable cursor, restarting stream");
            CursorPosition::default()
        }
    }
}

/// Encode a position. The null position has nothing to resume from and
/// encodes to `None`.
pub fn encode(pos: &CursorPosition) -> Option<String> {
    if pos.is_null() {
        return None;
    }
    let json = serde_json::to_vec(pos).ok()?;
    Some(URL_SAFE_NO_PAD.encode(json))
}

/// Compute the cursor that follows a page for providers that can only filter
/// by `updated_at >= watermark` and page by positional offset.
///
/// The provider offset is only meaningful while the filter is unchanged, i.e.
/// while the last item's timestamp still equals the previous watermark. Once
/// the watermark moves forward the offset is dropped, otherwise it would be
/// applied to a different result set and skip records. An empty page keeps
/// the previous cursor.
pub fn advance(
    previous: Option<&str>,
    last_item_updated_at: Option<&str>,
    provider_offset: Option<String>,
) -> Option<String> {
    let last_updated_at = match last_item_updated_at {
        Some(ts) => ts,
        None => return previous.map(str::to_owned),
    };

    let prev = decode(previous);
    let next_offset = if prev.last_updated_at.as_deref() == Some(last_updated_at) {
        provider_offset
    } else {
        None
    };

    encode(&CursorPosition::new(
        Some(last_updated_at.to_owned()),
        next_offset,
    ))
}
