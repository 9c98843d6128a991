//! Opaque pagination cursors.
//!
//! A page token is base64 of `{"nextId": <id or null>}`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Decoded page token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    /// Id of the first entry of the next page.
    pub next_id: Option<String>,
}

impl PageCursor {
    pub fn at(next_id: impl Into<String>) -> Self {
        Self {
            next_id: Some(next_id.into()),
        }
    }

    /// Render as an opaque token.
    pub fn encode(&self) -> String {
        // Serializing a struct of one optional string cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        STANDARD.encode(json)
    }

    /// Parse a token. Malformed tokens read as "no cursor".
    pub fn decode(token: &str) -> Option<Self> {
        let parsed = STANDARD
            .decode(token.trim())
            .ok()
            .and_then(|bytes| serde_json::from_slice::<PageCursor>(&bytes).ok());
        if parsed.is_none() {
            warn!("Ignoring malformed page token");
        }
        parsed
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Token for the following page, `None` on the last page.
    pub next_page_token: Option<String>,
}
