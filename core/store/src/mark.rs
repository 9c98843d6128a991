//! Encryption mark document.
//!
//! An encrypted collection always holds one mark document with fixed
//! content. Decrypting it is how a passphrase is checked against the
//! collection.

use serde_json::{Map, Value};

use expenses_common::Document;

/// Id of the mark document.
pub const MARK_ID: &str = "encryption-mark";

/// Fixed uuid carried by every mark.
pub const MARK_UUID: &str = "8f0b5c44-9c1a-4a5e-8d4e-6f3f2a1b7c90";

fn mark_body() -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("encryption".to_string(), Value::Bool(true));
    body.insert("uuid".to_string(), Value::String(MARK_UUID.to_string()));
    body
}

/// Plaintext mark document, without revision.
pub fn mark_document() -> Document {
    Document::new(MARK_ID, mark_body())
}

/// Whether a decrypted document is exactly the mark.
pub fn is_mark(doc: &Document) -> bool {
    doc.id == MARK_ID && !doc.deleted && doc.body == mark_body()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mark_payload() {
        let value = mark_document().to_value().unwrap();
        assert_eq!(
            value,
            json!({"id": MARK_ID, "encryption": true, "uuid": MARK_UUID})
        );
        assert!(is_mark(&mark_document()));
    }

    #[test]
    fn test_mark_mismatch() {
        let mut doc = mark_document();
        doc.body.insert("uuid".to_string(), json!("00000000-0000-0000-0000-000000000000"));
        assert!(!is_mark(&doc));

        let mut doc = mark_document();
        doc.body.insert("extra".to_string(), json!(1));
        assert!(!is_mark(&doc));
    }
}
