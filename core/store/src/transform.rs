//! Document transform between plaintext and at-rest encrypted form.
//!
//! An encrypted document keeps `id` and `revision` in the clear and carries
//! every other field as one encrypted JSON object under `crypt`.

use serde_json::{Map, Value};

use expenses_common::document::{ID_FIELD, REVISION_FIELD};
use expenses_common::{Document, Error, Result};
use expenses_crypto::Cipher;

/// Field holding the encrypted body.
pub const CRYPT_FIELD: &str = "crypt";

/// Encrypt the body of a document.
///
/// Tombstones carry no body and are returned unchanged.
pub fn encrypt_doc(cipher: &Cipher, doc: Document) -> Result<Document> {
    if doc.deleted {
        return Ok(doc);
    }

    let plaintext = serde_json::to_string(&Value::Object(doc.body))?;
    let crypt = cipher.encrypt_str(&plaintext)?;

    let mut body = Map::new();
    body.insert(CRYPT_FIELD.to_string(), Value::String(crypt));
    Ok(Document {
        id: doc.id,
        revision: doc.revision,
        deleted: false,
        body,
    })
}

/// Decrypt the body of a document.
///
/// Documents without a `crypt` field are returned unchanged. Decrypted
/// fields are merged over any other clear fields; `id` and `revision` always
/// come from the stored document.
///
/// # Errors
/// - `Decryption` if `crypt` is not a string or fails authentication
/// - `Serialization` if the plaintext is not a JSON object
pub fn decrypt_doc(cipher: &Cipher, mut doc: Document) -> Result<Document> {
    let crypt = match doc.body.remove(CRYPT_FIELD) {
        Some(Value::String(crypt)) => crypt,
        Some(_) => {
            return Err(Error::Decryption(format!(
                "Field '{}' of {} is not a string",
                CRYPT_FIELD, doc.id
            )))
        }
        None => return Ok(doc),
    };

    let plaintext = cipher.decrypt_str(&crypt)?;
    let mut fields = match serde_json::from_str::<Value>(&plaintext)? {
        Value::Object(fields) => fields,
        _ => {
            return Err(Error::Serialization(format!(
                "Decrypted body of {} is not an object",
                doc.id
            )))
        }
    };
    fields.remove(ID_FIELD);
    fields.remove(REVISION_FIELD);

    doc.body.extend(fields);
    Ok(doc)
}

/// Whether a document has exactly the at-rest encrypted shape.
///
/// That is a revision plus a single string `crypt` field, so a plaintext
/// document that merely happens to have a `crypt` field does not qualify.
pub fn is_encrypted_shape(doc: &Document) -> bool {
    doc.revision.is_some()
        && !doc.deleted
        && doc.body.len() == 1
        && matches!(doc.body.get(CRYPT_FIELD), Some(Value::String(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use expenses_common::{Passphrase, Revision};
    use proptest::prelude::*;
    use serde_json::json;

    fn cipher(passphrase: &str) -> Cipher {
        Cipher::new(Passphrase::new(passphrase).unwrap())
    }

    fn entry() -> Document {
        Document::from_value(json!({
            "id": "2023-04-01-abc",
            "revision": "1-aa",
            "date": "2023-04-01",
            "description": "Groceries",
            "destination": {"account": "Expenses:Groceries", "currency": "USD", "amount": 1250},
            "source": {"account": "Assets:Cash", "currency": "USD", "amount": -1250},
        }))
        .unwrap()
    }

    #[test]
    fn test_encrypt_doc_shape() {
        let cipher = cipher("secret");
        let encrypted = encrypt_doc(&cipher, entry()).unwrap();

        assert_eq!(encrypted.id, "2023-04-01-abc");
        assert_eq!(encrypted.revision, Some(Revision::parse("1-aa").unwrap()));
        assert_eq!(encrypted.body.len(), 1);
        assert!(is_encrypted_shape(&encrypted));
        assert!(!encrypted.to_value().unwrap().to_string().contains("Groceries"));
    }

    #[test]
    fn test_roundtrip() {
        let cipher = cipher("secret");
        let encrypted = encrypt_doc(&cipher, entry()).unwrap();
        assert_eq!(decrypt_doc(&cipher, encrypted).unwrap(), entry());
    }

    #[test]
    fn test_plain_document_passes_through() {
        let cipher = cipher("secret");
        assert_eq!(decrypt_doc(&cipher, entry()).unwrap(), entry());
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let encrypted = encrypt_doc(&cipher("secret"), entry()).unwrap();
        let err = decrypt_doc(&cipher("other"), encrypted).unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));
    }

    #[test]
    fn test_non_string_crypt_fails() {
        let doc = Document::from_value(json!({"id": "x", "revision": "1-aa", "crypt": 42})).unwrap();
        assert!(!is_encrypted_shape(&doc));
        assert!(matches!(
            decrypt_doc(&cipher("secret"), doc),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_non_object_plaintext_fails() {
        let cipher = cipher("secret");
        let crypt = cipher.encrypt_str("[1, 2, 3]").unwrap();
        let doc = Document::from_value(json!({"id": "x", "revision": "1-aa", "crypt": crypt})).unwrap();
        assert!(matches!(
            decrypt_doc(&cipher, doc),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_encrypted_shape_requires_exact_fields() {
        let accidental = Document::from_value(json!({
            "id": "x",
            "revision": "1-aa",
            "crypt": "value",
            "note": "plaintext with a crypt field",
        }))
        .unwrap();
        assert!(!is_encrypted_shape(&accidental));

        let unrevisioned = Document::from_value(json!({"id": "x", "crypt": "value"})).unwrap();
        assert!(!is_encrypted_shape(&unrevisioned));
    }

    #[test]
    fn test_tombstone_untouched() {
        let tombstone = Document::tombstone("x", Revision::new(2, "bb"));
        let encrypted = encrypt_doc(&cipher("secret"), tombstone.clone()).unwrap();
        assert_eq!(encrypted, tombstone);
    }

    proptest! {
        #[test]
        fn prop_roundtrip(description in ".*", amount in any::<i64>()) {
            let cipher = cipher("secret");
            let mut body = Map::new();
            body.insert("description".to_string(), json!(description));
            body.insert("amount".to_string(), json!(amount));
            let doc = Document::new("id", body);

            let encrypted = encrypt_doc(&cipher, doc.clone()).unwrap();
            prop_assert_eq!(decrypt_doc(&cipher, encrypted).unwrap(), doc);
        }

        #[test]
        fn prop_tampered_crypt_fails(flip in 48usize..80) {
            let cipher = cipher("secret");
            let mut encrypted = encrypt_doc(&cipher, entry()).unwrap();

            let crypt = encrypted.body[CRYPT_FIELD].as_str().unwrap().to_string();
            let mut bytes = crypt.into_bytes();
            let index = flip.min(bytes.len() - 1);
            bytes[index] = if bytes[index] == b'0' { b'1' } else { b'0' };
            encrypted.body.insert(
                CRYPT_FIELD.to_string(),
                Value::String(String::from_utf8(bytes).unwrap()),
            );

            prop_assert!(matches!(decrypt_doc(&cipher, encrypted), Err(Error::Decryption(_))));
        }
    }
}
