//! Ledger records stored in the settings and ledger collections.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use expenses_common::{Document, Error, Result, Revision};

/// Id of the single settings document.
pub const SETTINGS_ID: &str = "settings";

/// User settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Revision of the stored settings, if any.
    #[serde(skip)]
    pub version: Option<Revision>,
    pub default_currency: String,
    #[serde(default)]
    pub destination_accounts: Vec<String>,
    #[serde(default)]
    pub source_accounts: Vec<String>,
}

impl Settings {
    pub fn new(default_currency: impl Into<String>) -> Self {
        Self {
            version: None,
            default_currency: default_currency.into(),
            destination_accounts: Vec::new(),
            source_accounts: Vec::new(),
        }
    }

    pub fn to_document(&self) -> Result<Document> {
        Ok(body_document(SETTINGS_ID, self)?.with_revision(self.version.clone()))
    }

    pub fn from_document(doc: Document) -> Result<Self> {
        let version = doc.revision.clone();
        let mut settings: Settings = from_body(doc)?;
        settings.version = version;
        Ok(settings)
    }
}

/// One side of a ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub account: String,
    pub currency: String,
    /// Amount in minor units; negative for the source side.
    pub amount: i64,
}

/// A two-posting ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Document id; empty for an entry that was never saved.
    #[serde(skip)]
    pub id: String,
    #[serde(skip)]
    pub version: Option<Revision>,
    pub date: NaiveDate,
    pub description: String,
    pub destination: Posting,
    pub source: Posting,
}

impl LedgerEntry {
    /// Create an unsaved entry moving `amount` from `source` to `destination`.
    pub fn new(
        date: NaiveDate,
        description: impl Into<String>,
        destination: impl Into<String>,
        source: impl Into<String>,
        currency: impl Into<String>,
        amount: i64,
    ) -> Self {
        let currency = currency.into();
        Self {
            id: String::new(),
            version: None,
            date,
            description: description.into(),
            destination: Posting {
                account: destination.into(),
                currency: currency.clone(),
                amount,
            },
            source: Posting {
                account: source.into(),
                currency,
                amount: -amount,
            },
        }
    }

    /// Whether both postings cancel out in the same currency.
    pub fn is_balanced(&self) -> bool {
        self.destination.currency == self.source.currency
            && self.destination.amount.checked_add(self.source.amount) == Some(0)
    }

    /// Give an unsaved entry its id.
    ///
    /// Ids start with the entry date so the ledger sorts chronologically.
    /// Entries that get a new id also lose any stale revision.
    pub fn assign_id(&mut self) {
        if self.id.is_empty() {
            self.id = format!("{}-{}", self.date.format("%Y-%m-%d"), Uuid::new_v4());
            self.version = None;
        }
    }

    pub fn to_document(&self) -> Result<Document> {
        if self.id.is_empty() {
            return Err(Error::InvalidInput("Ledger entry has no id".to_string()));
        }
        Ok(body_document(&self.id, self)?.with_revision(self.version.clone()))
    }

    pub fn from_document(doc: Document) -> Result<Self> {
        let id = doc.id.clone();
        let version = doc.revision.clone();
        let mut entry: LedgerEntry = from_body(doc)?;
        entry.id = id;
        entry.version = version;
        Ok(entry)
    }
}

fn body_document<T: Serialize>(id: &str, record: &T) -> Result<Document> {
    match serde_json::to_value(record)? {
        Value::Object(body) => Ok(Document::new(id, body)),
        _ => Err(Error::Serialization(format!("Record {} is not an object", id))),
    }
}

fn from_body<T: DeserializeOwned>(doc: Document) -> Result<T> {
    serde_json::from_value(Value::Object(doc.body))
        .map_err(|e| Error::Serialization(format!("Malformed document {}: {}", doc.id, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_settings_wire_names() {
        let mut settings = Settings::new("USD");
        settings.destination_accounts = vec!["Expenses:Groceries".to_string()];
        settings.source_accounts = vec!["Assets:Cash".to_string()];

        let value = settings.to_document().unwrap().to_value().unwrap();
        assert_eq!(
            value,
            json!({
                "id": "settings",
                "defaultCurrency": "USD",
                "destinationAccounts": ["Expenses:Groceries"],
                "sourceAccounts": ["Assets:Cash"],
            })
        );
    }

    #[test]
    fn test_settings_roundtrip_keeps_version() {
        let mut settings = Settings::new("EUR");
        settings.version = Some(Revision::new(3, "abc"));
        let back = Settings::from_document(settings.to_document().unwrap()).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_entry_id_generation() {
        let mut entry = LedgerEntry::new(date("2023-04-01"), "Lunch", "Expenses:Eat Out", "Assets:Cash", "USD", 1250);
        entry.version = Some(Revision::new(1, "stale"));
        entry.assign_id();

        assert!(entry.id.starts_with("2023-04-01-"));
        assert_eq!(entry.id.len(), "2023-04-01-".len() + 36);
        assert!(entry.version.is_none());

        let id = entry.id.clone();
        entry.assign_id();
        assert_eq!(entry.id, id);
    }

    #[test]
    fn test_entry_document_shape() {
        let mut entry = LedgerEntry::new(date("2023-04-01"), "Lunch", "Expenses:Eat Out", "Assets:Cash", "USD", 1250);
        entry.id = "2023-04-01-x".to_string();

        let value = entry.to_document().unwrap().to_value().unwrap();
        assert_eq!(
            value,
            json!({
                "id": "2023-04-01-x",
                "date": "2023-04-01",
                "description": "Lunch",
                "destination": {"account": "Expenses:Eat Out", "currency": "USD", "amount": 1250},
                "source": {"account": "Assets:Cash", "currency": "USD", "amount": -1250},
            })
        );
        assert_eq!(LedgerEntry::from_document(entry.to_document().unwrap()).unwrap(), entry);
    }

    #[test]
    fn test_unsaved_entry_has_no_document() {
        let entry = LedgerEntry::new(date("2023-04-01"), "Lunch", "a", "b", "USD", 1);
        assert!(matches!(entry.to_document(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_malformed_entry_document() {
        let doc = Document::from_value(json!({"id": "x", "date": "not a date"})).unwrap();
        assert!(matches!(LedgerEntry::from_document(doc), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_is_balanced() {
        let mut entry = LedgerEntry::new(date("2023-04-01"), "Lunch", "a", "b", "USD", 1250);
        assert!(entry.is_balanced());

        entry.source.amount = -1000;
        assert!(!entry.is_balanced());

        entry.source.amount = -1250;
        entry.source.currency = "EUR".to_string();
        assert!(!entry.is_balanced());
    }
}
