use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error; // For domain-specific errors

// --- Domain Errors ---
#[derive(Error, Debug, PartialEq)]
pub enum DomainError {
    #[error("Card name must be a non-empty string")]
    EmptyName,
    #[error("Card must contain at least one field")]
    EmptyCard,
}

// --- Card Name ---

/// The unique, case-sensitive key identifying a card in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardName(String);

impl CardName {
    /// Creates a card name, rejecting empty or whitespace-only input.
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::EmptyName);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<CardName> for String {
    fn from(name: CardName) -> Self {
        name.0
    }
}

impl std::fmt::Display for CardName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Field Values ---

/// A single card attribute: either a scalar string or an ordered list of
/// strings (e.g. a multi-value keyword field).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::Text(_) => None,
            FieldValue::List(items) => Some(items),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        FieldValue::List(items)
    }
}

// --- Card ---

/// A card's attributes as an open field name -> value mapping.
///
/// The store enforces no schema; callers agree on conventional field names
/// (`type`, `color`, `ccm`, `text`, `keywords`, `legality`). Serializes as
/// the bare field map so the persisted document stays portable with the
/// other implementations of this service.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Card {
    fields: HashMap<String, FieldValue>,
}

impl Card {
    /// Creates a card from raw fields, rejecting an empty field map.
    pub fn new(fields: HashMap<String, FieldValue>) -> Result<Self, DomainError> {
        if fields.is_empty() {
            return Err(DomainError::EmptyCard);
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &HashMap<String, FieldValue> {
        &self.fields
    }

    /// Gets a scalar field's text, or None if absent or list-valued.
    pub fn text_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_text)
    }

    /// Gets a list field's items, or None if absent or scalar-valued.
    pub fn list_field(&self, name: &str) -> Option<&[String]> {
        self.fields.get(name).and_then(FieldValue::as_list)
    }

    /// The card's keyword list. Historical data spells the field either
    /// `keywords` or `keyword`; accept both.
    pub fn keywords(&self) -> Option<&[String]> {
        self.list_field("keywords")
            .or_else(|| self.list_field("keyword"))
    }
}
