use async_trait::async_trait;
use domain::{Card, CardName, DomainError, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

// --- Application Errors ---
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Card not found: {0}")]
    NotFound(String),
    #[error("Card already exists: {0}")]
    AlreadyExists(String),
    #[error("No cards matched the search criteria")]
    NoMatches,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Malformed card document: {0}")]
    Document(String),
    #[error("Persistence I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("Domain validation error: {0}")]
    Domain(#[from] DomainError), // Propagate domain errors cleanly
}

// --- Infrastructure Interfaces (Traits) ---

/// Interface for the card store: the in-memory name -> card mapping kept in
/// sync with the persisted document.
///
/// Lookups are exact and case-sensitive. Mutations are durable when they
/// return: implementations flush the full mapping before reporting success,
/// and a failed flush must surface the error with the in-memory change
/// rolled back rather than letting memory and disk drift apart.
#[async_trait]
pub trait CardStore: Send + Sync {
    /// Retrieves a card by name.
    async fn get(&self, name: &str) -> Result<Option<Card>, ApplicationError>;
    /// Lists all cards. No defined order.
    async fn list(&self) -> Result<Vec<(String, Card)>, ApplicationError>;
    /// Adds a new card; fails with `AlreadyExists` if the name is taken.
    async fn create(&self, name: &str, card: Card) -> Result<(), ApplicationError>;
    /// Creates or overwrites a card unconditionally.
    async fn upsert(&self, name: &str, card: Card) -> Result<(), ApplicationError>;
    /// Removes a card; fails with `NotFound` if absent.
    async fn delete(&self, name: &str) -> Result<(), ApplicationError>;
}

/// Interface for the persisted document backing the store.
///
/// Read-whole/write-whole semantics: `load` decodes the entire document,
/// `save` replaces it with the full mapping. Callers must serialize the
/// load-mutate-save sequence themselves; the document makes no attempt to
/// arbitrate concurrent writers.
#[async_trait]
pub trait CardDocument: Send + Sync {
    /// Loads the full mapping. A missing document loads as an empty store;
    /// malformed content is a `Document` error.
    async fn load(&self) -> Result<HashMap<String, Card>, ApplicationError>;
    /// Overwrites the document with the given mapping.
    async fn save(&self, cards: &HashMap<String, Card>) -> Result<(), ApplicationError>;
}

// --- Request/Response Models (Data Transfer Objects - DTOs) ---

/// Request to add a new card.
#[derive(Deserialize, Debug)]
pub struct CreateCardRequest {
    /// The name for the card.
    pub name: String,
    /// The card's attributes as a JSON object.
    pub fields: HashMap<String, FieldValue>,
}

/// One named card, as returned by list endpoints.
#[derive(Serialize, Debug, Clone)]
pub struct CardEntry {
    pub name: String,
    pub fields: Card,
}

// --- Search Criteria ---

/// Optional, conjunctive search filters. Field names match the query
/// parameters of the HTTP surface.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct SearchCriteria {
    /// Card name must contain this substring, case-insensitive.
    pub name: Option<String>,
    /// Card's `type` field must equal this value, case-insensitive.
    #[serde(rename = "type")]
    pub card_type: Option<String>,
    /// Card's `color` field must equal this value, case-insensitive.
    pub color: Option<String>,
    /// Card's keyword list must contain this element, case-insensitive.
    pub keyword: Option<String>,
}

/// Treats a missing or empty criterion as not supplied.
fn supplied(criterion: &Option<String>) -> Option<&str> {
    criterion.as_deref().filter(|value| !value.is_empty())
}

impl SearchCriteria {
    pub fn is_empty(&self) -> bool {
        supplied(&self.name).is_none()
            && supplied(&self.card_type).is_none()
            && supplied(&self.color).is_none()
            && supplied(&self.keyword).is_none()
    }

    /// Checks whether a card satisfies every supplied criterion. A card
    /// missing a filtered field never matches that filter.
    pub fn matches(&self, card_name: &str, card: &Card) -> bool {
        if let Some(needle) = supplied(&self.name) {
            if !card_name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some(wanted) = supplied(&self.card_type) {
            if !field_equals_ignore_case(card, "type", wanted) {
                return false;
            }
        }
        if let Some(wanted) = supplied(&self.color) {
            if !field_equals_ignore_case(card, "color", wanted) {
                return false;
            }
        }
        if let Some(wanted) = supplied(&self.keyword) {
            let wanted = wanted.to_lowercase();
            let found = card
                .keywords()
                .is_some_and(|kws| kws.iter().any(|kw| kw.to_lowercase() == wanted));
            if !found {
                return false;
            }
        }
        true
    }
}

fn field_equals_ignore_case(card: &Card, field: &str, wanted: &str) -> bool {
    card.text_field(field)
        .is_some_and(|value| value.eq_ignore_ascii_case(wanted))
}

// --- Application Services (Use Cases) ---

/// Service for card CRUD against the injected store.
pub struct CardService {
    store: Arc<dyn CardStore>,
}

impl CardService {
    pub fn new(store: Arc<dyn CardStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, request), fields(card = %request.name))]
    pub async fn create_card(&self, request: CreateCardRequest) -> Result<CardName, ApplicationError> {
        info!("Attempting to create card");
        let name = CardName::new(request.name)?;
        let card = Card::new(request.fields)?;
        self.store.create(name.as_str(), card).await?;
        info!(card = %name, "Card created successfully");
        Ok(name)
    }

    #[instrument(skip(self))]
    pub async fn get_card(&self, name: &str) -> Result<Card, ApplicationError> {
        debug!(card = %name, "Looking up card");
        self.store.get(name).await?.ok_or_else(|| {
            warn!(card = %name, "Card not found");
            ApplicationError::NotFound(name.to_string())
        })
    }

    #[instrument(skip(self))]
    pub async fn list_cards(&self) -> Result<Vec<CardEntry>, ApplicationError> {
        debug!("Listing all cards");
        let entries = self
            .store
            .list()
            .await?
            .into_iter()
            .map(|(name, fields)| CardEntry { name, fields })
            .collect();
        Ok(entries)
    }

    /// Creates or overwrites a card. The create/update distinction is left
    /// to the caller; both PUT and PATCH land here.
    #[instrument(skip(self, fields))]
    pub async fn upsert_card(
        &self,
        name: &str,
        fields: HashMap<String, FieldValue>,
    ) -> Result<(), ApplicationError> {
        info!(card = %name, "Attempting to upsert card");
        let name = CardName::new(name)?;
        let card = Card::new(fields)?;
        self.store.upsert(name.as_str(), card).await?;
        info!(card = %name, "Card upserted successfully");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_card(&self, name: &str) -> Result<(), ApplicationError> {
        info!(card = %name, "Attempting to delete card");
        self.store.delete(name).await?;
        info!(card = %name, "Card deleted successfully");
        Ok(())
    }
}

/// Service for searching the store with conjunctive filters.
pub struct SearchService {
    store: Arc<dyn CardStore>,
}

impl SearchService {
    pub fn new(store: Arc<dyn CardStore>) -> Self {
        Self { store }
    }

    /// Linear scan of the store. An empty criteria set matches every card;
    /// zero matches is the explicit `NoMatches` error, distinct from an
    /// empty store matching trivially.
    #[instrument(skip(self, criteria), fields(criteria = ?criteria))]
    pub async fn search(
        &self,
        criteria: SearchCriteria,
    ) -> Result<HashMap<String, Card>, ApplicationError> {
        debug!("Searching cards");
        let matching: HashMap<String, Card> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|(name, card)| criteria.matches(name, card))
            .collect();

        if matching.is_empty() {
            info!("Search yielded no matching cards");
            return Err(ApplicationError::NoMatches);
        }
        info!(hits = matching.len(), "Search completed");
        Ok(matching)
    }
}
