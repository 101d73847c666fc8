// ./infrastructure/src/persistence/card_store.rs
use application::{ApplicationError, CardDocument, CardStore};
use async_trait::async_trait;
use domain::Card;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

/// The in-memory card mapping, kept in sync with an injected document.
///
/// Every mutation flushes the full mapping through the document before
/// returning. The write lock is held across the whole mutate-then-flush
/// critical section, which serializes concurrent writers and closes the
/// lost-update race inherent to read-whole/write-whole persistence. A
/// failed flush rolls the in-memory change back so memory and disk never
/// disagree about committed state.
pub struct PersistentCardStore {
    document: Arc<dyn CardDocument>,
    cards: RwLock<HashMap<String, Card>>,
}

impl PersistentCardStore {
    /// Loads the persisted document and builds the store over it.
    pub async fn open(document: Arc<dyn CardDocument>) -> Result<Self, ApplicationError> {
        let cards = document.load().await?;
        info!(count = cards.len(), "Card store loaded from document");
        Ok(Self {
            document,
            cards: RwLock::new(cards),
        })
    }
}

#[async_trait]
impl CardStore for PersistentCardStore {
    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> Result<Option<Card>, ApplicationError> {
        debug!(card = %name, "Getting card from store");
        Ok(self.cards.read().await.get(name).cloned())
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<(String, Card)>, ApplicationError> {
        debug!("Listing cards from store");
        let cards = self.cards.read().await;
        Ok(cards
            .iter()
            .map(|(name, card)| (name.clone(), card.clone()))
            .collect())
    }

    #[instrument(skip(self, card))]
    async fn create(&self, name: &str, card: Card) -> Result<(), ApplicationError> {
        debug!(card = %name, "Creating card in store");
        let mut cards = self.cards.write().await;
        if cards.contains_key(name) {
            warn!(card = %name, "Create rejected: card already exists");
            return Err(ApplicationError::AlreadyExists(name.to_string()));
        }
        cards.insert(name.to_string(), card);
        if let Err(err) = self.document.save(&cards).await {
            error!(card = %name, "Flush failed after create, rolling back: {}", err);
            cards.remove(name);
            return Err(err);
        }
        Ok(())
    }

    #[instrument(skip(self, card))]
    async fn upsert(&self, name: &str, card: Card) -> Result<(), ApplicationError> {
        debug!(card = %name, "Upserting card in store");
        let mut cards = self.cards.write().await;
        let previous = cards.insert(name.to_string(), card);
        if let Err(err) = self.document.save(&cards).await {
            error!(card = %name, "Flush failed after upsert, rolling back: {}", err);
            match previous {
                Some(previous) => cards.insert(name.to_string(), previous),
                None => cards.remove(name),
            };
            return Err(err);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<(), ApplicationError> {
        debug!(card = %name, "Deleting card from store");
        let mut cards = self.cards.write().await;
        let Some(removed) = cards.remove(name) else {
            warn!(card = %name, "Delete rejected: card not found");
            return Err(ApplicationError::NotFound(name.to_string()));
        };
        if let Err(err) = self.document.save(&cards).await {
            error!(card = %name, "Flush failed after delete, rolling back: {}", err);
            cards.insert(name.to_string(), removed);
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::JsonCardDocument;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    fn card(value: serde_json::Value) -> Card {
        serde_json::from_value(value).unwrap()
    }

    async fn open_store(dir: &tempfile::TempDir) -> (Arc<JsonCardDocument>, PersistentCardStore) {
        let document = Arc::new(JsonCardDocument::new(dir.path().join("mtgCards.json")));
        let store = PersistentCardStore::open(document.clone()).await.unwrap();
        (document, store)
    }

    #[tokio::test]
    async fn create_then_get_returns_the_card() {
        let dir = tempdir().unwrap();
        let (_, store) = open_store(&dir).await;
        let shock = card(json!({"type": "Instant", "color": "Red"}));
        store.create("Shock", shock.clone()).await.unwrap();
        assert_eq!(store.get("Shock").await.unwrap(), Some(shock));
    }

    #[tokio::test]
    async fn create_conflict_leaves_existing_card_untouched() {
        let dir = tempdir().unwrap();
        let (_, store) = open_store(&dir).await;
        let original = card(json!({"type": "Instant", "color": "Red"}));
        store.create("Shock", original.clone()).await.unwrap();

        let err = store
            .create("Shock", card(json!({"type": "Sorcery"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::AlreadyExists(name) if name == "Shock"));
        assert_eq!(store.get("Shock").await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn delete_absent_card_is_not_found_and_non_destructive() {
        let dir = tempdir().unwrap();
        let (_, store) = open_store(&dir).await;
        store
            .create("Shock", card(json!({"type": "Instant"})))
            .await
            .unwrap();

        let err = store.delete("Lightning Bolt").await.unwrap_err();
        assert!(matches!(err, ApplicationError::NotFound(_)));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let dir = tempdir().unwrap();
        let (document, store) = open_store(&dir).await;
        let bolt = card(json!({"type": "Instant", "color": "Red", "ccm": "1"}));

        store.upsert("Lightning Bolt", bolt.clone()).await.unwrap();
        let after_once = document.load().await.unwrap();

        store.upsert("Lightning Bolt", bolt.clone()).await.unwrap();
        let after_twice = document.load().await.unwrap();

        assert_eq!(after_once, after_twice);
        assert_eq!(store.get("Lightning Bolt").await.unwrap(), Some(bolt));
    }

    #[tokio::test]
    async fn mutations_survive_a_reopen() {
        let dir = tempdir().unwrap();
        let (document, store) = open_store(&dir).await;
        store
            .create("Shock", card(json!({"type": "Instant", "color": "Red"})))
            .await
            .unwrap();
        store
            .create("Counterspell", card(json!({"type": "Instant", "color": "Blue"})))
            .await
            .unwrap();
        store.delete("Shock").await.unwrap();

        let reopened = PersistentCardStore::open(document).await.unwrap();
        assert_eq!(reopened.get("Shock").await.unwrap(), None);
        assert!(reopened.get("Counterspell").await.unwrap().is_some());
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }

    /// In-memory document whose saves can be made to fail on demand.
    #[derive(Default)]
    struct FlakyDocument {
        saved: tokio::sync::Mutex<HashMap<String, Card>>,
        fail_saves: AtomicBool,
    }

    #[async_trait]
    impl CardDocument for FlakyDocument {
        async fn load(&self) -> Result<HashMap<String, Card>, ApplicationError> {
            Ok(self.saved.lock().await.clone())
        }

        async fn save(&self, cards: &HashMap<String, Card>) -> Result<(), ApplicationError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(ApplicationError::Io(std::io::Error::other("disk full")));
            }
            *self.saved.lock().await = cards.clone();
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_flush_rolls_back_the_in_memory_change() {
        let document = Arc::new(FlakyDocument::default());
        let store = PersistentCardStore::open(document.clone()).await.unwrap();
        let shock = card(json!({"type": "Instant", "color": "Red"}));
        store.create("Shock", shock.clone()).await.unwrap();

        document.fail_saves.store(true, Ordering::SeqCst);

        let err = store
            .create("Counterspell", card(json!({"type": "Instant"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Io(_)));
        assert_eq!(store.get("Counterspell").await.unwrap(), None);

        let err = store
            .upsert("Shock", card(json!({"type": "Sorcery"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Io(_)));
        assert_eq!(store.get("Shock").await.unwrap(), Some(shock.clone()));

        let err = store.delete("Shock").await.unwrap_err();
        assert!(matches!(err, ApplicationError::Io(_)));
        assert_eq!(store.get("Shock").await.unwrap(), Some(shock));

        // Memory still mirrors the last successful flush.
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert_eq!(document.load().await.unwrap().len(), 1);
    }
}
