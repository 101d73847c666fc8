// ./infrastructure/src/persistence/json_document.rs
use application::{ApplicationError, CardDocument};
use async_trait::async_trait;
use domain::Card;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Persistence adapter over a single JSON file.
///
/// The document is one object mapping card names to field maps, the same
/// layout the other implementations of this service read and write. Load
/// policy: a missing file is an empty store, malformed content is a
/// `Document` error. Saves replace the file atomically via a sibling
/// temporary file and rename, so a crash mid-write cannot leave a
/// truncated document behind.
#[derive(Debug, Clone)]
pub struct JsonCardDocument {
    path: PathBuf,
}

impl JsonCardDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling temp file used for the write-then-rename swap. Kept in the
    /// same directory so the rename stays on one filesystem.
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CardDocument for JsonCardDocument {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<HashMap<String, Card>, ApplicationError> {
        debug!("Loading card document");
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let cards: HashMap<String, Card> = serde_json::from_slice(&bytes)
                    .map_err(|err| ApplicationError::Document(err.to_string()))?;
                debug!(count = cards.len(), "Card document loaded");
                Ok(cards)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("Card document does not exist yet, starting from an empty store");
                Ok(HashMap::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self, cards), fields(path = %self.path.display(), count = cards.len()))]
    async fn save(&self, cards: &HashMap<String, Card>) -> Result<(), ApplicationError> {
        debug!("Writing card document");
        let bytes = serde_json::to_vec_pretty(cards)
            .map_err(|err| ApplicationError::Document(err.to_string()))?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        debug!("Card document written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn card(value: serde_json::Value) -> Card {
        serde_json::from_value(value).unwrap()
    }

    fn sample_cards() -> HashMap<String, Card> {
        [
            (
                "Shivan Dragon".to_string(),
                card(json!({
                    "type": "Creature",
                    "color": "Red",
                    "ccm": "6",
                    "keywords": ["Flying"],
                    "legality": ["Modern", "Commander"]
                })),
            ),
            (
                "Counterspell".to_string(),
                card(json!({"type": "Instant", "color": "Blue", "text": "Counter target spell."})),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_store_consistently() {
        let dir = tempdir().unwrap();
        let document = JsonCardDocument::new(dir.path().join("mtgCards.json"));
        assert!(document.load().await.unwrap().is_empty());
        // Policy holds across repeated calls.
        assert!(document.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_file_is_a_document_error_consistently() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mtgCards.json");
        std::fs::write(&path, "{ not json").unwrap();
        let document = JsonCardDocument::new(&path);
        for _ in 0..2 {
            let err = document.load().await.unwrap_err();
            assert!(matches!(err, ApplicationError::Document(_)));
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips_field_for_field() {
        let dir = tempdir().unwrap();
        let document = JsonCardDocument::new(dir.path().join("mtgCards.json"));
        let cards = sample_cards();
        document.save(&cards).await.unwrap();
        assert_eq!(document.load().await.unwrap(), cards);
    }

    #[tokio::test]
    async fn save_replaces_the_whole_document() {
        let dir = tempdir().unwrap();
        let document = JsonCardDocument::new(dir.path().join("mtgCards.json"));
        document.save(&sample_cards()).await.unwrap();

        let smaller: HashMap<String, Card> =
            [("Counterspell".to_string(), card(json!({"type": "Instant"})))]
                .into_iter()
                .collect();
        document.save(&smaller).await.unwrap();
        assert_eq!(document.load().await.unwrap(), smaller);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file_and_writes_readable_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mtgCards.json");
        let document = JsonCardDocument::new(&path);
        document.save(&sample_cards()).await.unwrap();

        assert!(!document.temp_path().exists());
        let text = std::fs::read_to_string(&path).unwrap();
        // Pretty-printed, one field per line.
        assert!(text.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["Shivan Dragon"]["color"], json!("Red"));
    }
}
