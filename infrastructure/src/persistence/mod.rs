pub mod card_store;
pub mod json_document;

// Re-export the store and the document adapter
pub use card_store::PersistentCardStore;
pub use json_document::JsonCardDocument;
