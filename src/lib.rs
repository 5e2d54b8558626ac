pub mod config;
pub mod crawler;
pub mod db;
pub mod error;
pub mod index;
pub mod indexer;
pub mod live;
pub mod module;
pub mod ontology;
pub mod query;
pub mod text;

use std::sync::Arc;

use config::TrawlerConfig;
use db::DbManager;
use ontology::Ontology;

/// Process-wide handles, passed explicitly into subsystems.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<TrawlerConfig>,
    pub ontology: Arc<Ontology>,
    pub db: Arc<DbManager>,
}

impl AppState {
    pub fn word_parse_config(&self) -> text::WordParseConfig {
        text::WordParseConfig {
            max_word_length: self.config.indexing.max_word_length,
            min_word_length: self.config.indexing.min_word_length,
            max_words_to_index: self.config.indexing.max_words_to_index,
        }
    }
}
