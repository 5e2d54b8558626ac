use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level config loaded from `trawler.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TrawlerConfig {
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub crawling: CrawlingConfig,
    /// Halves database cache sizes when set.
    #[serde(default)]
    pub low_memory: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexingConfig {
    /// Disk throttle in [0..99]; each step adds 100 µs of sleep between
    /// text-pipeline chunks.
    #[serde(default)]
    pub throttle: u32,
    /// Seconds to wait before the first crawl starts.
    #[serde(default)]
    pub initial_sleep: u64,
    #[serde(default = "default_max_word_length")]
    pub max_word_length: usize,
    #[serde(default = "default_min_word_length")]
    pub min_word_length: usize,
    #[serde(default = "default_max_words_to_index")]
    pub max_words_to_index: usize,
    /// Module roster, processed in order.
    #[serde(default = "default_modules")]
    pub modules: Vec<String>,
    /// Runs the Xesam live-search subsystem: the indexer writes the event
    /// log and the matcher diffs it against active searches. Off means no
    /// events and no matcher.
    #[serde(default = "default_true")]
    pub enable_xesam: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            throttle: 0,
            initial_sleep: 0,
            max_word_length: default_max_word_length(),
            min_word_length: default_min_word_length(),
            max_words_to_index: default_max_words_to_index(),
            modules: default_modules(),
            enable_xesam: default_true(),
        }
    }
}

fn default_max_word_length() -> usize {
    30
}

fn default_min_word_length() -> usize {
    3
}

fn default_max_words_to_index() -> usize {
    10000
}

fn default_modules() -> Vec<String> {
    vec!["files".to_string()]
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CrawlingConfig {
    /// Roots crawled by the `files` module. Defaults to the home directory
    /// when empty.
    #[serde(default)]
    pub crawl_dirs: Vec<PathBuf>,
    /// Extra roots appended to the module roots.
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    /// Directories never descended into.
    #[serde(default)]
    pub exclude_dirs: Vec<PathBuf>,
    /// Glob patterns on basenames to skip (e.g. `*.iso`).
    #[serde(default)]
    pub ignored_patterns: Vec<String>,
}

impl TrawlerConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: TrawlerConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Effective crawl roots for the `files` module.
    pub fn file_roots(&self) -> Vec<PathBuf> {
        let mut roots = self.crawling.crawl_dirs.clone();
        if roots.is_empty() {
            if let Some(home) = std::env::var_os("HOME") {
                roots.push(PathBuf::from(home));
            }
        }
        roots.extend(self.crawling.include_dirs.iter().cloned());
        roots.retain(|r| !self.crawling.exclude_dirs.contains(r));
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = TrawlerConfig::default();
        assert_eq!(cfg.indexing.max_word_length, 30);
        assert_eq!(cfg.indexing.min_word_length, 3);
        assert_eq!(cfg.indexing.modules, vec!["files".to_string()]);
        assert!(!cfg.low_memory);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: TrawlerConfig = toml::from_str(
            r#"
            low_memory = true

            [indexing]
            throttle = 20
            modules = ["files", "applications"]

            [crawling]
            crawl_dirs = ["/srv/docs"]
            ignored_patterns = ["*.iso"]
            "#,
        )
        .unwrap();
        assert!(cfg.low_memory);
        assert_eq!(cfg.indexing.throttle, 20);
        assert_eq!(cfg.indexing.modules.len(), 2);
        assert_eq!(cfg.crawling.crawl_dirs[0], PathBuf::from("/srv/docs"));
        // unspecified values fall back to defaults
        assert_eq!(cfg.indexing.min_word_length, 3);
    }

    #[test]
    fn exclude_dirs_filter_roots() {
        let cfg: TrawlerConfig = toml::from_str(
            r#"
            [crawling]
            crawl_dirs = ["/a", "/b"]
            include_dirs = ["/c"]
            exclude_dirs = ["/b"]
            "#,
        )
        .unwrap();
        let roots = cfg.file_roots();
        assert_eq!(roots, vec![PathBuf::from("/a"), PathBuf::from("/c")]);
    }
}
