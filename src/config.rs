use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;

use crate::embed::{Embedder, HashEmbedder, HttpEmbedder};
use crate::error::{Result, StoreError};

pub const DEFAULT_DB_PATH: &str = "data/refbase.json";
pub const DEFAULT_EMBED_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text-v1.5";
pub const DEFAULT_DIMENSIONS: usize = 768;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Which fields feed a record's reference hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RefMode {
    /// `{data, prev, ts, type}`. Identical content added at different seconds
    /// gets different refs.
    #[default]
    Timestamped,
    /// `{data, prev, type}`. The timestamp is stored but not hashed, so the
    /// same content under the same `prev` always maps to one ref.
    ContentOnly,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub ref_mode: RefMode,
    /// Embed each bucket's sample text once per process instead of on every query.
    pub cache_bucket_vectors: bool,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ref_mode: RefMode::default(),
            cache_bucket_vectors: false,
        }
    }

    pub fn with_ref_mode(mut self, mode: RefMode) -> Self {
        self.ref_mode = mode;
        self
    }

    pub fn with_bucket_cache(mut self, enabled: bool) -> Self {
        self.cache_bucket_vectors = enabled;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(DEFAULT_DB_PATH)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EmbedderKind {
    /// OpenAI-compatible `/v1/embeddings` endpoint (llama.cpp server, etc).
    #[default]
    Http,
    /// Deterministic bag-of-words hashing. Offline, no model required.
    Hash,
}

#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    pub kind: EmbedderKind,
    pub url: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::default(),
            url: DEFAULT_EMBED_URL.to_string(),
            model: DEFAULT_EMBED_MODEL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl EmbedderConfig {
    /// Construct the configured embedder. Nothing is loaded lazily or globally:
    /// the returned handle is what the store holds for its whole lifetime.
    pub fn build(&self) -> Result<Arc<dyn Embedder>> {
        if self.dimensions == 0 {
            return Err(StoreError::Config("embedding dimensions must be positive".into()));
        }
        match self.kind {
            EmbedderKind::Hash => Ok(Arc::new(HashEmbedder::with_dimensions(self.dimensions))),
            EmbedderKind::Http => {
                let timeout = Duration::from_secs(self.timeout_secs);
                let embedder = HttpEmbedder::new(&self.url, &self.model, timeout)?;
                Ok(Arc::new(embedder))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_preserve_timestamped_refs() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.ref_mode, RefMode::Timestamped);
        assert!(!cfg.cache_bucket_vectors);
        assert_eq!(cfg.path, PathBuf::from(DEFAULT_DB_PATH));
    }

    #[test]
    fn hash_embedder_builds_with_requested_dimensions() {
        let cfg = EmbedderConfig { kind: EmbedderKind::Hash, dimensions: 32, ..Default::default() };
        let embedder = cfg.build().unwrap();
        assert_eq!(embedder.dimensions(), Some(32));
        assert_eq!(embedder.embed("hello").unwrap().len(), 32);
    }

    #[test]
    fn zero_dimensions_rejected() {
        let cfg = EmbedderConfig { kind: EmbedderKind::Hash, dimensions: 0, ..Default::default() };
        assert!(matches!(cfg.build(), Err(StoreError::Config(_))));
    }
}
