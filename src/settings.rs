//! Typed view over the `settings` table of `config.redb`.

use std::time::Duration;

use tracing::warn;

use crate::{
    chunking::{ChunkingConfig, OverflowPolicy},
    config_db::ConfigDb,
    embedding::RetryPolicy,
    error::{Error, Result},
    gemini::DEFAULT_MODEL,
};

/// Every recognised setting with a short description.
pub const SETTING_KEYS: &[(&str, &str)] = &[
    ("embedding_model", "embedding model id"),
    ("top_k", "default number of search results"),
    ("oversample_factor", "candidate multiplier before filtering"),
    ("embed_batch_size", "texts per embedding request"),
    ("batch_pause_ms", "pause between embedding requests"),
    ("retry_attempts", "attempts on rate limiting, including the first"),
    ("retry_initial_delay_ms", "first backoff delay"),
    ("retry_max_delay_ms", "backoff ceiling"),
    ("max_chunk_chars", "chunk size ceiling, 0 for none"),
    ("chunk_overflow", "reject or split oversized chunks"),
    ("context_header", "prefix embedded chunks with the document title"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub embedding_model: String,
    pub top_k: usize,
    pub oversample_factor: usize,
    pub embed_batch_size: usize,
    pub batch_pause: Duration,
    pub retry: RetryPolicy,
    pub chunking: ChunkingConfig,
    pub context_header: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding_model: DEFAULT_MODEL.to_string(),
            top_k: 5,
            oversample_factor: 5,
            embed_batch_size: 50,
            batch_pause: Duration::from_millis(1000),
            retry: RetryPolicy::default(),
            chunking: ChunkingConfig::default(),
            context_header: true,
        }
    }
}

impl Settings {
    /// Defaults overlaid with persisted settings, then the environment.
    ///
    /// Unknown persisted keys are ignored with a warning. A known key with
    /// an unparsable value is an error naming the key.
    pub fn load(config: &ConfigDb) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in config.list_settings()? {
            if is_known(&key) {
                settings.apply(&key, &value)?;
            } else {
                warn!(key = %key, "ignoring unknown setting");
            }
        }
        if let Ok(model) = std::env::var("ROLERAG_EMBEDDING_MODEL")
            && !model.trim().is_empty()
        {
            settings.embedding_model = model.trim().to_string();
        }
        Ok(settings)
    }

    /// Check that `value` is acceptable for `key` before persisting it.
    pub fn validate(key: &str, value: &str) -> Result<()> {
        if !is_known(key) {
            return Err(Error::NotFound {
                kind: "setting",
                name: key.to_string(),
            });
        }
        Self::default().apply(key, value)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "embedding_model" => {
                if value.is_empty() {
                    return Err(invalid(key, value, "must not be empty"));
                }
                self.embedding_model = value.to_string();
            }
            "top_k" => self.top_k = positive(key, value)?,
            "oversample_factor" => self.oversample_factor = positive(key, value)?,
            "embed_batch_size" => self.embed_batch_size = positive(key, value)?,
            "batch_pause_ms" => {
                self.batch_pause = Duration::from_millis(number(key, value)?)
            }
            "retry_attempts" => {
                self.retry.attempts = positive::<u32>(key, value)?;
            }
            "retry_initial_delay_ms" => {
                self.retry.initial_delay =
                    Duration::from_millis(number(key, value)?);
            }
            "retry_max_delay_ms" => {
                self.retry.max_delay = Duration::from_millis(number(key, value)?);
            }
            "max_chunk_chars" => {
                let max: usize = number(key, value)?;
                self.chunking.max_chars = (max > 0).then_some(max);
            }
            "chunk_overflow" => {
                self.chunking.overflow = value
                    .parse::<OverflowPolicy>()
                    .map_err(|_| invalid(key, value, "expected reject or split"))?;
            }
            "context_header" => {
                self.context_header = match value.to_ascii_lowercase().as_str() {
                    "true" | "yes" | "on" | "1" => true,
                    "false" | "no" | "off" | "0" => false,
                    _ => return Err(invalid(key, value, "expected true or false")),
                };
            }
            _ => {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

fn is_known(key: &str) -> bool {
    SETTING_KEYS.iter().any(|(known, _)| *known == key)
}

fn invalid(key: &str, value: &str, why: &str) -> Error {
    Error::Config(format!("invalid value {value:?} for {key}: {why}"))
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| invalid(key, value, "expected a non-negative integer"))
}

fn positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let n: T = number(key, value)?;
    if n <= T::default() {
        return Err(invalid(key, value, "must be at least 1"));
    }
    Ok(n)
}
