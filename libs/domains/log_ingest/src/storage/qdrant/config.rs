use core_config::{ConfigError, FromEnv, env_optional, env_or_default, env_parse};

const DEFAULT_URL: &str = "http://localhost:6334";
const DEFAULT_COLLECTION: &str = "logs";

/// Qdrant connection and collection configuration
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub collection: String,
    /// Vector size the collection must have; matches the embedding dimension
    pub dimension: usize,
}

impl QdrantConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }
}

impl FromEnv for QdrantConfig {
    /// - QDRANT_URL: defaults to http://localhost:6334 (gRPC port)
    /// - QDRANT_API_KEY: optional
    /// - QDRANT_COLLECTION: defaults to "logs"
    /// - QDRANT_TIMEOUT_SECS: defaults to 30
    ///
    /// `dimension` keeps its default; callers set it from the embedding config.
    fn from_env() -> Result<Self, ConfigError> {
        let collection = env_or_default("QDRANT_COLLECTION", DEFAULT_COLLECTION);
        if collection.trim().is_empty() {
            return Err(ConfigError::invalid("QDRANT_COLLECTION", "must not be empty"));
        }

        Ok(Self {
            url: env_or_default("QDRANT_URL", DEFAULT_URL),
            api_key: env_optional("QDRANT_API_KEY"),
            timeout_secs: env_parse("QDRANT_TIMEOUT_SECS", 30)?,
            collection,
            ..Self::default()
        })
    }
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            api_key: None,
            timeout_secs: 30,
            collection: DEFAULT_COLLECTION.to_string(),
            dimension: 1536,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_defaults() {
        temp_env::with_vars(
            [
                ("QDRANT_URL", None::<&str>),
                ("QDRANT_API_KEY", None),
                ("QDRANT_COLLECTION", None),
                ("QDRANT_TIMEOUT_SECS", None),
            ],
            || {
                let config = QdrantConfig::from_env().unwrap();
                assert_eq!(config.url, DEFAULT_URL);
                assert_eq!(config.collection, "logs");
                assert_eq!(config.timeout_secs, 30);
                assert!(config.api_key.is_none());
            },
        );
    }

    #[test]
    fn test_from_env_custom() {
        temp_env::with_vars(
            [
                ("QDRANT_URL", Some("http://qdrant:6334")),
                ("QDRANT_API_KEY", Some("secret")),
                ("QDRANT_COLLECTION", Some("app_logs")),
                ("QDRANT_TIMEOUT_SECS", Some("5")),
            ],
            || {
                let config = QdrantConfig::from_env().unwrap().with_dimension(384);
                assert_eq!(config.url, "http://qdrant:6334");
                assert_eq!(config.api_key.as_deref(), Some("secret"));
                assert_eq!(config.collection, "app_logs");
                assert_eq!(config.timeout_secs, 5);
                assert_eq!(config.dimension, 384);
            },
        );
    }

    #[test]
    fn test_from_env_bad_timeout() {
        temp_env::with_var("QDRANT_TIMEOUT_SECS", Some("soon"), || {
            assert!(QdrantConfig::from_env().is_err());
        });
    }
}
