use std::time::Duration;

use core_config::{ConfigError, FromEnv, app_info, env_parse, server::ServerConfig};
use domain_log_ingest::{
    DedupConfig, HttpEmbeddingConfig, PipelineConfig, QdrantConfig, RetryConfig,
};

// Re-export for the server module
pub use core_config::{AppInfo, Environment};

const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Application configuration, read once at startup.
///
/// Composes the shared server config with the ingest domain configs.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub app: AppInfo,
    pub environment: Environment,
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub embedding: HttpEmbeddingConfig,
    pub embedding_retry: RetryConfig,
    pub qdrant: QdrantConfig,
    /// How long to keep retrying the vector store before giving up
    pub startup_timeout: Duration,
    pub max_body_bytes: usize,
}

impl FromEnv for IngestConfig {
    /// - QUEUE_CAPACITY: defaults to 10000
    /// - WORKER_COUNT: defaults to the number of CPUs
    /// - BATCH_SIZE / BATCH_TIMEOUT_MS: default to 100 / 5000
    /// - ENQUEUE_TIMEOUT_MS: defaults to 100
    /// - SIMILARITY_THRESHOLD: defaults to 0.95, must be in (0, 1]
    /// - MIN_EXAMPLES_BEFORE_EXCLUSION: defaults to 3
    /// - DEDUP_WINDOW_SIZE / DEDUP_WINDOW_TTL_SECS: default to 1000 / 3600
    /// - DEDUP_MAX_STREAMS: streams tracked per worker, defaults to 1000
    /// - EMBEDDING_MAX_RETRIES / FLUSH_MAX_RETRIES: default to 3
    /// - STARTUP_TIMEOUT_SECS / SHUTDOWN_TIMEOUT_SECS: default to 60 / 30
    /// - MAX_BODY_BYTES: defaults to 10 MiB
    ///
    /// Server, embedding and Qdrant variables are read by their own configs.
    fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();
        let server = ServerConfig::from_env()?;
        server.socket_addr()?;

        let embedding = HttpEmbeddingConfig::from_env()?;
        let qdrant = QdrantConfig::from_env()?.with_dimension(embedding.dimension);

        let defaults = PipelineConfig::default();
        let threshold: f32 = env_parse("SIMILARITY_THRESHOLD", defaults.dedup.threshold)?;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "SIMILARITY_THRESHOLD",
                format!("{} is outside (0, 1]", threshold),
            ));
        }

        let dedup = DedupConfig::default()
            .with_threshold(threshold)
            .with_min_examples(at_least_one(
                "MIN_EXAMPLES_BEFORE_EXCLUSION",
                env_parse("MIN_EXAMPLES_BEFORE_EXCLUSION", defaults.dedup.min_examples)?,
            )?)
            .with_max_entries(at_least_one(
                "DEDUP_WINDOW_SIZE",
                env_parse("DEDUP_WINDOW_SIZE", defaults.dedup.max_entries)?,
            )?)
            .with_max_age(Duration::from_secs(at_least_one(
                "DEDUP_WINDOW_TTL_SECS",
                env_parse("DEDUP_WINDOW_TTL_SECS", defaults.dedup.max_age.as_secs())?,
            )?))
            .with_max_streams(at_least_one(
                "DEDUP_MAX_STREAMS",
                env_parse("DEDUP_MAX_STREAMS", defaults.dedup.max_streams)?,
            )?);

        let pipeline = PipelineConfig::new()
            .with_workers(at_least_one(
                "WORKER_COUNT",
                env_parse("WORKER_COUNT", defaults.workers)?,
            )?)
            .with_queue_capacity(at_least_one(
                "QUEUE_CAPACITY",
                env_parse("QUEUE_CAPACITY", defaults.queue_capacity)?,
            )?)
            .with_max_batch_size(at_least_one(
                "BATCH_SIZE",
                env_parse("BATCH_SIZE", defaults.max_batch_size)?,
            )?)
            .with_max_batch_timeout(millis("BATCH_TIMEOUT_MS", defaults.max_batch_timeout)?)
            .with_enqueue_timeout(millis("ENQUEUE_TIMEOUT_MS", defaults.enqueue_timeout)?)
            .with_flush_retry(
                RetryConfig::new().with_max_retries(env_parse("FLUSH_MAX_RETRIES", 3)?),
            )
            .with_shutdown_timeout(Duration::from_secs(env_parse(
                "SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )?))
            .with_dedup(dedup);

        let embedding_retry =
            RetryConfig::new().with_max_retries(env_parse("EMBEDDING_MAX_RETRIES", 3)?);

        let startup_timeout = Duration::from_secs(at_least_one(
            "STARTUP_TIMEOUT_SECS",
            env_parse("STARTUP_TIMEOUT_SECS", 60)?,
        )?);

        let max_body_bytes = at_least_one(
            "MAX_BODY_BYTES",
            env_parse("MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
        )?;

        Ok(Self {
            app: app_info!(),
            environment,
            server,
            pipeline,
            embedding,
            embedding_retry,
            qdrant,
            startup_timeout,
            max_body_bytes,
        })
    }
}

fn at_least_one<T>(key: &str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + From<u8>,
{
    if value < T::from(1) {
        return Err(ConfigError::invalid(key, "must be at least 1"));
    }
    Ok(value)
}

fn millis(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let ms: u64 = env_parse(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(at_least_one(key, ms)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: &[&str] = &[
        "HOST",
        "PORT",
        "QUEUE_CAPACITY",
        "WORKER_COUNT",
        "BATCH_SIZE",
        "BATCH_TIMEOUT_MS",
        "ENQUEUE_TIMEOUT_MS",
        "SIMILARITY_THRESHOLD",
        "MIN_EXAMPLES_BEFORE_EXCLUSION",
        "DEDUP_WINDOW_SIZE",
        "DEDUP_WINDOW_TTL_SECS",
        "DEDUP_MAX_STREAMS",
        "EMBEDDING_URL",
        "EMBEDDING_API_KEY",
        "EMBEDDING_MODEL",
        "EMBEDDING_DIMENSION",
        "EMBEDDING_TIMEOUT_MS",
        "EMBEDDING_SEND_DIMENSIONS",
        "EMBEDDING_MAX_RETRIES",
        "FLUSH_MAX_RETRIES",
        "STARTUP_TIMEOUT_SECS",
        "SHUTDOWN_TIMEOUT_SECS",
        "MAX_BODY_BYTES",
        "QDRANT_URL",
        "QDRANT_API_KEY",
        "QDRANT_COLLECTION",
        "QDRANT_TIMEOUT_SECS",
    ];

    /// Run `f` with every known variable unset except `overrides`.
    fn with_env<F: FnOnce()>(overrides: &[(&str, &str)], f: F) {
        let vars: Vec<(&str, Option<&str>)> = VARS
            .iter()
            .map(|key| {
                let value = overrides.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
                (*key, value)
            })
            .collect();
        temp_env::with_vars(vars, f);
    }

    #[test]
    fn test_from_env_defaults() {
        with_env(&[], || {
            let config = IngestConfig::from_env().unwrap();

            assert_eq!(config.server.address(), "0.0.0.0:8080");
            assert_eq!(config.pipeline.queue_capacity, 10_000);
            assert!(config.pipeline.workers >= 1);
            assert_eq!(config.pipeline.max_batch_size, 100);
            assert_eq!(config.pipeline.max_batch_timeout, Duration::from_millis(5000));
            assert_eq!(config.pipeline.enqueue_timeout, Duration::from_millis(100));
            assert_eq!(config.pipeline.shutdown_timeout, Duration::from_secs(30));
            assert_eq!(config.pipeline.dedup.threshold, 0.95);
            assert_eq!(config.pipeline.dedup.min_examples, 3);
            assert_eq!(config.pipeline.dedup.max_entries, 1000);
            assert_eq!(config.pipeline.dedup.max_age, Duration::from_secs(3600));
            assert_eq!(config.pipeline.dedup.max_streams, 1000);
            assert_eq!(config.pipeline.flush_retry.max_retries, 3);
            assert_eq!(config.embedding_retry.max_retries, 3);
            assert_eq!(config.embedding.dimension, 1536);
            assert_eq!(config.qdrant.dimension, 1536);
            assert_eq!(config.startup_timeout, Duration::from_secs(60));
            assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
            assert!(config.pipeline.validate().is_ok());
        });
    }

    #[test]
    fn test_from_env_custom_values() {
        with_env(
            &[
                ("PORT", "9000"),
                ("WORKER_COUNT", "4"),
                ("QUEUE_CAPACITY", "400"),
                ("BATCH_SIZE", "25"),
                ("BATCH_TIMEOUT_MS", "250"),
                ("SIMILARITY_THRESHOLD", "0.9"),
                ("MIN_EXAMPLES_BEFORE_EXCLUSION", "5"),
                ("DEDUP_MAX_STREAMS", "64"),
                ("EMBEDDING_DIMENSION", "384"),
                ("EMBEDDING_MAX_RETRIES", "0"),
                ("QDRANT_COLLECTION", "app-logs"),
            ],
            || {
                let config = IngestConfig::from_env().unwrap();

                assert_eq!(config.server.port, 9000);
                assert_eq!(config.pipeline.workers, 4);
                assert_eq!(config.pipeline.per_worker_capacity(), 100);
                assert_eq!(config.pipeline.max_batch_size, 25);
                assert_eq!(config.pipeline.max_batch_timeout, Duration::from_millis(250));
                assert_eq!(config.pipeline.dedup.threshold, 0.9);
                assert_eq!(config.pipeline.dedup.min_examples, 5);
                assert_eq!(config.pipeline.dedup.max_streams, 64);
                assert_eq!(config.embedding_retry.max_attempts(), 1);
                assert_eq!(config.qdrant.dimension, 384);
                assert_eq!(config.qdrant.collection, "app-logs");
            },
        );
    }

    #[test]
    fn test_threshold_out_of_range() {
        for value in ["0", "-0.5", "1.01"] {
            with_env(&[("SIMILARITY_THRESHOLD", value)], || {
                let err = IngestConfig::from_env().unwrap_err();
                assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "SIMILARITY_THRESHOLD"));
            });
        }
    }

    #[test]
    fn test_threshold_of_one_is_valid() {
        with_env(&[("SIMILARITY_THRESHOLD", "1.0")], || {
            assert!(IngestConfig::from_env().is_ok());
        });
    }

    #[test]
    fn test_zero_values_rejected() {
        for key in [
            "WORKER_COUNT",
            "QUEUE_CAPACITY",
            "BATCH_SIZE",
            "BATCH_TIMEOUT_MS",
            "MIN_EXAMPLES_BEFORE_EXCLUSION",
            "DEDUP_WINDOW_SIZE",
            "DEDUP_MAX_STREAMS",
            "MAX_BODY_BYTES",
        ] {
            with_env(&[(key, "0")], || {
                let err = IngestConfig::from_env().unwrap_err();
                assert!(err.to_string().contains(key), "{}: {}", key, err);
            });
        }
    }

    #[test]
    fn test_unparseable_value() {
        with_env(&[("BATCH_SIZE", "lots")], || {
            let err = IngestConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { .. }));
        });
    }

    #[test]
    fn test_invalid_host_rejected() {
        with_env(&[("HOST", "not a host")], || {
            assert!(IngestConfig::from_env().is_err());
        });
    }
}
