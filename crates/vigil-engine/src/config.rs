//! Engine configuration.
//!
//! Passed explicitly to the components that need it; nothing here is
//! process-global.

use std::collections::HashMap;

use super::retry::RetryPolicy;

/// Records needed before a pending metric is promoted to a model.
/// Assumes 24 hours worth of 5-minute samples.
pub const MODEL_CREATION_RECORD_THRESHOLD: u64 = (60 / 5) * 24;

const DEFAULT_CHUNK_SIZE: usize = 200;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Rows per batch handed to the model runner during backlog delivery.
    pub chunk_size: usize,
    pub model_creation_record_threshold: u64,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            model_creation_record_threshold: MODEL_CREATION_RECORD_THRESHOLD,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, String> {
        let mut envs = HashMap::new();
        for key in [
            "VIGIL_CHUNK_SIZE",
            "VIGIL_RECORD_THRESHOLD",
            "VIGIL_RETRY_MAX_RETRIES",
            "VIGIL_RETRY_BACKOFF_MS",
            "VIGIL_RETRY_BACKOFF_CAP_MS",
        ] {
            if let Ok(value) = std::env::var(key) {
                envs.insert(key.to_string(), value);
            }
        }
        Self::from_env_map(&envs)
    }

    fn from_env_map(envs: &HashMap<String, String>) -> Result<Self, String> {
        let mut config = Self::default();
        if let Some(raw) = envs.get("VIGIL_CHUNK_SIZE") {
            config.chunk_size = parse_positive(raw, "VIGIL_CHUNK_SIZE")? as usize;
        }
        if let Some(raw) = envs.get("VIGIL_RECORD_THRESHOLD") {
            config.model_creation_record_threshold = parse_positive(raw, "VIGIL_RECORD_THRESHOLD")?;
        }
        if let Some(raw) = envs.get("VIGIL_RETRY_MAX_RETRIES") {
            config.retry.max_retries = raw
                .trim()
                .parse()
                .map_err(|_| invalid(raw, "VIGIL_RETRY_MAX_RETRIES"))?;
        }
        if let Some(raw) = envs.get("VIGIL_RETRY_BACKOFF_MS") {
            config.retry.backoff_base_ms = parse_positive(raw, "VIGIL_RETRY_BACKOFF_MS")?;
        }
        if let Some(raw) = envs.get("VIGIL_RETRY_BACKOFF_CAP_MS") {
            config.retry.backoff_cap_ms = Some(parse_positive(raw, "VIGIL_RETRY_BACKOFF_CAP_MS")?);
        }
        Ok(config)
    }
}

fn parse_positive(raw: &str, key: &str) -> Result<u64, String> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(invalid(raw, key)),
    }
}

fn invalid(raw: &str, key: &str) -> String {
    format!("invalid {}='{}'. expected a positive integer", key, raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size, 200);
        assert_eq!(config.model_creation_record_threshold, 288);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn env_map_overrides_defaults() {
        let mut envs = HashMap::new();
        envs.insert("VIGIL_CHUNK_SIZE".to_string(), "25".to_string());
        envs.insert("VIGIL_RECORD_THRESHOLD".to_string(), "12".to_string());
        envs.insert("VIGIL_RETRY_MAX_RETRIES".to_string(), "0".to_string());
        let config = EngineConfig::from_env_map(&envs).unwrap();
        assert_eq!(config.chunk_size, 25);
        assert_eq!(config.model_creation_record_threshold, 12);
        assert_eq!(config.retry.max_retries, 0);
    }

    #[test]
    fn invalid_values_are_rejected_with_the_key_named() {
        let mut envs = HashMap::new();
        envs.insert("VIGIL_CHUNK_SIZE".to_string(), "zero".to_string());
        let err = EngineConfig::from_env_map(&envs).unwrap_err();
        assert!(err.contains("VIGIL_CHUNK_SIZE"));

        let mut envs = HashMap::new();
        envs.insert("VIGIL_CHUNK_SIZE".to_string(), "0".to_string());
        assert!(EngineConfig::from_env_map(&envs).is_err());
    }
}
