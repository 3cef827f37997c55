//! Server settings
//!
//! Layered configuration: compiled defaults, an optional TOML file, then
//! `JANUS_`-prefixed environment overrides (e.g. `JANUS_CACHE__MAX_SIZE=64`).
//! Every struct carries serde defaults so partial files work.

use crate::error::Result;
use crate::types::{CapabilitySet, KNOWN_CAPABILITIES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Top-level settings consumed at server construction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerSettings {
    pub server: ServerInfo,
    /// Declared capability map; validated into a [`CapabilitySet`].
    pub capabilities: BTreeMap<String, bool>,
    pub cache: CacheConfig,
    pub streaming: StreamingConfig,
    pub consent: ConsentConfig,
    pub sensitive: SensitiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    pub name: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "janus".to_string(),
        }
    }
}

/// Resource cache tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached resources.
    pub max_size: usize,
    /// Entry lifetime in seconds, measured from last access.
    pub ttl_seconds: u64,
    /// Resources larger than this are never cached.
    pub max_size_per_resource: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 128,
            ttl_seconds: 300,
            max_size_per_resource: 1024 * 1024,
        }
    }
}

/// Chunked transfer tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub enabled: bool,
    /// Bytes read per `next_chunk` call.
    pub chunk_size: u64,
    /// Advisory read-ahead size for store implementations.
    pub buffer_size: u64,
    pub compression: CompressionConfig,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: 64 * 1024,
            buffer_size: 256 * 1024,
            compression: CompressionConfig::default(),
        }
    }
}

/// On-the-fly compression policy for streamed resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Resources below this size are sent uncompressed.
    pub min_size: u64,
    /// Default algorithm: "gzip" or "zstd".
    pub algorithm: String,
    pub level: u32,
    /// MIME type prefixes that are already compressed.
    pub exclude_types: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 1024,
            algorithm: "gzip".to_string(),
            level: 6,
            exclude_types: vec![
                "image/".to_string(),
                "video/".to_string(),
                "audio/".to_string(),
                "application/zip".to_string(),
                "application/gzip".to_string(),
                "application/x-tar".to_string(),
                "application/x-7z-compressed".to_string(),
            ],
        }
    }
}

/// Consent gate tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentConfig {
    /// Bounded violation history; oldest records drop past this.
    pub max_violations_history: usize,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            max_violations_history: 100,
        }
    }
}

/// Patterns marking resources that force the elevated consent tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitiveConfig {
    /// Regex patterns matched against the resource path.
    pub path_patterns: Vec<String>,
    /// File extensions (with leading dot) treated as sensitive.
    pub extensions: Vec<String>,
}

impl Default for SensitiveConfig {
    fn default() -> Self {
        Self {
            path_patterns: vec![
                "(?i)secret".to_string(),
                "(?i)credential".to_string(),
                "(?i)password".to_string(),
                "(?i)private".to_string(),
                r"(^|/)\.ssh(/|$)".to_string(),
                r"(^|/)\.aws(/|$)".to_string(),
            ],
            extensions: vec![
                ".pem".to_string(),
                ".key".to_string(),
                ".p12".to_string(),
                ".pfx".to_string(),
                ".keystore".to_string(),
            ],
        }
    }
}

impl ServerSettings {
    /// Load settings from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!("loading settings from {}", path.display());
            builder = builder.add_source(config::File::from(path));
        }
        let raw = builder
            .add_source(
                config::Environment::with_prefix("JANUS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        // serde defaults fill everything a sparse file or env leaves out
        let settings: ServerSettings = raw.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the declared capability map.
    pub fn capability_set(&self) -> Result<CapabilitySet> {
        if self.capabilities.is_empty() {
            return CapabilitySet::declare(Self::default_capabilities());
        }
        CapabilitySet::declare(self.capabilities.clone())
    }

    fn default_capabilities() -> BTreeMap<String, bool> {
        KNOWN_CAPABILITIES
            .iter()
            .map(|key| (key.to_string(), *key != "progress"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_complete() {
        let settings = ServerSettings::default();
        assert_eq!(settings.cache.max_size, 128);
        assert_eq!(settings.cache.ttl_seconds, 300);
        assert!(settings.streaming.enabled);
        assert_eq!(settings.streaming.compression.algorithm, "gzip");
        assert_eq!(settings.consent.max_violations_history, 100);
        assert!(!settings.sensitive.extensions.is_empty());
    }

    #[test]
    fn test_default_capability_set_is_valid() {
        let settings = ServerSettings::default();
        let caps = settings.capability_set().unwrap();
        assert!(caps.enabled("tools"));
        assert!(caps.enabled("resources"));
        assert!(caps.enabled("resource_streaming"));
        // progress is declared but off by default
        assert!(!caps.enabled("progress"));
    }

    #[test]
    fn test_partial_file_round_trip() {
        // a settings struct deserialized from a sparse map keeps defaults
        let settings: ServerSettings =
            serde_json::from_str(r#"{"cache": {"max_size": 4}}"#).unwrap();
        assert_eq!(settings.cache.max_size, 4);
        assert_eq!(settings.cache.ttl_seconds, 300);
        assert!(settings.streaming.enabled);
    }
}
