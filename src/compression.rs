//! On-the-fly compression for outgoing resource bytes
//!
//! Decides whether a resource is worth compressing and performs the
//! encoding. Output is always base64 so compressed binary survives a JSON
//! transport; the stats record tells the client which decoder to apply.
//! A compression failure falls back to the original bytes and must never
//! fail the enclosing read.

use crate::config::CompressionConfig;
use crate::error::{Result, ServerError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;
use tracing::warn;

/// Supported compression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Gzip,
    Zstd,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Gzip => "gzip",
            Algorithm::Zstd => "zstd",
        }
    }
}

impl FromStr for Algorithm {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gzip" => Ok(Algorithm::Gzip),
            "zstd" => Ok(Algorithm::Zstd),
            other => Err(ServerError::InvalidParams(format!(
                "unknown compression algorithm: {}",
                other
            ))),
        }
    }
}

/// Outcome of a compression attempt, always reported alongside the content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionStats {
    /// "gzip", "zstd", or "none" when compression was skipped or failed.
    pub algorithm: String,
    pub original_size: usize,
    pub compressed_size: usize,
    /// compressed / original; 1.0 for empty input.
    pub ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Policy + codec for resource compression.
#[derive(Debug, Clone)]
pub struct CompressionEngine {
    config: CompressionConfig,
}

impl CompressionEngine {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Default algorithm/level pair from configuration.
    pub fn default_encoding(&self) -> (Algorithm, u32) {
        let algorithm = Algorithm::from_str(&self.config.algorithm).unwrap_or_else(|_| {
            warn!(
                "configured compression algorithm '{}' is unknown, using gzip",
                self.config.algorithm
            );
            Algorithm::Gzip
        });
        (algorithm, self.config.level)
    }

    /// Decide whether a resource should be compressed.
    ///
    /// An explicit override always wins; otherwise the feature flag, the
    /// minimum size and the excluded MIME set are consulted in that order.
    pub fn should_compress(
        &self,
        resource_size: u64,
        mime_type: &str,
        explicit_override: Option<bool>,
    ) -> bool {
        if let Some(forced) = explicit_override {
            return forced;
        }
        if !self.config.enabled {
            return false;
        }
        if resource_size < self.config.min_size {
            return false;
        }
        if self
            .config
            .exclude_types
            .iter()
            .any(|prefix| mime_type.starts_with(prefix.as_str()))
        {
            return false;
        }
        true
    }

    /// Compress and base64-encode content.
    ///
    /// On codec failure the original bytes are returned (base64-encoded, so
    /// the transport contract is unchanged) with `algorithm: "none"` and the
    /// failure recorded in the stats.
    pub fn compress(
        &self,
        content: &[u8],
        algorithm: Algorithm,
        level: u32,
    ) -> (String, CompressionStats) {
        match encode(content, algorithm, level) {
            Ok(compressed) => {
                let stats = CompressionStats {
                    algorithm: algorithm.as_str().to_string(),
                    original_size: content.len(),
                    compressed_size: compressed.len(),
                    ratio: ratio(content.len(), compressed.len()),
                    error: None,
                };
                (BASE64.encode(&compressed), stats)
            }
            Err(e) => {
                warn!(
                    "{} compression failed ({}), sending uncompressed",
                    algorithm.as_str(),
                    e
                );
                let stats = CompressionStats {
                    algorithm: "none".to_string(),
                    original_size: content.len(),
                    compressed_size: content.len(),
                    ratio: 1.0,
                    error: Some(e.to_string()),
                };
                (BASE64.encode(content), stats)
            }
        }
    }

    /// Inverse of [`compress`](Self::compress), for clients and tests.
    pub fn decompress(encoded: &str, algorithm: &str) -> Result<Vec<u8>> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| ServerError::InvalidParams(format!("invalid base64: {}", e)))?;
        match algorithm {
            "none" => Ok(raw),
            "gzip" => {
                let mut decoder = flate2::read::GzDecoder::new(&raw[..]);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            "zstd" => Ok(zstd::decode_all(&raw[..])?),
            other => Err(ServerError::InvalidParams(format!(
                "unknown compression algorithm: {}",
                other
            ))),
        }
    }
}

fn encode(content: &[u8], algorithm: Algorithm, level: u32) -> std::io::Result<Vec<u8>> {
    match algorithm {
        Algorithm::Gzip => {
            let level = flate2::Compression::new(level.min(9));
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), level);
            encoder.write_all(content)?;
            encoder.finish()
        }
        Algorithm::Zstd => zstd::encode_all(content, (level.min(21)) as i32),
    }
}

fn ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        1.0
    } else {
        compressed as f64 / original as f64
    }
}
