//! URI-addressed resource access
//!
//! The provider fronts one backing [`ResourceStore`] and owns everything
//! stateful around it: the whole-object cache, the compression engine, the
//! active-stream table for chunked transfers and the subscription table.
//! Each table is synchronized independently and no lock is held across
//! store I/O.

pub mod store;

pub use store::{FsStore, MemoryStore, ResourceStore};

use crate::cache::{CacheStats, ResourceCache};
use crate::compression::{Algorithm, CompressionEngine, CompressionStats};
use crate::config::{ServerSettings, StreamingConfig};
use crate::error::{Result, ServerError};
use crate::range::parse_range;
use crate::types::{ResourceDescriptor, ResourceUri};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Content returned by whole or ranged reads.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceContent {
    pub uri: String,
    /// Lossy UTF-8 rendering of the resource bytes.
    pub content: String,
    pub size: u64,
    pub mime_type: String,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeInfo>,
}

/// The byte window a ranged read selected.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RangeInfo {
    pub start: u64,
    /// Exclusive.
    pub end: u64,
    pub total: u64,
}

/// Handle returned when a stream is opened; no content moves yet.
#[derive(Debug, Clone, Serialize)]
pub struct StreamHandle {
    pub stream_id: Uuid,
    pub uri: String,
    /// Bytes the stream will deliver.
    pub size: u64,
    pub chunk_size: u64,
    pub chunks: u64,
    pub mime_type: String,
    /// Algorithm applied to each chunk, when compression is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

/// One `next_chunk` result.
#[derive(Debug, Clone, Serialize)]
pub struct StreamChunk {
    pub stream_id: Uuid,
    /// Chunk bytes: lossy UTF-8 text, or base64 when the stream compresses.
    pub content: String,
    pub complete: bool,
    pub bytes_read: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionStats>,
}

/// Server-side cursor for an in-progress chunked transfer.
#[derive(Debug, Clone)]
struct ActiveStream {
    uri: ResourceUri,
    position: u64,
    end: u64,
    chunk_size: u64,
    compression: Option<(Algorithm, u32)>,
    last_activity: Instant,
}

/// Provider for one `resource://<name>/...` namespace.
pub struct ResourceProvider {
    name: String,
    store: Arc<dyn ResourceStore>,
    cache: ResourceCache,
    caching_enabled: bool,
    compression: CompressionEngine,
    streaming: StreamingConfig,
    sensitive_patterns: Vec<Regex>,
    sensitive_extensions: Vec<String>,
    streams: Mutex<HashMap<Uuid, ActiveStream>>,
    subscriptions: Mutex<HashMap<String, HashSet<String>>>,
}

impl ResourceProvider {
    /// Build a provider from settings.
    ///
    /// `caching_enabled` comes from the server's declared
    /// `resource_caching` capability.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn ResourceStore>,
        settings: &ServerSettings,
        caching_enabled: bool,
    ) -> Result<Self> {
        let mut sensitive_patterns = Vec::new();
        for pattern in &settings.sensitive.path_patterns {
            let compiled = Regex::new(pattern).map_err(|e| {
                ServerError::Config(config::ConfigError::Message(format!(
                    "invalid sensitive path pattern '{}': {}",
                    pattern, e
                )))
            })?;
            sensitive_patterns.push(compiled);
        }
        Ok(Self {
            name: name.into(),
            store,
            cache: ResourceCache::new(&settings.cache),
            caching_enabled,
            compression: CompressionEngine::new(settings.streaming.compression.clone()),
            streaming: settings.streaming.clone(),
            sensitive_patterns,
            sensitive_extensions: settings
                .sensitive
                .extensions
                .iter()
                .map(|ext| ext.to_ascii_lowercase())
                .collect(),
            streams: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// List the resources under a path.
    pub async fn list(&self, uri: &ResourceUri) -> Result<Vec<ResourceDescriptor>> {
        self.store.list(&uri.path).await
    }

    /// Read a resource in full, consulting the cache unless bypassed.
    ///
    /// A bypass never reads or writes the cache.
    pub async fn read(&self, uri: &ResourceUri, bypass_cache: bool) -> Result<ResourceContent> {
        let key = uri.to_string();
        let use_cache = self.caching_enabled && !bypass_cache;

        if use_cache {
            if let Some(entry) = self.cache.get(&key) {
                debug!("cache hit for {}", key);
                return Ok(self.content_of(uri, &entry.content, true, None));
            }
        }

        let bytes = self.store.read(&uri.path).await?;
        if use_cache {
            self.cache.put(&key, bytes.clone());
        }
        Ok(self.content_of(uri, &bytes, false, None))
    }

    /// Read a byte range; always bypasses the whole-object cache.
    pub async fn read_range(&self, uri: &ResourceUri, range_spec: &str) -> Result<ResourceContent> {
        let meta = self.store.metadata(&uri.path).await?;
        let (start, end) = parse_range(range_spec, meta.size)?;
        let bytes = self.store.read_range(&uri.path, start, end).await?;
        Ok(self.content_of(
            uri,
            &bytes,
            false,
            Some(RangeInfo {
                start,
                end,
                total: meta.size,
            }),
        ))
    }

    /// Open a chunked stream over a resource (or a range of it).
    ///
    /// No content is transferred here; the compression decision is made once
    /// from the resource's size and type unless explicitly overridden.
    pub async fn read_stream(
        &self,
        uri: &ResourceUri,
        range_spec: Option<&str>,
        compress: Option<bool>,
    ) -> Result<StreamHandle> {
        if !self.streaming.enabled {
            return Err(ServerError::InvalidRequest(
                "resource streaming is disabled".to_string(),
            ));
        }
        let meta = self.store.metadata(&uri.path).await?;
        let (start, end) = match range_spec {
            Some(spec) => parse_range(spec, meta.size)?,
            None => (0, meta.size),
        };

        let mime_type = mime_type_for(&uri.path);
        let compression = if self.compression.should_compress(meta.size, &mime_type, compress) {
            Some(self.compression.default_encoding())
        } else {
            None
        };

        let stream_id = Uuid::new_v4();
        let size = end - start;
        let chunk_size = self.streaming.chunk_size.max(1);
        let handle = StreamHandle {
            stream_id,
            uri: uri.to_string(),
            size,
            chunk_size,
            chunks: size.div_ceil(chunk_size),
            mime_type,
            compression: compression.map(|(algorithm, _)| algorithm.as_str().to_string()),
        };

        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        streams.insert(
            stream_id,
            ActiveStream {
                uri: uri.clone(),
                position: start,
                end,
                chunk_size,
                compression,
                last_activity: Instant::now(),
            },
        );
        info!(
            "opened stream {} over {} ({} bytes)",
            stream_id, handle.uri, size
        );
        Ok(handle)
    }

    /// Deliver the next chunk of an active stream.
    ///
    /// The stream is removed on the chunk that reaches the boundary and on
    /// every error path, so no cursor outlives a failure.
    pub async fn next_chunk(&self, stream_id: Uuid) -> Result<StreamChunk> {
        let state = {
            let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
            let stream = streams
                .get(&stream_id)
                .ok_or(ServerError::UnknownStream(stream_id.to_string()))?
                .clone();
            if stream.position >= stream.end {
                streams.remove(&stream_id);
                return Ok(StreamChunk {
                    stream_id,
                    content: String::new(),
                    complete: true,
                    bytes_read: 0,
                    compression: None,
                });
            }
            stream
        };

        let take = state.chunk_size.min(state.end - state.position);
        let read = self
            .store
            .read_range(&state.uri.path, state.position, state.position + take)
            .await;
        let bytes = match read {
            Ok(bytes) => bytes,
            Err(e) => {
                let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
                streams.remove(&stream_id);
                warn!("stream {} failed mid-read, dropped: {}", stream_id, e);
                return Err(e);
            }
        };

        let new_position = state.position + take;
        let complete = new_position >= state.end;
        {
            let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
            if complete {
                streams.remove(&stream_id);
            } else {
                match streams.get_mut(&stream_id) {
                    Some(stream) => {
                        stream.position = new_position;
                        stream.last_activity = Instant::now();
                    }
                    // closed concurrently while we were reading
                    None => return Err(ServerError::UnknownStream(stream_id.to_string())),
                }
            }
        }

        let (content, compression) = match state.compression {
            Some((algorithm, level)) => {
                let (encoded, stats) = self.compression.compress(&bytes, algorithm, level);
                (encoded, Some(stats))
            }
            None => (String::from_utf8_lossy(&bytes).into_owned(), None),
        };

        Ok(StreamChunk {
            stream_id,
            content,
            complete,
            bytes_read: take,
            compression,
        })
    }

    /// Close a stream, releasing its cursor.
    pub fn close_stream(&self, stream_id: Uuid) -> Result<()> {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        match streams.remove(&stream_id) {
            Some(stream) => {
                debug!("closed stream {} over {}", stream_id, stream.uri);
                Ok(())
            }
            None => Err(ServerError::UnknownStream(stream_id.to_string())),
        }
    }

    /// Drop streams idle for longer than `max_idle`; returns how many.
    ///
    /// Host-driven maintenance; nothing in the provider schedules this.
    pub fn reap_idle_streams(&self, max_idle: Duration) -> usize {
        let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
        let before = streams.len();
        streams.retain(|id, stream| {
            let keep = stream.last_activity.elapsed() <= max_idle;
            if !keep {
                info!("reaping idle stream {} over {}", id, stream.uri);
            }
            keep
        });
        before - streams.len()
    }

    /// Number of streams currently tracked.
    pub fn active_streams(&self) -> usize {
        self.streams.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether this provider tracks the given stream id.
    pub fn has_stream(&self, stream_id: Uuid) -> bool {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&stream_id)
    }

    /// Register a callback id for update notifications on a URI.
    ///
    /// Subscribing twice with the same id is a no-op success.
    pub fn subscribe(&self, uri: &ResourceUri, callback_id: &str) {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subs.entry(uri.to_string())
            .or_default()
            .insert(callback_id.to_string());
    }

    /// Remove a callback id registration.
    pub fn unsubscribe(&self, uri: &ResourceUri, callback_id: &str) -> Result<()> {
        let key = uri.to_string();
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        let removed = subs
            .get_mut(&key)
            .map(|ids| ids.remove(callback_id))
            .unwrap_or(false);
        if !removed {
            return Err(ServerError::NotSubscribed {
                uri: key,
                callback_id: callback_id.to_string(),
            });
        }
        if subs.get(&key).is_some_and(|ids| ids.is_empty()) {
            subs.remove(&key);
        }
        Ok(())
    }

    /// Report a resource as updated: invalidates its cache entry and returns
    /// the callback ids the transport should notify.
    pub fn notify_updated(&self, uri: &ResourceUri) -> Vec<String> {
        let key = uri.to_string();
        self.cache.invalidate(&key);
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = subs
            .get(&key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Whether a path matches the configured credential/secret patterns.
    pub fn is_sensitive(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        if self
            .sensitive_extensions
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()))
        {
            return true;
        }
        self.sensitive_patterns.iter().any(|re| re.is_match(path))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn content_of(
        &self,
        uri: &ResourceUri,
        bytes: &[u8],
        from_cache: bool,
        range: Option<RangeInfo>,
    ) -> ResourceContent {
        ResourceContent {
            uri: uri.to_string(),
            content: String::from_utf8_lossy(bytes).into_owned(),
            size: bytes.len() as u64,
            mime_type: mime_type_for(&uri.path),
            from_cache,
            range,
        }
    }
}

/// Extension-based MIME lookup for compression policy and read metadata.
pub fn mime_type_for(path: &str) -> String {
    let extension = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    let mime = match extension.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" => "text/javascript",
        "json" => "application/json",
        "toml" | "yaml" | "yml" => "text/plain",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        _ => "application/octet-stream",
    };
    mime.to_string()
}
