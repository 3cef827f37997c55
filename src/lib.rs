//! Janus - Consent-Gated Tool and Resource Server Core
//!
//! A request-dispatch and resource-access core for an RPC-style server that
//! exposes named tools and URI-addressed resources to remote clients:
//! - JSON-RPC 2.0 envelope validation and method dispatch, batch included
//! - Capability negotiation between client and server feature sets
//! - Tiered consent and authorization gating with a bounded violation log
//! - LRU + TTL caching of fetched resources
//! - Chunked, range-addressable resource streaming with optional
//!   on-the-fly compression
//!
//! # Architecture
//!
//! The system is organized into a few layers:
//! - **Protocol**: wire envelopes and stable error codes
//! - **Gate**: consent tiers, role ceilings, violation history
//! - **Resources**: providers fronting byte stores, plus cache/compression
//! - **Dispatcher**: routing, negotiation and response assembly
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use janus_core::{
//!     Dispatcher, FsStore, ResourceProvider, ServerSettings, StaticToolRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = ServerSettings::load(None)?;
//!     let store = Arc::new(FsStore::new("./data"));
//!     let provider = Arc::new(ResourceProvider::new(
//!         "file", store, &settings, true,
//!     )?);
//!     let registry = Arc::new(StaticToolRegistry::new());
//!     let dispatcher = Dispatcher::new(&settings, registry, vec![provider])?;
//!
//!     let response = dispatcher
//!         .dispatch(serde_json::json!({"method": "ping", "id": 1}), None)
//!         .await;
//!     println!("{:?}", response);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod compression;
pub mod config;
pub mod consent;
pub mod error;
pub mod protocol;
pub mod range;
pub mod resources;
pub mod server;
pub mod tools;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheEntry, CacheStats, ResourceCache};
pub use compression::{Algorithm, CompressionEngine, CompressionStats};
pub use config::{CacheConfig, CompressionConfig, ServerSettings, StreamingConfig};
pub use consent::{required_tier, ConsentGate, ConsentViolation};
pub use error::{Result, ServerError};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use range::parse_range;
pub use resources::{
    FsStore, MemoryStore, ResourceContent, ResourceProvider, ResourceStore, StreamChunk,
    StreamHandle,
};
pub use server::Dispatcher;
pub use tools::{StaticToolRegistry, Tool, ToolRegistry};
pub use types::{
    CallerContext, CapabilitySet, ConsentTier, ResourceDescriptor, ResourceKind, ResourceUri,
    Role, ToolDescriptor,
};
