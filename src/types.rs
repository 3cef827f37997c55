//! Core data structures shared across the server
//!
//! Consent tiers and caller identity, the negotiated capability set,
//! resource identifiers and the descriptor shapes returned by listing and
//! tool metadata methods.

use crate::error::{Result, ServerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Capability map keys every deployment must declare.
pub const REQUIRED_CAPABILITIES: &[&str] = &["tools", "resources"];

/// The full set of capability keys this server understands.
pub const KNOWN_CAPABILITIES: &[&str] = &[
    "tools",
    "resources",
    "subscriptions",
    "consent",
    "authorization",
    "batch",
    "progress",
    "resource_streaming",
    "resource_caching",
];

/// Ordered consent tier a caller must hold to invoke an operation.
///
/// The ordering is load-bearing: `verify` compares the caller's granted
/// tier against the operation's required tier with `<`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentTier {
    ReadOnly,
    Basic,
    Elevated,
    Full,
}

impl ConsentTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentTier::ReadOnly => "read_only",
            ConsentTier::Basic => "basic",
            ConsentTier::Elevated => "elevated",
            ConsentTier::Full => "full",
        }
    }
}

impl fmt::Display for ConsentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller role, used for the authorization check (distinct from consent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

impl Role {
    /// Highest tier this role may be granted regardless of consent.
    pub fn ceiling(&self) -> ConsentTier {
        match self {
            Role::Viewer => ConsentTier::ReadOnly,
            Role::Operator => ConsentTier::Elevated,
            Role::Admin => ConsentTier::Full,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Operator => "operator",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque caller identity attached to each request by the transport.
///
/// Janus does not issue identities; it only reads the declared grants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerContext {
    pub client_id: String,
    pub username: String,
    pub role: Role,
    /// Tier the user has consented to for this session.
    pub consent_tier: ConsentTier,
}

impl CallerContext {
    pub fn new(
        client_id: impl Into<String>,
        username: impl Into<String>,
        role: Role,
        consent_tier: ConsentTier,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            username: username.into(),
            role,
            consent_tier,
        }
    }
}

/// Named boolean feature flags negotiated between client and server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    flags: BTreeMap<String, bool>,
}

impl CapabilitySet {
    /// Declare the server's capability set.
    ///
    /// `tools` and `resources` must be present; unknown keys are tolerated
    /// but logged.
    pub fn declare(flags: BTreeMap<String, bool>) -> Result<Self> {
        for key in REQUIRED_CAPABILITIES {
            if !flags.contains_key(*key) {
                return Err(ServerError::Internal(format!(
                    "capability map must declare '{}'",
                    key
                )));
            }
        }
        for key in flags.keys() {
            if !KNOWN_CAPABILITIES.contains(&key.as_str()) {
                warn!("unknown capability key declared: {}", key);
            }
        }
        Ok(Self { flags })
    }

    /// Whether a capability is enabled; unknown keys read as false.
    pub fn enabled(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// Negotiate against a client-declared capability map.
    ///
    /// The effective set is the boolean AND of both sides; keys the client
    /// omits are treated as false. Non-boolean client values are logged and
    /// read as false.
    pub fn negotiate(&self, client: &Value) -> CapabilitySet {
        let client_map = client.as_object();
        let mut negotiated = BTreeMap::new();
        for (key, server_enabled) in &self.flags {
            let client_enabled = match client_map.and_then(|m| m.get(key)) {
                Some(Value::Bool(b)) => *b,
                Some(other) => {
                    warn!(
                        "client capability '{}' is not boolean ({}); treating as false",
                        key, other
                    );
                    false
                }
                None => false,
            };
            negotiated.insert(key.clone(), *server_enabled && client_enabled);
        }
        if let Some(map) = client_map {
            for key in map.keys() {
                if !self.flags.contains_key(key) {
                    warn!("client declared unknown capability: {}", key);
                }
            }
        }
        CapabilitySet { flags: negotiated }
    }

    /// The raw flag map, for capability listing responses.
    pub fn as_map(&self) -> &BTreeMap<String, bool> {
        &self.flags
    }
}

/// Parsed `resource://<provider>/<path>` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceUri {
    pub provider: String,
    pub path: String,
}

impl ResourceUri {
    pub const SCHEME: &'static str = "resource";

    /// Parse a textual resource identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        let rest = raw
            .strip_prefix("resource://")
            .ok_or_else(|| ServerError::InvalidUri(raw.to_string()))?;
        let (provider, path) = match rest.split_once('/') {
            Some((provider, path)) => (provider, path),
            None => (rest, ""),
        };
        if provider.is_empty() {
            return Err(ServerError::InvalidUri(raw.to_string()));
        }
        Ok(Self {
            provider: provider.to_string(),
            path: path.to_string(),
        })
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource://{}/{}", self.provider, self.path)
    }
}

/// Kind of entry returned by resource listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    File,
    Directory,
}

/// Descriptor for a listed resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub kind: ResourceKind,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

/// Metadata for a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Dangerous tools require the elevated consent tier to execute.
    #[serde(default)]
    pub dangerous: bool,
    /// JSON Schema for input parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}
