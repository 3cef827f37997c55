//! Consent and authorization gate
//!
//! A stateless decision per call: the required tier is recomputed from the
//! method name each time, and the caller's declared grants are checked
//! against it. Consent denials and authorization denials surface as
//! distinct protocol errors; authorization denials are additionally
//! recorded in a bounded violation history.

use crate::config::ConsentConfig;
use crate::error::{Result, ServerError};
use crate::types::{CallerContext, ConsentTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::warn;

/// One recorded authorization denial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentViolation {
    pub timestamp: DateTime<Utc>,
    pub client_id: String,
    pub username: String,
    pub role: String,
    pub operation: String,
}

/// Map a method name to the tier a caller must hold to invoke it.
///
/// Prefix-matched against the method namespaces; dangerous-tool and
/// sensitive-resource escalation happens at the dispatch layer, which knows
/// the specific target.
pub fn required_tier(method: &str) -> ConsentTier {
    match method {
        "initialize" | "ping" => ConsentTier::ReadOnly,
        m if m.starts_with("capabilities/") => ConsentTier::ReadOnly,
        "tools/list" | "tools/get" => ConsentTier::ReadOnly,
        m if m.starts_with("tools/call") => ConsentTier::Basic,
        "resources/list" | "resources/read" | "resources/read_range" => ConsentTier::ReadOnly,
        m if m.starts_with("resources/stream/") => ConsentTier::ReadOnly,
        "resources/subscribe" | "resources/unsubscribe" => ConsentTier::Basic,
        m if m.starts_with("resources/write") => ConsentTier::Elevated,
        "consent/violations" => ConsentTier::Elevated,
        other => {
            warn!("no tier mapping for method '{}', requiring full consent", other);
            ConsentTier::Full
        }
    }
}

/// Verifies callers against required tiers and keeps the violation log.
pub struct ConsentGate {
    max_history: usize,
    violations: Mutex<VecDeque<ConsentViolation>>,
}

impl ConsentGate {
    pub fn new(config: &ConsentConfig) -> Self {
        Self {
            max_history: config.max_violations_history,
            violations: Mutex::new(VecDeque::new()),
        }
    }

    /// Check a caller against the tier an operation requires.
    ///
    /// Consent is checked first: the session's granted tier must reach the
    /// requirement. The role ceiling is checked second; failing it is an
    /// authorization denial and lands in the violation history. Either
    /// denial terminates only the single request.
    pub fn verify(
        &self,
        ctx: &CallerContext,
        operation: &str,
        required: ConsentTier,
    ) -> Result<()> {
        if ctx.consent_tier < required {
            warn!(
                "consent denied for {} on {}: granted {}, required {}",
                ctx.client_id, operation, ctx.consent_tier, required
            );
            return Err(ServerError::ConsentDenied(format!(
                "operation '{}' requires {} consent, caller granted {}",
                operation, required, ctx.consent_tier
            )));
        }
        if ctx.role.ceiling() < required {
            warn!(
                "authorization denied for {} ({}) on {}: role {} caps at {}",
                ctx.client_id,
                ctx.username,
                operation,
                ctx.role,
                ctx.role.ceiling()
            );
            self.record(ctx, operation);
            return Err(ServerError::AuthorizationDenied(format!(
                "role '{}' may not perform '{}' (requires {})",
                ctx.role, operation, required
            )));
        }
        Ok(())
    }

    /// Append a violation, dropping the oldest past the history bound.
    fn record(&self, ctx: &CallerContext, operation: &str) {
        let mut history = self.violations.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() >= self.max_history {
            history.pop_front();
        }
        history.push_back(ConsentViolation {
            timestamp: Utc::now(),
            client_id: ctx.client_id.clone(),
            username: ctx.username.clone(),
            role: ctx.role.to_string(),
            operation: operation.to_string(),
        });
    }

    /// Snapshot of the recorded violations, oldest first.
    pub fn violations(&self) -> Vec<ConsentViolation> {
        self.violations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
