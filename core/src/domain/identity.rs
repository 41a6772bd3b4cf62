// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Identity
//!
//! Cryptographic identity for a registered agent. Owned by the
//! authentication service; immutable after registration except for
//! revocation and expiry-driven invalidation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered security level attached to agents and messages.
///
/// Ordering matters: `Standard < Sensitive < Critical < Compliance`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Normal agent operations.
    Standard,
    /// Financial or personal-data processing.
    Sensitive,
    /// Operations requiring human intervention.
    Critical,
    /// Regulatory-compliance operations.
    Compliance,
}

/// Authentication lifecycle state for a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationStatus {
    /// Registered but not yet verified.
    Pending,
    /// Challenge-response verification succeeded.
    Authenticated,
    /// Last verification attempt failed.
    Failed,
    /// Administratively revoked; terminal.
    Revoked,
    /// Credential expiry has passed.
    Expired,
}

/// A registered agent identity with cryptographic credentials.
///
/// The Ed25519 private key is never stored in the clear: `encrypted_private_key`
/// is produced by the encryption core, context-bound to the agent id. The
/// plaintext signing key is handed to the caller exactly once at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Unique agent identifier (validated at registration).
    pub agent_id: String,
    /// Role tag, e.g. "document_analysis" or "legal_research".
    pub agent_type: String,
    /// Ed25519 verifying key, 32 bytes.
    pub public_key: Vec<u8>,
    /// Private key encrypted at rest by the encryption core.
    pub encrypted_private_key: String,
    /// Self-signed attestation over `agent_id` and `public_key`.
    ///
    /// Placeholder for CA-issued certificates, which are out of scope.
    pub credential: Vec<u8>,
    pub security_level: SecurityLevel,
    pub capabilities: Vec<String>,
    /// Tenant (firm) scope for multi-tenant isolation.
    pub tenant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AgentIdentity {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
