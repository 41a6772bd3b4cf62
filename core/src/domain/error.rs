// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Security Error Taxonomy
//!
//! One tagged error union covers every rejection the security core can
//! produce, so callers handle each kind explicitly instead of matching on
//! exception hierarchies or strings.
//!
//! Recoverability:
//! - `Validation` / `InvalidContent` / `RateLimitExceeded` — caller may retry
//!   after fixing the input or backing off (`retry_after` hint where present).
//! - Identity failures (`AuthenticationFailed`, `LockedOut`,
//!   `CredentialExpired`) and messaging integrity failures (`ReplayDetected`,
//!   `MessageExpired`, `SignatureInvalid`, `DecryptionFailed`) are
//!   security-significant: they are audited with full context before being
//!   surfaced and are never silently retried.
//!
//! No variant ever carries plaintext or key material.

use thiserror::Error;

use crate::domain::rate_limit::RateLimitStatus;

#[derive(Debug, Error)]
pub enum SecurityError {
    /// Malformed input (identifier format, size or structure violations).
    /// Always rejected before any cryptographic work.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Message content rejected by size or safety checks; never encrypted.
    #[error("Invalid message content: {0}")]
    InvalidContent(String),

    /// No identity registered under the given agent id.
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// Challenge signature did not verify, or no live challenge was issued.
    #[error("Authentication failed for agent {agent_id}")]
    AuthenticationFailed { agent_id: String },

    /// Too many recent failures; rejected without cryptographic verification.
    #[error("Agent {agent_id} is locked out, retry after {retry_after_secs}s")]
    LockedOut {
        agent_id: String,
        retry_after_secs: u64,
    },

    /// The agent's credential has passed its expiry timestamp.
    #[error("Credential expired for agent {0}")]
    CredentialExpired(String),

    /// Session establishment requires both agents in the authenticated state.
    #[error("Agent {0} is not authenticated")]
    NotAuthenticated(String),

    /// Session lookup or establishment failure.
    #[error("Session error: {0}")]
    Session(String),

    /// A rate-limit rule blocked the request. Carries the blocking status and
    /// a retry-after hint in seconds.
    #[error("Rate limit exceeded for rule {}: {} > {}", .status.rule_name, .status.current_count, .status.limit)]
    RateLimitExceeded {
        status: Box<RateLimitStatus>,
        retry_after_secs: u64,
    },

    /// The message id was already accepted by this recipient.
    #[error("Message replay detected: {message_id}")]
    ReplayDetected { message_id: String },

    /// The message timestamp is older than the replay window.
    #[error("Message expired: {message_id}")]
    MessageExpired { message_id: String },

    /// Integrity tag over the routing metadata did not match.
    #[error("Message signature verification failed")]
    SignatureInvalid,

    /// AEAD authentication failed, wrong algorithm tag, or malformed metadata.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// AEAD sealing or payload serialization failed before anything left the
    /// process.
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Key derivation or rotation failure inside the encryption core.
    #[error("Key rotation error: {0}")]
    KeyRotation(String),

    /// The shared counter store is unreachable and the limiter is configured
    /// fail-closed. Cryptographic paths never map store errors to success.
    #[error("Counter store unavailable: {0}")]
    Store(String),
}

impl SecurityError {
    /// Retry-after hint in seconds, where one applies.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::LockedOut {
                retry_after_secs, ..
            }
            | Self::RateLimitExceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Whether this rejection must be recorded in the audit log with full
    /// context before being surfaced to the caller.
    pub fn is_security_significant(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. }
                | Self::LockedOut { .. }
                | Self::CredentialExpired(_)
                | Self::ReplayDetected { .. }
                | Self::MessageExpired { .. }
                | Self::SignatureInvalid
                | Self::DecryptionFailed(_)
        )
    }
}
