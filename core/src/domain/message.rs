// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Secure Message Envelope
//!
//! Transport-agnostic wire envelope for encrypted agent-to-agent messages.
//! Binary fields travel as base64, timestamps as ISO-8601 (chrono's default
//! serde format), so the envelope serializes cleanly to JSON for any
//! transport the caller chooses.
//!
//! A message is created by the sender side of the messaging protocol and
//! consumed exactly once by the recipient side; the replay cache enforces
//! single consumption within the replay window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::identity::SecurityLevel;

/// Serde adapter encoding `Vec<u8>` fields as standard base64 strings.
pub(crate) mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// An encrypted, integrity-protected agent-to-agent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureMessage {
    pub message_id: Uuid,
    pub sender_id: String,
    pub recipient_id: String,
    /// AEAD ciphertext of the canonical payload (tag appended).
    #[serde(with = "b64")]
    pub encrypted_payload: Vec<u8>,
    /// HMAC-SHA256 over the routing metadata, keyed with the session key.
    /// Independent of the AEAD tag so routing stays authenticated even if a
    /// transport strips the ciphertext's own tag.
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    /// Per-message random 96-bit nonce. Never reused under the same key.
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    pub security_level: SecurityLevel,
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl SecureMessage {
    /// The byte string covered by the metadata integrity tag.
    pub fn signature_input(&self) -> Vec<u8> {
        signature_input(
            &self.message_id,
            &self.sender_id,
            &self.recipient_id,
            &self.timestamp,
        )
    }
}

/// Canonical metadata string signed alongside (but independently of) the
/// AEAD ciphertext.
pub fn signature_input(
    message_id: &Uuid,
    sender_id: &str,
    recipient_id: &str,
    timestamp: &DateTime<Utc>,
) -> Vec<u8> {
    format!(
        "{}:{}:{}:{}",
        message_id,
        sender_id,
        recipient_id,
        timestamp.to_rfc3339()
    )
    .into_bytes()
}

/// Canonical plaintext payload, serialized deterministically (fixed field
/// order) before AEAD encryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub content: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub sender_id: String,
    pub recipient_id: String,
    pub security_level: SecurityLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trips_through_json() {
        let msg = SecureMessage {
            message_id: Uuid::new_v4(),
            sender_id: "alpha".into(),
            recipient_id: "beta".into(),
            encrypted_payload: vec![1, 2, 3, 255],
            signature: vec![9; 32],
            timestamp: Utc::now(),
            nonce: vec![0; 12],
            security_level: SecurityLevel::Sensitive,
            message_type: "task_request".into(),
            correlation_id: Some("corr-1".into()),
        };

        let wire = serde_json::to_string(&msg).unwrap();
        // Binary fields must be base64 strings on the wire.
        let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
        assert!(value["encrypted_payload"].is_string());
        assert!(value["nonce"].is_string());

        let back: SecureMessage = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.message_id, msg.message_id);
        assert_eq!(back.encrypted_payload, msg.encrypted_payload);
        assert_eq!(back.nonce, msg.nonce);
    }

    #[test]
    fn test_correlation_id_omitted_when_absent() {
        let msg = SecureMessage {
            message_id: Uuid::new_v4(),
            sender_id: "a".into(),
            recipient_id: "b".into(),
            encrypted_payload: vec![],
            signature: vec![],
            timestamp: Utc::now(),
            nonce: vec![],
            security_level: SecurityLevel::Standard,
            message_type: "ping".into(),
            correlation_id: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("correlation_id").is_none());
    }

    #[test]
    fn test_signature_input_is_stable() {
        let id = Uuid::new_v4();
        let ts = Utc::now();
        let a = signature_input(&id, "alpha", "beta", &ts);
        let b = signature_input(&id, "alpha", "beta", &ts);
        assert_eq!(a, b);
    }
}
