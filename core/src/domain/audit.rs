// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Audit Event Model
//!
//! Append-only security events with derived compliance flags. Events are
//! produced by every mutating operation in the core and shipped to external
//! log/SIEM pipelines by the caller; this crate only produces them.
//!
//! Event detail maps must never contain message plaintext or key material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Severity attached to an audit event; maps to tracing levels when emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
    SecurityAlert,
}

/// Compliance tags derived from event type and payload keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceFlag {
    /// Personal-data keywords present in the event details.
    Privacy,
    /// Authentication-related event.
    ProfessionalStandards,
    /// Failure, violation or attack indicator.
    SecurityIncident,
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Machine-readable event type, e.g. `AGENT_AUTHENTICATED`.
    pub event_type: String,
    pub severity: AuditSeverity,
    /// Acting principal (agent id).
    pub actor: String,
    /// Tenant scope, where known.
    pub tenant_id: Option<String>,
    pub details: Map<String, Value>,
    pub compliance_flags: Vec<ComplianceFlag>,
}

/// Derive compliance flags from the event type and its detail map.
pub fn assess_compliance_flags(event_type: &str, details: &Map<String, Value>) -> Vec<ComplianceFlag> {
    let mut flags = Vec::new();

    let details_text = Value::Object(details.clone()).to_string().to_lowercase();
    const PRIVACY_KEYWORDS: &[&str] = &["client", "personal", "financial", "pii"];
    if PRIVACY_KEYWORDS.iter().any(|kw| details_text.contains(kw)) {
        flags.push(ComplianceFlag::Privacy);
    }

    let event_lower = event_type.to_lowercase();
    if event_lower.contains("auth") {
        flags.push(ComplianceFlag::ProfessionalStandards);
    }

    const INCIDENT_KEYWORDS: &[&str] = &["failed", "error", "violation", "attack", "replay", "lockout"];
    if INCIDENT_KEYWORDS.iter().any(|kw| event_lower.contains(kw)) {
        flags.push(ComplianceFlag::SecurityIncident);
    }

    flags
}
