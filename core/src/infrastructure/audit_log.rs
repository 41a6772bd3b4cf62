// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Audit Log
//!
//! Append-only, bounded in-memory sink for security events. Every recorded
//! event is also emitted through `tracing` in structured form, so any
//! subscriber (stdout JSON, Loki, SIEM shipper) captures the full trail —
//! this crate produces events, it does not persist or ship them.
//!
//! Once the buffer exceeds its ceiling the oldest half is dropped; external
//! shipping is expected to have happened long before that point.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::audit::{assess_compliance_flags, AuditEvent, AuditSeverity, ComplianceFlag};

pub const DEFAULT_MAX_EVENTS: usize = 50_000;

/// Bounded append-only audit sink.
pub struct AuditLog {
    events: RwLock<Vec<AuditEvent>>,
    max_events: usize,
}

impl AuditLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            max_events,
        }
    }

    /// Record a security event. Compliance flags are derived from the event
    /// type and detail map; details must never contain plaintext or key
    /// material.
    pub fn record(
        &self,
        event_type: &str,
        severity: AuditSeverity,
        actor: &str,
        tenant_id: Option<&str>,
        details: Map<String, Value>,
    ) -> AuditEvent {
        let event = AuditEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            severity,
            actor: actor.to_string(),
            tenant_id: tenant_id.map(str::to_string),
            compliance_flags: assess_compliance_flags(event_type, &details),
            details,
        };

        self.emit(&event);

        let mut events = self.events.write();
        events.push(event.clone());
        if events.len() > self.max_events {
            // Drop the oldest half, retain the most recent.
            let keep_from = events.len() / 2;
            events.drain(..keep_from);
        }
        event
    }

    fn emit(&self, event: &AuditEvent) {
        let detail_json = Value::Object(event.details.clone());
        match event.severity {
            AuditSeverity::Info => info!(
                event_type = %event.event_type,
                actor = %event.actor,
                tenant = event.tenant_id.as_deref().unwrap_or("-"),
                details = %detail_json,
                "security audit event"
            ),
            AuditSeverity::Warning => warn!(
                event_type = %event.event_type,
                actor = %event.actor,
                tenant = event.tenant_id.as_deref().unwrap_or("-"),
                details = %detail_json,
                "security audit event"
            ),
            AuditSeverity::Error | AuditSeverity::Critical | AuditSeverity::SecurityAlert => error!(
                event_type = %event.event_type,
                actor = %event.actor,
                tenant = event.tenant_id.as_deref().unwrap_or("-"),
                details = %detail_json,
                "security audit event"
            ),
        }
    }

    /// Events recorded at or after `since`, newest last.
    pub fn recent(&self, since: DateTime<Utc>) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Full snapshot for external shipping.
    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Aggregate compliance view over the trailing `window`, optionally
    /// scoped to one tenant.
    pub fn compliance_report(&self, tenant_id: Option<&str>, window: Duration) -> ComplianceReport {
        let since = Utc::now() - window;
        let events = self.events.read();
        let relevant: Vec<&AuditEvent> = events
            .iter()
            .filter(|e| e.timestamp >= since)
            .filter(|e| tenant_id.is_none() || e.tenant_id.as_deref() == tenant_id)
            .collect();

        let mut flag_counts: HashMap<ComplianceFlag, u64> = HashMap::new();
        for event in &relevant {
            for flag in &event.compliance_flags {
                *flag_counts.entry(*flag).or_insert(0) += 1;
            }
        }

        let security_incidents = flag_counts
            .get(&ComplianceFlag::SecurityIncident)
            .copied()
            .unwrap_or(0);
        let failed_auths = relevant
            .iter()
            .filter(|e| e.event_type.contains("AUTHENTICATION_FAILED"))
            .count() as u64;

        let mut recommendations = Vec::new();
        if failed_auths > 10 {
            recommendations.push(
                "High number of authentication failures detected; review agent credentials".into(),
            );
        }
        if security_incidents > 5 {
            recommendations
                .push("Multiple security incidents detected; recommend a security audit".into());
        }
        if flag_counts.contains_key(&ComplianceFlag::Privacy) {
            recommendations
                .push("Privacy-related events detected; verify personal-data handling".into());
        }

        ComplianceReport {
            generated_at: Utc::now(),
            tenant_id: tenant_id.map(str::to_string),
            total_events: relevant.len() as u64,
            flag_counts,
            security_incidents,
            recommendations,
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS)
    }
}

/// Aggregate compliance summary for external review.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    pub generated_at: DateTime<Utc>,
    pub tenant_id: Option<String>,
    pub total_events: u64,
    pub flag_counts: HashMap<ComplianceFlag, u64>,
    pub security_incidents: u64,
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn details(kv: &[(&str, Value)]) -> Map<String, Value> {
        kv.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_record_assigns_id_and_flags() {
        let log = AuditLog::default();
        let event = log.record(
            "AGENT_AUTHENTICATED",
            AuditSeverity::Info,
            "alpha",
            Some("firm-1"),
            details(&[("security_level", json!("standard"))]),
        );
        assert_eq!(log.len(), 1);
        assert!(event
            .compliance_flags
            .contains(&ComplianceFlag::ProfessionalStandards));
    }

    #[test]
    fn test_pruning_retains_most_recent_half() {
        let log = AuditLog::new(10);
        for i in 0..11 {
            log.record(
                "MESSAGE_ENCRYPTED",
                AuditSeverity::Info,
                &format!("agent-{i}"),
                None,
                Map::new(),
            );
        }
        // 11th push exceeds the ceiling: oldest half dropped.
        let snapshot = log.snapshot();
        assert!(snapshot.len() <= 6);
        assert_eq!(snapshot.last().unwrap().actor, "agent-10");
    }

    #[test]
    fn test_compliance_report_scopes_by_tenant() {
        let log = AuditLog::default();
        log.record(
            "AUTHENTICATION_FAILED",
            AuditSeverity::Warning,
            "alpha",
            Some("firm-1"),
            Map::new(),
        );
        log.record(
            "AUTHENTICATION_FAILED",
            AuditSeverity::Warning,
            "beta",
            Some("firm-2"),
            Map::new(),
        );

        let report = log.compliance_report(Some("firm-1"), Duration::days(30));
        assert_eq!(report.total_events, 1);
        assert_eq!(report.security_incidents, 1);

        let all = log.compliance_report(None, Duration::days(30));
        assert_eq!(all.total_events, 2);
    }
}
