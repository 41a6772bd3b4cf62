// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Provides lib functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Implements lib

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;

pub use application::authentication::{AuthenticationService, RegisteredAgent};
pub use application::protocol::MessagingProtocol;
pub use application::session_manager::SessionManager;
pub use infrastructure::audit_log::{AuditLog, ComplianceReport};
pub use infrastructure::config::SecurityConfig;
pub use infrastructure::counter_store::{CounterStore, InMemoryCounterStore};
pub use infrastructure::encryption::EncryptionService;
pub use infrastructure::rate_limiter::DistributedRateLimiter;
