// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application Mod
//!
//! Provides application mod functionality.

pub mod authentication;
pub mod protocol;
pub mod session_manager;
