//! Integration tests for arbx-executor.
//!
//! These tests drive the engine end to end against paper venues:
//! - Two-leg execution shapes and reconciliation
//! - Compensation and the halt latch
//! - Reduce-only quarantine and probe recovery

pub mod common;
