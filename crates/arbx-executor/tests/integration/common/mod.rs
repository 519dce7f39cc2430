//! Shared fixtures for integration tests.

pub mod harness;
