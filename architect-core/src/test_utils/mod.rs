//! Test utilities and helpers for Architect
//!
//! Common fixtures and async helpers shared by unit, scenario, and
//! integration tests across the crate.

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
