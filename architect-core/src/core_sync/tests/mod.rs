//! Scenario tests for the sync core
//!
//! Multi-peer flows driven through an in-process mesh: peers are real
//! router actors wired together with piped data channels.
