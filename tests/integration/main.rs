//! Integration Tests
//!
//! End-to-end coverage of the orchestration core against a scripted
//! generation provider: fan-out and event ordering, the low-confidence
//! re-run loop, cancellation, corpus degradation, the HTTP surface, and
//! routing determinism.

mod support;

// Run pipeline scenarios (fan-out, re-run loop, cancellation, degradation)
mod run_pipeline_test;

// HTTP surface scenarios (chat, OpenAI facade, introspection routes)
mod server_test;
