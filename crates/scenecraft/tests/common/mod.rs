//! Shared utilities for scenecraft integration tests.
//!
//! `TestHarness` wires an orchestrator to recording fakes for the prompt
//! generator, both image providers, the prompt store and the trace backend.

pub mod harness;

pub use harness::*;
