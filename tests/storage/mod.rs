//! Shared storage contract tests.
//!
//! Each backend imports these functions and runs them through the
//! `run_*_tests!` macros.

pub mod idempotency_tests;
pub mod queue_tests;
pub mod signal_tests;
