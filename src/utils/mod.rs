//! Shared helpers: tracing bootstrap, backoff, compensation, clock.

pub mod bootstrap;
pub mod clock;
pub mod retry;
pub mod compensation;
