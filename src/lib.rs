//! callsignal - signed conversion-signal ingestion
//!
//! Accepts HMAC-signed call intents and funnel events from customer sites,
//! gates them for consent, deduplicates and values them, and uploads sealed
//! sales to ad platforms as offline conversions.

pub mod bus;
pub mod config;
pub mod dlq;
pub mod error;
pub mod export;
pub mod handlers;
pub mod idempotency;
pub mod ingress;
pub mod interfaces;
pub mod model;
pub mod providers;
pub mod ratelimit;
pub mod runtime;
pub mod storage;
pub mod utils;
pub mod valuation;
pub mod worker;
