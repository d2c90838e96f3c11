//! Picture-of-the-day relay.
//!
//! Retrieves one dated record and image per calendar day from a rate-limited
//! upstream, persists records in an append-only log, keeps a secondary cache
//! of size-budgeted images, and delivers the day's resource to registered
//! channels on an hourly cadence.

pub mod backfill;
pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod schedule;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod transcode;
pub mod upstream;
pub mod utils;
