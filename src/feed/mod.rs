//! Alert feed: data model, severity policies, feed parsing, sources and the cache.
//!
//! Everything here is synchronous. The scheduler decides when (and on which thread) a source is
//! asked to fetch.

/// Alert records and severity ranks.
pub mod alert;
/// Last-known-good alert list with refresh bookkeeping.
pub mod cache;
/// GeoJSON feed decoding and alert selection.
pub mod parse;
/// Swappable severity filter strategies.
pub mod policy;
/// Auxiliary image providers refreshed in the same slot as alerts.
pub mod snapshot;
/// Alert sources (HTTP, file, static).
pub mod source;
