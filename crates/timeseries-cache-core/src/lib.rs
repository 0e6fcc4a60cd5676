//! In-memory cache and snapshot engine for instrument time series.
//!
//! This crate keeps one time-indexed [`instance::DataInstance`] per key and
//! provides the pieces needed to grow, verify and persist it:
//!
//! - Sort-and-deduplicate merging of overlapping fetches (`merge` module).
//! - An explicitly constructed per-key owner with cold instantiation and a
//!   restore ladder for snapshot data (`store` module).
//! - Tolerance-aware bookkeeping of which time spans are already available,
//!   so callers can fetch only what is missing (`tracker` module).
//! - Length-invariant checking and lossy auto-repair (`consistency` module).
//! - Gap-based segmentation for compact persistence (`segment` module).
//! - Compressed, atomically written snapshot archives (`snapshot` and
//!   `storage` modules).
//!
//! Everything is synchronous and single-owner: mutation requires `&mut`
//! access to the store or tracker. The crate logs through the `log` facade
//! and never installs a logger itself.
#![deny(missing_docs)]
pub mod config;
pub mod consistency;
pub mod instance;
pub mod merge;
pub mod segment;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod time_range;
pub mod tracker;
