//! # murmur-store
//!
//! Durable client-side state for murmur, backed by SQLite.
//!
//! Only two things outlive a room session: pinned peer key fingerprints (the
//! trust-on-first-use base) and the interface language. Both live in a single
//! key-value namespace, reachable through the [`KvStore`] trait so the
//! reconciliation layer can run against an in-memory store in tests.

pub mod database;
pub mod fingerprints;
pub mod kv;
pub mod migrations;
pub mod settings;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use fingerprints::{classify, FingerprintStore, Observation, SharedFingerprintStore};
pub use kv::{shared, KvStore, MemoryStore, SharedKv};
pub use settings::Settings;
