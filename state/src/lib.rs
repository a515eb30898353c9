//! Persistent state for the proxy: upstream records, OAuth tokens, OAuth
//! completion events, and the tool index, all in one SQLite database.
//!
//! The store is an ordered-bucket key-value layer: each bucket is a table
//! with a small, documented operation set (see the `store` submodules). The
//! in-memory tool index rebuilds itself from the `tool_index` bucket on
//! startup, so nothing here is load-bearing for ranking — only for
//! durability.

mod store;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

pub use store::StateStore;

/// Persisted record of one configured upstream. `config` is the serialized
/// server configuration owned by the core crate; this crate treats it as an
/// opaque document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamRecord {
    pub name: String,
    pub config: Value,
    pub ever_connected: bool,
    pub tool_count: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: i64,
    pub name: String,
}

pub(crate) fn datetime_from_unix(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or_else(Utc::now)
}
