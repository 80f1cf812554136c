//! Relationship storage backends.
//!
//! The web builder only sees the [`RelationshipStore`] trait, so the
//! in-memory table and the SQL-backed store are interchangeable.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::table::LoadStats;
use crate::types::{Edge, Identity};

/// Size and exclusion counts reported by a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Edges visible to lookups.
    pub edge_count: usize,
    /// Mailboxes removed by the fan-out threshold.
    pub excluded_mailboxes: usize,
    /// Trustees removed by the fan-out threshold.
    pub excluded_trustees: usize,
    /// Row counts from the load pipeline, for stores built from raw rows.
    pub load: Option<LoadStats>,
}

/// Trait for relationship storage backends.
///
/// Implementations must return results in a deterministic order and must
/// treat an unknown identity as an empty result, not an error. Errors are
/// reserved for a backend that cannot answer.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync;

    /// Edges whose mailbox is `mailbox`.
    async fn lookup_by_mailbox(&self, mailbox: &Identity) -> Result<Vec<Edge>, Self::Error>;

    /// Edges whose trustee is `trustee`.
    async fn lookup_by_trustee(&self, trustee: &Identity) -> Result<Vec<Edge>, Self::Error>;

    /// Edge and exclusion counts.
    async fn stats(&self) -> Result<StoreStats, Self::Error>;
}

pub use memory::RelationshipTable;

#[cfg(feature = "postgres")]
pub use postgres::PostgresRelationshipStore;
