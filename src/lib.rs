//! # trustee-web
//!
//! Deterministic discovery of mailbox-trustee permission webs.
//!
//! Given Exchange permission exports (who holds FullAccess, SendAs,
//! SendOnBehalf or folder rights on which mailbox) and a set of seed
//! identities, the crate answers one question:
//!
//! > Which identities are connected to the seeds through mailbox permissions,
//! > in either direction, within a bounded number of hops?
//!
//! ## Architecture
//!
//! ```text
//! CSV sources / SQL table → RelationshipTable → ThresholdFilter → WebBuilder → Report
//!                                   ↓
//!                   RelationshipStore (Memory or Postgres)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same table + same seeds + same policy → identical node sequence and `web_id`
//! - Every identity appears once, at its minimum hop distance from the seeds
//! - Node ids are dense, assigned in discovery order

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod policy;
pub mod table;
pub mod threshold;
pub mod store;
pub mod builder;
pub mod report;
pub mod canonical;
pub mod error;

// Re-exports
pub use types::{Identity, ValidationError, Edge, PermissionRow, PermissionType, Node, NodeId, RelationKind, Web, RunSummary};
pub use policy::{WebPolicy, ConfigError};
pub use table::{TableLoader, SchemaError, LoadStats};
pub use threshold::{apply_thresholds, ThresholdExclusions};
pub use store::{RelationshipStore, RelationshipTable, StoreStats};
#[cfg(feature = "postgres")]
pub use store::PostgresRelationshipStore;
pub use builder::{WebBuilder, BuildError, CancellationToken};
pub use report::{write_nodes_csv, write_edges_csv, write_summary_json, AdjacencySource, ReportError, ReportFiles};
pub use canonical::{canonical_hash, canonical_hash_hex};
pub use error::WebError;

/// Schema version of the node and summary outputs.
/// Increment on breaking changes to report columns or summary fields.
pub const REPORT_SCHEMA_VERSION: &str = "1.0.0";
