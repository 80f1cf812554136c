//! Relationship table construction.
//!
//! ```text
//! sources → header check → concat → ignore lists → dedup/merge → thresholds → index
//! ```
//!
//! Every source is validated before its rows are used; a missing column in
//! any source fails the whole load.

pub mod csv_source;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::policy::WebPolicy;
use crate::store::RelationshipTable;
use crate::threshold::apply_thresholds;
use crate::types::{Edge, Identity, PermissionRow};

/// Error raised when a relationship source does not match the expected schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// One or more mandatory columns are absent.
    #[error("{input}: missing required columns: {}", missing.join(", "))]
    MissingColumns {
        /// Source name.
        input: String,
        /// Canonical names of the absent columns.
        missing: Vec<String>,
    },
    /// A row carries an unusable value.
    #[error("{input}:{line}: {message}")]
    InvalidRow {
        /// Source name.
        input: String,
        /// 1-based line number.
        line: u64,
        /// What was wrong.
        message: String,
    },
    /// CSV framing error.
    #[error("{input}: {error}")]
    Csv {
        /// Source name.
        input: String,
        /// Underlying error.
        #[source]
        error: csv::Error,
    },
    /// Source could not be opened.
    #[error("{input}: {error}")]
    Io {
        /// Source name.
        input: String,
        /// Underlying error.
        #[source]
        error: std::io::Error,
    },
}

impl SchemaError {
    pub(crate) fn csv(source: &str, error: csv::Error) -> Self {
        Self::Csv { input: source.to_string(), error }
    }
}

/// Remove rows matched by the policy's ignore lists.
///
/// Returns the kept rows and the number of rows dropped.
pub fn filter_ignored(rows: Vec<PermissionRow>, policy: &WebPolicy) -> (Vec<PermissionRow>, usize) {
    let before = rows.len();
    let kept: Vec<_> = rows
        .into_iter()
        .filter(|r| !policy.ignores(&r.mailbox, &r.trustee, r.permission_type))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Collapse rows to one edge per (mailbox, trustee) pair.
///
/// Edges keep first-seen order; duplicate rows merge their permission
/// kinds and access rights into the first edge.
pub fn dedup_rows<I>(rows: I) -> Vec<Edge>
where
    I: IntoIterator<Item = PermissionRow>,
{
    let mut edges: Vec<Edge> = Vec::new();
    let mut seen: HashMap<(Identity, Identity), usize> = HashMap::new();

    for row in rows {
        let key = (row.mailbox.clone(), row.trustee.clone());
        match seen.get(&key) {
            Some(&idx) => edges[idx].absorb(&row),
            None => {
                seen.insert(key, edges.len());
                edges.push(Edge::from_row(row));
            }
        }
    }

    edges
}

/// Counts gathered while building a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LoadStats {
    /// Rows read across all sources.
    pub raw_rows: usize,
    /// Rows dropped by ignore lists.
    pub ignored_rows: usize,
    /// Edges after deduplication, before thresholds.
    pub deduplicated_edges: usize,
}

/// Build an in-memory table from already-parsed rows.
pub fn build_table(rows: Vec<PermissionRow>, policy: &WebPolicy) -> RelationshipTable {
    let raw_rows = rows.len();
    let (kept, ignored_rows) = filter_ignored(rows, policy);
    let edges = dedup_rows(kept);
    let deduplicated_edges = edges.len();

    let (edges, exclusions) = apply_thresholds(
        edges,
        policy.permissive_mailbox_threshold,
        policy.power_trustee_threshold,
    );

    tracing::info!(
        raw_rows = raw_rows,
        ignored_rows = ignored_rows,
        deduplicated_edges = deduplicated_edges,
        edges = edges.len(),
        permissive_mailboxes = exclusions.permissive_mailboxes.len(),
        power_trustees = exclusions.power_trustees.len(),
        "Relationship table built"
    );

    RelationshipTable::new(
        edges,
        exclusions,
        LoadStats { raw_rows, ignored_rows, deduplicated_edges },
    )
}

/// Loads relationship tables from CSV files.
#[derive(Debug, Clone, Default)]
pub struct TableLoader {
    paths: Vec<PathBuf>,
}

impl TableLoader {
    /// Create a loader with no sources.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a CSV source. Sources are concatenated in the order added.
    pub fn with_source(mut self, path: impl AsRef<Path>) -> Self {
        self.paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Read every source and build the table.
    pub fn load(&self, policy: &WebPolicy) -> Result<RelationshipTable, SchemaError> {
        let mut rows = Vec::new();
        for path in &self.paths {
            rows.extend(csv_source::read_rows_from_path(path)?);
        }
        Ok(build_table(rows, policy))
    }
}
