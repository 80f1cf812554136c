//! Report emitters for a finished web.
//!
//! Nodes and edges are written as CSV with fixed column names; the run
//! summary is written as pretty JSON. Emitters only run on a successful
//! build, so no partial web ever reaches an output. [`ReportFiles`] writes
//! a set of rendered reports to disk together or not at all.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::store::RelationshipTable;
use crate::types::{Identity, RunSummary, Web};

/// Node CSV columns.
pub const NODE_COLUMNS: [&str; 6] = ["Id", "Identity", "SourceId", "SourceIdentity", "RelationKind", "Depth"];

/// Extra node columns written when adjacency is requested.
pub const ADJACENCY_COLUMNS: [&str; 2] = ["MailboxFanout", "TrusteeFanout"];

/// Edge CSV columns.
pub const EDGE_COLUMNS: [&str; 5] = ["MailboxIdentity", "TrusteeIdentity", "PermissionType", "Permissions", "AccessRights"];

/// Error type for report emitters.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// CSV write failure.
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// An output file could not be written or moved into place.
    #[error("Failed to write {path}: {error}")]
    Output {
        /// Target path.
        path: String,
        /// Underlying failure.
        #[source]
        error: std::io::Error,
    },
}

impl ReportError {
    fn output(path: &Path, error: std::io::Error) -> Self {
        Self::Output { path: path.display().to_string(), error }
    }
}

/// Per-identity edge counts for adjacency summaries.
pub trait AdjacencySource {
    /// Trustees on this mailbox.
    fn mailbox_fanout(&self, identity: &Identity) -> usize;
    /// Mailboxes this trustee holds.
    fn trustee_fanout(&self, identity: &Identity) -> usize;
}

impl AdjacencySource for RelationshipTable {
    fn mailbox_fanout(&self, identity: &Identity) -> usize {
        RelationshipTable::mailbox_fanout(self, identity)
    }

    fn trustee_fanout(&self, identity: &Identity) -> usize {
        RelationshipTable::trustee_fanout(self, identity)
    }
}

/// Write one CSV row per node, in discovery order.
pub fn write_nodes_csv<W: Write>(
    web: &Web,
    adjacency: Option<&dyn AdjacencySource>,
    writer: W,
) -> Result<(), ReportError> {
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header: Vec<&str> = NODE_COLUMNS.to_vec();
    if adjacency.is_some() {
        header.extend(ADJACENCY_COLUMNS);
    }
    wtr.write_record(&header)?;

    for node in web.nodes() {
        let mut record = vec![
            node.id.to_string(),
            node.identity.to_string(),
            node.source_id.to_string(),
            node.source_identity.as_ref().map(Identity::to_string).unwrap_or_default(),
            node.relation.to_string(),
            node.depth.to_string(),
        ];
        if let Some(adj) = adjacency {
            record.push(adj.mailbox_fanout(&node.identity).to_string());
            record.push(adj.trustee_fanout(&node.identity).to_string());
        }
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write every table edge whose endpoints are both in the web.
pub fn write_edges_csv<W: Write>(web: &Web, table: &RelationshipTable, writer: W) -> Result<usize, ReportError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(EDGE_COLUMNS)?;

    let mut written = 0;
    for edge in table.edges() {
        if !(web.contains(&edge.mailbox) && web.contains(&edge.trustee)) {
            continue;
        }
        let permissions = edge.permissions.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(";");
        let rights = edge.access_rights.iter().map(String::as_str).collect::<Vec<_>>().join(";");
        wtr.write_record([
            edge.mailbox.as_str(),
            edge.trustee.as_str(),
            edge.permission_type.as_str(),
            permissions.as_str(),
            rights.as_str(),
        ])?;
        written += 1;
    }

    wtr.flush()?;
    Ok(written)
}

/// Write the run summary as pretty JSON.
pub fn write_summary_json<W: Write>(summary: &RunSummary, mut writer: W) -> Result<(), ReportError> {
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Rendered report files, written together or not at all.
///
/// Each file is first staged next to its target as `<name>.partial`.
/// Targets are replaced by rename only once every file is staged; a failed
/// stage removes the staged files and leaves every target untouched.
#[derive(Debug, Default)]
pub struct ReportFiles {
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl ReportFiles {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue rendered contents for `path`.
    pub fn add(&mut self, path: impl Into<PathBuf>, contents: Vec<u8>) {
        self.files.push((path.into(), contents));
    }

    /// Stage every file, then move them into place.
    pub fn commit(self) -> Result<(), ReportError> {
        let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(self.files.len());

        for (target, contents) in &self.files {
            let partial = partial_path(target);
            if let Err(error) = std::fs::write(&partial, contents) {
                let _ = std::fs::remove_file(&partial);
                discard(&staged);
                return Err(ReportError::output(target, error));
            }
            staged.push((partial, target.as_path()));
        }

        for (i, (partial, target)) in staged.iter().enumerate() {
            if let Err(error) = std::fs::rename(partial, target) {
                discard(&staged[i..]);
                return Err(ReportError::output(target, error));
            }
        }

        tracing::debug!(files = staged.len(), "Report files written");
        Ok(())
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

fn discard(staged: &[(PathBuf, &Path)]) {
    for (partial, _) in staged {
        let _ = std::fs::remove_file(partial);
    }
}

/// Emit the run summary as a structured log event.
pub fn log_summary(summary: &RunSummary) {
    tracing::info!(
        run_id = %summary.run_id,
        web_id = %summary.web_id,
        seed_count = summary.seed_count,
        node_count = summary.node_count,
        depth_reached = summary.depth_reached,
        max_depth = summary.max_depth,
        permissive_mailbox_threshold = summary.permissive_mailbox_threshold,
        power_trustee_threshold = summary.power_trustee_threshold,
        level_sizes = ?summary.level_sizes,
        raw_rows = ?summary.load_stats.map(|s| s.raw_rows),
        ignored_rows = ?summary.load_stats.map(|s| s.ignored_rows),
        deduplicated_edges = ?summary.load_stats.map(|s| s.deduplicated_edges),
        "Web summary"
    );
}
