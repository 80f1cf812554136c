//! In-memory relationship table.

use std::collections::BTreeMap;
use std::convert::Infallible;
use async_trait::async_trait;

use crate::policy::WebPolicy;
use crate::table::{build_table, LoadStats};
use crate::threshold::ThresholdExclusions;
use crate::types::{Edge, Identity, PermissionRow};
use super::{RelationshipStore, StoreStats};

/// In-memory relationship table indexed by mailbox and by trustee.
///
/// Edges are held in first-seen input order; both indexes list edge
/// positions in that order, so lookups are deterministic. Read-only once
/// built.
#[derive(Debug, Clone, Default)]
pub struct RelationshipTable {
    /// Deduplicated, filtered edges.
    edges: Vec<Edge>,
    /// Mailbox -> edge positions.
    by_mailbox: BTreeMap<Identity, Vec<usize>>,
    /// Trustee -> edge positions.
    by_trustee: BTreeMap<Identity, Vec<usize>>,
    /// Identities removed by the threshold filter.
    exclusions: ThresholdExclusions,
    /// Counts from the load pipeline.
    stats: LoadStats,
}

impl RelationshipTable {
    /// Index already-filtered edges.
    pub fn new(edges: Vec<Edge>, exclusions: ThresholdExclusions, stats: LoadStats) -> Self {
        let mut by_mailbox: BTreeMap<Identity, Vec<usize>> = BTreeMap::new();
        let mut by_trustee: BTreeMap<Identity, Vec<usize>> = BTreeMap::new();

        for (idx, edge) in edges.iter().enumerate() {
            by_mailbox.entry(edge.mailbox.clone()).or_default().push(idx);
            by_trustee.entry(edge.trustee.clone()).or_default().push(idx);
        }

        Self { edges, by_mailbox, by_trustee, exclusions, stats }
    }

    /// Run raw rows through ignore lists, deduplication and thresholds.
    pub fn from_rows(rows: Vec<PermissionRow>, policy: &WebPolicy) -> Self {
        build_table(rows, policy)
    }

    /// Edges with mailbox `mailbox`, in input order.
    pub fn mailbox_edges<'a>(&'a self, mailbox: &Identity) -> impl Iterator<Item = &'a Edge> + 'a {
        self.by_mailbox
            .get(mailbox)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.edges[idx])
    }

    /// Edges with trustee `trustee`, in input order.
    pub fn trustee_edges<'a>(&'a self, trustee: &Identity) -> impl Iterator<Item = &'a Edge> + 'a {
        self.by_trustee
            .get(trustee)
            .into_iter()
            .flatten()
            .map(move |&idx| &self.edges[idx])
    }

    /// Number of trustees on a mailbox.
    pub fn mailbox_fanout(&self, mailbox: &Identity) -> usize {
        self.by_mailbox.get(mailbox).map_or(0, Vec::len)
    }

    /// Number of mailboxes a trustee holds.
    pub fn trustee_fanout(&self, trustee: &Identity) -> usize {
        self.by_trustee.get(trustee).map_or(0, Vec::len)
    }

    /// All edges.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Identities removed by the threshold filter.
    pub fn exclusions(&self) -> &ThresholdExclusions {
        &self.exclusions
    }

    /// Counts from the load pipeline.
    pub fn load_stats(&self) -> LoadStats {
        self.stats
    }
}

#[async_trait]
impl RelationshipStore for RelationshipTable {
    type Error = Infallible;

    async fn lookup_by_mailbox(&self, mailbox: &Identity) -> Result<Vec<Edge>, Self::Error> {
        Ok(self.mailbox_edges(mailbox).cloned().collect())
    }

    async fn lookup_by_trustee(&self, trustee: &Identity) -> Result<Vec<Edge>, Self::Error> {
        Ok(self.trustee_edges(trustee).cloned().collect())
    }

    async fn stats(&self) -> Result<StoreStats, Self::Error> {
        Ok(StoreStats {
            edge_count: self.edges.len(),
            excluded_mailboxes: self.exclusions.permissive_mailboxes.len(),
            excluded_trustees: self.exclusions.power_trustees.len(),
            load: Some(self.stats),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PermissionType;

    fn row(m: &str, t: &str) -> PermissionRow {
        PermissionRow {
            mailbox: Identity::parse(m).unwrap(),
            mailbox_type: "UserMailbox".to_string(),
            trustee: Identity::parse(t).unwrap(),
            trustee_type: "UserMailbox".to_string(),
            permission_type: PermissionType::FullAccess,
            access_rights: "FullAccess".to_string(),
        }
    }

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn sample() -> RelationshipTable {
        RelationshipTable::from_rows(
            vec![row("a@x.com", "b@x.com"), row("a@x.com", "c@x.com"), row("d@x.com", "b@x.com")],
            &WebPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_lookup_by_mailbox_in_input_order() {
        let table = sample();
        let edges = table.lookup_by_mailbox(&id("a@x.com")).await.unwrap();
        let trustees: Vec<_> = edges.iter().map(|e| e.trustee.as_str()).collect();
        assert_eq!(trustees, vec!["b@x.com", "c@x.com"]);
    }

    #[tokio::test]
    async fn test_lookup_by_trustee() {
        let table = sample();
        let edges = table.lookup_by_trustee(&id("b@x.com")).await.unwrap();
        let mailboxes: Vec<_> = edges.iter().map(|e| e.mailbox.as_str()).collect();
        assert_eq!(mailboxes, vec!["a@x.com", "d@x.com"]);
    }

    #[tokio::test]
    async fn test_unknown_identity_is_empty() {
        let table = sample();
        assert!(table.lookup_by_mailbox(&id("zed@x.com")).await.unwrap().is_empty());
        assert!(table.lookup_by_trustee(&id("zed@x.com")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_fanout() {
        let table = sample();
        let stats = table.stats().await.unwrap();
        assert_eq!(stats.edge_count, 3);
        assert_eq!(stats.excluded_mailboxes, 0);
        assert_eq!(stats.load, Some(table.load_stats()));
        assert_eq!(table.mailbox_fanout(&id("a@x.com")), 2);
        assert_eq!(table.trustee_fanout(&id("b@x.com")), 2);
        assert_eq!(table.trustee_fanout(&id("a@x.com")), 0);
    }
}
