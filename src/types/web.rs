//! The discovered web and its run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::canonical::canonical_hash_hex;
use crate::table::LoadStats;
use super::identity::Identity;
use super::node::{Node, NodeId};

/// Per-run statistics handed to report emitters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique identifier of this run (not part of the fingerprint).
    pub run_id: Uuid,
    /// Deterministic fingerprint of the node sequence and policy.
    pub web_id: String,
    /// Hash of the policy parameters used.
    pub policy_params_hash: String,
    /// Number of distinct seeds.
    pub seed_count: usize,
    /// Number of nodes in the web, seeds included.
    pub node_count: usize,
    /// Deepest level at which a node was created.
    pub depth_reached: u32,
    /// Configured depth bound.
    pub max_depth: u32,
    /// Configured mailbox fan-out threshold.
    pub permissive_mailbox_threshold: usize,
    /// Configured trustee fan-out threshold.
    pub power_trustee_threshold: usize,
    /// Edges visible to traversal after filtering.
    pub edge_count: usize,
    /// Mailboxes dropped by the fan-out threshold.
    pub excluded_mailboxes: usize,
    /// Trustees dropped by the fan-out threshold.
    pub excluded_trustees: usize,
    /// Raw, ignored and deduplicated row counts, when the store reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_stats: Option<LoadStats>,
    /// Number of nodes created per level (index 0 = seeds).
    pub level_sizes: Vec<usize>,
    /// Lookups issued during traversal.
    pub lookup_count: u64,
    /// When traversal started.
    pub started_at: DateTime<Utc>,
    /// When traversal completed.
    pub completed_at: DateTime<Utc>,
}

/// Result of a web build: insertion-ordered nodes plus the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct Web {
    nodes: Vec<Node>,
    summary: RunSummary,
    #[serde(skip)]
    by_identity: HashMap<Identity, usize>,
}

#[derive(Serialize)]
struct FingerprintInput<'a> {
    schema_version: &'a str,
    policy_params_hash: &'a str,
    nodes: &'a [Node],
}

impl Web {
    /// Assemble a web and stamp its fingerprint into the summary.
    pub(crate) fn new(nodes: Vec<Node>, mut summary: RunSummary) -> Self {
        summary.web_id = canonical_hash_hex(&FingerprintInput {
            schema_version: crate::REPORT_SCHEMA_VERSION,
            policy_params_hash: &summary.policy_params_hash,
            nodes: &nodes,
        });
        summary.node_count = nodes.len();
        let by_identity = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.identity.clone(), i))
            .collect();
        Self { nodes, summary, by_identity }
    }

    /// Nodes in discovery order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Run statistics.
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the web is empty (never true for a successful build).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by identity.
    pub fn get(&self, identity: &Identity) -> Option<&Node> {
        self.by_identity.get(identity).map(|&i| &self.nodes[i])
    }

    /// Look up a node by id.
    pub fn get_by_id(&self, id: NodeId) -> Option<&Node> {
        // Ids are dense and start at 1.
        let idx = usize::try_from(id.get()).ok()?.checked_sub(1)?;
        self.nodes.get(idx).filter(|n| n.id == id)
    }

    /// Whether an identity is part of the web.
    pub fn contains(&self, identity: &Identity) -> bool {
        self.by_identity.contains_key(identity)
    }

    /// Walk source links from a node back to its seed.
    pub fn path_to_seed(&self, identity: &Identity) -> Vec<&Node> {
        let mut path = Vec::new();
        let mut current = self.get(identity);
        while let Some(node) = current {
            path.push(node);
            current = if node.is_seed() { None } else { self.get_by_id(node.source_id) };
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::node::RelationKind;

    fn summary() -> RunSummary {
        let now = Utc::now();
        RunSummary {
            run_id: Uuid::new_v4(),
            web_id: String::new(),
            policy_params_hash: "p".to_string(),
            seed_count: 1,
            node_count: 0,
            depth_reached: 1,
            max_depth: 100,
            permissive_mailbox_threshold: 500,
            power_trustee_threshold: 500,
            edge_count: 1,
            excluded_mailboxes: 0,
            excluded_trustees: 0,
            load_stats: None,
            level_sizes: vec![1, 1],
            lookup_count: 2,
            started_at: now,
            completed_at: now,
        }
    }

    fn chain() -> Vec<Node> {
        let a = Node::seed(NodeId::new(1), Identity::parse("a@x.com").unwrap());
        let b = Node::discovered(NodeId::new(2), Identity::parse("b@x.com").unwrap(), &a, RelationKind::Trustee);
        vec![a, b]
    }

    #[test]
    fn test_lookup_and_path() {
        let web = Web::new(chain(), summary());
        let b = Identity::parse("b@x.com").unwrap();

        assert_eq!(web.summary().node_count, 2);
        assert_eq!(web.get(&b).unwrap().id, NodeId::new(2));
        assert_eq!(web.get_by_id(NodeId::new(1)).unwrap().identity.as_str(), "a@x.com");
        assert!(web.get_by_id(NodeId::NONE).is_none());

        let path: Vec<_> = web.path_to_seed(&b).iter().map(|n| n.identity.as_str()).collect();
        assert_eq!(path, vec!["b@x.com", "a@x.com"]);
    }

    #[test]
    fn test_fingerprint_ignores_run_id() {
        let w1 = Web::new(chain(), summary());
        let w2 = Web::new(chain(), summary());
        assert_ne!(w1.summary().run_id, w2.summary().run_id);
        assert_eq!(w1.summary().web_id, w2.summary().web_id);
    }
}
