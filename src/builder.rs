//! Deterministic trustee web builder.
//!
//! The builder expands outward from a seed set, one level at a time, using
//! forward (`lookup_by_mailbox`) and reverse (`lookup_by_trustee`) lookups
//! against a [`RelationshipStore`], and returns the discovered web.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::policy::{ConfigError, WebPolicy};
use crate::store::RelationshipStore;
use crate::types::{Identity, Node, NodeId, RelationKind, RunSummary, Web};

/// Error type for builder operations.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Seed list was empty.
    #[error("No seed identities supplied")]
    NoSeeds,
    /// Policy failed validation.
    #[error("Invalid policy: {0}")]
    Config(#[from] ConfigError),
    /// The store could not answer a lookup.
    #[error("Lookup error: {0}")]
    Lookup(String),
    /// Cancellation was requested.
    #[error("Web build cancelled at level {level}")]
    Cancelled {
        /// Level being expanded when cancellation was observed.
        level: u32,
    },
    /// The policy deadline elapsed.
    #[error("Web build exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
    /// The web grew past `max_nodes`.
    #[error("Web exceeded node limit of {0}")]
    NodeLimitExceeded(usize),
}

impl BuildError {
    /// Create a lookup error from any store error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Lookup(e.to_string())
    }
}

/// Cooperative cancellation flag shared with a running build.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create an untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Nodes created at one level, as positions in the node list.
#[derive(Debug)]
struct Frontier {
    level: u32,
    members: Vec<usize>,
}

impl Frontier {
    fn new(level: u32) -> Self {
        Self { level, members: Vec::new() }
    }

    fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Discovered nodes plus the identity index that enforces first-discovery-wins.
#[derive(Debug, Default)]
struct Discovery {
    nodes: Vec<Node>,
    index: HashMap<Identity, usize>,
}

impl Discovery {
    fn next_id(&self) -> NodeId {
        NodeId::new(self.nodes.len() as u64 + 1)
    }

    fn insert_seed(&mut self, identity: &Identity) -> Option<usize> {
        if self.index.contains_key(identity) {
            return None;
        }
        let node = Node::seed(self.next_id(), identity.clone());
        Some(self.push(node))
    }

    /// Create a node unless the identity is already known. Ids are only
    /// consumed by successful insertions.
    fn discover(&mut self, identity: &Identity, source: &Node, relation: RelationKind) -> Option<usize> {
        if self.index.contains_key(identity) {
            return None;
        }
        let node = Node::discovered(self.next_id(), identity.clone(), source, relation);
        Some(self.push(node))
    }

    fn push(&mut self, node: Node) -> usize {
        let pos = self.nodes.len();
        self.index.insert(node.identity.clone(), pos);
        self.nodes.push(node);
        pos
    }
}

/// Deterministic web builder.
///
/// ## Algorithm
///
/// 1. Every distinct seed becomes a node at depth 0 (level 0 frontier)
/// 2. For level `d` in `1..=max_depth`, for each node in the previous
///    frontier in creation order:
///    - forward lookup: each edge's trustee not yet discovered becomes a
///      `Trustee` node at depth `d`
///    - reverse lookup: each edge's mailbox not yet discovered becomes a
///      `Mailbox` node at depth `d`
/// 3. Stop early when a level creates no nodes
///
/// Level-synchronous expansion with a single discovered set means every
/// identity appears once, at its minimum distance from the seed set, and
/// its source sits exactly one level above it. Ties within a level resolve
/// by frontier order, then lookup order, so identical inputs give
/// identical webs.
///
/// Any lookup failure, cancellation, deadline or node-limit breach aborts
/// the whole build; no partial web is returned.
pub struct WebBuilder<S: RelationshipStore> {
    store: Arc<S>,
    policy: WebPolicy,
    cancellation: Option<CancellationToken>,
}

impl<S: RelationshipStore + 'static> WebBuilder<S> {
    /// Create a builder, validating the policy.
    pub fn new(store: Arc<S>, policy: WebPolicy) -> Result<Self, BuildError> {
        policy.validate()?;
        Ok(Self { store, policy, cancellation: None })
    }

    /// Attach a cancellation token checked between expansions.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Get the policy.
    pub fn policy(&self) -> &WebPolicy {
        &self.policy
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn checkpoint(&self, level: u32, started: Instant) -> Result<(), BuildError> {
        if self.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(BuildError::Cancelled { level });
        }
        if let Some(deadline) = self.policy.deadline() {
            if started.elapsed() >= deadline {
                return Err(BuildError::DeadlineExceeded(deadline));
            }
        }
        Ok(())
    }

    fn check_node_limit(&self, discovery: &Discovery) -> Result<(), BuildError> {
        match self.policy.max_nodes {
            Some(limit) if discovery.nodes.len() > limit => Err(BuildError::NodeLimitExceeded(limit)),
            _ => Ok(()),
        }
    }

    /// Build the web reachable from `seeds`.
    ///
    /// Duplicate seeds collapse to their first occurrence.
    #[tracing::instrument(name = "build_web", skip_all, fields(seed_count = seeds.len()))]
    pub async fn build(&self, seeds: &[Identity]) -> Result<Web, BuildError> {
        if seeds.is_empty() {
            return Err(BuildError::NoSeeds);
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let stats = self.store.stats().await.map_err(BuildError::from_store)?;

        let mut discovery = Discovery::default();
        let mut frontier = Frontier::new(0);
        for seed in seeds {
            if let Some(pos) = discovery.insert_seed(seed) {
                frontier.members.push(pos);
            }
        }
        self.check_node_limit(&discovery)?;
        let seed_count = frontier.members.len();

        let mut level_sizes = vec![seed_count];
        let mut depth_reached = 0u32;
        let mut lookup_count = 0u64;

        tracing::info!(
            seed_count = seed_count,
            max_depth = self.policy.max_depth,
            edge_count = stats.edge_count,
            "Starting web build"
        );

        for level in 1..=self.policy.max_depth {
            self.checkpoint(level, clock)?;
            let mut next = Frontier::new(level);

            for &pos in &frontier.members {
                self.checkpoint(level, clock)?;
                let source = discovery.nodes[pos].clone();

                let forward = self
                    .store
                    .lookup_by_mailbox(&source.identity)
                    .await
                    .map_err(BuildError::from_store)?;
                let reverse = self
                    .store
                    .lookup_by_trustee(&source.identity)
                    .await
                    .map_err(BuildError::from_store)?;
                lookup_count += 2;

                for edge in &forward {
                    if let Some(new) = discovery.discover(&edge.trustee, &source, RelationKind::Trustee) {
                        next.members.push(new);
                    }
                }
                for edge in &reverse {
                    if let Some(new) = discovery.discover(&edge.mailbox, &source, RelationKind::Mailbox) {
                        next.members.push(new);
                    }
                }
                self.check_node_limit(&discovery)?;
            }

            tracing::debug!(
                level = next.level,
                frontier_size = next.members.len(),
                node_count = discovery.nodes.len(),
                "Level expanded"
            );

            if next.is_empty() {
                break;
            }
            level_sizes.push(next.members.len());
            depth_reached = next.level;
            frontier = next;
        }

        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            web_id: String::new(),
            policy_params_hash: self.policy.params_hash(),
            seed_count,
            node_count: discovery.nodes.len(),
            depth_reached,
            max_depth: self.policy.max_depth,
            permissive_mailbox_threshold: self.policy.permissive_mailbox_threshold,
            power_trustee_threshold: self.policy.power_trustee_threshold,
            edge_count: stats.edge_count,
            excluded_mailboxes: stats.excluded_mailboxes,
            excluded_trustees: stats.excluded_trustees,
            load_stats: stats.load,
            level_sizes,
            lookup_count,
            started_at,
            completed_at: Utc::now(),
        };

        let web = Web::new(discovery.nodes, summary);
        tracing::info!(
            node_count = web.len(),
            depth_reached = web.summary().depth_reached,
            web_id = %web.summary().web_id,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "Web build complete"
        );
        Ok(web)
    }
}
