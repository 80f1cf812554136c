//! Node types for the discovered web.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::identity::Identity;

/// Run-local node identifier.
///
/// Ids are assigned from 1 in discovery order. `NodeId::NONE` (0) marks
/// the absent source of a seed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Source id of seed nodes.
    pub const NONE: NodeId = NodeId(0);

    /// Create a node id.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Whether this is the seed sentinel.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role the discovered identity plays in the edge that reached it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// Reached through a reverse lookup: the source is a trustee of this mailbox.
    Mailbox,
    /// Reached through a forward lookup: this identity is a trustee of the source.
    Trustee,
    /// Seed node.
    None,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mailbox => write!(f, "Mailbox"),
            Self::Trustee => write!(f, "Trustee"),
            Self::None => write!(f, "None"),
        }
    }
}

/// An identity discovered during traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Discovery-ordered identifier.
    pub id: NodeId,
    /// Discovered identity.
    pub identity: Identity,
    /// Node that led here (`NodeId::NONE` for seeds).
    pub source_id: NodeId,
    /// Identity of the source node (`None` for seeds).
    pub source_identity: Option<Identity>,
    /// How this node relates to its source.
    pub relation: RelationKind,
    /// Hop count from the nearest seed.
    pub depth: u32,
}

impl Node {
    /// Create a seed node.
    pub fn seed(id: NodeId, identity: Identity) -> Self {
        Self {
            id,
            identity,
            source_id: NodeId::NONE,
            source_identity: None,
            relation: RelationKind::None,
            depth: 0,
        }
    }

    /// Create a node reached from `source`.
    pub fn discovered(id: NodeId, identity: Identity, source: &Node, relation: RelationKind) -> Self {
        Self {
            id,
            identity,
            source_id: source.id,
            source_identity: Some(source.identity.clone()),
            relation,
            depth: source.depth + 1,
        }
    }

    /// Whether this node was supplied as a seed.
    pub fn is_seed(&self) -> bool {
        self.source_id.is_none()
    }
}
