//! Core types for the trustee web.

pub mod identity;
pub mod edge;
pub mod node;
pub mod web;

pub use identity::{Identity, ValidationError, parse_identities};
pub use edge::{Edge, PermissionRow, PermissionType, split_access_rights};
pub use node::{Node, NodeId, RelationKind};
pub use web::{Web, RunSummary};
