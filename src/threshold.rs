//! Fan-out threshold filter.
//!
//! Two passes, in order: drop every edge of a mailbox with more than
//! `max_mailbox_fanout` trustees, then count trustees over the **remaining**
//! edges and drop every edge of a trustee on more than `max_trustee_fanout`
//! mailboxes. The second pass never sees edges removed by the first.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::types::{Edge, Identity};

/// Identities removed by the threshold filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdExclusions {
    /// Mailboxes whose trustee count exceeded the threshold.
    pub permissive_mailboxes: BTreeSet<Identity>,
    /// Trustees whose mailbox count exceeded the threshold (after the mailbox pass).
    pub power_trustees: BTreeSet<Identity>,
}

impl ThresholdExclusions {
    /// Whether nothing was excluded.
    pub fn is_empty(&self) -> bool {
        self.permissive_mailboxes.is_empty() && self.power_trustees.is_empty()
    }
}

fn fanout<'a, F>(edges: &'a [Edge], key: F) -> HashMap<&'a Identity, usize>
where
    F: Fn(&'a Edge) -> &'a Identity,
{
    let mut counts: HashMap<&Identity, usize> = HashMap::new();
    for edge in edges {
        *counts.entry(key(edge)).or_default() += 1;
    }
    counts
}

/// Apply both fan-out thresholds to deduplicated edges.
///
/// Edge order is preserved. Thresholds are assumed validated (>= 1).
pub fn apply_thresholds(
    edges: Vec<Edge>,
    max_mailbox_fanout: usize,
    max_trustee_fanout: usize,
) -> (Vec<Edge>, ThresholdExclusions) {
    let permissive_mailboxes: BTreeSet<Identity> = fanout(&edges, |e| &e.mailbox)
        .into_iter()
        .filter(|(_, n)| *n > max_mailbox_fanout)
        .map(|(id, _)| id.clone())
        .collect();

    let edges: Vec<Edge> = edges
        .into_iter()
        .filter(|e| !permissive_mailboxes.contains(&e.mailbox))
        .collect();

    let power_trustees: BTreeSet<Identity> = fanout(&edges, |e| &e.trustee)
        .into_iter()
        .filter(|(_, n)| *n > max_trustee_fanout)
        .map(|(id, _)| id.clone())
        .collect();

    let edges: Vec<Edge> = edges
        .into_iter()
        .filter(|e| !power_trustees.contains(&e.trustee))
        .collect();

    for mailbox in &permissive_mailboxes {
        tracing::debug!(mailbox = %mailbox, threshold = max_mailbox_fanout, "Excluding permissive mailbox");
    }
    for trustee in &power_trustees {
        tracing::debug!(trustee = %trustee, threshold = max_trustee_fanout, "Excluding power trustee");
    }

    (edges, ThresholdExclusions { permissive_mailboxes, power_trustees })
}
