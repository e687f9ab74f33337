//! Interfaces to the commit graph the tracker runs against.
//!
//! The tracker never owns commits. It asks a [`Dag`] for ancestry, a
//! [`Phases`] provider for the public/draft/secret classification and an
//! [`Obsolescence`] provider for rewritten commits. Storage engines implement
//! these traits, [`memorydag::MemoryDag`] is a self contained implementation
//! for tests and for short lived overlays.

pub mod legacy;
pub mod memorydag;

use std::collections::HashSet;

use crate::node::NodeId;
use crate::node::Rev;

/// Phase of a commit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Public,
    Draft,
    Secret,
}

impl Phase {
    /// Draft and secret commits may still be rewritten.
    pub fn is_mutable(self) -> bool {
        !matches!(self, Phase::Public)
    }
}

/// Ancestry queries against the commit graph.
pub trait Dag {
    /// Maps a node to its revision, `None` if the graph does not contain it.
    fn rev(&self, node: &NodeId) -> Option<Rev>;

    /// Maps a revision back to its node.
    fn node(&self, rev: Rev) -> Option<NodeId>;

    /// Both parents of `node`, missing parents are [`crate::node::NULL_ID`].
    /// Returns `None` if the graph does not contain `node`.
    fn parents(&self, node: &NodeId) -> Option<[NodeId; 2]>;

    /// Parent revisions of `rev`, `None` for a missing parent.
    fn parent_revs(&self, rev: Rev) -> [Option<Rev>; 2];

    /// Heads of the ancestor closure of `revs`, in ascending order.
    fn heads_ancestors(&self, revs: &[Rev]) -> Vec<Rev>;

    /// Number of revisions in the graph, revisions are `0..len()`.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, node: &NodeId) -> bool {
        self.rev(node).is_some()
    }
}

/// Phase classification of revisions.
pub trait Phases {
    fn phase(&self, rev: Rev) -> Phase;

    /// All revisions whose phase is one of `phases`, in ascending order.
    fn revs_in_phases(&self, phases: &[Phase]) -> Vec<Rev>;
}

/// Access to the obsolescence marker store.
pub trait Obsolescence {
    /// Every node that has been superseded by a rewrite.
    fn obsolete_nodes(&self) -> HashSet<NodeId>;

    fn is_obsolete(&self, node: &NodeId) -> bool {
        self.obsolete_nodes().contains(node)
    }
}

/// Everything the tracker needs from the repository's graph.
pub trait Graph: Dag + Phases + Obsolescence {}

impl<T: Dag + Phases + Obsolescence> Graph for T {}
