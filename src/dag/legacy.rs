//! Visibility derived from obsolescence markers alone.
//!
//! Before a repository tracks its visible heads explicitly, a mutable commit
//! is hidden when it is obsolete and none of its descendants is visible.
//! Public commits are never hidden.

use std::collections::BTreeSet;

use crate::dag::Graph;
use crate::dag::Phase;
use crate::node::NodeId;
use crate::node::Rev;

/// Revisions hidden by obsolescence markers, in ascending order.
pub fn hidden_revs<G: Graph + ?Sized>(graph: &G) -> BTreeSet<Rev> {
    let obsolete = graph.obsolete_nodes();
    let mut pinned = vec![false; graph.len()];
    let mut hidden = BTreeSet::new();

    // Children always have larger revisions, so walking downwards sees every
    // child before its parents.
    for rev in (0..graph.len() as Rev).rev() {
        let visible = pinned[rev as usize]
            || !graph.phase(rev).is_mutable()
            || graph.node(rev).is_none_or(|node| !obsolete.contains(&node));
        if visible {
            for parent in graph.parent_revs(rev).into_iter().flatten() {
                pinned[parent as usize] = true;
            }
        } else {
            hidden.insert(rev);
        }
    }
    hidden
}

/// Heads of the mutable commits that the obsolescence markers leave visible.
///
/// This is the starting point when a repository switches to explicit head
/// tracking.
pub fn visible_mutable_heads<G: Graph + ?Sized>(graph: &G) -> Vec<NodeId> {
    let hidden = hidden_revs(graph);
    let candidates: Vec<Rev> = graph
        .revs_in_phases(&[Phase::Draft, Phase::Secret])
        .into_iter()
        .filter(|rev| !hidden.contains(rev))
        .collect();
    graph
        .heads_ancestors(&candidates)
        .into_iter()
        .filter_map(|rev| graph.node(rev))
        .collect()
}
