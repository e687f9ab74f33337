use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::error::Error;
use std::fmt;

use crate::dag::Dag;
use crate::dag::Obsolescence;
use crate::dag::Phase;
use crate::dag::Phases;
use crate::node::NodeId;
use crate::node::Rev;
use crate::node::NULL_ID;

#[derive(Debug, Clone)]
struct Entry {
    node: NodeId,
    parents: [Option<Rev>; 2],
    phase: Phase,
}

/// Simple in-memory commit graph implementing [`Dag`], [`Phases`] and
/// [`Obsolescence`].
///
/// Commits are appended in topological order, so revision numbers follow
/// insertion order. Useful for unit tests and for overlays that are never
/// persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryDag {
    entries: Vec<Entry>,
    index: HashMap<NodeId, Rev>,
    obsolete: HashSet<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    Duplicate(NodeId),
    NullNode,
    UnknownParent(NodeId),
    TooManyParents(usize),
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::Duplicate(node) => write!(f, "commit {node} already exists"),
            CommitError::NullNode => write!(f, "the null id cannot be committed"),
            CommitError::UnknownParent(node) => write!(f, "unknown parent {node}"),
            CommitError::TooManyParents(n) => write!(f, "{n} parents given, at most 2 allowed"),
        }
    }
}

impl Error for CommitError {}

impl MemoryDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a commit. All parents must already be present.
    pub fn commit(
        &mut self,
        node: NodeId,
        parents: &[NodeId],
        phase: Phase,
    ) -> Result<Rev, CommitError> {
        if node.is_null() {
            return Err(CommitError::NullNode);
        }
        if self.index.contains_key(&node) {
            return Err(CommitError::Duplicate(node));
        }
        if parents.len() > 2 {
            return Err(CommitError::TooManyParents(parents.len()));
        }
        let mut parent_revs = [None; 2];
        for (slot, parent) in parent_revs.iter_mut().zip(parents) {
            if parent.is_null() {
                continue;
            }
            let rev = self
                .index
                .get(parent)
                .ok_or(CommitError::UnknownParent(*parent))?;
            *slot = Some(*rev);
        }

        let rev = self.entries.len() as Rev;
        self.entries.push(Entry {
            node,
            parents: parent_revs,
            phase,
        });
        self.index.insert(node, rev);
        Ok(rev)
    }

    /// Moves `node` to `phase`. Returns `false` for unknown nodes.
    pub fn set_phase(&mut self, node: &NodeId, phase: Phase) -> bool {
        match self.index.get(node) {
            Some(&rev) => {
                self.entries[rev as usize].phase = phase;
                true
            }
            None => false,
        }
    }

    /// Records an obsolescence marker for `node`.
    pub fn mark_obsolete(&mut self, node: NodeId) {
        self.obsolete.insert(node);
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().map(|entry| entry.node)
    }
}

impl Dag for MemoryDag {
    fn rev(&self, node: &NodeId) -> Option<Rev> {
        self.index.get(node).copied()
    }

    fn node(&self, rev: Rev) -> Option<NodeId> {
        self.entries.get(rev as usize).map(|entry| entry.node)
    }

    fn parents(&self, node: &NodeId) -> Option<[NodeId; 2]> {
        let rev = self.rev(node)?;
        Some(
            self.parent_revs(rev)
                .map(|parent| parent.and_then(|p| self.node(p)).unwrap_or(NULL_ID)),
        )
    }

    fn parent_revs(&self, rev: Rev) -> [Option<Rev>; 2] {
        self.entries
            .get(rev as usize)
            .map_or([None; 2], |entry| entry.parents)
    }

    fn heads_ancestors(&self, revs: &[Rev]) -> Vec<Rev> {
        let members: BTreeSet<Rev> = revs
            .iter()
            .copied()
            .filter(|&rev| (rev as usize) < self.entries.len())
            .collect();

        let mut covered = HashSet::new();
        let mut stack: Vec<Rev> = members
            .iter()
            .flat_map(|&rev| self.parent_revs(rev))
            .flatten()
            .collect();
        while let Some(rev) = stack.pop() {
            if covered.insert(rev) {
                stack.extend(self.parent_revs(rev).into_iter().flatten());
            }
        }

        members
            .into_iter()
            .filter(|rev| !covered.contains(rev))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Phases for MemoryDag {
    fn phase(&self, rev: Rev) -> Phase {
        self.entries
            .get(rev as usize)
            .map_or(Phase::Public, |entry| entry.phase)
    }

    fn revs_in_phases(&self, phases: &[Phase]) -> Vec<Rev> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| phases.contains(&entry.phase))
            .map(|(rev, _)| rev as Rev)
            .collect()
    }
}

impl Obsolescence for MemoryDag {
    fn obsolete_nodes(&self) -> HashSet<NodeId> {
        self.obsolete.clone()
    }

    fn is_obsolete(&self, node: &NodeId) -> bool {
        self.obsolete.contains(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(label: &str) -> NodeId {
        NodeId::from_content(label)
    }

    #[test]
    fn commit_rejects_unknown_parent() {
        let mut dag = MemoryDag::new();
        assert_eq!(
            dag.commit(n("b"), &[n("a")], Phase::Draft),
            Err(CommitError::UnknownParent(n("a")))
        );
        dag.commit(n("a"), &[], Phase::Draft).unwrap();
        assert_eq!(
            dag.commit(n("a"), &[], Phase::Draft),
            Err(CommitError::Duplicate(n("a")))
        );
    }

    #[test]
    fn parents_use_null_for_roots() {
        let mut dag = MemoryDag::new();
        dag.commit(n("a"), &[], Phase::Public).unwrap();
        dag.commit(n("b"), &[n("a")], Phase::Draft).unwrap();
        assert_eq!(dag.parents(&n("a")), Some([NULL_ID, NULL_ID]));
        assert_eq!(dag.parents(&n("b")), Some([n("a"), NULL_ID]));
        assert_eq!(dag.parents(&n("x")), None);
    }

    #[test]
    fn heads_ancestors_drops_covered_revs() {
        // a - b - c
        //      \
        //       d
        let mut dag = MemoryDag::new();
        let a = dag.commit(n("a"), &[], Phase::Draft).unwrap();
        let b = dag.commit(n("b"), &[n("a")], Phase::Draft).unwrap();
        let c = dag.commit(n("c"), &[n("b")], Phase::Draft).unwrap();
        let d = dag.commit(n("d"), &[n("a")], Phase::Draft).unwrap();

        assert_eq!(dag.heads_ancestors(&[d, a, c, b]), vec![c, d]);
        assert_eq!(dag.heads_ancestors(&[a, b]), vec![b]);
        assert_eq!(dag.heads_ancestors(&[a, 99]), vec![a]);
    }

    #[test]
    fn revs_in_phases_filters() {
        let mut dag = MemoryDag::new();
        dag.commit(n("a"), &[], Phase::Public).unwrap();
        dag.commit(n("b"), &[n("a")], Phase::Draft).unwrap();
        dag.commit(n("c"), &[n("b")], Phase::Secret).unwrap();
        assert_eq!(dag.revs_in_phases(&[Phase::Draft, Phase::Secret]), vec![1, 2]);
        assert!(dag.set_phase(&n("b"), Phase::Public));
        assert_eq!(dag.revs_in_phases(&[Phase::Public]), vec![0, 1]);
    }
}
