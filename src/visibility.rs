//! Tracking visibility through visible mutable heads.
//!
//! Public commits are always visible. Draft and secret commits are visible
//! exactly when they are an ancestor of, or equal to, one of the heads kept
//! by [`VisibleHeads`]. The tracker keeps that list minimal as commits are
//! added, removed or change phase, and persists it through the transaction
//! the caller has open.
//!
//! The list order is meaningful: heads that survive a recomputation keep
//! their position, new heads are appended. The list is stored in the
//! `visibleheads` record (see [`headsfile`]) and every head ever tracked is
//! remembered in the append-only `allheads` record (see [`allheads`]).

pub mod allheads;
pub mod headsfile;

use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::io;

use itertools::Itertools;

use crate::dag::Graph;
use crate::dag::Phase;
use crate::node::NodeId;
use crate::node::Rev;
use crate::store::Store;
use crate::transaction::PendingWrite;
use crate::transaction::PostClose;
use crate::transaction::Transaction;

use allheads::NodeSet;
use headsfile::VISIBLE_HEADS;

/// Number of heads listed when logging the head list.
const LOG_HEAD_LIMIT: usize = 4;

/// Transaction file generator that writes the head list.
pub const VISIBILITY_GENERATOR: &str = "visibility";

/// Transaction post-close action that flushes the all-heads set.
pub const ALL_HEADS_POST_CLOSE: &str = "allheads";

/// The persisted records could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    UnknownVersion(String),
    InvalidNode(String),
    NotUtf8,
    BadMagic,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::UnknownVersion(line) => {
                write!(f, "invalid visibleheads file format {line:?}")
            }
            FormatError::InvalidNode(line) => write!(f, "invalid head {line:?} in visibleheads"),
            FormatError::NotUtf8 => write!(f, "visibleheads is not valid utf-8"),
            FormatError::BadMagic => write!(f, "allheads has an unknown magic marker"),
        }
    }
}

impl Error for FormatError {}

/// Tracker state could not be loaded from the store.
#[derive(Debug)]
pub enum LoadError {
    Io(io::Error),
    Format(FormatError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(err) => write!(f, "IO error: {err}"),
            LoadError::Format(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LoadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoadError::Io(err) => Some(err),
            LoadError::Format(err) => Some(err),
        }
    }
}

impl From<io::Error> for LoadError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<FormatError> for LoadError {
    fn from(err: FormatError) -> Self {
        Self::Format(err)
    }
}

/// How a new candidate head list is turned into the tracked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Reduce candidates to the real heads of their ancestor closure and
    /// persist the result.
    Prune,
    /// Take candidates as they are and never persist them.
    ///
    /// Used for overlays such as an unapplied bundle, where all bundle
    /// commits are visible and the overlay is discarded afterwards.
    AcceptAsIs,
}

/// Tracks the visible non-public heads of a repository.
#[derive(Debug)]
pub struct VisibleHeads {
    heads: Vec<NodeId>,
    all_heads: NodeSet,
    dirty: bool,
    strategy: Strategy,
    narrow_heads: bool,
    invisible: OnceCell<BTreeSet<Rev>>,
}

impl VisibleHeads {
    /// Loads the tracker from `store`.
    ///
    /// A missing `visibleheads` record means tracking has not written
    /// anything yet, the tracker starts empty and dirty.
    pub fn load<S: Store + ?Sized>(store: &S) -> Result<Self, LoadError> {
        let (heads, dirty) = match headsfile::load(store)? {
            Some(heads) => (heads, false),
            None => (Vec::new(), true),
        };
        let mut all_heads = NodeSet::load(store)?;
        for head in &heads {
            all_heads.add(*head);
        }

        let tracker = Self {
            heads,
            all_heads,
            dirty,
            strategy: Strategy::Prune,
            narrow_heads: false,
            invisible: OnceCell::new(),
        };
        if !dirty {
            tracker.log_heads("read");
        }
        Ok(tracker)
    }

    /// Loads the tracker for a bundle overlay on top of `store`.
    pub fn load_bundle<S: Store + ?Sized>(store: &S) -> Result<Self, LoadError> {
        Ok(Self::load(store)?.into_bundle())
    }

    /// Switches this tracker to the accept-as-is strategy.
    pub fn into_bundle(mut self) -> Self {
        self.strategy = Strategy::AcceptAsIs;
        self.dirty = false;
        self
    }

    /// Adds the heads of a bundle as additional visible heads.
    ///
    /// Some bundle heads may be descendants of existing heads. The overlay
    /// is short lived, so the overlap is left in place.
    pub fn add_bundle_heads(&mut self, bundle_heads: impl IntoIterator<Item = NodeId>) {
        let heads: Vec<NodeId> = self.heads.iter().copied().chain(bundle_heads).unique().collect();
        self.replace(heads);
    }

    pub fn heads(&self) -> &[NodeId] {
        &self.heads
    }

    /// Every head ever tracked. These are not necessarily heads any more.
    pub fn all_heads(&self) -> &NodeSet {
        &self.all_heads
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// With narrow heads the head list is the only definition of
    /// visibility, and [`VisibleHeads::invisible_revs`] is always empty.
    pub fn set_narrow_heads(&mut self, narrow_heads: bool) {
        if self.narrow_heads != narrow_heads {
            self.narrow_heads = narrow_heads;
            self.invalidate_caches();
        }
    }

    /// Forgets derived state, call after the underlying graph changed.
    pub fn invalidate_caches(&mut self) {
        self.invisible = OnceCell::new();
    }

    /// Updates the visible heads to be exactly those in `new_heads`, after
    /// reducing them to real heads.
    ///
    /// Returns `true` if the head list changed, derived visibility state of
    /// the repository must then be invalidated.
    pub fn set_heads<G: Graph + ?Sized>(
        &mut self,
        graph: &G,
        new_heads: impl IntoIterator<Item = NodeId>,
        tr: &mut Transaction,
    ) -> bool {
        self.update_heads(graph, new_heads.into_iter().collect(), tr)
    }

    /// Makes `new_nodes` and their ancestors visible.
    pub fn add<G: Graph + ?Sized>(
        &mut self,
        graph: &G,
        new_nodes: impl IntoIterator<Item = NodeId>,
        tr: &mut Transaction,
    ) -> bool {
        let candidates = self.heads.iter().copied().chain(new_nodes).unique().collect();
        self.update_heads(graph, candidates, tr)
    }

    /// Removes `old_nodes` from the visible set.
    ///
    /// Nodes with a visible descendant outside of `old_nodes` stay visible.
    /// Obsolete ancestors that would become heads through the removal are
    /// removed as well.
    pub fn remove<G: Graph + ?Sized>(
        &mut self,
        graph: &G,
        old_nodes: impl IntoIterator<Item = NodeId>,
        tr: &mut Transaction,
    ) -> bool {
        let obsolete = graph.obsolete_nodes();
        let mut old_nodes: HashSet<NodeId> = old_nodes.into_iter().collect();
        let mut candidates: Vec<NodeId> = self.heads.clone();
        let mut seen = HashSet::new();
        let mut new_heads = Vec::new();

        while let Some(node) = candidates.pop() {
            if !seen.insert(node) {
                continue;
            }
            let Some(rev) = graph.rev(&node) else {
                continue;
            };
            if graph.phase(rev) == Phase::Public {
                continue;
            }
            if old_nodes.contains(&node) {
                let Some(parents) = graph.parents(&node) else {
                    continue;
                };
                for parent in parents {
                    if parent.is_null() {
                        continue;
                    }
                    candidates.push(parent);
                    if obsolete.contains(&parent) {
                        old_nodes.insert(parent);
                    }
                }
            } else {
                new_heads.push(node);
            }
        }
        self.update_heads(graph, new_heads, tr)
    }

    /// Updates the heads after commits changed phase.
    ///
    /// `new_draft` commits must remain visible. `new_public` commits are
    /// dropped from the list since public commits are always visible.
    pub fn phase_adjust<G: Graph + ?Sized>(
        &mut self,
        graph: &G,
        tr: &mut Transaction,
        new_draft: impl IntoIterator<Item = NodeId>,
        new_public: impl IntoIterator<Item = NodeId>,
    ) -> bool {
        let new_public: HashSet<NodeId> = new_public.into_iter().collect();
        let candidates = self
            .heads
            .iter()
            .copied()
            .filter(|head| !new_public.contains(head))
            .chain(new_draft)
            .unique()
            .collect();
        self.update_heads(graph, candidates, tr)
    }

    /// Mutable revisions that are not reachable from any visible head.
    ///
    /// The result is memoized until the head list changes.
    pub fn invisible_revs<G: Graph + ?Sized>(&self, graph: &G) -> &BTreeSet<Rev> {
        self.invisible.get_or_init(|| {
            if self.narrow_heads {
                return BTreeSet::new();
            }

            let mut hidden: BTreeSet<Rev> = graph
                .revs_in_phases(&[Phase::Draft, Phase::Secret])
                .into_iter()
                .collect();
            let mut visible: Vec<Rev> = self.heads.iter().filter_map(|head| graph.rev(head)).collect();
            for rev in &visible {
                hidden.remove(rev);
            }
            while let Some(rev) = visible.pop() {
                for parent in graph.parent_revs(rev).into_iter().flatten() {
                    if hidden.remove(&parent) {
                        visible.push(parent);
                    }
                }
            }
            hidden
        })
    }

    /// Marks the staged head list as durably written.
    pub fn mark_written(&mut self) {
        if self.dirty {
            self.dirty = false;
            self.log_heads("wrote");
        }
    }

    /// Persists buffered additions to the all-heads set.
    pub fn flush_all_heads<S: Store + ?Sized>(&mut self, store: &mut S) -> io::Result<()> {
        self.all_heads.flush(store)
    }

    fn update_heads<G: Graph + ?Sized>(
        &mut self,
        graph: &G,
        new_heads: Vec<NodeId>,
        tr: &mut Transaction,
    ) -> bool {
        if self.strategy == Strategy::AcceptAsIs {
            return self.replace(new_heads);
        }

        // Remove heads that are not actually heads, and keep the position of
        // heads that did not change.
        let real_heads: Vec<NodeId> = if new_heads.len() > 1 {
            let revs: Vec<Rev> = new_heads.iter().filter_map(|head| graph.rev(head)).collect();
            graph
                .heads_ancestors(&revs)
                .into_iter()
                .filter_map(|rev| graph.node(rev))
                .collect()
        } else {
            new_heads
        };
        let real_set: HashSet<NodeId> = real_heads.iter().copied().collect();
        let new_heads: Vec<NodeId> = self
            .heads
            .iter()
            .copied()
            .filter(|head| real_set.contains(head))
            .chain(real_heads)
            .unique()
            .collect();

        let changed = self.heads != new_heads;
        if changed {
            self.log_change(&new_heads);
            for head in &new_heads {
                self.all_heads.add(*head);
            }
            self.heads = new_heads;
            self.dirty = true;
            self.invalidate_caches();
        }
        if self.dirty {
            tr.add_file_generator(
                VISIBILITY_GENERATOR,
                PendingWrite::new(VISIBLE_HEADS, headsfile::encode(&self.heads)),
            );
            tr.add_post_close(ALL_HEADS_POST_CLOSE, PostClose::FlushAllHeads);
        }
        changed
    }

    fn replace(&mut self, heads: Vec<NodeId>) -> bool {
        if self.heads == heads {
            return false;
        }
        self.heads = heads;
        self.invalidate_caches();
        true
    }

    fn log_heads(&self, op: &str) {
        let shown = self
            .heads
            .iter()
            .rev()
            .take(LOG_HEAD_LIMIT)
            .map(NodeId::short)
            .join(", ");
        let more = if self.heads.len() > LOG_HEAD_LIMIT { ", ..." } else { "" };
        tracing::debug!(
            visibility_headcount = self.heads.len(),
            "{op} {} heads: {shown}{more}",
            self.heads.len()
        );
    }

    fn log_change(&self, new_heads: &[NodeId]) {
        let old: HashSet<&NodeId> = self.heads.iter().collect();
        let new: HashSet<&NodeId> = new_heads.iter().collect();
        let removed: Vec<&NodeId> = self.heads.iter().filter(|h| !new.contains(h)).collect();
        let added: Vec<&NodeId> = new_heads.iter().filter(|h| !old.contains(h)).collect();
        tracing::debug!(
            "removed {} heads [{}]; added {} heads [{}]",
            removed.len(),
            removed.iter().map(|h| h.short()).join(", "),
            added.len(),
            added.iter().map(|h| h.short()).join(", "),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::memorydag::MemoryDag;
    use crate::dag::Dag;
    use crate::store::memorystore::MemoryStore;

    fn n(label: &str) -> NodeId {
        NodeId::from_content(label)
    }

    /// p (public) - a - b - c
    ///                   \
    ///                    d
    fn graph() -> MemoryDag {
        let mut dag = MemoryDag::new();
        dag.commit(n("p"), &[], Phase::Public).unwrap();
        dag.commit(n("a"), &[n("p")], Phase::Draft).unwrap();
        dag.commit(n("b"), &[n("a")], Phase::Draft).unwrap();
        dag.commit(n("c"), &[n("b")], Phase::Draft).unwrap();
        dag.commit(n("d"), &[n("b")], Phase::Draft).unwrap();
        dag
    }

    fn tracker() -> VisibleHeads {
        VisibleHeads::load(&MemoryStore::new()).unwrap()
    }

    #[test]
    fn missing_record_starts_empty_and_dirty() {
        let tracker = tracker();
        assert!(tracker.heads().is_empty());
        assert!(tracker.is_dirty());
    }

    #[test]
    fn set_heads_reduces_to_real_heads() {
        let dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        assert!(tracker.set_heads(&dag, [n("a"), n("c"), n("b"), n("d")], &mut tr));
        assert_eq!(tracker.heads(), &[n("c"), n("d")]);
    }

    #[test]
    fn unknown_candidates_are_dropped() {
        let dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("c"), n("gone")], &mut tr);
        assert_eq!(tracker.heads(), &[n("c")]);
    }

    #[test]
    fn single_candidate_is_taken_as_is() {
        let dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("gone")], &mut tr);
        assert_eq!(tracker.heads(), &[n("gone")]);
    }

    #[test]
    fn surviving_heads_keep_their_position() {
        let dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("d")], &mut tr);
        tracker.add(&dag, [n("c")], &mut tr);
        assert_eq!(tracker.heads(), &[n("d"), n("c")]);

        // Same set again, nothing changes and the order is kept.
        assert!(!tracker.set_heads(&dag, [n("c"), n("d")], &mut tr));
        assert_eq!(tracker.heads(), &[n("d"), n("c")]);
    }

    #[test]
    fn add_ancestor_is_absorbed() {
        let dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("c")], &mut tr);
        assert!(!tracker.add(&dag, [n("a")], &mut tr));
        assert_eq!(tracker.heads(), &[n("c")]);
    }

    #[test]
    fn mutation_stages_deferred_writes() {
        let dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("c")], &mut tr);

        let staged = tr.file_generator(VISIBILITY_GENERATOR).unwrap();
        assert_eq!(staged.records[0].0, VISIBLE_HEADS);
        assert_eq!(headsfile::decode(&staged.records[0].1).unwrap(), vec![n("c")]);
        assert_eq!(
            tr.post_close_action(ALL_HEADS_POST_CLOSE),
            Some(PostClose::FlushAllHeads)
        );
    }

    #[test]
    fn clean_tracker_stages_nothing_without_change() {
        let dag = graph();
        let mut store = MemoryStore::new();
        store
            .write(VISIBLE_HEADS, &headsfile::encode(&[n("c")]))
            .unwrap();
        let mut tracker = VisibleHeads::load(&store).unwrap();
        let mut tr = Transaction::new("test");
        assert!(!tracker.add(&dag, [n("b")], &mut tr));
        assert!(tr.is_empty());
    }

    #[test]
    fn remove_head_exposes_parent() {
        let dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("c"), n("d")], &mut tr);
        tracker.remove(&dag, [n("d")], &mut tr);
        assert_eq!(tracker.heads(), &[n("c")]);
        tracker.remove(&dag, [n("c")], &mut tr);
        assert_eq!(tracker.heads(), &[n("b")]);
    }

    #[test]
    fn remove_collapses_obsolete_chain() {
        let mut dag = graph();
        dag.mark_obsolete(n("b"));
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("c")], &mut tr);
        tracker.remove(&dag, [n("c")], &mut tr);
        assert_eq!(tracker.heads(), &[n("a")]);
    }

    #[test]
    fn remove_keeps_nodes_with_visible_descendants() {
        let dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("c"), n("d")], &mut tr);
        tracker.remove(&dag, [n("b")], &mut tr);
        assert_eq!(tracker.heads(), &[n("c"), n("d")]);
    }

    #[test]
    fn remove_stops_at_public() {
        let dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("a")], &mut tr);
        tracker.remove(&dag, [n("a")], &mut tr);
        assert!(tracker.heads().is_empty());
    }

    #[test]
    fn phase_adjust_drops_public_and_adds_draft() {
        let mut dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("c"), n("d")], &mut tr);

        dag.set_phase(&n("d"), Phase::Public);
        tracker.phase_adjust(&dag, &mut tr, [], [n("d")]);
        assert_eq!(tracker.heads(), &[n("c")]);

        dag.set_phase(&n("d"), Phase::Draft);
        tracker.phase_adjust(&dag, &mut tr, [n("d")], []);
        assert_eq!(tracker.heads(), &[n("c"), n("d")]);
    }

    #[test]
    fn all_heads_grows_monotonically() {
        let dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("c")], &mut tr);
        tracker.set_heads(&dag, [n("d")], &mut tr);
        assert!(tracker.all_heads().contains(&n("c")));
        assert!(tracker.all_heads().contains(&n("d")));
        assert_eq!(tracker.all_heads().len(), 2);
    }

    #[test]
    fn invisible_revs_are_unreachable_mutable_revs() {
        let dag = graph();
        let mut tracker = tracker();
        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("c")], &mut tr);
        let d = dag.rev(&n("d")).unwrap();
        assert_eq!(tracker.invisible_revs(&dag), &BTreeSet::from([d]));

        tracker.add(&dag, [n("d")], &mut tr);
        assert!(tracker.invisible_revs(&dag).is_empty());

        tracker.set_heads(&dag, [n("a")], &mut tr);
        assert_eq!(tracker.invisible_revs(&dag).len(), 3);

        tracker.set_narrow_heads(true);
        assert!(tracker.invisible_revs(&dag).is_empty());
    }

    #[test]
    fn bundle_accepts_heads_as_is() {
        let dag = graph();
        let mut store = MemoryStore::new();
        store
            .write(VISIBLE_HEADS, &headsfile::encode(&[n("c")]))
            .unwrap();
        let mut tracker = VisibleHeads::load_bundle(&store).unwrap();
        tracker.add_bundle_heads([n("b"), n("c"), n("d")]);
        assert_eq!(tracker.heads(), &[n("c"), n("b"), n("d")]);

        let mut tr = Transaction::new("test");
        tracker.set_heads(&dag, [n("a"), n("c")], &mut tr);
        assert_eq!(tracker.heads(), &[n("a"), n("c")]);
        assert!(tr.is_empty());
        assert!(!tracker.is_dirty());
    }
}
