//! Repository handle tying the tracker to its store, graph and lock.
//!
//! A [`Repo`] owns one [`VisibleHeads`] tracker per open repository and is
//! passed explicitly to every visibility operation. Whether the tracker is
//! consulted at all is decided by the `visibleheads` storage requirement:
//!
//! - without it, visibility is derived from obsolescence markers (see
//!   [`crate::dag::legacy`]) and all mutation entrypoints are no-ops;
//! - with it, the tracked head list decides which mutable commits are
//!   visible.
//!
//! [`Repo::start_tracking`] and [`Repo::stop_tracking`] switch between the
//! two modes. Both take the exclusive repository lock and do nothing when the
//! repository is already in the requested mode.
//!
//! ```rust,ignore
//! let mut repo = Repo::open(MemoryStore::new(), dag, Config::default())?;
//! repo.start_tracking()?;
//! repo.add([new_commit])?;
//! repo.remove([rewritten_commit])?;
//! assert!(repo.heads().unwrap().contains(&new_commit));
//! ```

use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::io;

use crate::config::AutoMigrate;
use crate::config::Config;
use crate::dag::legacy;
use crate::dag::Graph;
use crate::node::NodeId;
use crate::node::Rev;
use crate::store::Requirements;
use crate::store::Store;
use crate::transaction::PendingWrite;
use crate::transaction::PostClose;
use crate::transaction::RepoLock;
use crate::transaction::Transaction;
use crate::visibility::allheads::NodeSet;
use crate::visibility::headsfile::VISIBLE_HEADS;
use crate::visibility::FormatError;
use crate::visibility::LoadError;
use crate::visibility::VisibleHeads;
use crate::visibility::VISIBILITY_GENERATOR;

/// Storage requirement selecting explicit head tracking.
pub const TRACKING_REQUIREMENT: &str = "visibleheads";

#[derive(Debug)]
pub enum RepoError {
    Io(io::Error),
    Format(FormatError),
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoError::Io(err) => write!(f, "IO error: {err}"),
            RepoError::Format(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RepoError::Io(err) => Some(err),
            RepoError::Format(err) => Some(err),
        }
    }
}

impl From<io::Error> for RepoError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<FormatError> for RepoError {
    fn from(err: FormatError) -> Self {
        Self::Format(err)
    }
}

impl From<LoadError> for RepoError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Io(err) => Self::Io(err),
            LoadError::Format(err) => Self::Format(err),
        }
    }
}

/// An open repository.
#[derive(Debug)]
pub struct Repo<S: Store, G: Graph> {
    store: S,
    graph: G,
    config: Config,
    requirements: Requirements,
    visible_heads: VisibleHeads,
    legacy_hidden: OnceCell<BTreeSet<Rev>>,
    migrated: bool,
    /// Heads of the bundle this handle overlays, `None` for a plain repository.
    bundle_heads: Option<Vec<NodeId>>,
}

fn load_tracker<S: Store + ?Sized>(
    store: &S,
    config: &Config,
    bundle_heads: Option<&[NodeId]>,
) -> Result<VisibleHeads, LoadError> {
    let mut visible_heads = match bundle_heads {
        Some(bundle_heads) => {
            let mut overlay = VisibleHeads::load_bundle(store)?;
            overlay.add_bundle_heads(bundle_heads.iter().copied());
            overlay
        }
        None => VisibleHeads::load(store)?,
    };
    visible_heads.set_narrow_heads(config.narrow_heads);
    Ok(visible_heads)
}

impl<S: Store, G: Graph> Repo<S, G> {
    /// Opens a repository, loading its requirements and tracker state.
    pub fn open(store: S, graph: G, config: Config) -> Result<Self, RepoError> {
        let requirements = Requirements::load(&store)?;
        let visible_heads = load_tracker(&store, &config, None)?;
        Ok(Self {
            store,
            graph,
            config,
            requirements,
            visible_heads,
            legacy_hidden: OnceCell::new(),
            migrated: false,
            bundle_heads: None,
        })
    }

    /// Opens a read-mostly overlay in which every bundle head is visible.
    ///
    /// `graph` must contain the bundle commits. Head changes made through the
    /// overlay are accepted as-is and never written to `store`.
    pub fn open_bundle(
        store: S,
        graph: G,
        config: Config,
        bundle_heads: impl IntoIterator<Item = NodeId>,
    ) -> Result<Self, RepoError> {
        let requirements = Requirements::load(&store)?;
        let bundle_heads: Vec<NodeId> = bundle_heads.into_iter().collect();
        let visible_heads = load_tracker(&store, &config, Some(&bundle_heads))?;
        Ok(Self {
            store,
            graph,
            config,
            requirements,
            visible_heads,
            legacy_hidden: OnceCell::new(),
            migrated: false,
            bundle_heads: Some(bundle_heads),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    /// Mutable access to the graph. Derived visibility is recomputed on the
    /// next query.
    pub fn graph_mut(&mut self) -> &mut G {
        self.invalidate_volatile_sets();
        self.visible_heads.invalidate_caches();
        &mut self.graph
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    pub fn visible_heads(&self) -> &VisibleHeads {
        &self.visible_heads
    }

    /// Returns `true` if this handle is a bundle overlay.
    pub fn is_bundle(&self) -> bool {
        self.bundle_heads.is_some()
    }

    /// Consumes the repository, returning its storage.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Takes the exclusive repository lock.
    pub fn lock(&self) -> Result<RepoLock, RepoError> {
        Ok(self.store.lock()?)
    }

    pub fn transaction(&self, name: &str) -> Transaction {
        Transaction::new(name)
    }

    /// Applies everything staged on `tr`.
    ///
    /// Pending record writes happen first, then post-close actions. If any
    /// step fails the tracker is reloaded from what actually reached the
    /// store.
    pub fn close_transaction(&mut self, tr: Transaction) -> Result<(), RepoError> {
        let writes_heads = tr.file_generator(VISIBILITY_GENERATOR).is_some();
        self.apply_transaction(tr, writes_heads)
    }

    /// Closes `tr`, marking the tracker clean afterwards if `mark_written`.
    fn apply_transaction(&mut self, tr: Transaction, mark_written: bool) -> Result<(), RepoError> {
        let visible_heads = &mut self.visible_heads;
        let result = tr.close(&mut self.store, |action, store| match action {
            PostClose::FlushAllHeads => visible_heads.flush_all_heads(store),
        });
        match result {
            Ok(()) => {
                if mark_written {
                    self.visible_heads.mark_written();
                }
                Ok(())
            }
            Err(err) => {
                if let Err(reload) = self.reload() {
                    tracing::warn!("failed to reload visible heads after error: {reload}");
                }
                Err(err.into())
            }
        }
    }

    /// Discards everything staged on `tr` and reloads the tracker so it
    /// matches the durable state again.
    pub fn abort_transaction(&mut self, tr: Transaction) -> Result<(), RepoError> {
        drop(tr);
        self.reload()
    }

    /// Drops cached visibility sets that are derived from the heads.
    pub fn invalidate_volatile_sets(&mut self) {
        self.legacy_hidden = OnceCell::new();
    }

    fn reload(&mut self) -> Result<(), RepoError> {
        self.visible_heads =
            load_tracker(&self.store, &self.config, self.bundle_heads.as_deref())?;
        self.invalidate_volatile_sets();
        Ok(())
    }

    /// Returns `true` if this repository explicitly tracks visible mutable
    /// heads.
    pub fn tracking(&self) -> bool {
        self.requirements.contains(TRACKING_REQUIREMENT)
    }

    /// Returns `true` if the tracked heads determine visibility.
    pub fn enabled(&self) -> bool {
        self.tracking() && self.config.enabled
    }

    /// The current visible mutable heads, `None` when not tracking.
    pub fn heads(&self) -> Option<&[NodeId]> {
        self.tracking().then(|| self.visible_heads.heads())
    }

    /// Every head ever tracked, `None` when not tracking.
    pub fn all_heads(&self) -> Option<&NodeSet> {
        self.tracking().then(|| self.visible_heads.all_heads())
    }

    /// The invisible mutable revisions, `None` when not tracking.
    pub fn invisible_revs(&self) -> Option<&BTreeSet<Rev>> {
        self.tracking()
            .then(|| self.visible_heads.invisible_revs(&self.graph))
    }

    /// Revisions hidden from the user under the active visibility mode.
    pub fn hidden_revs(&self) -> &BTreeSet<Rev> {
        if self.enabled() {
            return self.visible_heads.invisible_revs(&self.graph);
        }
        self.legacy_hidden
            .get_or_init(|| legacy::hidden_revs(&self.graph))
    }

    /// Revisions visible to the user under the active visibility mode.
    pub fn visible_revs(&self) -> BTreeSet<Rev> {
        let hidden = self.hidden_revs();
        (0..self.graph.len() as Rev)
            .filter(|rev| !hidden.contains(rev))
            .collect()
    }

    /// Updates the visible mutable heads to be exactly `new_heads`.
    pub fn set_visible_heads(
        &mut self,
        new_heads: impl IntoIterator<Item = NodeId>,
    ) -> Result<(), RepoError> {
        self.update_visibility(|tracker, graph, tr| tracker.set_heads(graph, new_heads, tr))
    }

    /// Adds nodes, and all their ancestors, to the visible set.
    pub fn add(&mut self, new_nodes: impl IntoIterator<Item = NodeId>) -> Result<(), RepoError> {
        self.update_visibility(|tracker, graph, tr| tracker.add(graph, new_nodes, tr))
    }

    /// Removes nodes from the visible set.
    ///
    /// Nodes with visible descendants are not removed, so the removed nodes
    /// must be heads or ancestors of other nodes removed together. Obsolete
    /// ancestors that become heads through the removal are removed too. With
    /// the history below, rebasing D to D' and removing D removes both D and
    /// C:
    ///
    /// ```text
    ///    o D'
    ///    |
    ///    o B
    ///    |
    ///    | o D
    ///    | |
    ///    | x C
    ///    |/
    ///    o A
    /// ```
    pub fn remove(&mut self, old_nodes: impl IntoIterator<Item = NodeId>) -> Result<(), RepoError> {
        self.update_visibility(|tracker, graph, tr| tracker.remove(graph, old_nodes, tr))
    }

    /// Adjusts the tracked heads after commits changed phase.
    ///
    /// Must be called with the repository lock held, inside the transaction
    /// that changes the phases. Nodes that became public go in `new_public`,
    /// nodes that were public and are now draft go in `new_draft`.
    pub fn phase_adjust(
        &mut self,
        tr: &mut Transaction,
        new_draft: impl IntoIterator<Item = NodeId>,
        new_public: impl IntoIterator<Item = NodeId>,
    ) {
        if !self.tracking() {
            return;
        }
        if self
            .visible_heads
            .phase_adjust(&self.graph, tr, new_draft, new_public)
        {
            self.invalidate_volatile_sets();
        }
    }

    fn update_visibility<F>(&mut self, update: F) -> Result<(), RepoError>
    where
        F: FnOnce(&mut VisibleHeads, &G, &mut Transaction) -> bool,
    {
        if !self.tracking() {
            return Ok(());
        }
        let _lock = self.lock()?;
        let mut tr = self.transaction("update-visibility");
        if update(&mut self.visible_heads, &self.graph, &mut tr) {
            self.invalidate_volatile_sets();
        }
        self.close_transaction(tr)
    }

    /// Starts tracking visibility through visible mutable heads.
    ///
    /// The initial heads are the mutable heads that obsolescence markers
    /// leave visible. Bundle overlays never migrate.
    pub fn start_tracking(&mut self) -> Result<(), RepoError> {
        if self.tracking() || self.is_bundle() {
            return Ok(());
        }
        let _lock = self.lock()?;
        self.requirements.insert(TRACKING_REQUIREMENT);

        let result = self.write_initial_heads();
        if result.is_err() {
            self.requirements.remove(TRACKING_REQUIREMENT);
            if let Err(reload) = self.reload() {
                tracing::warn!("failed to reload visible heads after error: {reload}");
            }
        }
        result
    }

    fn write_initial_heads(&mut self) -> Result<(), RepoError> {
        let heads = legacy::visible_mutable_heads(&self.graph);
        let mut tr = self.transaction("update-visibility");
        if self.visible_heads.set_heads(&self.graph, heads, &mut tr) {
            self.invalidate_volatile_sets();
        }
        self.close_transaction(tr)?;
        self.requirements.write(&mut self.store)?;
        self.invalidate_volatile_sets();
        Ok(())
    }

    /// Stops tracking visibility and reverts to obsolescence markers.
    ///
    /// Bundle overlays never migrate.
    pub fn stop_tracking(&mut self) -> Result<(), RepoError> {
        if !self.tracking() || self.is_bundle() {
            return Ok(());
        }
        let _lock = self.lock()?;
        let mut tr = self.transaction("disable-visibility");
        self.requirements.remove(TRACKING_REQUIREMENT);
        if let Err(err) = self.requirements.write(&mut self.store) {
            self.requirements.insert(TRACKING_REQUIREMENT);
            return Err(err.into());
        }
        tr.add_file_generator(VISIBILITY_GENERATOR, PendingWrite::new(VISIBLE_HEADS, Vec::new()));
        // The record is emptied, the tracked list is not written.
        self.apply_transaction(tr, false)?;
        self.reload()
    }

    /// Moves the repository to the mode named by `visibility.automigrate`.
    ///
    /// Runs at most once per open repository.
    pub fn automigrate(&mut self) -> Result<(), RepoError> {
        if self.migrated {
            return Ok(());
        }
        self.migrated = true;
        match self.config.automigrate {
            Some(AutoMigrate::Start) if !self.tracking() => {
                tracing::info!("switching to explicit tracking of visible commits");
                self.start_tracking()
            }
            Some(AutoMigrate::Stop) if self.tracking() => {
                tracing::info!("reverting to tracking visibility through obsmarkers");
                self.stop_tracking()
            }
            _ => Ok(()),
        }
    }
}
