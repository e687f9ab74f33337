//! Commonly used types and traits, intended to be glob imported as
//! `use visibleheads::prelude::*;`.

pub use crate::config::AutoMigrate;
pub use crate::config::Config;
pub use crate::dag::memorydag::MemoryDag;
pub use crate::dag::Dag;
pub use crate::dag::Graph;
pub use crate::dag::Obsolescence;
pub use crate::dag::Phase;
pub use crate::dag::Phases;
pub use crate::node::NodeId;
pub use crate::node::Rev;
pub use crate::node::NULL_ID;
pub use crate::repo::Repo;
pub use crate::repo::RepoError;
pub use crate::store::fsstore::FsStore;
pub use crate::store::memorystore::MemoryStore;
pub use crate::store::Store;
pub use crate::transaction::Transaction;
pub use crate::visibility::VisibleHeads;
