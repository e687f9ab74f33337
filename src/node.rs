//! Commit identifiers.
//!
//! A [`NodeId`] is the content address of a commit. The tracker only ever
//! compares and hashes them, ordering is always imposed by the list or graph
//! that holds them.

use std::borrow::Borrow;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::LowerHex;
use std::ops::Deref;

use hex::FromHex;

#[cfg(feature = "proptest")]
use proptest::prelude::Rng;

/// The length of a commit identifier in bytes.
pub const NODE_LEN: usize = 20;

/// Number of bytes rendered by [`NodeId::short`].
const SHORT_LEN: usize = 6;

/// Represents a 20 byte commit identifier.
pub type RawNodeId = [u8; NODE_LEN];

/// A revision number handed out by the commit graph.
///
/// Revisions are dense and topologically ordered, a parent always has a
/// smaller revision than any of its children.
pub type Rev = u32;

/// The identifier of the null commit, used as the missing parent of roots.
pub const NULL_ID: NodeId = NodeId([0; NODE_LEN]);

/// A fixed width, content addressed commit identifier.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct NodeId(RawNodeId);

impl NodeId {
    pub const fn new(raw: RawNodeId) -> Self {
        Self(raw)
    }

    /// Derives an identifier from arbitrary content by hashing it.
    ///
    /// The blake3 digest is truncated to [`NODE_LEN`] bytes.
    pub fn from_content(content: impl AsRef<[u8]>) -> Self {
        let digest = blake3::hash(content.as_ref());
        let mut raw = [0; NODE_LEN];
        raw.copy_from_slice(&digest.as_bytes()[..NODE_LEN]);
        Self(raw)
    }

    /// Parses a 40 digit hexadecimal identifier.
    ///
    /// Returns `None` for anything that is not exactly [`NODE_LEN`] bytes of
    /// hex. Both cases are accepted.
    pub fn from_hex(hex: &str) -> Option<Self> {
        RawNodeId::from_hex(hex).ok().map(Self)
    }

    pub fn is_null(&self) -> bool {
        *self == NULL_ID
    }

    /// Abbreviated lowercase hex form used in log output.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..SHORT_LEN])
    }
}

impl Deref for NodeId {
    type Target = RawNodeId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Borrow<RawNodeId> for NodeId {
    fn borrow(&self) -> &RawNodeId {
        &self.0
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<RawNodeId> for NodeId {
    fn from(raw: RawNodeId) -> Self {
        Self(raw)
    }
}

impl From<NodeId> for RawNodeId {
    fn from(node: NodeId) -> Self {
        node.0
    }
}

impl LowerHex for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:x}")
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

#[cfg(feature = "proptest")]
pub struct NodeIdValueTree(NodeId);

/// Strategy producing uniformly random, non-null node identifiers.
#[cfg(feature = "proptest")]
#[derive(Debug)]
pub struct RandomNodeId();

#[cfg(feature = "proptest")]
impl proptest::strategy::Strategy for RandomNodeId {
    type Tree = NodeIdValueTree;
    type Value = NodeId;

    fn new_tree(
        &self,
        runner: &mut proptest::prelude::prop::test_runner::TestRunner,
    ) -> proptest::prelude::prop::strategy::NewTree<Self> {
        let rng = runner.rng();
        let mut raw = [0; NODE_LEN];
        rng.fill_bytes(&mut raw[..]);
        raw[0] |= 1;

        Ok(NodeIdValueTree(NodeId(raw)))
    }
}

#[cfg(feature = "proptest")]
impl proptest::strategy::ValueTree for NodeIdValueTree {
    type Value = NodeId;

    fn simplify(&mut self) -> bool {
        false
    }
    fn complicate(&mut self) -> bool {
        false
    }
    fn current(&self) -> NodeId {
        self.0
    }
}
