//! Append-only record of every node that was ever a visible head.
//!
//! The `allheads` record starts with a 16 byte magic marker followed by one
//! fixed width node record per member, in insertion order. New members are
//! buffered by [`NodeSet::add`] and appended by [`NodeSet::flush`], existing
//! bytes are never rewritten. A crash in the middle of an append can leave a
//! partial record at the tail; loading drops it and the next flush rewrites
//! the record from scratch.

use std::collections::HashSet;
use std::io;

use hex_literal::hex;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

use crate::node::NodeId;
use crate::node::RawNodeId;
use crate::node::NODE_LEN;
use crate::store::Store;
use crate::visibility::FormatError;
use crate::visibility::LoadError;

/// Name of the record holding every head ever tracked.
pub const ALL_HEADS: &str = "allheads";

const MAGIC_MARKER: [u8; 16] = hex!("5A1C9E0F3B7D4E26A81F6C02D95B7E43");

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Copy, Clone)]
#[repr(C)]
struct SetHeader {
    magic_marker: [u8; 16],
}

const HEADER_LEN: usize = std::mem::size_of::<SetHeader>();

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Copy, Clone)]
#[repr(C)]
struct NodeRecord {
    node: RawNodeId,
}

/// A grow-only set of nodes persisted in the `allheads` record.
#[derive(Debug, Default)]
pub struct NodeSet {
    members: HashSet<NodeId>,
    order: Vec<NodeId>,
    pending: Vec<NodeId>,
    /// Length of the on-disk record that is known to be well formed.
    persisted_len: usize,
    /// The on-disk record has a damaged tail and must be rewritten.
    rewrite: bool,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the set from `store`, an absent record yields an empty set.
    pub fn load<S: Store + ?Sized>(store: &S) -> Result<Self, LoadError> {
        let mut set = Self::new();
        let Some(data) = store.try_read(ALL_HEADS)? else {
            return Ok(set);
        };
        if data.is_empty() {
            return Ok(set);
        }

        let Ok((header, body)) = SetHeader::read_from_prefix(&data) else {
            tracing::warn!("allheads: discarding truncated header ({} bytes)", data.len());
            set.rewrite = true;
            return Ok(set);
        };
        if header.magic_marker != MAGIC_MARKER {
            return Err(FormatError::BadMagic.into());
        }

        let mut records = body.chunks_exact(NODE_LEN);
        for chunk in &mut records {
            if let Ok(record) = NodeRecord::read_from_bytes(chunk) {
                let node = NodeId::new(record.node);
                if set.members.insert(node) {
                    set.order.push(node);
                }
            }
        }
        let tail = records.remainder().len();
        if tail != 0 {
            tracing::warn!("allheads: discarding {tail} trailing bytes of a partial record");
            set.rewrite = true;
        }
        set.persisted_len = data.len() - tail;
        Ok(set)
    }

    /// Adds `node`, returning `true` if it was not a member yet.
    ///
    /// The addition is only durable after the next [`NodeSet::flush`].
    pub fn add(&mut self, node: NodeId) -> bool {
        if !self.members.insert(node) {
            return false;
        }
        self.order.push(node);
        self.pending.push(node);
        true
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.members.contains(node)
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeId> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns `true` if there are additions that have not been flushed.
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty() || self.rewrite
    }

    /// Persists buffered additions.
    pub fn flush<S: Store + ?Sized>(&mut self, store: &mut S) -> io::Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }

        if self.rewrite {
            let data = encode(&self.order);
            store.write(ALL_HEADS, &data)?;
            self.persisted_len = data.len();
            self.rewrite = false;
        } else {
            let mut data = Vec::with_capacity(HEADER_LEN + self.pending.len() * NODE_LEN);
            if self.persisted_len == 0 {
                data.extend_from_slice(header().as_bytes());
            }
            for node in &self.pending {
                data.extend_from_slice(record(node).as_bytes());
            }
            store.append(ALL_HEADS, &data)?;
            self.persisted_len += data.len();
        }
        self.pending.clear();
        Ok(())
    }
}

fn header() -> SetHeader {
    SetHeader {
        magic_marker: MAGIC_MARKER,
    }
}

fn record(node: &NodeId) -> NodeRecord {
    NodeRecord { node: **node }
}

fn encode(nodes: &[NodeId]) -> Vec<u8> {
    let mut data = Vec::with_capacity(HEADER_LEN + nodes.len() * NODE_LEN);
    data.extend_from_slice(header().as_bytes());
    for node in nodes {
        data.extend_from_slice(record(node).as_bytes());
    }
    data
}
