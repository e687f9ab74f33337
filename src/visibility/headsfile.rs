//! Encoding of the `visibleheads` record.
//!
//! Version 1 is a single line containing `v1`, followed by the lowercase hex
//! id of each visible head, one per line, in tracker order.

use std::fmt::Write;

use crate::node::NodeId;
use crate::store::Store;
use crate::visibility::FormatError;
use crate::visibility::LoadError;

/// Name of the record holding the visible heads.
pub const VISIBLE_HEADS: &str = "visibleheads";

/// Supported file format version.
pub const FORMAT_VERSION: &str = "v1";

pub fn encode(heads: &[NodeId]) -> Vec<u8> {
    let mut out = String::with_capacity(FORMAT_VERSION.len() + 1 + heads.len() * 41);
    out.push_str(FORMAT_VERSION);
    out.push('\n');
    for head in heads {
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{head:x}");
    }
    out.into_bytes()
}

/// Decodes a `visibleheads` record.
///
/// An empty record decodes to an empty list, that is what disabling
/// tracking leaves behind.
pub fn decode(data: &[u8]) -> Result<Vec<NodeId>, FormatError> {
    let text = std::str::from_utf8(data).map_err(|_| FormatError::NotUtf8)?;
    let mut lines = text.lines();
    let Some(version) = lines.next() else {
        return Ok(Vec::new());
    };
    if version.trim() != FORMAT_VERSION {
        return Err(FormatError::UnknownVersion(version.to_owned()));
    }
    lines
        .map(|line| {
            let line = line.trim();
            NodeId::from_hex(line).ok_or_else(|| FormatError::InvalidNode(line.to_owned()))
        })
        .collect()
}

/// Reads the heads record, `None` if it does not exist yet.
pub fn load<S: Store + ?Sized>(store: &S) -> Result<Option<Vec<NodeId>>, LoadError> {
    match store.try_read(VISIBLE_HEADS)? {
        Some(data) => Ok(Some(decode(&data)?)),
        None => Ok(None),
    }
}
