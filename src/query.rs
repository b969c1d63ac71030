//! Query Layer
//!
//! Parallel prefix-filtered enumeration over a built `NodeTable`, and the
//! borrowed `NodeView` handed to callers.

use crate::error::Result;
use crate::node_table::{Node, NodeTable, Stream};
use crate::ntfs::data_run::Fragment;
use crate::ntfs::mft::{StandardTimes, StreamKind};
use crate::ntfs::structs::{file_attributes, filetime_to_datetime};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;

// ============================================================================
// Node View
// ============================================================================

/// Read-only view of one live node
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    table: &'a NodeTable,
    inode: u64,
    node: &'a Node,
}

impl<'a> NodeView<'a> {
    /// View of a live node, `None` for placeholder slots
    pub fn new(table: &'a NodeTable, inode: u64) -> Option<Self> {
        table.get(inode).map(|node| Self { table, inode, node })
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    pub fn parent(&self) -> u64 {
        self.node.parent
    }

    pub fn flags(&self) -> u32 {
        self.node.flags
    }

    pub fn size(&self) -> u64 {
        self.node.size
    }

    pub fn name(&self) -> &'a str {
        self.table.name(self.node.name_index)
    }

    /// Path from the volume root, computed on first use
    pub fn full_path(&self) -> Result<Arc<str>> {
        self.table.full_path(self.inode)
    }

    pub fn is_directory(&self) -> bool {
        self.node.flags & file_attributes::DIRECTORY != 0
    }

    pub fn is_hidden(&self) -> bool {
        self.node.flags & file_attributes::HIDDEN != 0
    }

    pub fn is_system(&self) -> bool {
        self.node.flags & file_attributes::SYSTEM != 0
    }

    pub fn is_reparse_point(&self) -> bool {
        self.node.flags & file_attributes::REPARSE_POINT != 0
    }

    /// Timestamps, present when opened with `RetrieveMode::STANDARD_INFO`
    pub fn timestamps(&self) -> Option<&'a StandardTimes> {
        self.table.times(self.inode)
    }

    /// Streams, present when opened with `FRAGMENTS` or `STREAMS`
    pub fn streams(&self) -> &'a [Stream] {
        self.table.streams(self.inode)
    }

    pub fn stream_name(&self, stream: &Stream) -> &'a str {
        self.table.name(stream.name_index)
    }

    /// Owned, serializable copy of this node
    pub fn to_record(&self) -> Result<NodeRecord> {
        let times = self.timestamps();
        let render = |filetime: u64| filetime_to_datetime(filetime).map(|dt| dt.to_rfc3339());

        Ok(NodeRecord {
            inode: self.inode,
            parent: self.parent(),
            name: self.name().to_string(),
            path: self.full_path()?.to_string(),
            size: self.size(),
            flags: self.flags(),
            is_directory: self.is_directory(),
            created: times.and_then(|t| render(t.created)),
            modified: times.and_then(|t| render(t.modified)),
            mft_changed: times.and_then(|t| render(t.mft_changed)),
            accessed: times.and_then(|t| render(t.accessed)),
            streams: self
                .streams()
                .iter()
                .map(|s| StreamRecord {
                    kind: s.kind,
                    name: self.stream_name(s).to_string(),
                    resident: s.resident,
                    size: s.size,
                    allocated_size: s.allocated_size,
                    clusters: s.clusters,
                    fragments: s.fragments.clone(),
                })
                .collect(),
        })
    }
}

impl std::fmt::Debug for NodeView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeView")
            .field("inode", &self.inode)
            .field("parent", &self.node.parent)
            .field("name", &self.name())
            .field("size", &self.node.size)
            .field("flags", &self.node.flags)
            .finish()
    }
}

/// Serializable node for JSON export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeRecord {
    pub inode: u64,
    pub parent: u64,
    pub name: String,
    pub path: String,
    pub size: u64,
    pub flags: u32,
    pub is_directory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mft_changed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessed: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<StreamRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamRecord {
    pub kind: StreamKind,
    pub name: String,
    pub resident: bool,
    pub size: u64,
    pub allocated_size: u64,
    pub clusters: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fragments: Vec<Fragment>,
}

// ============================================================================
// Prefix Query
// ============================================================================

/// Every live node whose full path starts with `prefix`.
///
/// Matching is case-insensitive and per character. Both `/` and `\` in the
/// prefix match the table's separator. Results are unordered.
pub fn nodes_under<'a>(table: &'a NodeTable, prefix: &str) -> Result<Vec<NodeView<'a>>> {
    let prefix = normalize_prefix(prefix, table.separator());

    table
        .nodes()
        .par_iter()
        .enumerate()
        .filter(|(_, node)| node.valid)
        .filter_map(|(inode, node)| {
            let view = NodeView {
                table,
                inode: inode as u64,
                node,
            };
            if prefix.is_empty() {
                return Some(Ok(view));
            }
            match view.full_path() {
                Ok(path) if starts_with_ignore_case(&path, &prefix) => Some(Ok(view)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }
        })
        .collect()
}

/// Fold a prefix into comparable characters with the table's separator
fn normalize_prefix(prefix: &str, separator: char) -> Vec<char> {
    prefix
        .trim_start_matches(['/', '\\'])
        .chars()
        .map(|c| if c == '/' || c == '\\' { separator } else { c })
        .map(fold_case)
        .collect()
}

fn starts_with_ignore_case(path: &str, prefix: &[char]) -> bool {
    let mut chars = path.chars();
    prefix
        .iter()
        .all(|p| chars.next().is_some_and(|c| fold_case(c) == *p))
}

/// Simple uppercase fold; characters with multi-char mappings compare as-is
fn fold_case(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) => u,
        _ => c,
    }
}
