//! Node Table and Name Interner
//!
//! The in-memory result of an MFT scan: one compact `Node` per inode slot,
//! a deduplicated name table, optional timestamp and stream arrays, and a
//! lazily filled path cache. Nodes refer to each other by inode index only.

use crate::config::RetrieveMode;
use crate::error::{MftError, Result};
use crate::ntfs::data_run::Fragment;
use crate::ntfs::mft::{ParsedRecord, ParsedStream, StandardTimes, StreamKind};
use crate::ntfs::structs::ROOT_RECORD_NUMBER;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Upper bound on path depth. A 32767-character path holds at most this
/// many one-character segments.
pub const MAX_PATH_DEPTH: usize = 16384;

// ============================================================================
// Node and Stream
// ============================================================================

/// One inode slot. Slots that are not live stay at `Node::default()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Node {
    pub valid: bool,
    /// File attribute flags
    pub flags: u32,
    /// Parent inode index
    pub parent: u64,
    /// Logical size of the unnamed data stream
    pub size: u64,
    /// Index into the name interner
    pub name_index: u32,
}

/// One stream of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub kind: StreamKind,
    pub name_index: u32,
    pub resident: bool,
    pub size: u64,
    pub allocated_size: u64,
    /// Clusters backed by disk space
    pub clusters: u64,
    pub start_vcn: u64,
    pub fragments: Vec<Fragment>,
}

// ============================================================================
// Name Interner
// ============================================================================

/// Append-only string table; equal names share one index
#[derive(Debug, Clone)]
pub struct NameInterner {
    names: Vec<Arc<str>>,
    lookup: HashMap<Arc<str>, u32>,
}

impl Default for NameInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl NameInterner {
    /// Index 0 is always the empty name
    pub fn new() -> Self {
        let empty: Arc<str> = Arc::from("");
        let mut lookup = HashMap::new();
        lookup.insert(empty.clone(), 0);
        Self {
            names: vec![empty],
            lookup,
        }
    }

    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(index) = self.lookup.get(name) {
            return *index;
        }
        let index = self.names.len() as u32;
        let name: Arc<str> = Arc::from(name);
        self.names.push(name.clone());
        self.lookup.insert(name, index);
        index
    }

    /// Name at `index`, or "" for an unknown index
    pub fn get(&self, index: u32) -> &str {
        self.names.get(index as usize).map(|n| &**n).unwrap_or("")
    }

    /// Number of distinct names, the empty name included
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.len() <= 1
    }
}

// ============================================================================
// Node Table
// ============================================================================

/// Dense inode-indexed table built once per volume
pub struct NodeTable {
    nodes: Vec<Node>,
    names: NameInterner,
    times: Option<Vec<StandardTimes>>,
    streams: Option<Vec<Vec<Stream>>>,
    separator: char,
    paths: DashMap<u64, Arc<str>>,
    live: u64,
}

impl NodeTable {
    /// Empty table with `capacity` slots; `mode` decides which side arrays exist
    pub fn new(capacity: u64, mode: RetrieveMode, separator: char) -> Self {
        let capacity = capacity as usize;
        Self {
            nodes: vec![Node::default(); capacity],
            names: NameInterner::new(),
            times: mode
                .contains(RetrieveMode::STANDARD_INFO)
                .then(|| vec![StandardTimes::default(); capacity]),
            streams: mode.keeps_streams().then(|| vec![Vec::new(); capacity]),
            separator,
            paths: DashMap::new(),
            live: 0,
        }
    }

    /// Store a parsed base record in its slot
    pub fn insert(&mut self, record: ParsedRecord) {
        let slot = record.inode as usize;
        if slot >= self.nodes.len() {
            return;
        }

        if !self.nodes[slot].valid {
            self.live += 1;
        }
        self.nodes[slot] = Node {
            valid: true,
            flags: record.flags,
            parent: record.parent,
            size: record.size,
            name_index: self.names.intern(&record.name),
        };

        if let (Some(times), Some(parsed)) = (self.times.as_mut(), record.times) {
            times[slot] = parsed;
        }

        if self.streams.is_some() {
            let streams: Vec<Stream> = record
                .streams
                .into_iter()
                .map(|s| self.intern_stream(s))
                .collect();
            if let Some(table) = self.streams.as_mut() {
                table[slot] = streams;
            }
        }
    }

    fn intern_stream(&mut self, stream: ParsedStream) -> Stream {
        Stream {
            kind: stream.kind,
            name_index: self.names.intern(&stream.name),
            resident: stream.resident,
            size: stream.size,
            allocated_size: stream.allocated_size,
            clusters: stream.clusters,
            start_vcn: stream.start_vcn,
            fragments: stream.fragments,
        }
    }

    /// Reset a slot to the placeholder
    pub fn remove(&mut self, inode: u64) {
        let slot = inode as usize;
        let Some(node) = self.nodes.get_mut(slot) else {
            return;
        };
        if node.valid {
            self.live -= 1;
        }
        *node = Node::default();
        if let Some(times) = self.times.as_mut() {
            times[slot] = StandardTimes::default();
        }
        if let Some(streams) = self.streams.as_mut() {
            streams[slot].clear();
        }
        self.paths.clear();
    }

    /// Live node at `inode`
    pub fn get(&self, inode: u64) -> Option<&Node> {
        self.nodes.get(inode as usize).filter(|n| n.valid)
    }

    /// All slots, placeholders included
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.live as usize
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots
    pub fn capacity(&self) -> u64 {
        self.nodes.len() as u64
    }

    pub fn names(&self) -> &NameInterner {
        &self.names
    }

    pub fn name(&self, index: u32) -> &str {
        self.names.get(index)
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Timestamps of a live node, when they were retrieved
    pub fn times(&self, inode: u64) -> Option<&StandardTimes> {
        self.get(inode)?;
        self.times.as_ref()?.get(inode as usize)
    }

    /// Streams of a node; empty unless streams or fragments were retrieved
    pub fn streams(&self, inode: u64) -> &[Stream] {
        self.streams
            .as_ref()
            .and_then(|s| s.get(inode as usize))
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }

    /// Live nodes that sit on a parent cycle or whose ancestry leads into one
    pub fn find_cycles(&self) -> Vec<u64> {
        const UNVISITED: u8 = 0;
        const IN_PROGRESS: u8 = 1;
        const ROOTED: u8 = 2;
        const CYCLIC: u8 = 3;

        let mut state = vec![UNVISITED; self.nodes.len()];
        let mut chain = Vec::new();
        let mut cyclic = Vec::new();

        for start in 0..self.nodes.len() {
            if !self.nodes[start].valid || state[start] != UNVISITED {
                continue;
            }

            let mut current = start;
            let outcome = loop {
                if current as u64 == ROOT_RECORD_NUMBER {
                    break ROOTED;
                }
                match self.nodes.get(current) {
                    Some(node) if node.valid => match state[current] {
                        UNVISITED => {
                            state[current] = IN_PROGRESS;
                            chain.push(current);
                            current = node.parent as usize;
                        }
                        IN_PROGRESS => break CYCLIC,
                        done => break done,
                    },
                    // Orphan: the walk ends at a missing ancestor
                    _ => break ROOTED,
                }
            };

            for slot in chain.drain(..) {
                state[slot] = outcome;
                if outcome == CYCLIC {
                    cyclic.push(slot as u64);
                }
            }
        }

        cyclic
    }

    /// Full path of a live node, joined with the table's separator.
    ///
    /// The root maps to "", its children to their bare name. An orphan's
    /// path starts below its first missing ancestor. Results are cached.
    pub fn full_path(&self, inode: u64) -> Result<Arc<str>> {
        if let Some(path) = self.paths.get(&inode) {
            return Ok(path.clone());
        }
        self.get(inode).ok_or(MftError::NodeNotFound(inode))?;

        // Walk up until the root, a missing ancestor or a cached ancestor
        let mut chain = Vec::new();
        let mut base: Option<Arc<str>> = None;
        let mut current = inode;
        loop {
            if current == ROOT_RECORD_NUMBER {
                base = Some(Arc::from(""));
                break;
            }
            if let Some(path) = self.paths.get(&current) {
                base = Some(path.clone());
                break;
            }
            let Some(node) = self.get(current) else {
                break;
            };
            if chain.len() >= MAX_PATH_DEPTH {
                return Err(MftError::ParentCycle(inode));
            }
            chain.push((current, node.name_index));
            current = node.parent;
        }

        let mut path = base.unwrap_or_else(|| Arc::from(""));
        if inode == ROOT_RECORD_NUMBER {
            self.paths.insert(inode, path.clone());
        }
        for (slot, name_index) in chain.into_iter().rev() {
            let name = self.names.get(name_index);
            path = if path.is_empty() {
                Arc::from(name)
            } else {
                let mut joined = String::with_capacity(path.len() + 1 + name.len());
                joined.push_str(&path);
                joined.push(self.separator);
                joined.push_str(name);
                Arc::from(joined)
            };
            self.paths.insert(slot, path.clone());
        }

        Ok(path)
    }
}
