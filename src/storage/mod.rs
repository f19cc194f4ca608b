//! Trace storage
//!
//! Keeps every recorded step in an ordered in-memory map and persists it as
//! a single bincode file:
//! - [`TraceEntry`] is the record for one executed instruction
//! - [`TraceDb`] is the shared, thread-safe store the tracer fills in
//! - [`TraceDb::save`] / [`TraceDb::load`] round-trip the whole map

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Coarse classification of a decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsnKind {
    /// Pushes a new frame (`call`, `bl`, ...)
    Call,
    /// Returns to the caller
    Ret,
    /// Transfers control without a frame change
    Jump,
    /// Everything else
    Other,
}

/// Snapshot of the tracee register file at one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    /// Program counter
    pub pc: u64,
    /// Stack pointer
    pub sp: u64,
    /// General-purpose registers in capture order
    pub gpr: Vec<(String, u64)>,
}

/// One byte of tracee memory that changed between two captures of the same
/// stack window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemChange {
    /// Absolute address of the byte
    pub addr: u64,
    /// Value at the window's previous capture
    pub old_val: u8,
    /// Value at this capture, read before the entry's instruction runs
    pub new_val: u8,
}

/// Record of one executed instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Step index, starting at 0 and gapless within a session
    pub step: u64,
    /// Address the instruction was fetched from
    pub pc: u64,
    /// Raw instruction bytes
    pub insn_bytes: Vec<u8>,
    /// Decoded mnemonic, `"??"` when the decoder could not keep up
    pub mnemonic: String,
    /// Decoded operand string
    pub operands: String,
    /// Control-flow classification of the instruction
    pub kind: InsnKind,
    /// Call depth relative to the attach point
    pub depth: u32,
    /// Register snapshot taken before the instruction executed
    pub regs: RegisterFile,
    /// Stack-window bytes that changed since the window was last captured;
    /// a write surfaces on the first entry recorded after it
    pub mem_changes: Vec<MemChange>,
}

/// Ordered, shareable store of trace entries
///
/// Clones share the same underlying map, so the tracer thread and the viewer
/// can hold the database at the same time.
#[derive(Debug, Clone)]
pub struct TraceDb {
    entries: Arc<RwLock<BTreeMap<u64, TraceEntry>>>,
}

impl TraceDb {
    /// Create an empty database
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Insert one entry, keyed by its step index
    pub fn insert(&self, entry: TraceEntry) {
        self.entries.write().insert(entry.step, entry);
    }

    /// Fetch a single step
    #[must_use]
    pub fn get(&self, step: u64) -> Option<TraceEntry> {
        self.entries.read().get(&step).cloned()
    }

    /// Fetch all steps in `start..=end`, in step order
    ///
    /// A reversed range is empty, not an error; the viewer feeds raw query
    /// parameters in here.
    #[must_use]
    pub fn get_range(&self, start: u64, end: u64) -> Vec<TraceEntry> {
        if start > end {
            return Vec::new();
        }
        self.entries
            .read()
            .range(start..=end)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    /// Fetch the entire trace in step order
    #[must_use]
    pub fn get_all(&self) -> Vec<TraceEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Number of recorded steps
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    /// Check whether anything has been recorded yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Write the whole trace to `path` as bincode
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let path = path.as_ref();
        let bytes = {
            let entries = self.entries.read();
            bincode::serialize(&*entries).map_err(StorageError::Encode)?
        };
        std::fs::write(path, bytes).map_err(|source| StorageError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a trace previously written by [`TraceDb::save`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| StorageError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: BTreeMap<u64, TraceEntry> =
            bincode::deserialize(&bytes).map_err(StorageError::Decode)?;
        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
        })
    }
}

impl Default for TraceDb {
    fn default() -> Self {
        Self::new()
    }
}
