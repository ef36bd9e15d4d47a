use std::collections::HashMap;

use tracing::debug;

use crate::error::Result;
use crate::model::FdEntry;
use crate::platform::{self, ProcConfig};

/// Socket inode -> owning pid, built from every readable `<pid>/fd` directory.
///
/// A socket inherited across `fork` is open in several processes. The index
/// keeps the first pid found for each inode (pids are scanned in ascending
/// order) and does not try to pick a "primary" owner.
#[derive(Debug, Default)]
pub struct FdInodeIndex {
    entries: Vec<FdEntry>,
    by_inode: HashMap<u64, u32>,
}

impl FdInodeIndex {
    /// Scan all processes under the proc root.
    ///
    /// Processes whose descriptors cannot be listed are skipped.
    pub fn build(config: &ProcConfig) -> Result<Self> {
        let pids = platform::list_pids(config)?;
        let mut skipped = 0usize;
        let mut entries = Vec::new();
        for pid in &pids {
            match platform::socket_fds(config, *pid) {
                Some(fds) => entries.extend(fds),
                None => skipped += 1,
            }
        }
        debug!(
            processes = pids.len(),
            skipped,
            sockets = entries.len(),
            "built fd inode index"
        );
        Ok(Self::from_entries(entries))
    }

    /// Build an index from entries in discovery order.
    pub fn from_entries(entries: impl IntoIterator<Item = FdEntry>) -> Self {
        let entries: Vec<FdEntry> = entries.into_iter().collect();
        let mut by_inode = HashMap::with_capacity(entries.len());
        for entry in &entries {
            by_inode.entry(entry.inode).or_insert(entry.pid);
        }
        Self { entries, by_inode }
    }

    /// First pid found holding `inode`, if any.
    pub fn lookup(&self, inode: u64) -> Option<u32> {
        self.by_inode.get(&inode).copied()
    }

    pub fn entries(&self) -> &[FdEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
