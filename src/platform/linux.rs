use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;

use procfs::process::{all_processes_with_root, FDTarget, Process};
use tracing::debug;

use super::ProcConfig;
use crate::error::Result;
use crate::model::FdEntry;
use crate::net::resolver::ProgramLookup;

// ---------------------------------------------------------------------------
// Process enumeration
// ---------------------------------------------------------------------------

/// List the pids under the proc root in ascending order.
///
/// Failing to read the root itself is fatal. Processes that vanish during
/// the listing are skipped.
pub fn list_pids(config: &ProcConfig) -> Result<Vec<u32>> {
    let mut pids: Vec<u32> = all_processes_with_root(config.root())?
        .filter_map(|p| p.ok())
        .filter_map(|p| u32::try_from(p.pid()).ok())
        .collect();
    pids.sort_unstable();
    Ok(pids)
}

/// Collect the socket descriptors of one process.
///
/// Returns `None` when the fd directory cannot be opened, which happens
/// when the process exited mid-scan or belongs to another user.
pub(crate) fn socket_fds(config: &ProcConfig, pid: u32) -> Option<Vec<FdEntry>> {
    let process = match Process::new_with_root(config.pid_dir(pid)) {
        Ok(p) => p,
        Err(e) => {
            debug!(pid, error = %e, "skipping process");
            return None;
        }
    };

    let fds = match process.fd() {
        Ok(fds) => fds,
        Err(e) => {
            debug!(pid, error = %e, "cannot list descriptors");
            return None;
        }
    };

    let mut entries = Vec::new();
    for fd_info in fds {
        // A descriptor closed between readdir and readlink is not an error.
        let fd_info = match fd_info {
            Ok(fi) => fi,
            Err(_) => continue,
        };
        if let FDTarget::Socket(inode) = fd_info.target {
            entries.push(FdEntry {
                pid,
                fd: fd_info.fd,
                inode,
            });
        }
    }
    Some(entries)
}

// ---------------------------------------------------------------------------
// Program names
// ---------------------------------------------------------------------------

/// Looks up program names from `<root>/<pid>/exe`, falling back to `comm`.
///
/// Names are cached for the lifetime of the lookup, which is one
/// resolution pass.
pub struct ProcfsProgramLookup {
    config: ProcConfig,
    cache: RefCell<HashMap<u32, Option<String>>>,
}

impl ProcfsProgramLookup {
    pub fn new(config: ProcConfig) -> Self {
        Self {
            config,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn read_name(&self, pid: u32) -> Option<String> {
        let from_exe = Process::new_with_root(self.config.pid_dir(pid))
            .and_then(|p| p.exe())
            .ok()
            .and_then(|exe| {
                exe.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            // Deleted binaries show up as "name (deleted)".
            .map(|name| name.trim_end_matches(" (deleted)").to_string());

        from_exe.or_else(|| {
            fs::read_to_string(self.config.pid_dir(pid).join("comm"))
                .ok()
                .map(|comm| comm.trim_end().to_string())
                .filter(|comm| !comm.is_empty())
        })
    }
}

impl ProgramLookup for ProcfsProgramLookup {
    fn program_name(&self, pid: u32) -> Option<String> {
        if let Some(cached) = self.cache.borrow().get(&pid) {
            return cached.clone();
        }
        let name = self.read_name(pid);
        self.cache.borrow_mut().insert(pid, name.clone());
        name
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
