use std::path::{Path, PathBuf};

/// Where the proc filesystem is mounted.
#[derive(Debug, Clone)]
pub struct ProcConfig {
    pub root: PathBuf,
}

impl Default for ProcConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/proc"),
        }
    }
}

impl ProcConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn pid_dir(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use linux::{list_pids, ProcfsProgramLookup};

#[cfg(target_os = "linux")]
pub(crate) use linux::socket_fds;
