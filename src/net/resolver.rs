use tracing::debug;
use users::{Users, UsersCache};

use super::inode_index::FdInodeIndex;
use super::table::read_socket_table;
use crate::error::Result;
use crate::model::{Protocol, ResolvedSocket, SocketRecord};
use crate::platform::{ProcConfig, ProcfsProgramLookup};

/// Source of program names for resolved pids.
pub trait ProgramLookup {
    fn program_name(&self, pid: u32) -> Option<String>;
}

/// Read the requested socket tables and attach owners from a fresh index.
///
/// Tables are read in the order given; each is read once.
pub fn resolve_sockets(config: &ProcConfig, protocols: &[Protocol]) -> Result<Vec<ResolvedSocket>> {
    let mut records = Vec::new();
    for protocol in protocols {
        records.extend(read_socket_table(config, *protocol)?);
    }
    let index = FdInodeIndex::build(config)?;
    let names = ProcfsProgramLookup::new(config.clone());
    Ok(resolve_with_index(records, &index, &names))
}

/// Join socket records with an inode index.
///
/// Records whose inode is not in the index are kept with no pid; this
/// happens for sockets owned by processes we cannot inspect and for
/// sockets already in TIME_WAIT (inode 0).
pub fn resolve_with_index(
    records: Vec<SocketRecord>,
    index: &FdInodeIndex,
    names: &dyn ProgramLookup,
) -> Vec<ResolvedSocket> {
    let mut unresolved = 0usize;
    let users = UsersCache::new();
    let resolved: Vec<ResolvedSocket> = records
        .into_iter()
        .map(|socket| {
            let pid = index.lookup(socket.inode);
            let program = pid.and_then(|p| names.program_name(p));
            if pid.is_none() {
                unresolved += 1;
            }
            let user = user_name(&users, socket.uid);
            ResolvedSocket {
                socket,
                pid,
                program,
                user,
            }
        })
        .collect();
    debug!(total = resolved.len(), unresolved, "resolved sockets");
    resolved
}

/// Owner name for `uid`, or the uid itself when it has no passwd entry.
fn user_name(users: &UsersCache, uid: u32) -> String {
    users
        .get_user_by_uid(uid)
        .map(|u| u.name().to_string_lossy().to_string())
        .unwrap_or_else(|| uid.to_string())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
