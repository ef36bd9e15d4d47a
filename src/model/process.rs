/// A process file descriptor that refers to a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdEntry {
    pub pid: u32,
    pub fd: i32,
    pub inode: u64,
}
