pub mod inode_index;
pub mod resolver;
pub mod table;

pub use inode_index::FdInodeIndex;
pub use resolver::{resolve_sockets, resolve_with_index, ProgramLookup};
pub use table::{parse_socket_table, read_socket_table};
