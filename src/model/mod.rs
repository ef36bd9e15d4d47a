pub mod network;
pub mod process;
pub mod sample;

pub use network::{Protocol, ResolvedSocket, SocketRecord, TcpState};
pub use process::FdEntry;
pub use sample::{MemoryField, SampleRow};
