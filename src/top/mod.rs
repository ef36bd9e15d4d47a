pub mod row;
pub mod stream;

pub use row::{is_banner_line, parse_row};
pub use stream::{StreamConfig, StreamEngine, StreamState};
