//! Correlate TCP sockets with the processes that own them, and sample
//! per-process resource usage from a long-running `top -b`.

pub mod control;
pub mod error;
pub mod filter;
pub mod model;
pub mod net;
pub mod output;
pub mod platform;
pub mod top;

pub use error::{ProcnetError, Result, StreamError};
