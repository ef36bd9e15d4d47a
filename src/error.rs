use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcnetError {
    #[error("Malformed socket table {path} line {line}: {reason}")]
    MalformedTable {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("Cannot parse column {column} of sampler row: {line:?}")]
    RowParse { column: &'static str, line: String },
    #[error("Conflicting filter options: {first} and {second} cannot be combined")]
    ConflictingFilter {
        first: &'static str,
        second: &'static str,
    },
    #[error("Refusing to {0} without --program, --pid, --local-port or --remote-port")]
    MissingSelection(&'static str),
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
    #[error("Failed to spawn sampler: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("Pseudo-terminal error: {0}")]
    Pty(#[from] nix::errno::Errno),
    #[error("Stream failed: {0}")]
    Stream(#[from] StreamError),
    #[error("Stream is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("procfs error: {0}")]
    Proc(#[from] procfs::ProcError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal conditions of a running sample stream.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("sampler exited unexpectedly: {0}")]
    SubprocessExited(String),
    #[error("read from sampler failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("sampler produced no rows before it stopped")]
    NotReady,
}

pub type Result<T> = std::result::Result<T, ProcnetError>;
