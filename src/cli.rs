use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use procnet::filter::FilterOptions;
use procnet::top::StreamConfig;

#[derive(Parser, Debug)]
#[command(
    name = "procnet",
    version,
    about = "Find the process behind each TCP socket and sample process usage"
)]
pub struct CliArgs {
    /// Logging verbosity (RUST_LOG overrides)
    #[arg(long = "log-level", value_enum, default_value = "warn", global = true)]
    pub log_level: LogLevel,

    /// Proc filesystem root
    #[arg(long = "proc-root", value_name = "DIR", default_value = "/proc", global = true)]
    pub proc_root: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List TCP sockets with their owning process
    Net(NetArgs),
    /// Run top in batch mode and print the latest row per process
    Top(TopArgs),
    /// Send SIGTERM to the owners of the selected sockets
    Kill(SelectArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Socket selection shared by `net` and `kill`.
#[derive(Args, Debug, Clone, Default)]
pub struct SelectArgs {
    /// Select by program name (substring)
    #[arg(short = 'c', long = "program", value_name = "NAME")]
    pub program: Option<String>,

    /// Select by owning PID
    #[arg(short = 'p', long = "pid", value_name = "PID")]
    pub pid: Option<u32>,

    /// Only IPv4 sockets
    #[arg(long = "tcp")]
    pub tcp: bool,

    /// Only IPv6 sockets
    #[arg(long = "tcp6")]
    pub tcp6: bool,

    /// Select by local port
    #[arg(long = "local-port", value_name = "PORT")]
    pub local_port: Option<u16>,

    /// Select by remote port
    #[arg(long = "remote-port", value_name = "PORT")]
    pub remote_port: Option<u16>,

    /// Stop after this many results (0 = unlimited)
    #[arg(short = 'n', long = "limit", value_name = "N", default_value_t = 0)]
    pub limit: usize,
}

impl SelectArgs {
    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            program: self.program.clone(),
            pid: self.pid,
            tcp: self.tcp,
            tcp6: self.tcp6,
            local_port: self.local_port,
            remote_port: self.remote_port,
            limit: self.limit,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct NetArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Terse output: PIDs only
    #[arg(short = 't')]
    pub terse: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TopArgs {
    /// Sampler executable
    #[arg(long = "exec", value_name = "PATH", default_value = "top")]
    pub exec: PathBuf,

    /// Number of frames; without it, sampling runs until stdin closes
    #[arg(long = "iterations", value_name = "N")]
    pub iterations: Option<u32>,

    /// Seconds between frames
    #[arg(short = 'd', long = "delay", value_name = "SECS", value_parser = parse_seconds)]
    pub delay: Option<Duration>,

    /// Sample only this PID
    #[arg(short = 'p', long = "pid", value_name = "PID")]
    pub pid: Option<u32>,

    /// Show only commands containing NAME
    #[arg(short = 'c', long = "program", value_name = "NAME")]
    pub program: Option<String>,

    /// Show at most N rows (0 = unlimited)
    #[arg(short = 'n', long = "limit", value_name = "N", default_value_t = 0)]
    pub limit: usize,

    /// Fail if no row arrives within SECS
    #[arg(long = "ready-timeout", value_name = "SECS", value_parser = parse_seconds)]
    pub ready_timeout: Option<Duration>,
}

impl TopArgs {
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            exec: self.exec.clone(),
            iterations: self.iterations,
            delay: self.delay,
            pid: self.pid,
            ready_timeout: self.ready_timeout,
        }
    }

    pub fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            program: self.program.clone(),
            pid: self.pid,
            limit: self.limit,
            ..Default::default()
        }
    }
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", s))?;
    Duration::try_from_secs_f64(secs).map_err(|_| format!("'{}' is not a valid duration", s))
}
