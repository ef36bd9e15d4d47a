mod cli;

use std::io;
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use cli::{CliArgs, Command, LogLevel, NetArgs, SelectArgs, TopArgs};
use procnet::control;
use procnet::filter::Filter;
use procnet::model::ResolvedSocket;
use procnet::net::resolve_sockets;
use procnet::output::{distinct_pids, OutputFormatter};
use procnet::platform::ProcConfig;
use procnet::top::StreamEngine;
use procnet::{ProcnetError, Result};

/// How often `top` without an iteration limit checks for a stream failure.
const ERROR_POLL: Duration = Duration::from_millis(200);

fn main() {
    let args = CliArgs::parse();
    setup_logging(args.log_level);

    let config = ProcConfig::with_root(&args.proc_root);
    let result = match &args.command {
        Command::Net(net) => run_net(&config, net),
        Command::Top(top) => run_top(top),
        Command::Kill(select) => run_kill(&config, select),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Logs go to stderr; `RUST_LOG` takes precedence over `--log-level`.
fn setup_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    debug!("Logging initialized with level: {:?}", level);
}

/// Resolve, filter and sort sockets. Unresolved sockets sort last.
fn select_sockets(config: &ProcConfig, filter: &Filter) -> Result<Vec<ResolvedSocket>> {
    let mut sockets = resolve_sockets(config, &filter.protocols())?;
    sockets.sort_by_key(|s| (s.pid.is_none(), s.pid, s.socket.local_port));
    Ok(filter.apply_sockets(sockets))
}

fn run_net(config: &ProcConfig, args: &NetArgs) -> Result<()> {
    let filter = Filter::new(args.select.filter_options())?;
    let sockets = select_sockets(config, &filter)?;
    let formatter = OutputFormatter {
        terse: args.terse,
        ..Default::default()
    };
    formatter.print_sockets(&sockets);
    Ok(())
}

fn run_kill(config: &ProcConfig, args: &SelectArgs) -> Result<()> {
    let filter = Filter::new(args.filter_options())?;
    if !filter.is_selective() {
        return Err(ProcnetError::MissingSelection("kill"));
    }
    let sockets = select_sockets(config, &filter)?;

    let own = std::process::id();
    let pids: Vec<u32> = distinct_pids(&sockets)
        .into_iter()
        .filter(|pid| *pid != own)
        .collect();
    if pids.is_empty() {
        warn!("no matching processes");
        return Ok(());
    }

    info!(count = pids.len(), "terminating processes");
    let reports = control::terminate(&pids);
    OutputFormatter::default().print_signal_reports(&reports);
    Ok(())
}

fn run_top(args: &TopArgs) -> Result<()> {
    // Validate before the sampler starts.
    let filter = Filter::new(args.filter_options())?;
    let engine = StreamEngine::new(args.stream_config());
    engine.start()?;

    if args.iterations.is_some() {
        engine.wait()?;
    } else {
        sample_until_stdin_closes(&engine)?;
    }

    let mut rows: Vec<_> = engine.latest().into_values().collect();
    rows.sort_by_key(|r| r.pid);
    OutputFormatter::default().print_samples(&filter.apply_rows(rows));
    Ok(())
}

fn sample_until_stdin_closes(engine: &StreamEngine) -> Result<()> {
    let (eof_tx, eof_rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = io::copy(&mut io::stdin().lock(), &mut io::sink());
        let _ = eof_tx.send(());
    });

    loop {
        if let Some(err) = engine.recv_error_timeout(ERROR_POLL) {
            engine.stop()?;
            return Err(err.into());
        }
        if engine.is_finished() {
            info!("sampler ended before stdin closed");
            return engine.wait();
        }
        match eof_rx.try_recv() {
            Err(TryRecvError::Empty) => continue,
            _ => break,
        }
    }
    engine.stop()
}
