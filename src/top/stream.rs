//! Long-running `top -b` sampler with a latest-row-per-pid snapshot.
//!
//! The sampler runs on a pseudo-terminal. A producer thread reads and parses
//! its output into a FIFO queue; a consumer thread drains the queue into the
//! snapshot. The queue is a `Mutex<VecDeque>` plus a `Condvar`: the producer
//! signals after each row and once more when the stream ends.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use super::row::{is_banner_line, parse_row};
use crate::error::{ProcnetError, Result, StreamError};
use crate::model::SampleRow;

/// How often the producer polls for the sampler's exit after its output ends.
const REAP_POLL: Duration = Duration::from_millis(10);

/// Terminal width given to the sampler so command names are not cut.
const PTY_COLUMNS: u16 = 512;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Sampler executable; bare names are looked up on `PATH`.
    pub exec: PathBuf,
    /// `-n`: stop after this many frames.
    pub iterations: Option<u32>,
    /// `-d`: delay between frames.
    pub delay: Option<Duration>,
    /// `-p`: only sample this pid.
    pub pid: Option<u32>,
    /// Give up on `start` if no row arrives in time.
    pub ready_timeout: Option<Duration>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            exec: PathBuf::from("top"),
            iterations: None,
            delay: None,
            pid: None,
            ready_timeout: None,
        }
    }
}

impl StreamConfig {
    /// Sampler arguments. Batch mode is always on.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-b".to_string()];
        if let Some(n) = self.iterations {
            args.push("-n".to_string());
            args.push(n.to_string());
        }
        if let Some(delay) = self.delay {
            args.push("-d".to_string());
            args.push(delay.as_secs_f64().to_string());
        }
        if let Some(pid) = self.pid {
            args.push("-p".to_string());
            args.push(pid.to_string());
        }
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl StreamState {
    fn name(&self) -> &'static str {
        match self {
            StreamState::Created => "created",
            StreamState::Starting => "starting",
            StreamState::Running => "running",
            StreamState::Stopping => "stopping",
            StreamState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Shared pipeline state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Queue {
    rows: VecDeque<SampleRow>,
    finished: bool,
}

#[derive(Default)]
struct Pipeline {
    queue: Mutex<Queue>,
    available: Condvar,
}

impl Pipeline {
    fn push(&self, row: SampleRow) {
        lock(&self.queue).rows.push_back(row);
        self.available.notify_one();
    }

    fn finish(&self) {
        lock(&self.queue).finished = true;
        self.available.notify_all();
    }

    /// Next row in FIFO order, or `None` once the stream has ended and
    /// the queue is drained.
    fn next(&self) -> Option<SampleRow> {
        let mut queue = lock(&self.queue);
        loop {
            if let Some(row) = queue.rows.pop_front() {
                return Some(row);
            }
            if queue.finished {
                return None;
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

type Snapshot = HashMap<u32, SampleRow>;
type SharedChild = Arc<Mutex<Option<Child>>>;

struct Workers {
    producer: JoinHandle<()>,
    consumer: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// StreamEngine
// ---------------------------------------------------------------------------

/// A sampler subprocess plus its producer and consumer threads.
///
/// All methods take `&self`, so an engine can be shared between a thread
/// that reads [`latest`](Self::latest) and one that calls
/// [`stop`](Self::stop).
pub struct StreamEngine {
    config: StreamConfig,
    state: Mutex<StreamState>,
    pipeline: Arc<Pipeline>,
    snapshot: Arc<RwLock<Snapshot>>,
    child: SharedChild,
    child_pid: Mutex<Option<u32>>,
    stop_requested: Arc<AtomicBool>,
    workers: Mutex<Option<Workers>>,
    error_tx: Mutex<Option<SyncSender<StreamError>>>,
    error_rx: Mutex<Receiver<StreamError>>,
}

impl StreamEngine {
    pub fn new(config: StreamConfig) -> Self {
        // Only the first fatal error is kept.
        let (error_tx, error_rx) = mpsc::sync_channel(1);
        Self {
            config,
            state: Mutex::new(StreamState::Created),
            pipeline: Arc::new(Pipeline::default()),
            snapshot: Arc::new(RwLock::new(HashMap::new())),
            child: Arc::new(Mutex::new(None)),
            child_pid: Mutex::new(None),
            stop_requested: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(None),
            error_tx: Mutex::new(Some(error_tx)),
            error_rx: Mutex::new(error_rx),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn state(&self) -> StreamState {
        *lock(&self.state)
    }

    /// Pid of the sampler, once launched.
    pub fn subprocess_id(&self) -> Option<u32> {
        *lock(&self.child_pid)
    }

    /// Launch the sampler and block until the first row is in the snapshot.
    ///
    /// If the sampler ends or `ready_timeout` passes first, the stream is
    /// torn down and the cause is returned.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state != StreamState::Created {
                return Err(ProcnetError::InvalidState {
                    expected: StreamState::Created.name(),
                    actual: state.name(),
                });
            }
            *state = StreamState::Starting;
        }

        let ready = match self.launch() {
            Ok(ready) => ready,
            Err(e) => {
                *lock(&self.state) = StreamState::Stopped;
                return Err(e);
            }
        };

        let became_ready = match self.config.ready_timeout {
            Some(timeout) => ready.recv_timeout(timeout).is_ok(),
            None => ready.recv().is_ok(),
        };

        if became_ready {
            *lock(&self.state) = StreamState::Running;
            info!(pid = ?self.subprocess_id(), "sampler stream running");
            return Ok(());
        }

        // Ended, failed, or timed out before the first row.
        *lock(&self.state) = StreamState::Stopping;
        self.stop_requested.store(true, Ordering::SeqCst);
        self.kill_child();
        self.join_workers();
        *lock(&self.state) = StreamState::Stopped;
        let cause = self.try_error().unwrap_or(StreamError::NotReady);
        warn!(error = %cause, "sampler stream failed to start");
        Err(cause.into())
    }

    fn launch(&self) -> Result<Receiver<()>> {
        let exe = resolve_executable(&self.config.exec)?;
        let args = self.config.args();

        let winsize = Winsize {
            ws_row: 24,
            ws_col: PTY_COLUMNS,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pty = openpty(Some(&winsize), None)?;
        set_cloexec(&pty.master)?;
        set_cloexec(&pty.slave)?;

        let mut cmd = Command::new(&exe);
        // Own process group, so stop reaches anything the sampler forks.
        cmd.args(&args)
            .process_group(0)
            .env("COLUMNS", PTY_COLUMNS.to_string())
            .stdin(Stdio::from(pty.slave.try_clone()?))
            .stdout(Stdio::from(pty.slave.try_clone()?))
            .stderr(Stdio::from(pty.slave));
        let child = cmd.spawn().map_err(ProcnetError::Spawn)?;
        // Our copies of the slave must close so reads see the hangup.
        drop(cmd);

        let pid = child.id();
        debug!(pid, exe = %exe.display(), ?args, "spawned sampler");
        *lock(&self.child_pid) = Some(pid);
        *lock(&self.child) = Some(child);

        let error_tx = lock(&self.error_tx)
            .take()
            .ok_or(ProcnetError::InvalidState {
                expected: StreamState::Created.name(),
                actual: StreamState::Stopped.name(),
            })?;
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let producer = {
            let reader = BufReader::new(File::from(pty.master));
            let pipeline = Arc::clone(&self.pipeline);
            let child = Arc::clone(&self.child);
            let stop_requested = Arc::clone(&self.stop_requested);
            thread::Builder::new()
                .name("sampler-producer".to_string())
                .spawn(move || run_producer(reader, pipeline, child, stop_requested, error_tx))?
        };
        let consumer = {
            let pipeline = Arc::clone(&self.pipeline);
            let snapshot = Arc::clone(&self.snapshot);
            thread::Builder::new()
                .name("sampler-consumer".to_string())
                .spawn(move || run_consumer(pipeline, snapshot, ready_tx))?
        };
        *lock(&self.workers) = Some(Workers { producer, consumer });

        Ok(ready_rx)
    }

    /// Copy of the most recent row per pid.
    pub fn latest(&self) -> HashMap<u32, SampleRow> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True once the sampler's output has ended and it has been reaped.
    ///
    /// Rows may still be waiting to reach the snapshot; `stop` or `wait`
    /// drains them.
    pub fn is_finished(&self) -> bool {
        lock(&self.pipeline.queue).finished
    }

    /// Kill the sampler's process group and join both threads.
    ///
    /// Calling this on a stream that is not running is a no-op.
    pub fn stop(&self) -> Result<()> {
        if !self.begin_stopping() {
            return Ok(());
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        self.kill_child();
        self.join_workers();
        *lock(&self.state) = StreamState::Stopped;
        info!("sampler stream stopped");
        Ok(())
    }

    /// Let the sampler finish on its own (`-n`), then join both threads.
    ///
    /// Returns the stream's fatal error if it had one. Never signals.
    pub fn wait(&self) -> Result<()> {
        if !self.begin_stopping() {
            return Ok(());
        }
        self.join_workers();
        *lock(&self.state) = StreamState::Stopped;
        info!("sampler stream finished");
        match self.try_error() {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// The fatal stream error, if one has been reported and not yet taken.
    pub fn try_error(&self) -> Option<StreamError> {
        lock(&self.error_rx).try_recv().ok()
    }

    /// Block up to `timeout` for a fatal stream error.
    pub fn recv_error_timeout(&self, timeout: Duration) -> Option<StreamError> {
        lock(&self.error_rx).recv_timeout(timeout).ok()
    }

    fn begin_stopping(&self) -> bool {
        let mut state = lock(&self.state);
        if *state != StreamState::Running {
            return false;
        }
        *state = StreamState::Stopping;
        true
    }

    fn kill_child(&self) {
        if let Some(pid) = self.subprocess_id() {
            kill_group(pid);
        }
        if let Some(child) = lock(&self.child).as_mut() {
            if let Err(e) = child.kill() {
                debug!(error = %e, "kill sampler");
            }
        }
    }

    fn join_workers(&self) {
        let workers = lock(&self.workers).take();
        if let Some(workers) = workers {
            if workers.producer.join().is_err() {
                warn!("sampler producer thread panicked");
            }
            if workers.consumer.join().is_err() {
                warn!("sampler consumer thread panicked");
            }
        }
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ---------------------------------------------------------------------------
// Worker threads
// ---------------------------------------------------------------------------

fn run_producer(
    mut reader: BufReader<File>,
    pipeline: Arc<Pipeline>,
    child: SharedChild,
    stop_requested: Arc<AtomicBool>,
    errors: SyncSender<StreamError>,
) {
    let mut buf = Vec::new();
    let mut parsed = 0u64;
    let mut dropped = 0u64;

    let read_error = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break None,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\r', '\n']);
                if is_banner_line(line) {
                    continue;
                }
                match parse_row(line) {
                    Ok(row) => {
                        parsed += 1;
                        pipeline.push(row);
                    }
                    Err(e) => {
                        dropped += 1;
                        debug!(error = %e, "dropping sampler line");
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // EIO on the master means every slave descriptor is closed.
            Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => break None,
            Err(e) => break Some(e),
        }
    };
    drop(reader);

    if read_error.is_some() {
        if let Some(c) = lock(&child).as_mut() {
            kill_group(c.id());
            let _ = c.kill();
        }
    }
    let status = reap(&child);
    debug!(parsed, dropped, ?status, "sampler output ended");

    let failure = if stop_requested.load(Ordering::SeqCst) {
        None
    } else if let Some(e) = read_error {
        Some(StreamError::Read(e))
    } else {
        match status {
            Some(status) if !status.success() => {
                Some(StreamError::SubprocessExited(status.to_string()))
            }
            _ => None,
        }
    };

    if let Some(err) = failure {
        warn!(error = %err, "sampler stream failed");
        // A full channel means an error is already waiting.
        let _ = errors.try_send(err);
    }
    pipeline.finish();
}

fn run_consumer(pipeline: Arc<Pipeline>, snapshot: Arc<RwLock<Snapshot>>, ready: SyncSender<()>) {
    let mut ready = Some(ready);
    while let Some(row) = pipeline.next() {
        snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(row.pid, row);
        if let Some(tx) = ready.take() {
            let _ = tx.send(());
        }
    }
}

/// Wait for the sampler to exit without holding the child lock while
/// blocked, so `stop` can still reach it to kill.
fn reap(child: &SharedChild) -> Option<ExitStatus> {
    loop {
        {
            let mut guard = lock(child);
            let c = guard.as_mut()?;
            match c.try_wait() {
                Ok(Some(status)) => {
                    *guard = None;
                    return Some(status);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "waiting for sampler");
                    *guard = None;
                    return None;
                }
            }
        }
        thread::sleep(REAP_POLL);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// SIGKILL the process group led by `pid`. A group that is already gone is
/// not an error.
fn kill_group(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(pid, error = %e, "kill sampler group"),
    }
}

fn set_cloexec(fd: &OwnedFd) -> Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}

/// Check that the sampler exists before anything is spawned.
pub fn resolve_executable(exec: &Path) -> Result<PathBuf> {
    let not_found = || ProcnetError::ExecutableNotFound(exec.display().to_string());
    if exec.components().count() > 1 {
        return if exec.is_file() {
            Ok(exec.to_path_buf())
        } else {
            Err(not_found())
        };
    }
    which::which(exec).map_err(|_| not_found())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
