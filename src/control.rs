use std::fmt;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// What happened when a signal was sent to one pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Signaled,
    NotFound,
    PermissionDenied,
    Failed(Errno),
}

impl fmt::Display for SignalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalOutcome::Signaled => f.write_str("signaled"),
            SignalOutcome::NotFound => f.write_str("no such process"),
            SignalOutcome::PermissionDenied => f.write_str("permission denied"),
            SignalOutcome::Failed(errno) => write!(f, "failed: {}", errno.desc()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalReport {
    pub pid: u32,
    pub outcome: SignalOutcome,
}

/// Send `sig` to every pid, in order, and report each result.
///
/// A failure for one pid does not stop delivery to the rest. Pid 0 and
/// values that do not fit a `pid_t` would address process groups, so they
/// are rejected with `EINVAL` without sending anything.
pub fn signal_pids(pids: &[u32], sig: Signal) -> Vec<SignalReport> {
    pids.iter()
        .map(|&pid| SignalReport {
            pid,
            outcome: send(pid, sig),
        })
        .collect()
}

/// `signal_pids` with SIGTERM.
pub fn terminate(pids: &[u32]) -> Vec<SignalReport> {
    signal_pids(pids, Signal::SIGTERM)
}

fn send(pid: u32, sig: Signal) -> SignalOutcome {
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return SignalOutcome::Failed(Errno::EINVAL),
    };
    let outcome = outcome_of(signal::kill(Pid::from_raw(raw), sig));
    match outcome {
        SignalOutcome::Signaled => debug!(pid, %sig, "sent signal"),
        SignalOutcome::Failed(e) => warn!(pid, %sig, error = %e, "failed to send signal"),
        _ => {}
    }
    outcome
}

fn outcome_of(result: nix::Result<()>) -> SignalOutcome {
    match result {
        Ok(()) => SignalOutcome::Signaled,
        Err(Errno::ESRCH) => SignalOutcome::NotFound,
        Err(Errno::EPERM) => SignalOutcome::PermissionDenied,
        Err(e) => SignalOutcome::Failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_missing_pid_is_not_found() {
        // Above the kernel's pid_max ceiling of 2^22.
        let reports = terminate(&[4_999_999]);
        assert_eq!(
            reports,
            vec![SignalReport {
                pid: 4_999_999,
                outcome: SignalOutcome::NotFound
            }]
        );
    }

    #[test]
    fn test_group_addressing_pids_are_rejected() {
        let reports = terminate(&[0, u32::MAX]);
        assert_eq!(reports[0].outcome, SignalOutcome::Failed(Errno::EINVAL));
        assert_eq!(reports[1].outcome, SignalOutcome::Failed(Errno::EINVAL));
    }

    #[test]
    fn test_terminates_spawned_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();

        // Later pids are still attempted after a failure.
        let reports = terminate(&[4_999_999, pid]);
        assert_eq!(reports[0].outcome, SignalOutcome::NotFound);
        assert_eq!(reports[1].outcome, SignalOutcome::Signaled);

        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_sigcont_to_self() {
        let reports = signal_pids(&[std::process::id()], Signal::SIGCONT);
        assert_eq!(reports[0].outcome, SignalOutcome::Signaled);
    }

    #[test]
    fn test_errno_mapping() {
        assert_eq!(outcome_of(Ok(())), SignalOutcome::Signaled);
        assert_eq!(outcome_of(Err(Errno::ESRCH)), SignalOutcome::NotFound);
        assert_eq!(outcome_of(Err(Errno::EPERM)), SignalOutcome::PermissionDenied);
        assert_eq!(
            outcome_of(Err(Errno::EINVAL)),
            SignalOutcome::Failed(Errno::EINVAL)
        );
    }

    #[test]
    fn test_init_is_permission_denied_for_unprivileged() {
        // Only meaningful when init belongs to someone else.
        let init_uid = procfs::process::Process::new(1).and_then(|p| p.uid());
        if users::get_effective_uid() == 0 || init_uid.ok() != Some(0) {
            return;
        }
        let reports = signal_pids(&[1], Signal::SIGCONT);
        assert_eq!(reports[0].outcome, SignalOutcome::PermissionDenied);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(SignalOutcome::NotFound.to_string(), "no such process");
        assert!(SignalOutcome::Failed(Errno::EINVAL)
            .to_string()
            .starts_with("failed"));
    }
}
