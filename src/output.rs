use std::collections::HashSet;

use crate::control::SignalReport;
use crate::model::{ResolvedSocket, SampleRow};

/// Formats resolved sockets, sample rows and signal reports as aligned
/// text columns.
pub struct OutputFormatter {
    /// Width of the PROGRAM / COMMAND column.
    pub cmd_width: usize,
    /// `-t`: distinct pids only.
    pub terse: bool,
}

impl Default for OutputFormatter {
    fn default() -> Self {
        OutputFormatter {
            cmd_width: 15,
            terse: false,
        }
    }
}

impl OutputFormatter {
    pub fn socket_header(&self) -> String {
        format!(
            "{:<5} {:<47} {:<47} {:<11} {:>7} {:<width$} {}",
            "PROTO",
            "LOCAL ADDRESS",
            "REMOTE ADDRESS",
            "STATE",
            "PID",
            "PROGRAM",
            "USER",
            width = self.cmd_width,
        )
    }

    pub fn socket_line(&self, s: &ResolvedSocket) -> String {
        let pid = s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        let program = s.program.as_deref().unwrap_or("-");
        format!(
            "{:<5} {:<47} {:<47} {:<11} {:>7} {} {}",
            s.socket.protocol,
            s.local_endpoint(),
            s.remote_endpoint(),
            s.socket.state,
            pid,
            fit_str(program, self.cmd_width),
            s.user,
        )
    }

    pub fn print_sockets(&self, sockets: &[ResolvedSocket]) {
        if self.terse {
            for pid in distinct_pids(sockets) {
                println!("{}", pid);
            }
            return;
        }
        println!("{}", self.socket_header());
        for s in sockets {
            println!("{}", self.socket_line(s));
        }
    }

    pub fn sample_header(&self) -> String {
        format!(
            "{:>7} {:<8} {:>4} {:>4} {:>9} {:>9} {:>9} {:<24} {:>6} {:>6} {:>10} {}",
            "PID", "USER", "PR", "NI", "VIRT", "RES", "SHR", "STATUS", "%CPU", "%MEM", "TIME+", "COMMAND",
        )
    }

    pub fn sample_line(&self, r: &SampleRow) -> String {
        format!(
            "{:>7} {:<8} {:>4} {:>4} {:>9} {:>9} {:>9} {:<24} {:>6.1} {:>6.1} {:>10} {}",
            r.pid,
            fit_str(&r.user, 8),
            r.priority,
            r.nice,
            r.virt.human,
            r.res.human,
            r.shr.human,
            fit_str(&r.status, 24),
            r.cpu_percent,
            r.mem_percent,
            r.cpu_time,
            r.command,
        )
    }

    pub fn print_samples(&self, rows: &[SampleRow]) {
        println!("{}", self.sample_header());
        for r in rows {
            println!("{}", self.sample_line(r));
        }
    }

    pub fn print_signal_reports(&self, reports: &[SignalReport]) {
        for r in reports {
            println!("{:>7} {}", r.pid, r.outcome);
        }
    }
}

/// Pids of the resolved sockets, first occurrence order, unresolved skipped.
pub fn distinct_pids(sockets: &[ResolvedSocket]) -> Vec<u32> {
    let mut seen = HashSet::new();
    sockets
        .iter()
        .filter_map(|s| s.pid)
        .filter(|pid| seen.insert(*pid))
        .collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Truncate or pad a string to exactly `width` characters.
fn fit_str(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        s.chars().take(width).collect()
    } else {
        format!("{:<width$}", s, width = width)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
