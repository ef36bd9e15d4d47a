//! Parser for process lines of `top -b` output.
//!
//! ```text
//!     PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND
//!    4153 gyuho     20   0 2051944 237888  79244 S  12.5   0.7  37:09.65 chrome
//! ```

use crate::error::{ProcnetError, Result};
use crate::model::{MemoryField, SampleRow};

/// Number of columns in a process line.
pub const COLUMNS: usize = 12;

/// Header, summary and banner lines start with one of these.
const BANNER_PREFIXES: &[&str] = &[
    "top -", "Tasks:", "Threads:", "%Cpu", "KiB ", "MiB ", "GiB ", "TiB ", "PID ",
];

/// True for lines that are not process rows and should be skipped
/// before calling [`parse_row`].
pub fn is_banner_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || BANNER_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Parse one process line. The whole row is rejected on the first bad column.
pub fn parse_row(line: &str) -> Result<SampleRow> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != COLUMNS {
        return Err(row_error("columns", line));
    }

    let pid = fields[0]
        .parse::<u32>()
        .map_err(|_| row_error("PID", line))?;
    let priority = parse_priority(fields[2]).ok_or_else(|| row_error("PR", line))?;
    let nice = fields[3]
        .parse::<i64>()
        .map_err(|_| row_error("NI", line))?;
    let virt = parse_memory_field(fields[4]).ok_or_else(|| row_error("VIRT", line))?;
    let res = parse_memory_field(fields[5]).ok_or_else(|| row_error("RES", line))?;
    let shr = parse_memory_field(fields[6]).ok_or_else(|| row_error("SHR", line))?;
    let cpu_percent = fields[8]
        .parse::<f64>()
        .map_err(|_| row_error("%CPU", line))?;
    let mem_percent = fields[9]
        .parse::<f64>()
        .map_err(|_| row_error("%MEM", line))?;

    Ok(SampleRow {
        pid,
        user: fields[1].to_string(),
        priority,
        nice,
        virt,
        res,
        shr,
        state: fields[7].to_string(),
        status: process_status(fields[7]),
        cpu_percent,
        mem_percent,
        cpu_time: fields[10].to_string(),
        command: fields[11].to_string(),
    })
}

fn row_error(column: &'static str, line: &str) -> ProcnetError {
    ProcnetError::RowParse {
        column,
        line: line.to_string(),
    }
}

/// `PR` is numeric except for realtime tasks, which top prints as `rt`.
fn parse_priority(s: &str) -> Option<i64> {
    if s == "rt" {
        return Some(-100);
    }
    s.parse().ok()
}

fn parse_memory_field(s: &str) -> Option<MemoryField> {
    let bytes = parse_top_memory(s)?;
    Some(MemoryField {
        raw: s.to_string(),
        bytes,
        human: humanize_bytes(bytes),
    })
}

/// Convert a top memory column to bytes.
///
/// No suffix means KiB; `m`, `g`, `t`, `p` scale by powers of 1024. The
/// number is truncated to its integer part before scaling, so `50.883g`
/// is exactly 50 GiB.
pub fn parse_top_memory(s: &str) -> Option<u64> {
    let s = s.trim();
    let (number, scale) = match s.chars().last()? {
        'k' => (&s[..s.len() - 1], 1u64 << 10),
        'm' => (&s[..s.len() - 1], 1u64 << 20),
        'g' => (&s[..s.len() - 1], 1u64 << 30),
        't' => (&s[..s.len() - 1], 1u64 << 40),
        'p' => (&s[..s.len() - 1], 1u64 << 50),
        _ => (s, 1u64 << 10),
    };
    let value = number.parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    (value.trunc() as u64).checked_mul(scale)
}

/// Format a byte count with SI units, e.g. `54 GB` or `1.5 kB`.
pub fn humanize_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["kB", "MB", "GB", "TB", "PB", "EB"];
    if bytes < 10 {
        return format!("{} B", bytes);
    }
    let mut exp = 0usize;
    let mut scaled = bytes;
    while scaled >= 1000 && exp < UNITS.len() {
        scaled /= 1000;
        exp += 1;
    }
    if exp == 0 {
        return format!("{} B", bytes);
    }
    let unit = UNITS[exp - 1];
    let value = bytes as f64 / 1000f64.powi(exp as i32);
    // Round to one decimal first so 9.96 kB prints as "10 kB", not "10.0 kB".
    let value = (value * 10.0).round() / 10.0;
    if value < 10.0 {
        format!("{:.1} {}", value, unit)
    } else {
        format!("{:.0} {}", value, unit)
    }
}

/// Describe a one-letter process state as `ps(1)` documents it.
pub fn process_status(state: &str) -> String {
    let description = match state {
        "D" => "uninterruptible sleep",
        "I" => "idle",
        "R" => "running",
        "S" => "sleeping",
        "T" => "stopped by job control signal",
        "t" => "stopped by debugger during trace",
        "X" => "dead",
        "Z" => "zombie",
        _ => return format!("unknown process state {:?}", state),
    };
    format!("{} ({})", state, description)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
