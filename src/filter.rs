use crate::error::{ProcnetError, Result};
use crate::model::{Protocol, ResolvedSocket, SampleRow};

/// Raw selection options, usually straight from the command line.
///
/// Zero, empty and `false` values mean "not set".
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Substring of the program name (sockets) or command (sample rows).
    pub program: Option<String>,
    pub pid: Option<u32>,
    pub tcp: bool,
    pub tcp6: bool,
    pub local_port: Option<u16>,
    pub remote_port: Option<u16>,
    /// Maximum number of results; 0 means unlimited.
    pub limit: usize,
}

/// A validated, immutable selection.
///
/// Built with [`Filter::new`], which rejects contradictory options before
/// any table is read.
#[derive(Debug, Clone)]
pub struct Filter {
    program: Option<String>,
    pid: Option<u32>,
    tcp: bool,
    tcp6: bool,
    local_port: Option<u16>,
    remote_port: Option<u16>,
    limit: usize,
}

impl Default for Filter {
    fn default() -> Self {
        // The default options never conflict.
        Self::from_valid(FilterOptions::default())
    }
}

impl Filter {
    pub fn new(opts: FilterOptions) -> Result<Self> {
        let program = opts.program.as_deref().filter(|p| !p.is_empty());
        let pid = opts.pid.filter(|p| *p != 0);
        if program.is_some() && pid.is_some() {
            return Err(ProcnetError::ConflictingFilter {
                first: "program",
                second: "pid",
            });
        }

        let local = opts.local_port.filter(|p| *p != 0);
        let remote = opts.remote_port.filter(|p| *p != 0);
        if local.is_some() && remote.is_some() {
            return Err(ProcnetError::ConflictingFilter {
                first: "local-port",
                second: "remote-port",
            });
        }

        Ok(Self::from_valid(opts))
    }

    fn from_valid(opts: FilterOptions) -> Self {
        // Neither protocol chosen means both.
        let (tcp, tcp6) = if !opts.tcp && !opts.tcp6 {
            (true, true)
        } else {
            (opts.tcp, opts.tcp6)
        };
        Filter {
            program: opts.program.filter(|p| !p.is_empty()),
            pid: opts.pid.filter(|p| *p != 0),
            tcp,
            tcp6,
            local_port: opts.local_port.filter(|p| *p != 0),
            remote_port: opts.remote_port.filter(|p| *p != 0),
            limit: opts.limit,
        }
    }

    /// Whether sockets of `protocol` can pass this filter.
    pub fn wants(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Tcp => self.tcp,
            Protocol::Tcp6 => self.tcp6,
        }
    }

    /// Protocols to read, in table order.
    pub fn protocols(&self) -> Vec<Protocol> {
        Protocol::ALL
            .into_iter()
            .filter(|p| self.wants(*p))
            .collect()
    }

    /// True when the filter narrows by program or pid.
    pub fn selects_process(&self) -> bool {
        self.program.is_some() || self.pid.is_some()
    }

    /// True when the filter narrows by anything other than protocol.
    pub fn is_selective(&self) -> bool {
        self.selects_process() || self.local_port.is_some() || self.remote_port.is_some()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn matches_socket(&self, s: &ResolvedSocket) -> bool {
        if !self.wants(s.socket.protocol) {
            return false;
        }
        if let Some(ref program) = self.program {
            match s.program {
                Some(ref name) if name.contains(program.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(pid) = self.pid {
            if s.pid != Some(pid) {
                return false;
            }
        }
        if let Some(port) = self.local_port {
            if s.socket.local_port != port {
                return false;
            }
        }
        if let Some(port) = self.remote_port {
            if s.socket.remote_port != port {
                return false;
            }
        }
        true
    }

    /// Protocol and port dimensions do not apply to sample rows.
    pub fn matches_row(&self, row: &SampleRow) -> bool {
        if let Some(ref program) = self.program {
            if !row.command.contains(program.as_str()) {
                return false;
            }
        }
        if let Some(pid) = self.pid {
            if row.pid != pid {
                return false;
            }
        }
        true
    }

    /// Keep matching sockets in their current order, then apply the limit.
    pub fn apply_sockets(&self, sockets: Vec<ResolvedSocket>) -> Vec<ResolvedSocket> {
        self.truncate(sockets.into_iter().filter(|s| self.matches_socket(s)).collect())
    }

    /// Keep matching rows in their current order, then apply the limit.
    pub fn apply_rows(&self, rows: Vec<SampleRow>) -> Vec<SampleRow> {
        self.truncate(rows.into_iter().filter(|r| self.matches_row(r)).collect())
    }

    fn truncate<T>(&self, mut items: Vec<T>) -> Vec<T> {
        if self.limit > 0 {
            items.truncate(self.limit);
        }
        items
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
