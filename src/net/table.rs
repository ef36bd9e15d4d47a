//! Reader for the kernel TCP socket tables (`/proc/net/tcp`, `/proc/net/tcp6`).
//!
//! A table line looks like:
//!
//! ```text
//!   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
//!    0: 0100007F:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000   123        0 40136 1 ...
//! ```
//!
//! Addresses are printed by the kernel as raw 32-bit words in host byte
//! order, so on little-endian machines `0100007F` is `127.0.0.1`. Ports are
//! plain numbers.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ProcnetError, Result};
use crate::model::{Protocol, SocketRecord, TcpState};
use crate::platform::ProcConfig;

/// Columns up to and including the inode.
const MIN_FIELDS: usize = 10;

/// Read and parse the table for `protocol` under the configured proc root.
pub fn read_socket_table(config: &ProcConfig, protocol: Protocol) -> Result<Vec<SocketRecord>> {
    let path = config.root().join(protocol.table_path());
    let file = File::open(&path)?;
    let records = parse_socket_table_at(&path, protocol, BufReader::new(file))?;
    debug!(%protocol, count = records.len(), "read socket table");
    Ok(records)
}

/// Parse a whole table from `reader`. The first line is the header.
pub fn parse_socket_table<R: BufRead>(protocol: Protocol, reader: R) -> Result<Vec<SocketRecord>> {
    let path = PathBuf::from(protocol.table_path());
    parse_socket_table_at(&path, protocol, reader)
}

fn parse_socket_table_at<R: BufRead>(
    path: &Path,
    protocol: Protocol,
    reader: R,
) -> Result<Vec<SocketRecord>> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_socket_line(protocol, &line).map_err(|reason| {
            ProcnetError::MalformedTable {
                path: path.to_path_buf(),
                line: idx + 1,
                reason,
            }
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Parse one data line. The error is a human-readable reason.
fn parse_socket_line(protocol: Protocol, line: &str) -> std::result::Result<SocketRecord, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < MIN_FIELDS {
        return Err(format!(
            "expected at least {} fields, found {}",
            MIN_FIELDS,
            fields.len()
        ));
    }

    let (local_addr, local_port) = parse_endpoint(protocol, fields[1])?;
    let (remote_addr, remote_port) = parse_endpoint(protocol, fields[2])?;

    let state_code =
        u8::from_str_radix(fields[3], 16).map_err(|_| format!("invalid state {:?}", fields[3]))?;

    let (tx, rx) = fields[4]
        .split_once(':')
        .ok_or_else(|| format!("invalid queue field {:?}", fields[4]))?;
    let tx_queue = u64::from_str_radix(tx, 16).map_err(|_| format!("invalid tx_queue {:?}", tx))?;
    let rx_queue = u64::from_str_radix(rx, 16).map_err(|_| format!("invalid rx_queue {:?}", rx))?;

    let uid = fields[7]
        .parse::<u32>()
        .map_err(|_| format!("invalid uid {:?}", fields[7]))?;
    let inode = fields[9]
        .parse::<u64>()
        .map_err(|_| format!("invalid inode {:?}", fields[9]))?;

    Ok(SocketRecord {
        protocol,
        local_addr,
        local_port,
        remote_addr,
        remote_port,
        state: TcpState::from_code(state_code),
        tx_queue,
        rx_queue,
        uid,
        inode,
    })
}

/// Decode `ADDR:PORT` where both halves are hex.
fn parse_endpoint(protocol: Protocol, field: &str) -> std::result::Result<(IpAddr, u16), String> {
    let (addr, port) = field
        .split_once(':')
        .ok_or_else(|| format!("address {:?} has no port", field))?;
    let port = u16::from_str_radix(port, 16).map_err(|_| format!("invalid port {:?}", port))?;
    let addr = match protocol {
        Protocol::Tcp => IpAddr::V4(parse_ipv4_hex(addr)?),
        Protocol::Tcp6 => IpAddr::V6(parse_ipv6_hex(addr)?),
    };
    Ok((addr, port))
}

fn parse_ipv4_hex(hex: &str) -> std::result::Result<Ipv4Addr, String> {
    if hex.len() != 8 || !is_hex(hex) {
        return Err(format!("IPv4 address {:?} is not 8 hex digits", hex));
    }
    let raw = u32::from_str_radix(hex, 16).map_err(|_| format!("invalid IPv4 address {:?}", hex))?;
    Ok(Ipv4Addr::from(raw.to_ne_bytes()))
}

fn parse_ipv6_hex(hex: &str) -> std::result::Result<Ipv6Addr, String> {
    // Checked before slicing so the byte offsets below are char boundaries.
    if hex.len() != 32 || !is_hex(hex) {
        return Err(format!("IPv6 address {:?} is not 32 hex digits", hex));
    }
    let mut octets = [0u8; 16];
    for (i, chunk) in octets.chunks_mut(4).enumerate() {
        let word = &hex[i * 8..i * 8 + 8];
        let raw =
            u32::from_str_radix(word, 16).map_err(|_| format!("invalid IPv6 address {:?}", hex))?;
        chunk.copy_from_slice(&raw.to_ne_bytes());
    }
    Ok(Ipv6Addr::from(octets))
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TCP_HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode";
    const TCP6_HEADER: &str = "  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode";

    fn table(header: &str, lines: &[&str]) -> Cursor<String> {
        let mut s = String::from(header);
        for l in lines {
            s.push('\n');
            s.push_str(l);
        }
        s.push('\n');
        Cursor::new(s)
    }

    #[test]
    fn test_parse_ipv4_listen() {
        let input = table(
            TCP_HEADER,
            &["   0: 0100007F:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 40136 1 0000000000000000 100 0 0 10 0"],
        );
        let records = parse_socket_table(Protocol::Tcp, input).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.local_addr.to_string(), "127.0.0.1");
        assert_eq!(r.local_port, 80);
        assert_eq!(r.remote_addr.to_string(), "0.0.0.0");
        assert_eq!(r.remote_port, 0);
        assert_eq!(r.state, TcpState::Listen);
        assert_eq!(r.uid, 0);
        assert_eq!(r.inode, 40136);
    }

    #[test]
    fn test_parse_ipv4_established_with_queues() {
        let input = table(
            TCP_HEADER,
            &["   3: 0F02000A:D1F4 2E0AD9AC:01BB 01 0000002A:00000010 02:00000A2B 00000000  1000        0 99817 2 0000000000000000 20 4 30 10 -1"],
        );
        let r = &parse_socket_table(Protocol::Tcp, input).unwrap()[0];
        assert_eq!(r.local_addr.to_string(), "10.0.2.15");
        assert_eq!(r.local_port, 53748);
        assert_eq!(r.remote_addr.to_string(), "172.217.10.46");
        assert_eq!(r.remote_port, 443);
        assert_eq!(r.state, TcpState::Established);
        assert_eq!(r.tx_queue, 42);
        assert_eq!(r.rx_queue, 16);
        assert_eq!(r.uid, 1000);
    }

    #[test]
    fn test_parse_ipv6_loopback_and_mapped() {
        let input = table(
            TCP6_HEADER,
            &[
                "   0: 00000000000000000000000001000000:1F90 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000   106        0 23555 1 0000000000000000 100 0 0 10 0",
                "   1: 0000000000000000FFFF00000100007F:0016 0000000000000000FFFF00000F02000A:C350 01 00000000:00000000 00:00000000 00000000     0        0 23556 1 0000000000000000 100 0 0 10 0",
            ],
        );
        let records = parse_socket_table(Protocol::Tcp6, input).unwrap();
        assert_eq!(records[0].local_addr.to_string(), "::1");
        assert_eq!(records[0].local_port, 8080);
        assert_eq!(records[0].uid, 106);
        assert_eq!(records[1].local_addr.to_string(), "::ffff:127.0.0.1");
        assert_eq!(records[1].local_port, 22);
        assert_eq!(records[1].remote_addr.to_string(), "::ffff:10.0.2.15");
        assert_eq!(records[1].remote_port, 50000);
    }

    #[test]
    fn test_unknown_state_is_not_an_error() {
        let input = table(
            TCP_HEADER,
            &["   0: 0100007F:0050 00000000:0000 0C 00000000:00000000 00:00000000 00000000     0        0 1 1"],
        );
        let r = &parse_socket_table(Protocol::Tcp, input).unwrap()[0];
        assert_eq!(r.state, TcpState::Unknown);
    }

    #[test]
    fn test_short_line_fails_whole_table() {
        let input = table(
            TCP_HEADER,
            &[
                "   0: 0100007F:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 40136 1",
                "   1: 0100007F:0051 00000000:0000 0A",
            ],
        );
        match parse_socket_table(Protocol::Tcp, input) {
            Err(ProcnetError::MalformedTable { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected MalformedTable, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_hex_fails() {
        let input = table(
            TCP_HEADER,
            &["   0: 0100007G:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 40136 1"],
        );
        assert!(matches!(
            parse_socket_table(Protocol::Tcp, input),
            Err(ProcnetError::MalformedTable { .. })
        ));
    }

    #[test]
    fn test_non_ascii_address_fails_without_panicking() {
        // 32 bytes, but byte 8 falls inside the two-byte 'é'.
        let local = format!("0000000\u{e9}{}:01BB", "0".repeat(23));
        assert_eq!(local.len(), 32 + 5);
        let line = format!(
            "   0: {} 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 9 1",
            local
        );
        let input = table(TCP6_HEADER, &[line.as_str()]);
        match parse_socket_table(Protocol::Tcp6, input) {
            Err(ProcnetError::MalformedTable { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedTable, got {:?}", other),
        }

        // A sign is accepted by from_str_radix but is not a hex digit.
        let input = table(
            TCP_HEADER,
            &["   0: +100007F:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 40136 1"],
        );
        assert!(parse_socket_table(Protocol::Tcp, input).is_err());
    }

    #[test]
    fn test_bad_inode_fails() {
        let input = table(
            TCP_HEADER,
            &["   0: 0100007F:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 abc 1"],
        );
        assert!(matches!(
            parse_socket_table(Protocol::Tcp, input),
            Err(ProcnetError::MalformedTable { .. })
        ));
    }

    #[test]
    fn test_header_only_table_is_empty() {
        let input = table(TCP_HEADER, &[]);
        assert!(parse_socket_table(Protocol::Tcp, input).unwrap().is_empty());
    }

    #[test]
    fn test_read_from_proc_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("net")).unwrap();
        std::fs::write(
            dir.path().join("net/tcp"),
            format!(
                "{}\n   0: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 777 1\n",
                TCP_HEADER
            ),
        )
        .unwrap();
        let records = read_socket_table(&ProcConfig::with_root(dir.path()), Protocol::Tcp).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].local_port, 22);
        assert_eq!(records[0].inode, 777);
    }

    #[test]
    fn test_real_tables_parse() {
        let config = ProcConfig::default();
        if config.root().join("net/tcp").exists() {
            assert!(read_socket_table(&config, Protocol::Tcp).is_ok());
        }
    }
}
