//! Binary decoder for nlbwmon database dumps
//!
//! Layout (all fields big-endian):
//!
//! ```text
//! Header (40 bytes):
//!   magic u32 | entries u32 | timestamp u32 | pad 4
//!   interval: type u8 | pad 7 | base u64 | value i32 | pad 4
//!
//! Record (72 bytes, `entries` times):
//!   family u8 | proto u8 | dst_port u16 | pad 4
//!   src_mac [8] | src_addr [16]
//!   count u64 | out_pkts u64 | out_bytes u64 | in_pkts u64 | in_bytes u64
//! ```
//!
//! Input may be gzip-compressed; compression is detected from the stream
//! magic, not from the file name.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;

use super::{Row, Snapshot};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid magic number: 0x{found:08x} (expected 0x{expected:08x})")]
    Format { found: u32, expected: u32 },
    #[error("snapshot truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("decompression failed: {0}")]
    Io(#[from] std::io::Error),
}

/// "nlbm"
pub const MAGIC: u32 = 0x6e6c626d;
pub const HEADER_SIZE: usize = 40;
pub const RECORD_SIZE: usize = 72;

const AF_INET: u8 = 2;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Accounting interval descriptor. Carried through but not interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub kind: u8,
    pub base: u64,
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub entries: u32,
    pub timestamp: u32,
    pub interval: Interval,
}

/// Decode one snapshot, gzip-compressed or raw.
pub fn decode(data: &[u8]) -> Result<Snapshot, DecodeError> {
    if data.starts_with(&GZIP_MAGIC) {
        let mut raw = Vec::new();
        GzDecoder::new(data).read_to_end(&mut raw)?;
        return decode_raw(&raw);
    }
    decode_raw(data)
}

/// Decode an uncompressed dump.
pub fn decode_raw(data: &[u8]) -> Result<Snapshot, DecodeError> {
    let header = parse_header(data)?;

    let need = (header.entries as usize)
        .checked_mul(RECORD_SIZE)
        .and_then(|n| n.checked_add(HEADER_SIZE))
        .unwrap_or(usize::MAX);
    if data.len() < need {
        return Err(DecodeError::Truncated {
            need,
            got: data.len(),
        });
    }

    let rows = data[HEADER_SIZE..need]
        .chunks_exact(RECORD_SIZE)
        .map(parse_record)
        .collect();

    let captured_at = DateTime::<Utc>::from_timestamp(i64::from(header.timestamp), 0);
    Ok(Snapshot::new(rows).with_capture_time(captured_at))
}

/// Parse and validate the fixed header.
pub fn parse_header(data: &[u8]) -> Result<Header, DecodeError> {
    if data.len() >= 4 {
        let found = be_u32(data, 0);
        if found != MAGIC {
            return Err(DecodeError::Format {
                found,
                expected: MAGIC,
            });
        }
    }
    if data.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated {
            need: HEADER_SIZE,
            got: data.len(),
        });
    }

    Ok(Header {
        entries: be_u32(data, 4),
        timestamp: be_u32(data, 8),
        interval: Interval {
            kind: data[16],
            base: be_u64(data, 24),
            value: be_u32(data, 32) as i32,
        },
    })
}

fn parse_record(rec: &[u8]) -> Row {
    let family = rec[0];
    let mut addr = [0u8; 16];
    addr.copy_from_slice(&rec[16..32]);

    // "out" is what the device sent, "in" is what it received
    Row {
        family: if family == AF_INET { 4 } else { 6 },
        protocol: protocol_name(rec[1]),
        port: be_u16(rec, 2),
        mac: format_mac(&rec[8..14]),
        ip: format_ip(family, &addr),
        connections: be_u64(rec, 32),
        tx_packets: be_u64(rec, 40),
        tx_bytes: be_u64(rec, 48),
        rx_packets: be_u64(rec, 56),
        rx_bytes: be_u64(rec, 64),
        layer7: None,
    }
}

const PROTOCOL_NAMES: [(u8, &str); 13] = [
    (0, "HOPOPT"),
    (1, "ICMP"),
    (2, "IGMP"),
    (4, "IP-IN-IP"),
    (6, "TCP"),
    (17, "UDP"),
    (41, "IPV6-IN-IP"),
    (47, "GRE"),
    (50, "ESP"),
    (51, "AH"),
    (58, "IPV6-ICMP"),
    (94, "IPIP"),
    (115, "L2TPV3"),
];

/// Name for an IP protocol number, or the number itself when unknown.
pub fn protocol_name(proto: u8) -> String {
    PROTOCOL_NAMES
        .iter()
        .find(|(number, _)| *number == proto)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| proto.to_string())
}

/// Inverse of [`protocol_name`]
pub fn protocol_number(name: &str) -> Option<u8> {
    PROTOCOL_NAMES
        .iter()
        .find(|(_, known)| known.eq_ignore_ascii_case(name))
        .map(|(number, _)| *number)
        .or_else(|| name.parse().ok())
}

fn format_mac(mac: &[u8]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

// nlbwmon keeps IPv4 addresses host-ordered in the first word.
// Every non-AF_INET tag is rendered as IPv6.
pub(super) fn format_ip(family: u8, addr: &[u8; 16]) -> String {
    if family == AF_INET {
        return Ipv4Addr::new(addr[3], addr[2], addr[1], addr[0]).to_string();
    }
    let v6 = Ipv6Addr::from(*addr);
    match v6.to_ipv4_mapped() {
        Some(v4) => v4.to_string(),
        None => v6.to_string(),
    }
}

/// Rebuild the 16 address bytes a rendered IP was decoded from.
/// Unparseable input gives all zeroes.
pub(super) fn raw_address(family: u8, ip: &str) -> [u8; 16] {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) if family == 4 => {
            let [a, b, c, d] = v4.octets();
            let mut raw = [0u8; 16];
            raw[..4].copy_from_slice(&[d, c, b, a]);
            raw
        }
        Ok(IpAddr::V4(v4)) => v4.to_ipv6_mapped().octets(),
        Ok(IpAddr::V6(v6)) => v6.octets(),
        Err(_) => [0u8; 16],
    }
}

fn be_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn be_u32(buf: &[u8], off: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[off..off + 4]);
    u32::from_be_bytes(bytes)
}

fn be_u64(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    struct RawRecord {
        family: u8,
        proto: u8,
        port: u16,
        mac: [u8; 6],
        addr: [u8; 16],
        count: u64,
        out_pkts: u64,
        out_bytes: u64,
        in_pkts: u64,
        in_bytes: u64,
    }

    impl Default for RawRecord {
        fn default() -> Self {
            Self {
                family: AF_INET,
                proto: 6,
                port: 443,
                mac: [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
                addr: [10, 1, 168, 192, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
                count: 3,
                out_pkts: 10,
                out_bytes: 1_000,
                in_pkts: 20,
                in_bytes: 50_000,
            }
        }
    }

    fn header(entries: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&MAGIC.to_be_bytes());
        buf.extend_from_slice(&entries.to_be_bytes());
        buf.extend_from_slice(&1_700_000_000u32.to_be_bytes());
        buf.extend_from_slice(&[0; 4]);
        buf.push(1);
        buf.extend_from_slice(&[0; 7]);
        buf.extend_from_slice(&1_600_000_000u64.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());
        buf.extend_from_slice(&[0; 4]);
        buf
    }

    fn encode(records: &[RawRecord]) -> Vec<u8> {
        let mut buf = header(records.len() as u32);
        for rec in records {
            buf.push(rec.family);
            buf.push(rec.proto);
            buf.extend_from_slice(&rec.port.to_be_bytes());
            buf.extend_from_slice(&[0; 4]);
            buf.extend_from_slice(&rec.mac);
            buf.extend_from_slice(&[0; 2]);
            buf.extend_from_slice(&rec.addr);
            for value in [rec.count, rec.out_pkts, rec.out_bytes, rec.in_pkts, rec.in_bytes] {
                buf.extend_from_slice(&value.to_be_bytes());
            }
        }
        buf
    }

    #[test]
    fn test_layout_sizes() {
        assert_eq!(header(0).len(), HEADER_SIZE);
        assert_eq!(encode(&[RawRecord::default()]).len(), HEADER_SIZE + RECORD_SIZE);
    }

    #[test]
    fn test_decode_single_ipv4_record() {
        let data = encode(&[RawRecord::default()]);
        let snapshot = decode(&data).unwrap();

        assert_eq!(snapshot.len(), 1);
        let row = &snapshot.rows()[0];
        assert_eq!(row.family, 4);
        assert_eq!(row.protocol, "TCP");
        assert_eq!(row.port, 443);
        assert_eq!(row.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(row.ip, "192.168.1.10");
        assert_eq!(row.connections, 3);
        assert_eq!(row.layer7, None);
        assert_eq!(
            snapshot.captured_at().map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
    }

    #[test]
    fn test_in_counters_are_downloads() {
        let data = encode(&[RawRecord::default()]);
        let row = decode(&data).unwrap().rows()[0].clone();

        assert_eq!(row.rx_bytes, 50_000);
        assert_eq!(row.rx_packets, 20);
        assert_eq!(row.tx_bytes, 1_000);
        assert_eq!(row.tx_packets, 10);
    }

    #[test]
    fn test_decode_ipv6_and_unknown_family() {
        let mut addr = [0u8; 16];
        addr[0] = 0x20;
        addr[1] = 0x01;
        addr[2] = 0x0d;
        addr[3] = 0xb8;
        addr[15] = 0x01;
        let v6 = RawRecord {
            family: 10,
            addr,
            in_bytes: 2,
            ..Default::default()
        };
        let odd = RawRecord {
            family: 77,
            addr,
            in_bytes: 1,
            ..Default::default()
        };

        let snapshot = decode(&encode(&[v6, odd])).unwrap();
        for row in snapshot.rows() {
            assert_eq!(row.family, 6);
            assert_eq!(row.ip, "2001:db8::1");
        }
    }

    #[test]
    fn test_ipv4_mapped_address_renders_dotted_quad() {
        let mut addr = [0u8; 16];
        addr[10] = 0xff;
        addr[11] = 0xff;
        addr[12..].copy_from_slice(&[10, 0, 0, 7]);
        let rec = RawRecord {
            family: 10,
            addr,
            ..Default::default()
        };

        let snapshot = decode(&encode(&[rec])).unwrap();
        assert_eq!(snapshot.rows()[0].ip, "10.0.0.7");
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!(protocol_name(1), "ICMP");
        assert_eq!(protocol_name(6), "TCP");
        assert_eq!(protocol_name(17), "UDP");
        assert_eq!(protocol_name(58), "IPV6-ICMP");
        assert_eq!(protocol_name(132), "132");

        assert_eq!(protocol_number("GRE"), Some(47));
        assert_eq!(protocol_number("udp"), Some(17));
        assert_eq!(protocol_number("132"), Some(132));
        assert_eq!(protocol_number("SCTP-ish"), None);
    }

    #[test]
    fn test_raw_address_matches_rendering() {
        let v4 = [10, 1, 168, 192, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(raw_address(4, &format_ip(AF_INET, &v4)), v4);

        let mut mapped = [0u8; 16];
        mapped[10] = 0xff;
        mapped[11] = 0xff;
        mapped[12..].copy_from_slice(&[10, 0, 0, 7]);
        assert_eq!(raw_address(6, &format_ip(10, &mapped)), mapped);

        let v6 = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).octets();
        assert_eq!(raw_address(6, &format_ip(10, &v6)), v6);
    }

    #[test]
    fn test_decode_gzip() {
        let raw = encode(&[RawRecord::default(), RawRecord::default()]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let compressed = encoder.finish().unwrap();

        let snapshot = decode(&compressed).unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_bad_magic_is_format_error() {
        let mut data = encode(&[RawRecord::default()]);
        data[0] = 0x00;
        match decode(&data) {
            Err(DecodeError::Format { expected, .. }) => assert_eq!(expected, MAGIC),
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_records_is_truncated() {
        let mut data = encode(&[RawRecord::default(), RawRecord::default()]);
        data.truncate(HEADER_SIZE + RECORD_SIZE + 10);
        match decode(&data) {
            Err(DecodeError::Truncated { need, got }) => {
                assert_eq!(need, HEADER_SIZE + 2 * RECORD_SIZE);
                assert_eq!(got, HEADER_SIZE + RECORD_SIZE + 10);
            }
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_short_header_is_truncated() {
        let data = header(0);
        assert!(matches!(
            decode(&data[..20]),
            Err(DecodeError::Truncated { need: HEADER_SIZE, got: 20 })
        ));
    }

    #[test]
    fn test_header_interval_is_carried() {
        let header = parse_header(&header(5)).unwrap();
        assert_eq!(header.entries, 5);
        assert_eq!(header.interval.kind, 1);
        assert_eq!(header.interval.base, 1_600_000_000);
        assert_eq!(header.interval.value, -1);
    }

    #[test]
    fn test_rows_come_out_sorted() {
        let small = RawRecord {
            in_bytes: 10,
            ..Default::default()
        };
        let large = RawRecord {
            in_bytes: 10_000,
            mac: [1, 2, 3, 4, 5, 6],
            ..Default::default()
        };

        let snapshot = decode(&encode(&[small, large])).unwrap();
        assert_eq!(snapshot.rows()[0].mac, "01:02:03:04:05:06");
        assert_eq!(snapshot.rows()[1].rx_bytes, 10);
    }
}
