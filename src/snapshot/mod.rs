//! Decoded traffic snapshots
//!
//! One snapshot holds a single day of nlbwmon accounting. Snapshots are
//! immutable once built; the store replaces them wholesale.

pub mod decoder;
pub mod store;

use chrono::{DateTime, NaiveDate, Utc};
use serde::ser::SerializeTuple;
use serde::{Serialize, Serializer};
use std::cmp::Reverse;
use std::path::Path;

pub use decoder::DecodeError;
pub use store::SnapshotStore;

/// Suffix every snapshot file name carries after its YYYYMMDD token
pub const SNAPSHOT_SUFFIX: &str = ".db.gz";

/// Column schema of a decoded row, in serialization order
pub const COLUMNS: [&str; 11] = [
    "family", "proto", "port", "mac", "ip", "conns", "rx_bytes", "rx_pkts", "tx_bytes", "tx_pkts",
    "layer7",
];

/// One flow aggregate: traffic of one device to one (protocol, port) pair.
///
/// `rx_*` counters are downloaded traffic, `tx_*` counters are uploaded
/// traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub family: u8,
    pub protocol: String,
    pub port: u16,
    pub mac: String,
    pub ip: String,
    pub connections: u64,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub layer7: Option<String>,
}

impl Row {
    /// Downloaded plus uploaded bytes
    pub fn total_bytes(&self) -> u64 {
        self.rx_bytes.saturating_add(self.tx_bytes)
    }

    /// Downloaded plus uploaded packets
    pub fn total_packets(&self) -> u64 {
        self.rx_packets.saturating_add(self.tx_packets)
    }

    /// Display ordering: heaviest download first, then ascending by the
    /// identity fields as nlbwmon stores them (protocol number, raw address
    /// bytes), then by the remaining counters.
    fn display_key(&self) -> DisplayKey {
        (
            Reverse(self.rx_bytes),
            Reverse(self.rx_packets),
            self.family,
            decoder::protocol_number(&self.protocol).map_or(UNKNOWN_PROTOCOL, u16::from),
            self.port,
            self.mac.clone(),
            decoder::raw_address(self.family, &self.ip),
            self.connections,
            self.tx_packets,
            self.tx_bytes,
        )
    }
}

// Sorts after every real protocol number
const UNKNOWN_PROTOCOL: u16 = 256;

type DisplayKey = (
    Reverse<u64>,
    Reverse<u64>,
    u8,
    u16,
    u16,
    String,
    [u8; 16],
    u64,
    u64,
    u64,
);

// Rows go over the wire as positional arrays matching COLUMNS.
impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(COLUMNS.len())?;
        tuple.serialize_element(&self.family)?;
        tuple.serialize_element(&self.protocol)?;
        tuple.serialize_element(&self.port)?;
        tuple.serialize_element(&self.mac)?;
        tuple.serialize_element(&self.ip)?;
        tuple.serialize_element(&self.connections)?;
        tuple.serialize_element(&self.rx_bytes)?;
        tuple.serialize_element(&self.rx_packets)?;
        tuple.serialize_element(&self.tx_bytes)?;
        tuple.serialize_element(&self.tx_packets)?;
        tuple.serialize_element(&self.layer7)?;
        tuple.end()
    }
}

/// A full day of decoded rows
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    columns: [&'static str; 11],
    #[serde(rename = "data")]
    rows: Vec<Row>,
    #[serde(skip)]
    captured_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Build a snapshot, putting rows into display order
    pub fn new(mut rows: Vec<Row>) -> Self {
        rows.sort_by_cached_key(Row::display_key);
        Self {
            columns: COLUMNS,
            rows,
            captured_at: None,
        }
    }

    pub fn with_capture_time(mut self, captured_at: Option<DateTime<Utc>>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Capture time from the snapshot header, if one was recorded
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.captured_at
    }

    /// (downloaded, uploaded) bytes over every row
    pub fn totals(&self) -> (u64, u64) {
        self.rows.iter().fold((0u64, 0u64), |(rx, tx), row| {
            (rx.saturating_add(row.rx_bytes), tx.saturating_add(row.tx_bytes))
        })
    }
}

/// Extract the calendar date from a snapshot key.
///
/// The key may be a full path; the date is the 8 characters right before
/// [`SNAPSHOT_SUFFIX`] (or at the end of the file name when the suffix is
/// missing). Returns `None` when that token is not a valid YYYYMMDD date.
pub fn date_from_key(key: &str) -> Option<NaiveDate> {
    let name = Path::new(key).file_name()?.to_str()?;
    let stem = name.strip_suffix(SNAPSHOT_SUFFIX).unwrap_or(name);
    let token = stem.get(stem.len().checked_sub(8)?..)?;
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(token, "%Y%m%d").ok()
}

/// Storage key for a snapshot of the given day under `dir`
pub fn key_for_date(dir: &str, date: NaiveDate) -> String {
    format!("{}/{}{}", dir, date.format("%Y%m%d"), SNAPSHOT_SUFFIX)
}
