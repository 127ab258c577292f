//! Read-only traffic views over the snapshot store
//!
//! Every call recomputes from a fresh copy of the store. Snapshots are small
//! and replaced wholesale, so there is no running state to invalidate.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::snapshot::{date_from_key, Row, Snapshot, SnapshotStore};

/// ISO date format used by every query and response
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Resolves a MAC address to a human-readable device name.
pub trait DeviceNames: Send + Sync {
    /// Display name for `mac`, or the MAC itself when unknown
    fn resolve(&self, mac: &str) -> String;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceStats {
    pub mac: String,
    pub friendly_name: String,
    pub ip: String,
    pub downloaded: u64,
    pub uploaded: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub connections: u64,
}

impl DeviceStats {
    fn add_row(&mut self, row: &Row) {
        self.downloaded = self.downloaded.saturating_add(row.rx_bytes);
        self.uploaded = self.uploaded.saturating_add(row.tx_bytes);
        self.rx_packets = self.rx_packets.saturating_add(row.rx_packets);
        self.tx_packets = self.tx_packets.saturating_add(row.tx_packets);
        self.connections = self.connections.saturating_add(row.connections);
        if !row.ip.is_empty() {
            self.ip = row.ip.clone();
        }
    }

    fn merge(&mut self, other: &DeviceStats) {
        self.downloaded = self.downloaded.saturating_add(other.downloaded);
        self.uploaded = self.uploaded.saturating_add(other.uploaded);
        self.rx_packets = self.rx_packets.saturating_add(other.rx_packets);
        self.tx_packets = self.tx_packets.saturating_add(other.tx_packets);
        self.connections = self.connections.saturating_add(other.connections);
        if !other.ip.is_empty() {
            self.ip = other.ip.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProtocolStats {
    pub protocol: String,
    pub port: u16,
    pub downloaded: u64,
    pub uploaded: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub connections: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayStats {
    pub date: String,
    pub downloaded: u64,
    pub uploaded: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub devices: BTreeMap<String, DeviceStats>,
}

/// One cell of the activity calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: String,
    /// downloaded + uploaded
    pub value: u64,
    pub downloaded: u64,
    pub uploaded: u64,
}

/// Per-day totals without the device breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySummary {
    pub date: String,
    pub downloaded: u64,
    pub uploaded: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeSummary {
    pub from: String,
    pub to: String,
    pub total_downloaded: u64,
    pub total_uploaded: u64,
    pub devices: BTreeMap<String, DeviceStats>,
    pub days: Vec<DaySummary>,
}

/// A stored snapshot together with the date parsed from its key
#[derive(Debug, Clone)]
pub struct DatedSnapshot {
    pub date: NaiveDate,
    pub snapshot: Arc<Snapshot>,
}

pub struct Aggregator {
    store: Arc<SnapshotStore>,
    names: Arc<dyn DeviceNames>,
}

impl Aggregator {
    pub fn new(store: Arc<SnapshotStore>, names: Arc<dyn DeviceNames>) -> Self {
        Self { store, names }
    }

    /// Every stored snapshot with a valid date token, ascending by date.
    ///
    /// Keys without a parseable date are skipped. When two keys carry the
    /// same date, the lexicographically greater key wins.
    pub fn history(&self) -> Vec<DatedSnapshot> {
        let mut by_date: BTreeMap<NaiveDate, DatedSnapshot> = BTreeMap::new();
        let mut entries: Vec<(String, Arc<Snapshot>)> = self.store.get_all().into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, snapshot) in entries {
            if let Some(date) = date_from_key(&key) {
                by_date.insert(date, DatedSnapshot { date, snapshot });
            }
        }
        by_date.into_values().collect()
    }

    /// History restricted to `from..=to`. Unparseable bounds give no data.
    fn history_between(&self, from: &str, to: &str) -> Vec<DatedSnapshot> {
        let (Some(from), Some(to)) = (parse_date(from), parse_date(to)) else {
            return Vec::new();
        };
        self.history()
            .into_iter()
            .filter(|day| day.date >= from && day.date <= to)
            .collect()
    }

    /// Daily totals for the activity calendar, optionally limited to `macs`
    pub fn calendar(&self, macs: &[String]) -> Vec<CalendarDay> {
        let filter = MacFilter::new(macs);
        self.history()
            .into_iter()
            .map(|day| {
                let (downloaded, uploaded) = day
                    .snapshot
                    .rows()
                    .iter()
                    .filter(|row| filter.allows(&row.mac))
                    .fold((0u64, 0u64), |(rx, tx), row| {
                        (rx.saturating_add(row.rx_bytes), tx.saturating_add(row.tx_bytes))
                    });
                CalendarDay {
                    date: format_date(day.date),
                    value: downloaded.saturating_add(uploaded),
                    downloaded,
                    uploaded,
                }
            })
            .collect()
    }

    /// Per-device breakdown of one day
    pub fn day_stats(&self, date: &str) -> Option<DayStats> {
        let day = self.find_day(date)?;
        Some(self.aggregate_day(day.date, &day.snapshot))
    }

    /// Protocol breakdown of one device on one day.
    ///
    /// `None` when no snapshot exists for `date`; an empty list when the
    /// device had no traffic that day.
    pub fn device_protocols(&self, date: &str, mac: &str) -> Option<Vec<ProtocolStats>> {
        let day = self.find_day(date)?;
        let mut acc = ProtocolAccumulator::new(mac);
        acc.add_snapshot(&day.snapshot);
        Some(acc.finish())
    }

    /// Protocol breakdown of one device over `from..=to`
    pub fn device_protocols_range(&self, from: &str, to: &str, mac: &str) -> Vec<ProtocolStats> {
        let mut acc = ProtocolAccumulator::new(mac);
        for day in self.history_between(from, to) {
            acc.add_snapshot(&day.snapshot);
        }
        acc.finish()
    }

    /// Totals, per-day summaries and per-device totals over `from..=to`
    pub fn summary(&self, from: &str, to: &str) -> RangeSummary {
        let mut summary = RangeSummary {
            from: from.to_string(),
            to: to.to_string(),
            total_downloaded: 0,
            total_uploaded: 0,
            devices: BTreeMap::new(),
            days: Vec::new(),
        };

        for day in self.history_between(from, to) {
            let stats = self.aggregate_day(day.date, &day.snapshot);
            summary.total_downloaded = summary.total_downloaded.saturating_add(stats.downloaded);
            summary.total_uploaded = summary.total_uploaded.saturating_add(stats.uploaded);
            summary.days.push(DaySummary {
                date: stats.date.clone(),
                downloaded: stats.downloaded,
                uploaded: stats.uploaded,
            });

            for (mac, device) in &stats.devices {
                summary
                    .devices
                    .entry(mac.clone())
                    .or_insert_with(|| DeviceStats {
                        mac: device.mac.clone(),
                        friendly_name: device.friendly_name.clone(),
                        ..Default::default()
                    })
                    .merge(device);
            }
        }
        summary
    }

    /// Per-day device stats over `from..=to`, optionally limited to `macs`
    pub fn timeseries(&self, from: &str, to: &str, macs: &[String]) -> Vec<DayStats> {
        let filter = MacFilter::new(macs);
        self.history_between(from, to)
            .into_iter()
            .map(|day| {
                let stats = self.aggregate_day(day.date, &day.snapshot);
                if filter.is_active() {
                    filter_devices(stats, &filter)
                } else {
                    stats
                }
            })
            .collect()
    }

    /// Fold one snapshot into per-device totals
    pub fn aggregate_day(&self, date: NaiveDate, snapshot: &Snapshot) -> DayStats {
        let mut stats = DayStats {
            date: format_date(date),
            downloaded: 0,
            uploaded: 0,
            devices: BTreeMap::new(),
        };

        for row in snapshot.rows() {
            stats.downloaded = stats.downloaded.saturating_add(row.rx_bytes);
            stats.uploaded = stats.uploaded.saturating_add(row.tx_bytes);
            stats
                .devices
                .entry(row.mac.clone())
                .or_insert_with(|| DeviceStats {
                    mac: row.mac.clone(),
                    friendly_name: self.names.resolve(&row.mac),
                    ..Default::default()
                })
                .add_row(row);
        }
        stats
    }

    fn find_day(&self, date: &str) -> Option<DatedSnapshot> {
        let date = parse_date(date)?;
        self.history().into_iter().find(|day| day.date == date)
    }
}

/// Parse an ISO `YYYY-MM-DD` date
pub fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Case-insensitive MAC allow-list. An empty list allows everything.
struct MacFilter {
    macs: HashSet<String>,
}

impl MacFilter {
    fn new(macs: &[String]) -> Self {
        Self {
            macs: macs
                .iter()
                .map(|mac| mac.trim().to_lowercase())
                .filter(|mac| !mac.is_empty())
                .collect(),
        }
    }

    fn is_active(&self) -> bool {
        !self.macs.is_empty()
    }

    fn allows(&self, mac: &str) -> bool {
        !self.is_active() || self.macs.contains(&mac.to_lowercase())
    }
}

fn filter_devices(stats: DayStats, filter: &MacFilter) -> DayStats {
    let devices: BTreeMap<String, DeviceStats> = stats
        .devices
        .into_iter()
        .filter(|(mac, _)| filter.allows(mac))
        .collect();
    DayStats {
        date: stats.date,
        downloaded: devices.values().map(|d| d.downloaded).fold(0, u64::saturating_add),
        uploaded: devices.values().map(|d| d.uploaded).fold(0, u64::saturating_add),
        devices,
    }
}

struct ProtocolAccumulator {
    mac: String,
    by_key: HashMap<(String, u16), ProtocolStats>,
}

impl ProtocolAccumulator {
    fn new(mac: &str) -> Self {
        Self {
            mac: mac.trim().to_lowercase(),
            by_key: HashMap::new(),
        }
    }

    fn add_snapshot(&mut self, snapshot: &Snapshot) {
        for row in snapshot.rows() {
            if row.mac.to_lowercase() != self.mac {
                continue;
            }
            let stats = self
                .by_key
                .entry((row.protocol.clone(), row.port))
                .or_insert_with(|| ProtocolStats {
                    protocol: row.protocol.clone(),
                    port: row.port,
                    ..Default::default()
                });
            stats.downloaded = stats.downloaded.saturating_add(row.rx_bytes);
            stats.uploaded = stats.uploaded.saturating_add(row.tx_bytes);
            stats.rx_packets = stats.rx_packets.saturating_add(row.rx_packets);
            stats.tx_packets = stats.tx_packets.saturating_add(row.tx_packets);
            stats.connections = stats.connections.saturating_add(row.connections);
        }
    }

    fn finish(self) -> Vec<ProtocolStats> {
        let mut result: Vec<ProtocolStats> = self.by_key.into_values().collect();
        result.sort_by(|a, b| {
            b.downloaded
                .cmp(&a.downloaded)
                .then_with(|| a.protocol.cmp(&b.protocol))
                .then_with(|| a.port.cmp(&b.port))
        });
        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Name resolver that knows nothing
    pub struct RawMacs;

    impl DeviceNames for RawMacs {
        fn resolve(&self, mac: &str) -> String {
            mac.to_string()
        }
    }

    impl Aggregator {
        pub fn store(&self) -> &SnapshotStore {
            &self.store
        }
    }

    pub fn aggregator_with(days: Vec<(&str, Vec<Row>)>) -> Aggregator {
        let store = Arc::new(SnapshotStore::new());
        for (date, rows) in days {
            let date = parse_date(date).unwrap();
            store.put(crate::snapshot::key_for_date("data", date), Snapshot::new(rows));
        }
        Aggregator::new(store, Arc::new(RawMacs))
    }
}
