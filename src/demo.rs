//! Synthetic traffic for running the dashboard without a router
//!
//! Ten fixed devices, four of them heavy users and six low-volume IoT
//! gadgets. Roughly one day in twenty has no traffic at all.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::snapshot::{key_for_date, Row, Snapshot, SnapshotStore};

const RANGE_DATE_FORMAT: &str = "%d.%m.%Y";
const DEMO_DIR: &str = "demo";

const KB: f64 = 1024.0;
const MB: f64 = 1024.0 * KB;
const GB: f64 = 1024.0 * MB;

const EMPTY_DAY_CHANCE: f64 = 0.05;

/// Inclusive range of days to generate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Parse `DD.MM.YYYY-DD.MM.YYYY`
    pub fn parse(s: &str) -> Result<Self> {
        let Some((from, to)) = s.split_once('-') else {
            anyhow::bail!("invalid date range '{}', expected DD.MM.YYYY-DD.MM.YYYY", s);
        };
        let from = NaiveDate::parse_from_str(from.trim(), RANGE_DATE_FORMAT)
            .with_context(|| format!("invalid from date '{}'", from.trim()))?;
        let to = NaiveDate::parse_from_str(to.trim(), RANGE_DATE_FORMAT)
            .with_context(|| format!("invalid to date '{}'", to.trim()))?;
        if to < from {
            anyhow::bail!("to date {} is before from date {}", to, from);
        }
        Ok(Self { from, to })
    }

    /// Every day in the range, ascending
    pub fn days(&self) -> Vec<NaiveDate> {
        self.from.iter_days().take_while(|day| *day <= self.to).collect()
    }
}

struct Device {
    mac: &'static str,
    ip: &'static str,
    iot: bool,
}

static DEVICES: [Device; 10] = [
    Device { mac: "00:11:22:33:44:55", ip: "192.168.1.10", iot: false },
    Device { mac: "aa:bb:cc:dd:ee:ff", ip: "192.168.1.20", iot: false },
    Device { mac: "12:34:56:78:9a:bc", ip: "192.168.1.30", iot: false },
    Device { mac: "fe:dc:ba:98:76:54", ip: "192.168.1.40", iot: false },
    Device { mac: "11:22:33:44:55:66", ip: "192.168.1.50", iot: true },
    Device { mac: "aa:11:bb:22:cc:33", ip: "192.168.1.60", iot: true },
    Device { mac: "ff:ee:dd:cc:bb:aa", ip: "192.168.1.70", iot: true },
    Device { mac: "99:88:77:66:55:44", ip: "192.168.1.80", iot: true },
    Device { mac: "bb:aa:99:88:77:66", ip: "192.168.1.90", iot: true },
    Device { mac: "cc:dd:ee:ff:00:11", ip: "192.168.1.100", iot: true },
];

static PROTOCOLS: [(&str, &[u16]); 3] = [
    ("TCP", &[80, 443, 8080, 22, 3389, 5432, 3306]),
    ("UDP", &[53, 123, 1194, 500, 4500]),
    ("ICMP", &[0]),
];

pub struct Generator {
    rng: StdRng,
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// One day of traffic for every device
    pub fn generate_day(&mut self) -> Snapshot {
        if self.rng.gen::<f64>() < EMPTY_DAY_CHANCE {
            return Snapshot::new(Vec::new());
        }

        let mut rows = Vec::new();
        for device in &DEVICES {
            let (total_rx, total_tx, records) = if device.iot {
                (self.iot_traffic(), self.iot_traffic(), self.rng.gen_range(1..=3))
            } else {
                let upload_ratio = 0.3 + self.rng.gen::<f64>() * 0.6;
                (
                    self.regular_traffic(1.0),
                    self.regular_traffic(upload_ratio),
                    self.rng.gen_range(5..=15),
                )
            };

            if total_rx == 0 && total_tx == 0 {
                continue;
            }

            for _ in 0..records {
                let portion = (0.5 + self.rng.gen::<f64>()) / records as f64;
                let rx = (total_rx as f64 * portion) as u64;
                let tx = (total_tx as f64 * portion) as u64;
                rows.push(self.record(device, rx, tx));
            }
        }
        Snapshot::new(rows)
    }

    fn record(&mut self, device: &Device, rx_bytes: u64, tx_bytes: u64) -> Row {
        let (protocol, ports) = PROTOCOLS[self.rng.gen_range(0..PROTOCOLS.len())];
        let port = ports.choose(&mut self.rng).copied().unwrap_or(0);

        Row {
            family: 4,
            protocol: protocol.to_string(),
            port,
            mac: device.mac.to_string(),
            ip: device.ip.to_string(),
            connections: self.rng.gen_range(1..=100),
            rx_bytes,
            rx_packets: self.packets(rx_bytes),
            tx_bytes,
            tx_packets: self.packets(tx_bytes),
            layer7: None,
        }
    }

    fn packets(&mut self, bytes: u64) -> u64 {
        let size = self.rng.gen_range(500..1500);
        match bytes / size {
            0 if bytes > 0 => 1,
            n => n,
        }
    }

    /// Mostly ~2 GB, sometimes nothing, sometimes a 10-15 GB binge
    fn regular_traffic(&mut self, ratio: f64) -> u64 {
        let dice = self.rng.gen::<f64>();
        let traffic = if dice < 0.15 {
            0.0
        } else if dice < 0.85 {
            (2.0 * GB + (self.rng.gen::<f64>() * 2.0 - 1.0) * GB) * ratio
        } else {
            (15.0 * GB - self.rng.gen::<f64>() * 5.0 * GB) * ratio
        };
        traffic as u64
    }

    /// 100 KB - 2 MB, skewed towards the low end
    fn iot_traffic(&mut self) -> u64 {
        let min = 100.0 * KB;
        let max = 2.0 * MB;
        let weighted = self.rng.gen::<f64>().powi(2);
        (min + weighted * (max - min)) as u64
    }
}

/// Fill the store with one synthetic snapshot per day in `range`
pub fn populate(store: &SnapshotStore, range: &DateRange, generator: &mut Generator) -> usize {
    let days = range.days();
    info!("Generating demo data for {} days", days.len());

    let mut rows = 0;
    let mut empty = 0;
    for day in &days {
        let snapshot = generator.generate_day();
        rows += snapshot.len();
        if snapshot.is_empty() {
            empty += 1;
        }
        store.put(key_for_date(DEMO_DIR, *day), snapshot);
    }

    info!(
        "Generated demo data: {} days ({} without traffic), {} rows",
        days.len(),
        empty,
        rows
    );
    days.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::date_from_key;
    use std::collections::HashSet;

    impl Generator {
        fn with_seed(seed: u64) -> Self {
            Self {
                rng: StdRng::seed_from_u64(seed),
            }
        }
    }

    #[test]
    fn test_parse_range() {
        let range = DateRange::parse("10.04.2024-12.04.2024").unwrap();
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2024, 4, 10).unwrap());
        assert_eq!(range.days().len(), 3);

        let single = DateRange::parse("01.01.2024 - 01.01.2024").unwrap();
        assert_eq!(single.days(), vec![NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()]);
    }

    #[test]
    fn test_parse_range_rejects_bad_input() {
        assert!(DateRange::parse("10.04.2024").is_err());
        assert!(DateRange::parse("2024-04-10").is_err());
        assert!(DateRange::parse("31.02.2024-01.03.2024").is_err());
        assert!(DateRange::parse("12.04.2024-10.04.2024").is_err());
    }

    #[test]
    fn test_generated_rows_stay_within_device_bounds() {
        let mut generator = Generator::with_seed(7);
        let iot: HashSet<&str> = DEVICES.iter().filter(|d| d.iot).map(|d| d.mac).collect();

        for _ in 0..50 {
            let snapshot = generator.generate_day();
            for row in snapshot.rows() {
                assert_eq!(row.family, 4);
                assert!(["TCP", "UDP", "ICMP"].contains(&row.protocol.as_str()));
                assert!(row.connections >= 1 && row.connections <= 100);
                if iot.contains(row.mac.as_str()) {
                    assert!(row.total_bytes() <= (4.0 * 1.5 * MB) as u64);
                }
                if row.rx_bytes > 0 {
                    assert!(row.rx_packets >= 1);
                }
            }
        }
    }

    #[test]
    fn test_populate_stores_one_snapshot_per_day() {
        let store = SnapshotStore::new();
        let range = DateRange::parse("28.02.2024-02.03.2024").unwrap();

        assert_eq!(populate(&store, &range, &mut Generator::with_seed(1)), 4);
        assert_eq!(store.len(), 4);
        let mut dates: Vec<NaiveDate> = store
            .get_all()
            .keys()
            .filter_map(|key| date_from_key(key))
            .collect();
        dates.sort();
        assert_eq!(dates.first(), Some(&range.from));
        assert_eq!(dates.last(), Some(&range.to));
        assert!(store.get("demo/20240229.db.gz").is_some());
    }

    #[test]
    fn test_some_days_are_empty_over_a_long_range() {
        let mut generator = Generator::with_seed(3);
        let empty = (0..400).filter(|_| generator.generate_day().is_empty()).count();
        assert!(empty > 0 && empty < 60, "{} empty days", empty);
    }
}
