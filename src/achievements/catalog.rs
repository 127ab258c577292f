//! Achievement catalog
//!
//! Each entry pairs its display data with the rule that evaluates it. Adding
//! an achievement is a new table entry.

use super::{Achievement, Category};
use crate::snapshot::Row;

pub const ONE_MEGABYTE: f64 = 1024.0 * 1024.0;
pub const ONE_GIGABYTE: f64 = 1024.0 * ONE_MEGABYTE;
pub const ONE_TERABYTE: f64 = 1024.0 * ONE_GIGABYTE;
pub const ONE_PETABYTE: f64 = 1024.0 * ONE_TERABYTE;

pub const GHOST_MAC: &str = "00:00:00:00:00:00";

/// Which side of the traffic a cumulative rule counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// downloaded + uploaded
    Total,
    Upload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Bytes,
    Packets,
}

/// Row selector for protocol rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowFilter {
    pub port: Option<u16>,
    /// Protocol name, compared case-insensitively
    pub transport: Option<&'static str>,
}

impl FlowFilter {
    pub const fn port(port: u16) -> Self {
        Self {
            port: Some(port),
            transport: None,
        }
    }

    pub const fn transport(transport: &'static str) -> Self {
        Self {
            port: None,
            transport: Some(transport),
        }
    }

    pub const fn transport_port(transport: &'static str, port: u16) -> Self {
        Self {
            port: Some(port),
            transport: Some(transport),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.port.map_or(true, |port| row.port == port)
            && self
                .transport
                .map_or(true, |transport| row.protocol.eq_ignore_ascii_case(transport))
    }
}

/// How an achievement is evaluated against history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Running sum over all days reaches the threshold
    Cumulative(Direction),
    /// One day's total reaches the threshold
    DailyPeak,
    /// Consecutive active days reach the threshold
    Streak,
    /// One day has at least `threshold` devices
    PeakDevices,
    /// One day has exactly `threshold` devices
    ExactDevices,
    /// Running sum over matching rows reaches the threshold
    Flow { filter: FlowFilter, unit: Unit },
    /// A device comes back after at least `threshold` days
    Reappearance,
    /// A row with this MAC shows up
    SentinelMac(&'static str),
}

impl Rule {
    /// Rules that only report 0 or 1 progress
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Rule::ExactDevices | Rule::Reappearance | Rule::SentinelMac(_)
        )
    }
}

fn entry(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    category: Category,
    threshold: f64,
    rule: Rule,
) -> Achievement {
    Achievement {
        id,
        name,
        description,
        category,
        threshold,
        rule,
    }
}

/// The full catalog, in display order
pub fn all() -> Vec<Achievement> {
    use Category::*;

    let total = Rule::Cumulative(Direction::Total);
    let icmp_packets = Rule::Flow {
        filter: FlowFilter::transport("icmp"),
        unit: Unit::Packets,
    };

    vec![
        entry("first_gigabyte", "First Gigabyte", "Transfer 1 GB of data total", Data, ONE_GIGABYTE, total),
        entry("data_hoarder", "Data Hoarder", "Transfer 100 GB of data total", Data, 100.0 * ONE_GIGABYTE, total),
        entry("terabyte_club", "Terabyte Club", "Transfer 1 TB of data total", Data, ONE_TERABYTE, total),
        entry("hundred_terabyte", "Data Center", "Transfer 100 TB of data total", Data, 100.0 * ONE_TERABYTE, total),
        entry("petabyte_club", "Oh my gosh..", "Transfer 1 PB of data total", Data, ONE_PETABYTE, total),
        entry("what_the_fuck", "WHAT THE FUCK!!?!?!???!??", "Transfer 5 PB of data total", Data, 5.0 * ONE_PETABYTE, total),
        entry("daily_burner", "Daily Burner", "Transfer more than 10 GB in a single day", Data, 10.0 * ONE_GIGABYTE, Rule::DailyPeak),
        entry("week_warrior", "Week Warrior", "Be active for 7 consecutive days", Activity, 7.0, Rule::Streak),
        entry("monthly_active", "Monthly Active", "Be active for 30 consecutive days", Activity, 30.0, Rule::Streak),
        entry("still_alive", "Still Alive", "Be active for 365 consecutive days", Activity, 365.0, Rule::Streak),
        entry("network_growth", "Network Growth", "Have 5 or more active devices in the network", Network, 5.0, Rule::PeakDevices),
        entry("ping_of_death", "Ping of Death", "Send or receive 65,535 ICMP packets", Protocol, 65_535.0, icmp_packets),
        entry("uptime_kuma", "Uptime Kuma", "Send or receive 1,000,000 ICMP packets", Protocol, 1_000_000.0, icmp_packets),
        entry("smurf_attack", "Smurf Attack", "Send or receive 1,000,000,000 ICMP packets", Protocol, 1_000_000_000.0, icmp_packets),
        entry(
            "red_eyed",
            "Red-Eyed",
            "Transfer 1 GB of data via SSH",
            Protocol,
            ONE_GIGABYTE,
            Rule::Flow { filter: FlowFilter::port(22), unit: Unit::Bytes },
        ),
        entry(
            "what_year",
            "What year is it?",
            "Transfer 100 MB of data via FTP",
            Protocol,
            100.0 * ONE_MEGABYTE,
            Rule::Flow { filter: FlowFilter::port(21), unit: Unit::Bytes },
        ),
        entry(
            "i_seek_you",
            "I Seek You",
            "One less digit, and it would have been a legend",
            Protocol,
            1_000_000.0,
            Rule::Flow { filter: FlowFilter::port(53), unit: Unit::Packets },
        ),
        entry("ghost", "???", "Detect a device with MAC 00:00:00:00:00:00", Network, 1.0, Rule::SentinelMac(GHOST_MAC)),
        entry("slumber_party", "Slumber Party", "Have 20 or more devices active in a single day", Network, 20.0, Rule::PeakDevices),
        entry("i_love_you", "ILOVEYOU", "Transfer 143 GB of data in a single day", Data, 143.0 * ONE_GIGABYTE, Rule::DailyPeak),
        entry("miss_me", "Miss me?", "A device returns after 90+ days of absence", Network, 90.0, Rule::Reappearance),
        entry("three_body", "3 Body Problem", "Have exactly 3 devices active in a single day", Network, 3.0, Rule::ExactDevices),
        entry(
            "on_fire",
            "I'm on Fire",
            "Upload 451 GB of data total",
            Data,
            451.0 * ONE_GIGABYTE,
            Rule::Cumulative(Direction::Upload),
        ),
        entry(
            "pudding_lane",
            "Pudding Lane",
            "Transfer 1666 MB over unencrypted HTTP.",
            Protocol,
            1666.0 * ONE_MEGABYTE,
            Rule::Flow { filter: FlowFilter::transport_port("tcp", 80), unit: Unit::Bytes },
        ),
        entry(
            "imposter",
            "Imposter",
            "Transfer data via UDP:443. QUIC? Hysteria? Who knows",
            Protocol,
            443.0 * ONE_GIGABYTE,
            Rule::Flow { filter: FlowFilter::transport_port("udp", 443), unit: Unit::Bytes },
        ),
    ]
}

/// Look up a catalog entry by id
#[cfg(test)]
pub fn by_id(id: &str) -> Option<Achievement> {
    all().into_iter().find(|a| a.id == id)
}
