//! Achievement evaluation
//!
//! History is scanned in ascending date order. Each rule reports the first
//! day its condition held, so the unlock date never depends on when the
//! evaluation happened to run.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

use super::cache::{AchievementCache, CachedUnlock};
use super::catalog::{self, Direction, FlowFilter, Unit};
use super::{Achievement, AchievementReport, AchievementStatus, Rule};
use crate::aggregator::Aggregator;
use crate::snapshot::Snapshot;

/// One calendar day of history, pre-digested for rule evaluation
struct HistoryDay {
    date: NaiveDate,
    snapshot: Arc<Snapshot>,
    downloaded: u64,
    uploaded: u64,
    devices: BTreeSet<String>,
}

impl HistoryDay {
    fn total(&self) -> u64 {
        self.downloaded.saturating_add(self.uploaded)
    }
}

/// Result of scanning history for one rule
struct Outcome {
    unlocked_at: Option<NaiveDate>,
    current: f64,
}

impl Outcome {
    fn unlocked(date: NaiveDate, current: f64) -> Self {
        Self {
            unlocked_at: Some(date),
            current,
        }
    }

    fn locked(current: f64) -> Self {
        Self {
            unlocked_at: None,
            current,
        }
    }
}

pub struct AchievementEngine {
    aggregator: Arc<Aggregator>,
    catalog: Vec<Achievement>,
    cache: Arc<AchievementCache>,
}

impl AchievementEngine {
    /// Engine over the full built-in catalog
    pub fn new(aggregator: Arc<Aggregator>, cache: Arc<AchievementCache>) -> Self {
        Self::with_catalog(aggregator, catalog::all(), cache)
    }

    pub fn with_catalog(
        aggregator: Arc<Aggregator>,
        catalog: Vec<Achievement>,
        cache: Arc<AchievementCache>,
    ) -> Self {
        Self {
            aggregator,
            catalog,
            cache,
        }
    }

    pub fn catalog(&self) -> &[Achievement] {
        &self.catalog
    }

    /// Status of a single achievement against the current history
    pub fn evaluate(&self, achievement: &Achievement) -> AchievementStatus {
        let mut history = None;
        self.evaluate_with(achievement, &mut history)
    }

    /// Status of every catalog entry.
    ///
    /// History is only materialised when at least one entry is not cached.
    pub fn report(&self) -> AchievementReport {
        let mut history = None;
        let statuses = self
            .catalog
            .iter()
            .map(|achievement| self.evaluate_with(achievement, &mut history))
            .collect();
        AchievementReport::from_statuses(statuses)
    }

    fn evaluate_with(
        &self,
        achievement: &Achievement,
        history: &mut Option<Vec<HistoryDay>>,
    ) -> AchievementStatus {
        if let Some(cached) = self.cache.get(achievement.id) {
            return AchievementStatus::unlocked(
                achievement,
                cached.unlocked_at,
                cached.current_value,
                cached.target_value,
            );
        }

        let days = history.get_or_insert_with(|| self.load_history());
        let outcome = evaluate_rule(achievement.rule, achievement.threshold, days);
        let target = if achievement.rule.is_binary() {
            1.0
        } else {
            achievement.threshold
        };

        match outcome.unlocked_at {
            Some(date) => {
                if !self.cache.is_unlocked(achievement.id) {
                    info!("Achievement unlocked: {} on {}", achievement.id, date);
                }
                self.cache.insert(
                    achievement.id,
                    CachedUnlock {
                        unlocked_at: date,
                        current_value: outcome.current,
                        target_value: target,
                    },
                );
                AchievementStatus::unlocked(achievement, date, outcome.current, target)
            }
            None => AchievementStatus::locked(achievement, outcome.current, target),
        }
    }

    fn load_history(&self) -> Vec<HistoryDay> {
        self.aggregator
            .history()
            .into_iter()
            .map(|day| {
                let (downloaded, uploaded) = day.snapshot.totals();
                let devices = day.snapshot.rows().iter().map(|row| row.mac.clone()).collect();
                HistoryDay {
                    date: day.date,
                    snapshot: day.snapshot,
                    downloaded,
                    uploaded,
                    devices,
                }
            })
            .collect()
    }
}

fn evaluate_rule(rule: Rule, threshold: f64, days: &[HistoryDay]) -> Outcome {
    match rule {
        Rule::Cumulative(direction) => cumulative(days, threshold, |day| match direction {
            Direction::Total => day.total(),
            Direction::Upload => day.uploaded,
        }),
        Rule::DailyPeak => peak(days, threshold, |day| day.total() as f64),
        Rule::Streak => streak(days, threshold),
        Rule::PeakDevices => peak(days, threshold, |day| day.devices.len() as f64),
        Rule::ExactDevices => binary(
            days.iter()
                .find(|day| day.devices.len() as f64 == threshold)
                .map(|day| day.date),
        ),
        Rule::Flow { filter, unit } => {
            cumulative(days, threshold, |day| flow_total(&day.snapshot, filter, unit))
        }
        Rule::Reappearance => binary(reappearance(days, threshold)),
        Rule::SentinelMac(mac) => binary(
            days.iter()
                .find(|day| day.devices.iter().any(|m| m.eq_ignore_ascii_case(mac)))
                .map(|day| day.date),
        ),
    }
}

/// Running sum; unlocks on the first day it reaches the threshold
fn cumulative(days: &[HistoryDay], threshold: f64, value: impl Fn(&HistoryDay) -> u64) -> Outcome {
    let mut sum: u64 = 0;
    for day in days {
        sum = sum.saturating_add(value(day));
        if sum as f64 >= threshold {
            return Outcome::unlocked(day.date, sum as f64);
        }
    }
    Outcome::locked(sum as f64)
}

/// Best single day; unlocks on the first day reaching the threshold
fn peak(days: &[HistoryDay], threshold: f64, value: impl Fn(&HistoryDay) -> f64) -> Outcome {
    let mut best = 0.0f64;
    for day in days {
        let v = value(day);
        best = best.max(v);
        if v >= threshold {
            return Outcome::unlocked(day.date, v);
        }
    }
    Outcome::locked(best)
}

/// Consecutive active days. A missing day starts over at 1, a zero-traffic
/// day drops the streak to 0.
fn streak(days: &[HistoryDay], threshold: f64) -> Outcome {
    let mut current: u32 = 0;
    let mut best: u32 = 0;
    let mut last_active: Option<NaiveDate> = None;

    for day in days {
        if day.total() == 0 {
            current = 0;
            last_active = None;
            continue;
        }

        let follows = last_active.and_then(|last| last.succ_opt()) == Some(day.date);
        current = if follows { current + 1 } else { 1 };
        last_active = Some(day.date);
        best = best.max(current);

        if f64::from(current) >= threshold {
            return Outcome::unlocked(day.date, f64::from(current));
        }
    }
    Outcome::locked(f64::from(best))
}

/// First day some device shows up again after at least `threshold` days away
fn reappearance(days: &[HistoryDay], threshold: f64) -> Option<NaiveDate> {
    let mut last_seen: HashMap<&str, NaiveDate> = HashMap::new();
    for day in days {
        let mut returned = false;
        for mac in &day.devices {
            if let Some(previous) = last_seen.insert(mac.as_str(), day.date) {
                if (day.date - previous).num_days() as f64 >= threshold {
                    returned = true;
                }
            }
        }
        if returned {
            return Some(day.date);
        }
    }
    None
}

fn flow_total(snapshot: &Snapshot, filter: FlowFilter, unit: Unit) -> u64 {
    snapshot
        .rows()
        .iter()
        .filter(|row| filter.matches(row))
        .map(|row| match unit {
            Unit::Bytes => row.total_bytes(),
            Unit::Packets => row.total_packets(),
        })
        .fold(0u64, u64::saturating_add)
}

fn binary(date: Option<NaiveDate>) -> Outcome {
    match date {
        Some(date) => Outcome::unlocked(date, 1.0),
        None => Outcome::locked(0.0),
    }
}
