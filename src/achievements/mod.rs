//! Network-wide achievements evaluated over the whole traffic history

mod cache;
pub mod catalog;
mod engine;

use chrono::NaiveDate;
use serde::Serialize;

pub use cache::AchievementCache;
pub use catalog::Rule;
pub use engine::AchievementEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Data,
    Activity,
    Network,
    Protocol,
}

/// Static achievement definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Achievement {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: Category,
    pub threshold: f64,
    #[serde(skip)]
    pub rule: Rule,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievementStatus {
    pub achievement: Achievement,
    pub unlocked: bool,
    /// Calendar day the condition first held
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocked_at: Option<NaiveDate>,
    /// 0.0 - 1.0
    pub progress: f64,
    pub current_value: f64,
    pub target_value: f64,
}

impl AchievementStatus {
    pub fn locked(achievement: &Achievement, current_value: f64, target_value: f64) -> Self {
        let progress = if target_value > 0.0 {
            (current_value / target_value).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            achievement: achievement.clone(),
            unlocked: false,
            unlocked_at: None,
            progress,
            current_value,
            target_value,
        }
    }

    pub fn unlocked(
        achievement: &Achievement,
        date: NaiveDate,
        current_value: f64,
        target_value: f64,
    ) -> Self {
        Self {
            achievement: achievement.clone(),
            unlocked: true,
            unlocked_at: Some(date),
            progress: 1.0,
            current_value,
            target_value,
        }
    }
}

/// Status of the whole catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AchievementReport {
    pub achievements: Vec<AchievementStatus>,
    pub total_unlocked: usize,
    /// Mean progress over every achievement
    pub total_progress: f64,
}

impl AchievementReport {
    pub fn from_statuses(achievements: Vec<AchievementStatus>) -> Self {
        let total_unlocked = achievements.iter().filter(|s| s.unlocked).count();
        let total_progress = if achievements.is_empty() {
            0.0
        } else {
            achievements.iter().map(|s| s.progress).sum::<f64>() / achievements.len() as f64
        };
        Self {
            achievements,
            total_unlocked,
            total_progress,
        }
    }
}
