use chrono::{DateTime, Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::BTreeSet;

/// Every ratio in a dashboard goes through this: zero denominator yields
/// exactly 0, never NaN or infinity.
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Calendar date of a stored RFC3339 timestamp. Falls back to a bare
/// `YYYY-MM-DD` prefix so date-only fixtures still bucket correctly.
pub fn local_date(ts: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.date_naive());
    }
    NaiveDate::parse_from_str(ts.get(..10)?, "%Y-%m-%d").ok()
}

pub const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonthBucket {
    pub month: String,
    pub count: i64,
}

/// Twelve calendar-month buckets for the given year. Months with no
/// activity are present with count 0; timestamps outside the year are
/// ignored.
pub fn monthly_buckets<'a, I>(timestamps: I, year: i32) -> Vec<MonthBucket>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts = [0i64; 12];
    for ts in timestamps {
        let Some(date) = local_date(ts) else {
            continue;
        };
        if date.year() == year {
            counts[date.month0() as usize] += 1;
        }
    }
    MONTH_LABELS
        .iter()
        .zip(counts.iter())
        .map(|(label, count)| MonthBucket {
            month: (*label).to_string(),
            count: *count,
        })
        .collect()
}

/// Consecutive distinct attempt-days ending at `as_of` or the day before.
/// 0 when neither day has an attempt; otherwise the run extends backward
/// while the gap between consecutive distinct days is exactly one day.
pub fn study_streak(attempt_days: &BTreeSet<NaiveDate>, as_of: NaiveDate) -> u32 {
    let anchor = if attempt_days.contains(&as_of) {
        as_of
    } else if attempt_days.contains(&(as_of - Duration::days(1))) {
        as_of - Duration::days(1)
    } else {
        return 0;
    };

    let mut streak = 1u32;
    let mut day = anchor;
    while attempt_days.contains(&(day - Duration::days(1))) {
        streak += 1;
        day -= Duration::days(1);
    }
    streak
}

/// One consistent snapshot per request; every achievement predicate reads
/// from it so they all share a single "as of" moment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    pub completed_count: i64,
    pub average_score: f64,
    pub streak_days: u32,
    pub as_of: String,
}

pub struct AchievementDef {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub unlocked: fn(&StudentStats) -> bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub id: String,
    pub title: String,
    pub description: String,
    pub unlocked: bool,
    pub as_of: String,
}

pub fn achievement_defs() -> &'static [AchievementDef] {
    &[
        AchievementDef {
            id: "first-quiz",
            title: "First Steps",
            description: "Complete your first quiz",
            unlocked: |s| s.completed_count >= 1,
        },
        AchievementDef {
            id: "ten-quizzes",
            title: "Quiz Regular",
            description: "Complete ten quizzes",
            unlocked: |s| s.completed_count >= 10,
        },
        AchievementDef {
            id: "high-scorer",
            title: "High Scorer",
            description: "Hold an average score of 80 or better",
            unlocked: |s| s.completed_count > 0 && s.average_score >= 80.0,
        },
        AchievementDef {
            id: "week-streak",
            title: "Week Streak",
            description: "Study seven days in a row",
            unlocked: |s| s.streak_days >= 7,
        },
    ]
}

pub fn evaluate_achievements(stats: &StudentStats) -> Vec<Achievement> {
    achievement_defs()
        .iter()
        .map(|d| Achievement {
            id: d.id.to_string(),
            title: d.title.to_string(),
            description: d.description.to_string(),
            unlocked: (d.unlocked)(stats),
            as_of: stats.as_of.clone(),
        })
        .collect()
}
