use chrono::{DateTime, Duration, Utc};

use crate::types::FolderStats;

/// Displayed in place of any estimate that is not known yet.
pub const UNKNOWN: &str = "--";

fn elapsed_minutes(start: DateTime<Utc>, now: DateTime<Utc>) -> Option<f64> {
    let ms = (now - start).num_milliseconds();
    if ms <= 0 {
        None
    } else {
        Some(ms as f64 / 60_000.0)
    }
}

/// Images per minute since `start`. `None` until an item is processed and
/// some time has elapsed.
pub fn calculate_speed(
    processed: usize,
    start: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<f64> {
    let start = start?;
    if processed == 0 {
        return None;
    }
    let minutes = elapsed_minutes(start, now)?;
    Some(processed as f64 / minutes)
}

/// Minutes until `total` is reached at the current speed.
pub fn calculate_time_left(
    processed: usize,
    total: usize,
    start: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<f64> {
    let speed = calculate_speed(processed, start, now)?;
    if !speed.is_finite() || speed <= 0.0 {
        return None;
    }
    let remaining = total.saturating_sub(processed);
    Some(remaining as f64 / speed)
}

/// Absolute time at which the batch is projected to finish.
pub fn calculate_completion(
    processed: usize,
    total: usize,
    start: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if total == 0 {
        return None;
    }
    let minutes = calculate_time_left(processed, total, start, now)?;
    let ms = (minutes * 60_000.0).round();
    if !ms.is_finite() || ms > i64::MAX as f64 {
        return None;
    }
    now.checked_add_signed(Duration::milliseconds(ms as i64))
}

/// `"Nm"` below an hour, `"Hh Mm"` above.
pub fn format_duration(minutes: f64) -> String {
    let total = minutes.max(0.0).round() as u64;
    if total < 60 {
        return format!("{}m", total);
    }
    format!("{}h {}m", total / 60, total % 60)
}

pub fn format_speed(speed: Option<f64>) -> String {
    match speed {
        Some(s) => format!("{:.1}/min", s),
        None => UNKNOWN.to_string(),
    }
}

pub fn format_time_left(minutes: Option<f64>) -> String {
    minutes.map(format_duration).unwrap_or_else(|| UNKNOWN.to_string())
}

/// Percentage complete in `0.0..=100.0`.
///
/// Folder stats reflect server-side truth and win when present; otherwise
/// the client-side processed/total counts are used.
pub fn progress_percent(folder: Option<&FolderStats>, processed: usize, total: usize) -> f64 {
    let ratio = match folder {
        Some(stats) if stats.total_images > 0 => {
            stats.captioned as f64 / stats.total_images as f64
        }
        Some(_) => 0.0,
        None if total > 0 => processed as f64 / total as f64,
        None => 0.0,
    };
    (ratio * 100.0).clamp(0.0, 100.0)
}

/// Everything a status display needs, computed at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub percent: f64,
    pub processed: usize,
    pub total: usize,
    /// Images per minute.
    pub speed: Option<f64>,
    /// Minutes left.
    pub time_left: Option<f64>,
    pub completion: Option<DateTime<Utc>>,
}

impl ProgressReport {
    pub fn compute(
        processed: usize,
        total: usize,
        start: Option<DateTime<Utc>>,
        folder: Option<&FolderStats>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            percent: progress_percent(folder, processed, total),
            processed,
            total,
            speed: calculate_speed(processed, start, now),
            time_left: calculate_time_left(processed, total, start, now),
            completion: calculate_completion(processed, total, start, now),
        }
    }

    pub fn speed_display(&self) -> String {
        format_speed(self.speed)
    }

    pub fn time_left_display(&self) -> String {
        format_time_left(self.time_left)
    }

    pub fn completion_display(&self) -> String {
        self.completion
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}
