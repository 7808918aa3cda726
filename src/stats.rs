use crate::models::{ActivityHistory, ActivityStats, DailyPoint, WeeklyPoint};
use chrono::{Datelike, Duration, NaiveDate};

const RECENT_DAYS: i64 = 7;
const WEEK_COUNT: i64 = 8;

/// Dashboard series for one patient: the last seven days, oldest first, and
/// the last eight Monday-start weeks with the current week last.
pub fn build_activity_stats_at(today: NaiveDate, history: &ActivityHistory) -> ActivityStats {
    let last_7_days = (0..RECENT_DAYS)
        .rev()
        .map(|offset| {
            let date = today - Duration::days(offset);
            DailyPoint {
                date: date.to_string(),
                completions: completions_on(history, date),
            }
        })
        .collect();

    let current_monday = monday_of(today);
    let weeks = (0..WEEK_COUNT)
        .rev()
        .map(|offset| {
            let start = current_monday - Duration::weeks(offset);
            let end = start + Duration::days(6);
            let completions = (0..7)
                .map(|day| completions_on(history, start + Duration::days(day)))
                .fold(0u64, u64::saturating_add);

            // Only the current week can be partial.
            let days_counted = if today > end {
                7
            } else {
                (today - start).num_days() as u8 + 1
            };

            WeeklyPoint {
                week: iso_week_label(start),
                start_date: start.to_string(),
                end_date: end.to_string(),
                completions,
                days_counted,
                daily_average: completions as f64 / f64::from(days_counted),
            }
        })
        .collect();

    ActivityStats { last_7_days, weeks }
}

fn completions_on(history: &ActivityHistory, date: NaiveDate) -> u64 {
    history.days.get(&date.to_string()).copied().unwrap_or(0)
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn iso_week_label(date: NaiveDate) -> String {
    let iso = date.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}
