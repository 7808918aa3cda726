use crate::errors::StoreError;
use crate::models::{StreakRecord, STREAK_KEY};
use crate::storage::{load_document, save_document, KeyValueStore};
use chrono::{Local, NaiveDate};
use tracing::info;

pub fn get_streak_data<S: KeyValueStore + ?Sized>(store: &S) -> Result<StreakRecord, StoreError> {
    Ok(load_document(store, STREAK_KEY)?.unwrap_or_default())
}

pub fn update_streak<S: KeyValueStore + ?Sized>(store: &mut S) -> Result<StreakRecord, StoreError> {
    update_streak_at(store, Local::now().date_naive())
}

/// Records one activity on `today` and writes the streak back.
///
/// A same-day activity only bumps the total. The next calendar day extends
/// the streak. Any other gap, including a `today` earlier than the stored
/// date, restarts it at 1.
pub fn update_streak_at<S: KeyValueStore + ?Sized>(
    store: &mut S,
    today: NaiveDate,
) -> Result<StreakRecord, StoreError> {
    let stored: Option<StreakRecord> = load_document(store, STREAK_KEY)?;

    let record = match stored {
        Some(mut record) => {
            let days_diff = record
                .last_activity_date
                .map(|last| (today - last).num_days());
            match days_diff {
                Some(0) => {}
                Some(1) => {
                    record.current_streak += 1;
                    record.longest_streak = record.longest_streak.max(record.current_streak);
                    record.last_activity_date = Some(today);
                }
                _ => {
                    record.current_streak = 1;
                    record.longest_streak = record.longest_streak.max(1);
                    record.last_activity_date = Some(today);
                }
            }
            record.total_activities = record.total_activities.saturating_add(1);
            record
        }
        None => StreakRecord {
            current_streak: 1,
            last_activity_date: Some(today),
            longest_streak: 1,
            total_activities: 1,
        },
    };

    save_document(store, STREAK_KEY, &record)?;
    info!(
        current = record.current_streak,
        longest = record.longest_streak,
        "streak updated"
    );
    Ok(record)
}
