//! Per-patient therapy progress.
//!
//! Each patient has an authoritative `therapy-progress-<userId>` document and
//! a denormalised copy inside `all-patient-progress` for therapist-side lists.
//! The two writes are not atomic; a failure between them leaves the index
//! stale until the next successful update.
//!
//! Read-modify-write cycles carry no version check, so concurrent writers
//! sharing one store resolve as last-write-wins.

use crate::errors::StoreError;
use crate::events::{EventBus, ProgressEvent};
use crate::models::{
    activity_key, is_catalog_module, progress_key, ActivityHistory, ActivityResponse, ActivityStats,
    Booking, ModuleCompletionStats, PatientTherapyProgress, StreakRecord, TherapistProgressReport,
    ALL_PROGRESS_KEY,
};
use crate::reports::{self, ReportLog};
use crate::stats::build_activity_stats_at;
use crate::storage::{encode_value, load_document, load_entry_map, save_document, KeyValueStore};
use crate::streak;
use chrono::{DateTime, Local, NaiveDate};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub type ProgressIndex = BTreeMap<String, PatientTherapyProgress>;

pub struct ProgressEngine<S> {
    store: S,
    events: EventBus,
}

impl<S: KeyValueStore> ProgressEngine<S> {
    pub fn new(store: S, events: EventBus) -> Self {
        Self { store, events }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get_patient_progress(&mut self, user_id: &str) -> Result<PatientTherapyProgress, StoreError> {
        self.get_patient_progress_at(user_id, Local::now())
    }

    /// Loads the patient's record, creating and persisting a fresh one on
    /// first access or when the stored copy is unreadable.
    pub fn get_patient_progress_at(
        &mut self,
        user_id: &str,
        now: DateTime<Local>,
    ) -> Result<PatientTherapyProgress, StoreError> {
        let key = progress_key(user_id);
        match load_document::<PatientTherapyProgress, _>(&self.store, &key)? {
            Some(mut progress) => {
                if progress.normalize() {
                    warn!(user = user_id, "repaired inconsistent progress record");
                    self.persist(&progress)?;
                }
                Ok(progress)
            }
            None => {
                let progress = PatientTherapyProgress::new(user_id, now);
                save_document(&mut self.store, &key, &progress)?;
                info!(user = user_id, "initialised therapy progress");
                Ok(progress)
            }
        }
    }

    pub fn update_therapy_completion(
        &mut self,
        user_id: &str,
        module_id: &str,
    ) -> Result<PatientTherapyProgress, StoreError> {
        self.update_therapy_completion_at(user_id, module_id, Local::now())
    }

    /// Counts one completed session of `module_id`. Unknown modules and
    /// modules already at their cap leave the record untouched.
    pub fn update_therapy_completion_at(
        &mut self,
        user_id: &str,
        module_id: &str,
        now: DateTime<Local>,
    ) -> Result<PatientTherapyProgress, StoreError> {
        let mut progress = self.get_patient_progress_at(user_id, now)?;
        let today = now.date_naive();

        let Some(module) = progress.module_mut(module_id) else {
            debug!(user = user_id, module = module_id, "ignoring unknown module");
            return Ok(progress);
        };
        if module.completed_sessions >= module.total_sessions {
            debug!(user = user_id, module = module_id, "module already complete");
            return Ok(progress);
        }
        module.completed_sessions += 1;
        module.last_completed_date = Some(today);

        progress.recompute_totals();
        progress.streak_days = next_streak_days(
            progress.streak_days,
            progress.last_updated.date_naive(),
            today,
        );
        progress.last_updated = now;

        self.persist(&progress)?;
        info!(
            user = user_id,
            module = module_id,
            overall = progress.overall_progress,
            "therapy session completed"
        );
        self.events.publish(ProgressEvent::TherapyProgressUpdated {
            user_id: user_id.to_string(),
            progress: progress.clone(),
        });
        reports::send_progress_to_therapist(&mut self.store, &self.events, &progress, now)?;
        Ok(progress)
    }

    pub fn get_module_completion_stats(
        &mut self,
        user_id: &str,
        module_id: &str,
    ) -> Result<ModuleCompletionStats, StoreError> {
        let progress = self.get_patient_progress(user_id)?;
        Ok(progress
            .module(module_id)
            .map(|module| ModuleCompletionStats {
                completed: module.completed_sessions,
                total: module.total_sessions,
                percentage: module.percentage(),
            })
            .unwrap_or_default())
    }

    /// Readable entries of the global index; entries that no longer parse are
    /// left out here but stay in the stored document.
    pub fn all_patient_progress(&self) -> Result<ProgressIndex, StoreError> {
        load_entry_map(&self.store, ALL_PROGRESS_KEY)
    }

    fn persist(&mut self, progress: &PatientTherapyProgress) -> Result<(), StoreError> {
        save_document(&mut self.store, &progress_key(&progress.user_id), progress)?;
        // Other patients' entries are carried over verbatim.
        let mut index: Map<String, Value> =
            load_document(&self.store, ALL_PROGRESS_KEY)?.unwrap_or_default();
        index.insert(
            progress.user_id.clone(),
            encode_value(ALL_PROGRESS_KEY, progress)?,
        );
        save_document(&mut self.store, ALL_PROGRESS_KEY, &index)
    }

    pub fn record_activity(&mut self, user_id: &str, module_id: &str) -> Result<ActivityResponse, StoreError> {
        self.record_activity_at(user_id, module_id, Local::now())
    }

    /// One finished activity: history, streak, module progress, then a
    /// general change notification. The streak counts the activity even when
    /// the module is capped or unknown.
    pub fn record_activity_at(
        &mut self,
        user_id: &str,
        module_id: &str,
        now: DateTime<Local>,
    ) -> Result<ActivityResponse, StoreError> {
        let today = now.date_naive();
        if is_catalog_module(module_id) {
            self.bump_activity_history(user_id, today)?;
        }
        let streak = streak::update_streak_at(&mut self.store, today)?;
        let progress = self.update_therapy_completion_at(user_id, module_id, now)?;
        self.events.publish(ProgressEvent::DataChanged);
        Ok(ActivityResponse { streak, progress })
    }

    fn bump_activity_history(&mut self, user_id: &str, today: NaiveDate) -> Result<(), StoreError> {
        let key = activity_key(user_id);
        let mut history: ActivityHistory = load_document(&self.store, &key)?.unwrap_or_default();
        let count = history.days.entry(today.to_string()).or_default();
        *count = count.saturating_add(1);
        save_document(&mut self.store, &key, &history)
    }

    pub fn activity_stats(&self, user_id: &str) -> Result<ActivityStats, StoreError> {
        self.activity_stats_at(user_id, Local::now().date_naive())
    }

    pub fn activity_stats_at(&self, user_id: &str, today: NaiveDate) -> Result<ActivityStats, StoreError> {
        let history: ActivityHistory =
            load_document(&self.store, &activity_key(user_id))?.unwrap_or_default();
        Ok(build_activity_stats_at(today, &history))
    }

    pub fn get_streak_data(&self) -> Result<StreakRecord, StoreError> {
        streak::get_streak_data(&self.store)
    }

    pub fn update_streak(&mut self) -> Result<StreakRecord, StoreError> {
        streak::update_streak(&mut self.store)
    }

    pub fn add_booking(&mut self, booking: Booking) -> Result<Booking, StoreError> {
        reports::add_booking(&mut self.store, booking, Local::now())
    }

    pub fn therapist_reports(&self, therapist_id: &str) -> Result<Vec<TherapistProgressReport>, StoreError> {
        Ok(ReportLog::load(&self.store)?.for_therapist(therapist_id))
    }
}

/// Day counter kept on the progress record itself, independent of the
/// `streak-data` document.
fn next_streak_days(current: u32, last_updated: NaiveDate, today: NaiveDate) -> u32 {
    match (today - last_updated).num_days() {
        1 => current + 1,
        diff if diff > 1 => 1,
        _ => current,
    }
}
