use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const STREAK_KEY: &str = "streak-data";
pub const ALL_PROGRESS_KEY: &str = "all-patient-progress";
pub const REPORTS_KEY: &str = "therapist-progress-reports";
pub const BOOKINGS_KEY: &str = "bookings";

pub const DEFAULT_TOTAL_SESSIONS: u32 = 30;

/// Fixed therapy module catalog: `(id, display name)`.
pub const MODULE_CATALOG: [(&str, &str); 12] = [
    ("cbt", "Cognitive Behavioral Therapy"),
    ("mindfulness", "Mindfulness & Meditation"),
    ("stress", "Stress Management"),
    ("gratitude", "Gratitude Journal"),
    ("music", "Music Therapy"),
    ("tetris", "Tetris Therapy"),
    ("art", "Art Therapy"),
    ("exposure", "Exposure Therapy"),
    ("video", "Video Therapy"),
    ("act", "Acceptance & Commitment Therapy"),
    ("mood", "Mood Tracking"),
    ("sleep", "Sleep Therapy"),
];

pub fn progress_key(user_id: &str) -> String {
    format!("therapy-progress-{user_id}")
}

pub fn activity_key(user_id: &str) -> String {
    format!("activity-history-{user_id}")
}

pub fn is_catalog_module(module_id: &str) -> bool {
    MODULE_CATALOG.iter().any(|(id, _)| *id == module_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreakRecord {
    pub current_streak: u32,
    #[serde(default)]
    pub last_activity_date: Option<NaiveDate>,
    pub longest_streak: u32,
    pub total_activities: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TherapyModule {
    pub id: String,
    pub name: String,
    pub total_sessions: u32,
    pub completed_sessions: u32,
    #[serde(default)]
    pub last_completed_date: Option<NaiveDate>,
}

impl TherapyModule {
    fn fresh(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            total_sessions: DEFAULT_TOTAL_SESSIONS,
            completed_sessions: 0,
            last_completed_date: None,
        }
    }

    pub fn percentage(&self) -> u32 {
        percentage(self.completed_sessions, self.total_sessions)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientTherapyProgress {
    pub user_id: String,
    #[serde(default)]
    pub modules: Vec<TherapyModule>,
    #[serde(default)]
    pub total_completed_sessions: u32,
    #[serde(default)]
    pub overall_progress: u32,
    #[serde(default)]
    pub last_updated: DateTime<Local>,
    #[serde(default)]
    pub streak_days: u32,
}

impl PatientTherapyProgress {
    pub fn new(user_id: &str, now: DateTime<Local>) -> Self {
        Self {
            user_id: user_id.to_string(),
            modules: MODULE_CATALOG
                .iter()
                .map(|(id, name)| TherapyModule::fresh(id, name))
                .collect(),
            total_completed_sessions: 0,
            overall_progress: 0,
            last_updated: now,
            streak_days: 0,
        }
    }

    pub fn module(&self, module_id: &str) -> Option<&TherapyModule> {
        self.modules.iter().find(|module| module.id == module_id)
    }

    pub fn module_mut(&mut self, module_id: &str) -> Option<&mut TherapyModule> {
        self.modules.iter_mut().find(|module| module.id == module_id)
    }

    pub fn recompute_totals(&mut self) {
        let completed: u32 = self.modules.iter().map(|m| m.completed_sessions).sum();
        let total: u32 = self.modules.iter().map(|m| m.total_sessions).sum();
        self.total_completed_sessions = completed;
        self.overall_progress = percentage(completed, total);
    }

    /// Brings a stored record back in line with the catalog: appends missing
    /// modules, clamps counters to their cap and recomputes the aggregates.
    /// Returns true when anything had to change.
    pub fn normalize(&mut self) -> bool {
        let before = self.clone();
        for (id, name) in MODULE_CATALOG {
            if self.module(id).is_none() {
                self.modules.push(TherapyModule::fresh(id, name));
            }
        }
        for module in &mut self.modules {
            module.completed_sessions = module.completed_sessions.min(module.total_sessions);
        }
        self.recompute_totals();
        *self != before
    }
}

fn percentage(completed: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (f64::from(completed) / f64::from(total) * 100.0).round() as u32
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleCompletionStats {
    pub completed: u32,
    pub total: u32,
    pub percentage: u32,
}

impl Default for ModuleCompletionStats {
    fn default() -> Self {
        Self {
            completed: 0,
            total: DEFAULT_TOTAL_SESSIONS,
            percentage: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub total_sessions: u32,
}

pub fn catalog() -> Vec<CatalogEntry> {
    MODULE_CATALOG
        .iter()
        .map(|&(id, name)| CatalogEntry {
            id,
            name,
            total_sessions: DEFAULT_TOTAL_SESSIONS,
        })
        .collect()
}

/// A patient/therapist appointment. Only the linking fields are typed; any
/// other fields written by booking clients are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub patient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub therapist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub therapist_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Booking {
    pub fn therapist(&self) -> Option<&str> {
        non_empty(&self.therapist_id).or_else(|| non_empty(&self.therapist_name))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleBreakdown {
    pub id: String,
    pub name: String,
    pub completed: u32,
    pub total: u32,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentModule {
    pub id: String,
    pub name: String,
    pub completed_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub total_completed_sessions: u32,
    pub overall_progress: u32,
    pub streak_days: u32,
    pub modules: Vec<ModuleBreakdown>,
    pub recent_modules: Vec<RecentModule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TherapistProgressReport {
    pub id: Uuid,
    pub patient_id: String,
    pub patient_name: String,
    pub therapist_id: String,
    pub timestamp: DateTime<Local>,
    pub summary: ProgressSummary,
}

/// Completed activities per calendar day (`YYYY-MM-DD`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActivityHistory {
    pub days: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRequest {
    pub user_id: String,
    pub module_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResponse {
    pub streak: StreakRecord,
    pub progress: PatientTherapyProgress,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    pub date: String,
    pub completions: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPoint {
    pub week: String,
    pub start_date: String,
    pub end_date: String,
    pub completions: u64,
    pub days_counted: u8,
    pub daily_average: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub last_7_days: Vec<DailyPoint>,
    pub weeks: Vec<WeeklyPoint>,
}
