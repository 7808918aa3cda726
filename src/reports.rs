use crate::errors::StoreError;
use crate::events::{EventBus, ProgressEvent};
use crate::models::{
    Booking, ModuleBreakdown, PatientTherapyProgress, ProgressSummary, RecentModule,
    TherapistProgressReport, BOOKINGS_KEY, REPORTS_KEY,
};
use crate::storage::{encode_value, load_entries, load_foreign_list, save_document, KeyValueStore};
use chrono::{DateTime, FixedOffset, Local, NaiveDate};
use std::collections::VecDeque;
use tracing::{debug, info};
use uuid::Uuid;

pub const REPORT_LOG_CAPACITY: usize = 100;
const RECENT_MODULE_COUNT: usize = 5;

/// Bounded FIFO of therapist reports, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ReportLog {
    reports: VecDeque<TherapistProgressReport>,
}

impl ReportLog {
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Result<Self, StoreError> {
        let stored: Vec<TherapistProgressReport> = load_entries(store, REPORTS_KEY)?;
        let mut log = Self {
            reports: stored.into(),
        };
        log.evict();
        Ok(log)
    }

    pub fn save<S: KeyValueStore + ?Sized>(&self, store: &mut S) -> Result<(), StoreError> {
        save_document(store, REPORTS_KEY, &self.reports)
    }

    pub fn push(&mut self, report: TherapistProgressReport) {
        self.reports.push_back(report);
        self.evict();
    }

    fn evict(&mut self) {
        while self.reports.len() > REPORT_LOG_CAPACITY {
            self.reports.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TherapistProgressReport> {
        self.reports.iter()
    }

    pub fn for_therapist(&self, therapist_id: &str) -> Vec<TherapistProgressReport> {
        self.reports
            .iter()
            .filter(|report| report.therapist_id == therapist_id)
            .cloned()
            .collect()
    }
}

/// Bookings this module can read; entries without the linking fields are
/// skipped.
pub fn load_bookings<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<Booking>, StoreError> {
    load_entries(store, BOOKINGS_KEY)
}

pub fn add_booking<S: KeyValueStore + ?Sized>(
    store: &mut S,
    mut booking: Booking,
    now: DateTime<Local>,
) -> Result<Booking, StoreError> {
    if booking.id.is_none() {
        booking.id = Some(Uuid::new_v4().to_string());
    }
    if booking.created_at.is_none() {
        booking.created_at = Some(now.to_rfc3339());
    }
    // Other writers own this list, so existing entries go back untouched.
    let mut bookings = load_foreign_list(store, BOOKINGS_KEY)?;
    bookings.push(encode_value(BOOKINGS_KEY, &booking)?);
    save_document(store, BOOKINGS_KEY, &bookings)?;
    info!(patient = %booking.patient_id, "booking stored");
    Ok(booking)
}

/// Most recent booking for the patient: by `date` (falling back to
/// `createdAt`), then by `createdAt`. Values that do not parse sort oldest and
/// exact ties keep store order.
pub fn latest_booking<'a>(bookings: &'a [Booking], patient_id: &str) -> Option<&'a Booking> {
    let mut matching: Vec<(BookingOrder, &Booking)> = bookings
        .iter()
        .filter(|booking| booking.patient_id == patient_id)
        .map(|booking| (booking_order(booking), booking))
        .collect();
    matching.sort_by(|a, b| b.0.cmp(&a.0));
    matching.into_iter().next().map(|(_, booking)| booking)
}

type BookingOrder = (Option<DateTime<FixedOffset>>, Option<DateTime<FixedOffset>>);

fn booking_order(booking: &Booking) -> BookingOrder {
    let created = parse_instant(booking.created_at.as_deref());
    let primary = parse_instant(booking.date.as_deref()).or(created);
    (primary, created)
}

/// RFC 3339 timestamps keep their offset; bare `YYYY-MM-DD` dates count as
/// midnight UTC.
fn parse_instant(value: Option<&str>) -> Option<DateTime<FixedOffset>> {
    let value = value?.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant);
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().fixed_offset())
}

pub fn build_summary(progress: &PatientTherapyProgress) -> ProgressSummary {
    let modules = progress
        .modules
        .iter()
        .map(|module| ModuleBreakdown {
            id: module.id.clone(),
            name: module.name.clone(),
            completed: module.completed_sessions,
            total: module.total_sessions,
            percentage: module.percentage(),
        })
        .collect();

    let mut recent: Vec<RecentModule> = progress
        .modules
        .iter()
        .filter_map(|module| {
            module.last_completed_date.map(|completed_date| RecentModule {
                id: module.id.clone(),
                name: module.name.clone(),
                completed_date,
            })
        })
        .collect();
    recent.sort_by(|a, b| b.completed_date.cmp(&a.completed_date));
    recent.truncate(RECENT_MODULE_COUNT);

    ProgressSummary {
        total_completed_sessions: progress.total_completed_sessions,
        overall_progress: progress.overall_progress,
        streak_days: progress.streak_days,
        modules,
        recent_modules: recent,
    }
}

/// Appends a report for the patient's current therapist and notifies
/// therapist views. Patients without a booking produce nothing.
pub fn send_progress_to_therapist<S: KeyValueStore + ?Sized>(
    store: &mut S,
    events: &EventBus,
    progress: &PatientTherapyProgress,
    now: DateTime<Local>,
) -> Result<Option<TherapistProgressReport>, StoreError> {
    let bookings = load_bookings(store)?;
    let Some(booking) = latest_booking(&bookings, &progress.user_id) else {
        debug!(patient = %progress.user_id, "no booking, skipping therapist report");
        return Ok(None);
    };
    let Some(therapist_id) = booking.therapist() else {
        debug!(patient = %progress.user_id, "booking has no therapist, skipping report");
        return Ok(None);
    };

    let report = TherapistProgressReport {
        id: Uuid::new_v4(),
        patient_id: progress.user_id.clone(),
        patient_name: booking
            .patient_name
            .clone()
            .unwrap_or_else(|| progress.user_id.clone()),
        therapist_id: therapist_id.to_string(),
        timestamp: now,
        summary: build_summary(progress),
    };

    let mut log = ReportLog::load(store)?;
    log.push(report.clone());
    log.save(store)?;

    info!(
        patient = %report.patient_id,
        therapist = %report.therapist_id,
        "progress report queued"
    );
    events.publish(ProgressEvent::PatientProgressUpdate {
        therapist_id: report.therapist_id.clone(),
        progress_summary: report.summary.clone(),
    });
    Ok(Some(report))
}
