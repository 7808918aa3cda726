use crate::errors::{AppError, StoreError};
use crate::models::{
    catalog, ActivityRequest, ActivityResponse, ActivityStats, Booking, CatalogEntry,
    ModuleCompletionStats, PatientTherapyProgress, StreakRecord, TherapistProgressReport,
};
use crate::progress::{ProgressEngine, ProgressIndex};
use crate::state::AppState;
use crate::storage::FileStore;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use std::{convert::Infallible, sync::Arc};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};
use tracing::warn;

const MAX_ID_LEN: usize = 64;

pub async fn list_modules() -> Json<Vec<CatalogEntry>> {
    Json(catalog())
}

pub async fn get_streak(State(state): State<AppState>) -> Result<Json<StreakRecord>, AppError> {
    run_engine(&state, |engine| engine.get_streak_data()).await.map(Json)
}

pub async fn update_streak(State(state): State<AppState>) -> Result<Json<StreakRecord>, AppError> {
    run_engine(&state, |engine| engine.update_streak()).await.map(Json)
}

pub async fn all_progress(State(state): State<AppState>) -> Result<Json<ProgressIndex>, AppError> {
    run_engine(&state, |engine| engine.all_patient_progress()).await.map(Json)
}

pub async fn get_progress(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PatientTherapyProgress>, AppError> {
    validate_id("user id", &user_id)?;
    run_engine(&state, move |engine| engine.get_patient_progress(&user_id))
        .await
        .map(Json)
}

pub async fn module_stats(
    State(state): State<AppState>,
    Path((user_id, module_id)): Path<(String, String)>,
) -> Result<Json<ModuleCompletionStats>, AppError> {
    validate_id("user id", &user_id)?;
    run_engine(&state, move |engine| {
        engine.get_module_completion_stats(&user_id, &module_id)
    })
    .await
    .map(Json)
}

pub async fn complete_module(
    State(state): State<AppState>,
    Path((user_id, module_id)): Path<(String, String)>,
) -> Result<Json<PatientTherapyProgress>, AppError> {
    validate_id("user id", &user_id)?;
    run_engine(&state, move |engine| {
        engine.update_therapy_completion(&user_id, &module_id)
    })
    .await
    .map(Json)
}

pub async fn activity_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ActivityStats>, AppError> {
    validate_id("user id", &user_id)?;
    run_engine(&state, move |engine| engine.activity_stats(&user_id))
        .await
        .map(Json)
}

pub async fn record_activity(
    State(state): State<AppState>,
    Json(payload): Json<ActivityRequest>,
) -> Result<Json<ActivityResponse>, AppError> {
    let user_id = payload.user_id.trim().to_string();
    let module_id = payload.module_id.trim().to_string();
    validate_id("user id", &user_id)?;
    run_engine(&state, move |engine| engine.record_activity(&user_id, &module_id))
        .await
        .map(Json)
}

pub async fn add_booking(
    State(state): State<AppState>,
    Json(booking): Json<Booking>,
) -> Result<Json<Booking>, AppError> {
    validate_id("patient id", &booking.patient_id)?;
    if booking.therapist().is_none() {
        return Err(AppError::bad_request("booking needs a therapistId or therapistName"));
    }
    run_engine(&state, move |engine| engine.add_booking(booking))
        .await
        .map(Json)
}

pub async fn therapist_reports(
    State(state): State<AppState>,
    Path(therapist_id): Path<String>,
) -> Result<Json<Vec<TherapistProgressReport>>, AppError> {
    run_engine(&state, move |engine| engine.therapist_reports(&therapist_id))
        .await
        .map(Json)
}

/// Runs an engine operation on the blocking pool; the file store does
/// synchronous I/O.
async fn run_engine<T, F>(state: &AppState, op: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&mut ProgressEngine<FileStore>) -> Result<T, StoreError> + Send + 'static,
{
    let mut engine = Arc::clone(&state.engine).lock_owned().await;
    let result = tokio::task::spawn_blocking(move || op(&mut *engine))
        .await
        .map_err(AppError::internal)?;
    Ok(result?)
}

/// Live change notifications as server-sent events. Clients re-fetch whatever
/// they display when one arrives.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|item| match item {
        Ok(event) => Event::default()
            .event(event.name())
            .json_data(&event)
            .ok()
            .map(Ok),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "event stream subscriber lagged");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Ids end up in store keys, so only a conservative character set is allowed.
fn validate_id(label: &str, id: &str) -> Result<(), AppError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "{label} must be 1-{MAX_ID_LEN} characters of letters, digits, '-' or '_'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engine_calls_run_against_the_file_store() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("therapy_progress_handlers_{nanos}"));
        let state = AppState::new(FileStore::open(&dir).unwrap());

        let Json(progress) = complete_module(
            State(state.clone()),
            Path(("u1".to_string(), "art".to_string())),
        )
        .await
        .unwrap();
        assert_eq!(progress.module("art").unwrap().completed_sessions, 1);

        let Json(stats) = module_stats(State(state), Path(("u1".to_string(), "art".to_string())))
            .await
            .unwrap();
        assert_eq!(stats.completed, 1);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn ids_are_restricted_to_key_safe_characters() {
        assert!(validate_id("user id", "patient_42-a").is_ok());
        assert!(validate_id("user id", "").is_err());
        assert!(validate_id("user id", "../etc").is_err());
        assert!(validate_id("user id", &"a".repeat(65)).is_err());
    }
}
