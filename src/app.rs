use crate::handlers;
use crate::state::AppState;
use axum::{routing::{get, post}, Router};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/modules", get(handlers::list_modules))
        .route("/api/streak", get(handlers::get_streak).post(handlers::update_streak))
        .route("/api/progress", get(handlers::all_progress))
        .route("/api/progress/:user_id", get(handlers::get_progress))
        .route("/api/progress/:user_id/stats", get(handlers::activity_stats))
        .route(
            "/api/progress/:user_id/modules/:module_id",
            get(handlers::module_stats),
        )
        .route(
            "/api/progress/:user_id/modules/:module_id/complete",
            post(handlers::complete_module),
        )
        .route("/api/activity", post(handlers::record_activity))
        .route("/api/bookings", post(handlers::add_booking))
        .route(
            "/api/therapists/:therapist_id/reports",
            get(handlers::therapist_reports),
        )
        .route("/api/events", get(handlers::events))
        .with_state(state)
}
