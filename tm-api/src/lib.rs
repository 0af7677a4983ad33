//! tm-api library - marketplace HTTP service
//!
//! Lead intake, the patient/therapist matching flow, bookings, calendar
//! slots, admin dashboards and cron endpoints.

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use tm_common::config::AppConfig;
use tm_common::events::EventLog;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod calendar;
pub mod conversions;
pub mod error;
pub mod links;
pub mod notify;
pub mod pagination;

use calendar::CalendarSource;
use conversions::ConversionSink;
use notify::Notifier;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub notifier: Arc<dyn Notifier>,
    /// Cal.com availability, when `CAL_DATABASE_URL` is configured
    pub calendar: Option<Arc<dyn CalendarSource>>,
    /// Google Ads upload, when credentials are configured
    pub conversions: Option<Arc<dyn ConversionSink>>,
    pub events: EventLog,
}

impl AppState {
    pub fn new(db: SqlitePool, config: AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        let events = EventLog::new(db.clone(), "api");
        Self {
            db,
            config: Arc::new(config),
            notifier,
            calendar: None,
            conversions: None,
            events,
        }
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarSource>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn with_conversions(mut self, sink: Arc<dyn ConversionSink>) -> Self {
        self.conversions = Some(sink);
        self
    }
}

/// Build application router
///
/// Admin routes require `ADMIN_API_TOKEN`, cron routes `CRON_SECRET`; the
/// rest is public.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, patch, post};

    let admin = Router::new()
        .route(
            "/api/admin/matches",
            get(api::admin::list_matches).post(api::admin::propose_matches),
        )
        .route("/api/admin/matches/:id", patch(api::admin::update_match))
        .route("/api/admin/therapists/:id", patch(api::admin::update_therapist))
        .route("/api/admin/stats", get(api::admin::stats))
        .route("/api/admin/events", get(api::admin::recent_events))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::admin_auth,
        ));

    let cron = Router::new()
        .route("/api/cron/reminders", post(api::cron::send_reminders))
        .route("/api/cron/warm-cache", post(api::cron::warm_cache))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::cron_auth,
        ));

    let public = Router::new()
        .route("/api/leads/patients", post(api::leads::create_patient_lead))
        .route("/api/leads/confirm", get(api::leads::confirm_email))
        .route("/api/leads/therapists", post(api::leads::create_therapist_lead))
        .route("/api/match/:secure_uuid", get(api::matches::get_match_detail))
        .route("/api/match/:secure_uuid/select", post(api::matches::select_therapist))
        .route("/api/match/:secure_uuid/respond", post(api::matches::therapist_respond))
        .route("/api/bookings", post(api::bookings::record_booking))
        .route("/api/therapists/:id/slots", get(api::slots::get_slots))
        .route("/api/events", post(api::events::track_event))
        .merge(api::health::health_routes());

    Router::new()
        .merge(admin)
        .merge(cron)
        .merge(public)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
