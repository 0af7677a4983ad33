//! Integration tests for the tm-api HTTP endpoints
//!
//! Every test runs the full router against an in-memory store, with the
//! email/SMS provider, Cal.com and Google Ads replaced by in-process fakes.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tm_ads::{AdsError, ClickConversion, UploadOutcome};
use tm_api::calendar::CalendarSource;
use tm_api::conversions::ConversionSink;
use tm_api::notify::{EmailMessage, Notifier, NotifyError, SmsMessage};
use tm_api::{build_router, AppState};
use tm_common::config::AppConfig;
use tm_common::db::{self, NewPerson, NewTherapist, Person, SessionPreference, Therapist, TherapistStatus};
use tm_common::slots::{BusyInterval, Schedule, WeeklyWindow};
use tm_common::MatchStatus;
use tower::util::ServiceExt; // for `oneshot` method

const ADMIN_TOKEN: &str = "admin-token";
const CRON_SECRET: &str = "cron-secret";

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct RecordingNotifier {
    emails: Mutex<Vec<EmailMessage>>,
    sms: Mutex<Vec<SmsMessage>>,
    fail_email: bool,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            fail_email: true,
            ..Self::default()
        }
    }

    fn emails(&self) -> Vec<EmailMessage> {
        self.emails.lock().unwrap().clone()
    }

    fn emails_to(&self, to: &str) -> Vec<EmailMessage> {
        self.emails().into_iter().filter(|e| e.to == to).collect()
    }

    fn sms(&self) -> Vec<SmsMessage> {
        self.sms.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        if self.fail_email {
            return Err(NotifyError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.emails.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn send_sms(&self, message: &SmsMessage) -> Result<(), NotifyError> {
        self.sms.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct FakeCalendar {
    fail: bool,
    schedule_calls: AtomicUsize,
}

impl FakeCalendar {
    fn new() -> Self {
        Self {
            fail: false,
            schedule_calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            schedule_calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.schedule_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarSource for FakeCalendar {
    async fn load_schedule(&self, cal_username: &str) -> tm_common::Result<Option<Schedule>> {
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(tm_common::Error::Internal("connection refused".to_string()));
        }
        if cal_username == "ghost" {
            return Ok(None);
        }
        Ok(Some(Schedule {
            timezone: "Europe/Berlin".to_string(),
            slot_minutes: 60,
            minimum_notice_minutes: 0,
            weekly: vec![WeeklyWindow {
                weekdays: vec![0, 1, 2, 3, 4, 5, 6],
                start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            }],
            overrides: vec![],
        }))
    }

    async fn load_busy(
        &self,
        _cal_username: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> tm_common::Result<Vec<BusyInterval>> {
        Ok(vec![])
    }
}

#[derive(Default)]
struct RecordingSink {
    uploads: Mutex<Vec<ClickConversion>>,
}

#[async_trait]
impl ConversionSink for RecordingSink {
    fn action_resource(&self, action_id: &str) -> String {
        format!("customers/1234567890/conversionActions/{}", action_id)
    }

    async fn upload(&self, batch: &[ClickConversion]) -> Result<UploadOutcome, AdsError> {
        self.uploads.lock().unwrap().extend(batch.iter().cloned());
        Ok(UploadOutcome {
            accepted: batch.len(),
            failures: vec![],
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

struct TestApp {
    app: Router,
    db: SqlitePool,
    notifier: Arc<RecordingNotifier>,
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.server.public_base_url = "https://match.example".to_string();
    config.auth.admin_token = ADMIN_TOKEN.to_string();
    config.auth.cron_secret = CRON_SECRET.to_string();
    config.cron.delay_ms = 0;
    config
}

async fn setup_app() -> TestApp {
    setup_with(test_config(), RecordingNotifier::default(), None, None).await
}

async fn setup_with(
    config: AppConfig,
    notifier: RecordingNotifier,
    calendar: Option<Arc<FakeCalendar>>,
    sink: Option<Arc<RecordingSink>>,
) -> TestApp {
    let db = db::init_in_memory().await.expect("Should create in-memory store");
    let notifier = Arc::new(notifier);

    let mut state = AppState::new(db.clone(), config, notifier.clone());
    if let Some(calendar) = calendar {
        state = state.with_calendar(calendar);
    }
    if let Some(sink) = sink {
        state = state.with_conversions(sink);
    }

    TestApp {
        app: build_router(state),
        db,
        notifier,
    }
}

impl TestApp {
    async fn call(&self, method: &str, uri: &str, body: Option<Value>, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, extract_json(response.into_body()).await)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call("GET", uri, None, None).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call("POST", uri, Some(body), None).await
    }

    async fn admin(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call(method, uri, body, Some(ADMIN_TOKEN)).await
    }

    async fn cron(&self, uri: &str) -> (StatusCode, Value) {
        self.call("POST", uri, None, Some(CRON_SECRET)).await
    }
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

async fn seed_patient(db: &SqlitePool, name: &str, email: &str) -> Person {
    let new = NewPerson {
        name: name.to_string(),
        email: email.to_string(),
        phone: Some("0151 2345678".to_string()),
        city: Some("Berlin".to_string()),
        session_preference: SessionPreference::Either,
        issue: None,
        gclid: Some("gclid-123".to_string()),
        campaign_source: None,
    };
    db::people::insert_person(db, &new, Utc::now()).await.unwrap()
}

async fn seed_therapist(db: &SqlitePool, first: &str, cal_username: Option<&str>, verified: bool) -> Therapist {
    let new = NewTherapist {
        first_name: first.to_string(),
        last_name: "Muster".to_string(),
        email: format!("{}@therapy.example", first.to_lowercase()),
        phone: Some("+4930123456".to_string()),
        city: Some("Berlin".to_string()),
        modalities: vec!["cbt".to_string()],
        accepts_online: true,
        cal_username: cal_username.map(str::to_string),
    };
    let therapist = db::therapists::insert_therapist(db, &new, Utc::now()).await.unwrap();
    if verified {
        db::therapists::set_therapist_status(db, &therapist.id, TherapistStatus::Verified, Utc::now())
            .await
            .unwrap()
    } else {
        therapist
    }
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let t = setup_app().await;

    let (status, body) = t.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "tm-api");
    assert!(body["version"].is_string());
}

// =============================================================================
// Leads
// =============================================================================

#[tokio::test]
async fn test_patient_lead_created_once_per_email() {
    let t = setup_app().await;
    let lead = json!({
        "name": "Mia Schmidt",
        "email": "Mia@Example.com",
        "session_preference": "online",
    });

    let (status, body) = t.post("/api/leads/patients", lead.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], true);
    let id = body["id"].as_str().unwrap().to_string();

    let emails = t.notifier.emails_to("mia@example.com");
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].subject, "Please confirm your email address");
    assert!(emails[0].text.contains("https://match.example/api/leads/confirm?id="));

    let (status, body) = t.post("/api/leads/patients", lead).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);
    assert_eq!(body["id"], id);
    assert_eq!(t.notifier.emails().len(), 1, "No second confirmation email");
}

#[tokio::test]
async fn test_patient_lead_validation() {
    let t = setup_app().await;

    let (status, body) = t
        .post("/api/leads/patients", json!({"name": "Mia", "email": "not-an-email"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = t
        .post("/api/leads/patients", json!({"name": "  ", "email": "mia@example.com"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .post(
            "/api/leads/patients",
            json!({"name": "Mia", "email": "mia@example.com", "session_preference": "by_carrier_pigeon"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_lead_survives_email_failure() {
    let t = setup_with(test_config(), RecordingNotifier::failing(), None, None).await;

    let (status, _) = t
        .post("/api/leads/patients", json!({"name": "Mia", "email": "mia@example.com"}))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = t.admin("GET", "/api/admin/events?level=error", None).await;
    let types: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["event_type"].as_str())
        .collect();
    assert!(types.contains(&"confirmation_email_failed"));
}

#[tokio::test]
async fn test_confirm_email_uploads_conversion_once() {
    let mut config = test_config();
    config.google_ads.lead_conversion_action = Some("111".to_string());
    let sink = Arc::new(RecordingSink::default());
    let t = setup_with(config, RecordingNotifier::default(), None, Some(sink.clone())).await;

    let patient = seed_patient(&t.db, "Mia Schmidt", "mia@example.com").await;

    let (status, _) = t
        .get(&format!("/api/leads/confirm?id={}&token=wrong", patient.id))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let uri = format!("/api/leads/confirm?id={}&token={}", patient.id, patient.confirm_token);
    let (status, body) = t.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "email_confirmed");
    assert_eq!(body["newly_confirmed"], true);

    let (status, body) = t.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newly_confirmed"], false);

    let uploads = sink.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].conversion_action, "customers/1234567890/conversionActions/111");
    assert_eq!(uploads[0].gclid.as_deref(), Some("gclid-123"));
    assert_eq!(uploads[0].user_identifiers.len(), 2, "Hashed email and phone");
}

#[tokio::test]
async fn test_therapist_lead_duplicate_email_conflicts() {
    let t = setup_app().await;
    let lead = json!({
        "first_name": "Anna",
        "last_name": "Muster",
        "email": "anna@therapy.example",
        "modalities": ["CBT", " "],
    });

    let (status, body) = t.post("/api/leads/therapists", lead.clone()).await;
    assert_eq!(status, StatusCode::CREATED);

    let therapist = db::therapists::get_therapist(&t.db, body["id"].as_str().unwrap())
        .await
        .unwrap();
    assert_eq!(therapist.status, "pending_verification");
    assert_eq!(therapist.modality_list(), vec!["cbt".to_string()]);

    let (status, body) = t.post("/api/leads/therapists", lead).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

// =============================================================================
// Matching flow
// =============================================================================

#[tokio::test]
async fn test_full_match_flow() {
    let t = setup_app().await;
    let patient = seed_patient(&t.db, "Mia Schmidt", "mia@example.com").await;
    let anna = seed_therapist(&t.db, "Anna", Some("anna"), true).await;
    let ben = seed_therapist(&t.db, "Ben", None, true).await;
    let pending = seed_therapist(&t.db, "Carla", None, false).await;

    // Admin proposes three, one is not verified
    let (status, body) = t
        .admin(
            "POST",
            "/api/admin/matches",
            Some(json!({"patient_id": patient.id, "therapist_ids": [anna.id, ben.id, pending.id]})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"].as_array().unwrap().len(), 2);
    assert_eq!(body["skipped"][0]["reason"], "not_verified");
    assert_eq!(body["email_sent"], true);

    let person = db::people::get_person(&t.db, &patient.id).await.unwrap();
    assert_eq!(person.status, "matched");

    let proposal_mail = &t.notifier.emails_to("mia@example.com")[0];
    assert_eq!(proposal_mail.subject, "Your therapist suggestions");

    let anna_match = db::matches::find_match_for_pair(&t.db, &patient.id, &anna.id)
        .await
        .unwrap()
        .unwrap();
    let uuid = anna_match.secure_uuid.clone();
    assert!(proposal_mail.text.contains(&format!("https://match.example/match/{}", uuid)));

    // Booking link is hidden until the therapist accepts
    let (status, body) = t.get(&format!("/api/match/{}", uuid)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["match"]["status"], "proposed");
    assert_eq!(body["patient"]["first_name"], "Mia");
    assert!(body["therapist"]["booking_url"].is_null());

    // Patient selects, twice
    let (status, body) = t.post(&format!("/api/match/{}/select", uuid), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "patient_selected");
    assert_eq!(body["changed"], true);
    assert_eq!(t.notifier.emails_to(&anna.email).len(), 1);
    assert_eq!(t.notifier.sms().len(), 1);
    assert_eq!(t.notifier.sms()[0].to, "+4930123456");

    let (status, body) = t.post(&format!("/api/match/{}/select", uuid), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], false);
    assert_eq!(t.notifier.emails_to(&anna.email).len(), 1, "No duplicate notification");

    // Therapist accepts
    let (status, body) = t
        .post(&format!("/api/match/{}/respond", uuid), json!({"action": "accept"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let accepted_mail = t.notifier.emails_to("mia@example.com").pop().unwrap();
    assert!(accepted_mail.text.contains("https://cal.com/anna"));

    let (_, body) = t.get(&format!("/api/match/{}", uuid)).await;
    assert_eq!(body["therapist"]["booking_url"], "https://cal.com/anna");

    // Cal.com reports the booking, twice
    let booking = json!({
        "cal_booking_uid": "cal-42",
        "secure_uuid": uuid,
        "start_time": "2030-01-07T09:00:00Z",
        "end_time": "2030-01-07T10:00:00Z",
    });
    let (status, body) = t.post("/api/bookings", booking.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], true);
    assert_eq!(body["match_status"], "session_booked");
    let mails_after_booking = t.notifier.emails().len();

    let (status, body) = t.post("/api/bookings", booking).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);
    assert_eq!(body["match_status"], "session_booked");
    assert_eq!(t.notifier.emails().len(), mails_after_booking);

    let stored = db::matches::get_match(&t.db, &anna_match.id).await.unwrap();
    assert_eq!(stored.status().unwrap(), MatchStatus::SessionBooked);
    assert!(stored.session_booked_at.is_some());
}

#[tokio::test]
async fn test_invalid_transition_is_unprocessable() {
    let t = setup_app().await;
    let patient = seed_patient(&t.db, "Mia", "mia@example.com").await;
    let anna = seed_therapist(&t.db, "Anna", None, true).await;
    let m = db::matches::insert_match(&t.db, &patient.id, &anna.id, Utc::now()).await.unwrap();

    // Therapist cannot accept before the patient selected
    let (status, body) = t
        .post(&format!("/api/match/{}/respond", m.secure_uuid), json!({"action": "accept"}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

    let (status, _) = t
        .post(&format!("/api/match/{}/respond", m.secure_uuid), json!({"action": "shrug"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A booking for a proposed match writes nothing
    let (status, _) = t
        .post(
            "/api/bookings",
            json!({
                "cal_booking_uid": "cal-1",
                "secure_uuid": m.secure_uuid,
                "start_time": "2030-01-07T09:00:00Z",
                "end_time": "2030-01-07T10:00:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(db::bookings::get_booking_by_uid(&t.db, "cal-1").await.is_err());
}

#[tokio::test]
async fn test_unknown_match_is_not_found() {
    let t = setup_app().await;

    let (status, body) = t.get("/api/match/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_booking_without_match_by_ids() {
    let t = setup_app().await;
    let patient = seed_patient(&t.db, "Mia", "mia@example.com").await;
    let anna = seed_therapist(&t.db, "Anna", Some("anna"), true).await;

    let (status, body) = t
        .post(
            "/api/bookings",
            json!({
                "cal_booking_uid": "cal-direct",
                "patient_id": patient.id,
                "therapist_id": anna.id,
                "start_time": "2030-01-07T09:00:00Z",
                "end_time": "2030-01-07T10:00:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["match_status"].is_null());
    assert!(body["booking"]["match_id"].is_null());

    let (status, _) = t
        .post(
            "/api/bookings",
            json!({
                "cal_booking_uid": "cal-orphan",
                "start_time": "2030-01-07T09:00:00Z",
                "end_time": "2030-01-07T10:00:00Z",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_booking_redelivery_after_match_completed() {
    let t = setup_app().await;
    let patient = seed_patient(&t.db, "Mia", "mia@example.com").await;
    let anna = seed_therapist(&t.db, "Anna", Some("anna"), true).await;
    let m = db::matches::insert_match(&t.db, &patient.id, &anna.id, Utc::now()).await.unwrap();
    db::matches::apply_transition(&t.db, &m, MatchStatus::PatientSelected, Utc::now())
        .await
        .unwrap();

    let booking = json!({
        "cal_booking_uid": "uid-1",
        "secure_uuid": m.secure_uuid,
        "start_time": "2030-01-07T09:00:00Z",
        "end_time": "2030-01-07T10:00:00Z",
    });
    let (status, first) = t.post("/api/bookings", booking.clone()).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = t
        .admin("PATCH", &format!("/api/admin/matches/{}", m.id), Some(json!({"status": "completed"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let mails = t.notifier.emails().len();

    let (status, body) = t.post("/api/bookings", booking).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);
    assert_eq!(body["booking"]["id"], first["booking"]["id"]);
    assert_eq!(body["match_status"], "completed");
    assert_eq!(t.notifier.emails().len(), mails);
}

#[tokio::test]
async fn test_booking_must_end_after_start() {
    let t = setup_app().await;
    let patient = seed_patient(&t.db, "Mia", "mia@example.com").await;
    let anna = seed_therapist(&t.db, "Anna", Some("anna"), true).await;

    for end_time in ["2030-01-07T09:00:00Z", "2030-01-07T08:00:00Z"] {
        let (status, body) = t
            .post(
                "/api/bookings",
                json!({
                    "cal_booking_uid": "cal-backwards",
                    "patient_id": patient.id,
                    "therapist_id": anna.id,
                    "start_time": "2030-01-07T09:00:00Z",
                    "end_time": end_time,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }
    assert!(db::bookings::find_booking_by_uid(&t.db, "cal-backwards").await.unwrap().is_none());
    assert!(t.notifier.emails().is_empty());
}

// =============================================================================
// Admin
// =============================================================================

#[tokio::test]
async fn test_admin_and_cron_routes_require_tokens() {
    let t = setup_app().await;

    let (status, body) = t.get("/api/admin/stats").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, _) = t.call("GET", "/api/admin/stats", None, Some(CRON_SECRET)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t.admin("GET", "/api/admin/stats", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = t.call("POST", "/api/cron/reminders", None, Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t.cron("/api/cron/reminders").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_proposal_limit_and_existing_pairs() {
    let t = setup_app().await;
    let patient = seed_patient(&t.db, "Mia", "mia@example.com").await;
    let mut ids = Vec::new();
    for name in ["Anna", "Ben", "Carla", "Dora"] {
        ids.push(seed_therapist(&t.db, name, None, true).await.id);
    }

    let (status, body) = t
        .admin(
            "POST",
            "/api/admin/matches",
            Some(json!({"patient_id": patient.id, "therapist_ids": ids})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"].as_array().unwrap().len(), 3);
    assert_eq!(body["skipped"][0]["therapist_id"], ids[3]);
    assert_eq!(body["skipped"][0]["reason"], "proposal_limit");

    let (status, body) = t
        .admin(
            "POST",
            "/api/admin/matches",
            Some(json!({"patient_id": patient.id, "therapist_ids": [ids[0]]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"][0]["reason"], "already_matched");
    assert_eq!(body["email_sent"], false);
}

#[tokio::test]
async fn test_admin_list_and_update_matches() {
    let t = setup_app().await;
    let patient = seed_patient(&t.db, "Mia", "mia@example.com").await;
    let anna = seed_therapist(&t.db, "Anna", None, true).await;
    let ben = seed_therapist(&t.db, "Ben", None, true).await;
    let m1 = db::matches::insert_match(&t.db, &patient.id, &anna.id, Utc::now()).await.unwrap();
    db::matches::insert_match(&t.db, &patient.id, &ben.id, Utc::now()).await.unwrap();

    let (status, body) = t
        .admin("PATCH", &format!("/api/admin/matches/{}", m1.id), Some(json!({"status": "failed", "notes": " no reply "})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["notes"], "no reply");

    // Terminal state cannot be reopened
    let (status, _) = t
        .admin("PATCH", &format!("/api/admin/matches/{}", m1.id), Some(json!({"status": "proposed"})))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = t.admin("GET", "/api/admin/matches?status=proposed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["matches"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["pagination"]["page"], 1);

    let (_, body) = t.admin("GET", "/api/admin/matches", None).await;
    assert_eq!(body["pagination"]["total"], 2);

    let (status, body) = t.admin("GET", "/api/admin/matches?status=session_booked&page=4", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["matches"].as_array().unwrap().is_empty());
    assert_eq!(body["pagination"], json!({"page": 1, "total_pages": 0, "total": 0}));

    let (status, _) = t.admin("GET", "/api/admin/matches?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_verifies_therapist() {
    let t = setup_app().await;
    let anna = seed_therapist(&t.db, "Anna", None, false).await;

    let (status, body) = t
        .admin("PATCH", &format!("/api/admin/therapists/{}", anna.id), Some(json!({"status": "verified"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "verified");

    let (status, _) = t
        .admin("PATCH", "/api/admin/therapists/missing", Some(json!({"status": "verified"})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_stats_zero_fills_days() {
    let t = setup_app().await;
    seed_patient(&t.db, "Mia", "mia@example.com").await;
    seed_patient(&t.db, "Lea", "lea@example.com").await;
    seed_therapist(&t.db, "Anna", None, true).await;

    let (status, body) = t.admin("GET", "/api/admin/stats?days=7", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["days"], 7);
    assert_eq!(body["people"]["new"], 2);
    assert_eq!(body["people"]["matched"], 0);
    assert_eq!(body["therapists"]["verified"], 1);
    assert_eq!(body["matches"]["proposed"], 0);
    assert_eq!(body["bookings"], 0);

    let days = body["leads_per_day"].as_array().unwrap();
    assert_eq!(days.len(), 7);
    assert_eq!(days[6]["date"], Utc::now().date_naive().format("%Y-%m-%d").to_string());
    assert_eq!(days[6]["count"], 2);
    assert_eq!(days[0]["count"], 0);

    let (status, _) = t.admin("GET", "/api/admin/stats?days=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// =============================================================================
// Slots
// =============================================================================

#[tokio::test]
async fn test_slots_null_without_calendar() {
    let t = setup_app().await;
    let anna = seed_therapist(&t.db, "Anna", Some("anna"), true).await;

    let (status, body) = t.get(&format!("/api/therapists/{}/slots", anna.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["slots"].is_null());
}

#[tokio::test]
async fn test_slots_are_cached_until_refresh() {
    let calendar = Arc::new(FakeCalendar::new());
    let t = setup_with(test_config(), RecordingNotifier::default(), Some(calendar.clone()), None).await;
    let anna = seed_therapist(&t.db, "Anna", Some("anna"), true).await;
    let uri = format!("/api/therapists/{}/slots", anna.id);

    let (status, body) = t.get(&uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "calendar");
    let slots = body["slots"].as_array().unwrap();
    assert!(!slots.is_empty());
    assert!(body["by_date"].as_object().unwrap().len() >= 13);

    let (_, body) = t.get(&uri).await;
    assert_eq!(body["source"], "cache");
    assert_eq!(body["slots"].as_array().unwrap().len(), slots.len());
    assert_eq!(calendar.calls(), 1);

    let (_, body) = t.get(&format!("{}?refresh=true", uri)).await;
    assert_eq!(body["source"], "calendar");
    assert_eq!(calendar.calls(), 2);
}

#[tokio::test]
async fn test_slots_null_when_source_fails() {
    let calendar = Arc::new(FakeCalendar::failing());
    let t = setup_with(test_config(), RecordingNotifier::default(), Some(calendar), None).await;
    let anna = seed_therapist(&t.db, "Anna", Some("anna"), true).await;
    let no_cal = seed_therapist(&t.db, "Ben", None, true).await;

    let (status, body) = t.get(&format!("/api/therapists/{}/slots", anna.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["slots"].is_null());

    let (status, body) = t.get(&format!("/api/therapists/{}/slots", no_cal.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["slots"].is_null());

    let (_, body) = t.admin("GET", "/api/admin/events?level=warn", None).await;
    let reasons: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["event_type"] == "slots_unavailable")
        .filter_map(|e| e["properties"]["reason"].as_str())
        .collect();
    assert!(reasons.contains(&"source_failed"));
    assert!(reasons.contains(&"no_cal_username"));

    let (status, _) = t.get("/api/therapists/missing/slots").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Client events
// =============================================================================

#[tokio::test]
async fn test_track_event() {
    let t = setup_app().await;

    let (status, _) = t
        .post("/api/events", json!({"event_type": "cta_click", "properties": {"page": "home"}}))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, _) = t.post("/api/events", json!({"event_type": "CTA-Click"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t
        .post("/api/events", json!({"event_type": "cta_click", "properties": [1, 2]}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = t.admin("GET", "/api/admin/events?limit=10", None).await;
    let event = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["event_type"] == "cta_click")
        .cloned()
        .unwrap();
    assert_eq!(event["source"], "client");
    assert_eq!(event["properties"]["page"], "home");
}

// =============================================================================
// Cron
// =============================================================================

#[tokio::test]
async fn test_reminders_sent_once() {
    let t = setup_app().await;
    let mia = seed_patient(&t.db, "Mia", "mia@example.com").await;
    let lea = seed_patient(&t.db, "Lea", "lea@example.com").await;
    let anna = seed_therapist(&t.db, "Anna", None, true).await;
    let ben = seed_therapist(&t.db, "Ben", None, true).await;

    // Mia selected Anna 30 hours ago
    let long_ago = Utc::now() - Duration::hours(30);
    let selected = db::matches::insert_match(&t.db, &mia.id, &anna.id, long_ago).await.unwrap();
    db::matches::apply_transition(&t.db, &selected, MatchStatus::PatientSelected, long_ago)
        .await
        .unwrap();

    // Lea has had two proposals for three days
    let three_days_ago = Utc::now() - Duration::hours(72);
    db::matches::insert_match(&t.db, &lea.id, &anna.id, three_days_ago).await.unwrap();
    db::matches::insert_match(&t.db, &lea.id, &ben.id, three_days_ago).await.unwrap();

    // A fresh proposal is left alone
    db::matches::insert_match(&t.db, &mia.id, &ben.id, Utc::now()).await.unwrap();

    let (status, body) = t.cron("/api/cron/reminders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"processed": 2, "sent": 2, "failed": 0}));

    assert_eq!(t.notifier.emails_to(&anna.email).len(), 1);
    let lea_mails = t.notifier.emails_to("lea@example.com");
    assert_eq!(lea_mails.len(), 1, "One reminder per patient");
    assert_eq!(lea_mails[0].subject, "Reminder: your therapist suggestions are waiting");

    let (_, body) = t.cron("/api/cron/reminders").await;
    assert_eq!(body["processed"], 0);
}

#[tokio::test]
async fn test_therapist_reminded_after_patient_reminder() {
    let t = setup_app().await;
    let lea = seed_patient(&t.db, "Lea", "lea@example.com").await;
    let anna = seed_therapist(&t.db, "Anna", None, true).await;

    let proposed_at = Utc::now() - Duration::hours(72);
    let m = db::matches::insert_match(&t.db, &lea.id, &anna.id, proposed_at).await.unwrap();

    let (_, body) = t.cron("/api/cron/reminders").await;
    assert_eq!(body, json!({"processed": 1, "sent": 1, "failed": 0}));
    assert_eq!(t.notifier.emails_to("lea@example.com").len(), 1);

    // Lea picks Anna, and Anna sits on it past the therapist window
    let m = db::matches::get_match(&t.db, &m.id).await.unwrap();
    db::matches::apply_transition(&t.db, &m, MatchStatus::PatientSelected, Utc::now() - Duration::hours(30))
        .await
        .unwrap();

    let (_, body) = t.cron("/api/cron/reminders").await;
    assert_eq!(body, json!({"processed": 1, "sent": 1, "failed": 0}));
    assert_eq!(t.notifier.emails_to(&anna.email).len(), 1);
    assert_eq!(t.notifier.emails_to("lea@example.com").len(), 1);

    let (_, body) = t.cron("/api/cron/reminders").await;
    assert_eq!(body["processed"], 0);
}

#[tokio::test]
async fn test_reminder_failures_are_counted() {
    let t = setup_with(test_config(), RecordingNotifier::failing(), None, None).await;
    let lea = seed_patient(&t.db, "Lea", "lea@example.com").await;
    let anna = seed_therapist(&t.db, "Anna", None, true).await;
    db::matches::insert_match(&t.db, &lea.id, &anna.id, Utc::now() - Duration::hours(72))
        .await
        .unwrap();

    let (status, body) = t.cron("/api/cron/reminders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"processed": 1, "sent": 0, "failed": 1}));

    // Not marked, so the next run tries again
    let (_, body) = t.cron("/api/cron/reminders").await;
    assert_eq!(body["processed"], 1);
}

#[tokio::test]
async fn test_warm_cache() {
    let calendar = Arc::new(FakeCalendar::new());
    let t = setup_with(test_config(), RecordingNotifier::default(), Some(calendar.clone()), None).await;
    let anna = seed_therapist(&t.db, "Anna", Some("anna"), true).await;
    seed_therapist(&t.db, "Ghost", Some("ghost"), true).await;
    seed_therapist(&t.db, "Ben", Some("ben"), false).await;
    seed_therapist(&t.db, "Carla", None, true).await;

    let (status, body) = t.cron("/api/cron/warm-cache").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"processed": 2, "warmed": 1, "failed": 1}));

    let cached = db::slot_cache::load_slot_cache(&t.db, &anna.id).await.unwrap();
    assert!(cached.is_some_and(|c| !c.slots.is_empty()));

    let (_, body) = t.get(&format!("/api/therapists/{}/slots", anna.id)).await;
    assert_eq!(body["source"], "cache");
    assert_eq!(calendar.calls(), 2);
}
