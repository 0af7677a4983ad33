//! Scheduler-triggered batch jobs
//!
//! Both jobs work through their batch one item at a time with
//! `cron.delay_ms` between items so the email provider and the Cal.com
//! database never see a burst. A failing item is logged and counted; the
//! batch carries on.

use axum::{extract::State, Json};
use chrono::Duration;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tm_common::db::matches::Reminder;
use tm_common::db::{self, Match, Therapist};
use tm_common::events::EventLog;
use tm_common::time;
use tracing::info;

use super::slots::refresh_slots;
use crate::error::ApiResult;
use crate::links;
use crate::notify::templates;
use crate::AppState;

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct ReminderSummary {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct WarmSummary {
    pub processed: usize,
    pub warmed: usize,
    pub failed: usize,
}

/// Sleeps between items, never before the first
struct Pacer {
    delay: std::time::Duration,
    started: bool,
}

impl Pacer {
    fn new(delay_ms: u64) -> Self {
        Self {
            delay: time::millis_to_duration(delay_ms),
            started: false,
        }
    }

    async fn wait(&mut self) {
        if self.started && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.started = true;
    }
}

/// POST /api/cron/reminders
pub async fn send_reminders(State(state): State<AppState>) -> ApiResult<Json<ReminderSummary>> {
    let events = EventLog::new(state.db.clone(), "cron");
    let now = time::now();
    let cron = &state.config.cron;
    let mut pacer = Pacer::new(cron.delay_ms);
    let mut summary = ReminderSummary::default();

    let selected_before = now - Duration::hours(cron.therapist_reminder_hours);
    let waiting = db::matches::matches_awaiting_therapist(&state.db, selected_before, cron.batch_limit).await?;

    for m in waiting {
        pacer.wait().await;
        summary.processed += 1;
        match remind_therapist(&state, &m).await {
            Ok(()) => summary.sent += 1,
            Err(e) => {
                summary.failed += 1;
                events
                    .error("therapist_reminder_failed", json!({"match_id": m.id, "error": e.to_string()}))
                    .await;
            }
        }
    }

    let proposed_before = now - Duration::hours(cron.patient_reminder_hours);
    let proposals = db::matches::proposals_awaiting_patient(&state.db, proposed_before, cron.batch_limit).await?;

    for (patient_id, group) in group_by_patient(proposals) {
        pacer.wait().await;
        summary.processed += 1;
        match remind_patient(&state, &patient_id, &group).await {
            Ok(()) => summary.sent += 1,
            Err(e) => {
                summary.failed += 1;
                events
                    .error("patient_reminder_failed", json!({"patient_id": patient_id, "error": e.to_string()}))
                    .await;
            }
        }
    }

    events
        .info(
            "reminders_run",
            json!({"processed": summary.processed, "sent": summary.sent, "failed": summary.failed}),
        )
        .await;
    Ok(Json(summary))
}

/// One patient reminder covers all of that patient's waiting proposals
fn group_by_patient(matches: Vec<Match>) -> BTreeMap<String, Vec<Match>> {
    let mut grouped: BTreeMap<String, Vec<Match>> = BTreeMap::new();
    for m in matches {
        grouped.entry(m.patient_id.clone()).or_default().push(m);
    }
    grouped
}

async fn remind_therapist(state: &AppState, m: &Match) -> anyhow::Result<()> {
    let patient = db::people::get_person(&state.db, &m.patient_id).await?;
    let therapist = db::therapists::get_therapist(&state.db, &m.therapist_id).await?;
    let respond_url = links::respond_url(&state.config, &m.secure_uuid);

    let email = templates::therapist_reminder(&therapist, &patient, &respond_url)?;
    state.notifier.send_email(&email).await?;
    db::matches::mark_reminder_sent(&state.db, &m.id, Reminder::Therapist, time::now()).await?;

    info!(match_id = %m.id, therapist_id = %therapist.id, "Sent therapist reminder");
    Ok(())
}

async fn remind_patient(state: &AppState, patient_id: &str, group: &[Match]) -> anyhow::Result<()> {
    let patient = db::people::get_person(&state.db, patient_id).await?;

    let mut proposals: Vec<(Therapist, String)> = Vec::with_capacity(group.len());
    for m in group {
        let therapist = db::therapists::get_therapist(&state.db, &m.therapist_id).await?;
        proposals.push((therapist, links::selection_url(&state.config, &m.secure_uuid)));
    }

    let email = templates::patient_reminder(&patient, &proposals)?;
    state.notifier.send_email(&email).await?;

    let now = time::now();
    for m in group {
        db::matches::mark_reminder_sent(&state.db, &m.id, Reminder::Patient, now).await?;
    }

    info!(patient_id, proposals = group.len(), "Sent patient reminder");
    Ok(())
}

/// POST /api/cron/warm-cache
pub async fn warm_cache(State(state): State<AppState>) -> ApiResult<Json<WarmSummary>> {
    let events = EventLog::new(state.db.clone(), "cron");
    let therapists = db::therapists::list_verified_with_calendar(&state.db).await?;
    let mut pacer = Pacer::new(state.config.cron.delay_ms);
    let mut summary = WarmSummary::default();

    for therapist in therapists {
        pacer.wait().await;
        summary.processed += 1;
        match refresh_slots(&state, &therapist, time::now()).await {
            Ok(slots) => {
                summary.warmed += 1;
                tracing::debug!(therapist_id = %therapist.id, slots = slots.len(), "Warmed slot cache");
            }
            Err(unavailable) => {
                summary.failed += 1;
                events
                    .warn(
                        "slot_cache_warm_failed",
                        json!({"therapist_id": therapist.id, "reason": unavailable.reason()}),
                    )
                    .await;
            }
        }
    }

    events
        .info(
            "slot_cache_warmed",
            json!({"processed": summary.processed, "warmed": summary.warmed, "failed": summary.failed}),
        )
        .await;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(id: &str, patient_id: &str) -> Match {
        let now = time::now();
        Match {
            id: id.to_string(),
            secure_uuid: format!("{}-uuid", id),
            patient_id: patient_id.to_string(),
            therapist_id: format!("t-{}", id),
            status: "proposed".to_string(),
            notes: None,
            created_at: now,
            updated_at: now,
            patient_selected_at: None,
            therapist_responded_at: None,
            therapist_contacted_at: None,
            session_booked_at: None,
            completed_at: None,
            failed_at: None,
            patient_reminder_sent_at: None,
            therapist_reminder_sent_at: None,
        }
    }

    #[test]
    fn test_group_by_patient() {
        let grouped = group_by_patient(vec![
            proposal("m1", "p1"),
            proposal("m2", "p2"),
            proposal("m3", "p1"),
        ]);
        assert_eq!(grouped.len(), 2);
        let ids: Vec<&str> = grouped["p1"].iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
    }

    #[tokio::test]
    async fn test_pacer_skips_first_wait() {
        let mut pacer = Pacer::new(0);
        pacer.wait().await;
        assert!(pacer.started);
        pacer.wait().await;
    }
}
