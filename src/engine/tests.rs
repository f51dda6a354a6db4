use super::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_core::{
    error::LeadflowError,
    message::{BookingRequest, DeliveryReport, InboundMessage},
    model::{reason, FollowUpTemplate, LeadAttributes, ScheduleOutcome, Transition},
    stage::Stage,
    timefmt::parse_ts,
};
use leadflow_store::ItemKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

const PHONE: &str = "+353871234567";
const OTHER: &str = "+353861112222";

fn ts(raw: &str) -> DateTime<Utc> {
    parse_ts(raw).unwrap()
}

/// Records every delivery; can be told to fail or to stall.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    fail_all: AtomicBool,
    fail_phone: Mutex<Option<String>>,
    stall: AtomicBool,
}

impl RecordingTransport {
    fn phones(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, phone: &str, message: &str) -> Result<DeliveryReport, LeadflowError> {
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(LeadflowError::Transport("connection reset".into()));
        }
        if self.fail_phone.lock().unwrap().as_deref() == Some(phone) {
            return Ok(DeliveryReport::rejected("400", "invalid recipient"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((phone.to_string(), message.to_string()));
        Ok(DeliveryReport::delivered("queued"))
    }
}

/// What the interfering transport does to the store mid-delivery.
enum Interference {
    /// The customer replies while their own follow-up is in flight.
    Reply(&'static str),
    /// An operator stops another lead's follow-ups.
    Stop(&'static str),
}

/// Mutates the store once, during its first delivery.
struct InterferingTransport {
    store: Store,
    action: Interference,
    at: DateTime<Utc>,
    done: AtomicBool,
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for InterferingTransport {
    fn name(&self) -> &str {
        "interfering"
    }

    async fn deliver(&self, phone: &str, _message: &str) -> Result<DeliveryReport, LeadflowError> {
        if !self.done.swap(true, Ordering::SeqCst) {
            match self.action {
                Interference::Reply(from) => {
                    self.store
                        .record_response(&inbound(from, self.at), self.at, &FollowUpPolicy::default())
                        .await?;
                }
                Interference::Stop(who) => {
                    self.store.set_follow_ups_stopped(who, true, self.at).await?;
                }
            }
        }
        self.sent.lock().unwrap().push(phone.to_string());
        Ok(DeliveryReport::delivered("queued"))
    }
}

fn template(stage: Stage, number: i64, hours: i64, body: &str) -> FollowUpTemplate {
    FollowUpTemplate {
        id: format!("tpl-{stage}-{number}"),
        template_name: format!("{stage}_no_response_{number}"),
        stage,
        template_type: "no_response".to_string(),
        follow_up_number: number,
        delay_hours: hours,
        delay_minutes: 0,
        message_template: body.to_string(),
        is_active: true,
    }
}

/// Two-step `initial_contact` campaign (+4h, +24h), one-step `project_type` (+2h).
async fn seeded_store() -> Store {
    let store = Store::in_memory().await.unwrap();
    for t in [
        template(Stage::InitialContact, 1, 4, "Hi {name}, any questions?"),
        template(Stage::InitialContact, 2, 24, "Hi {name}, still there?"),
        template(Stage::ProjectType, 1, 2, "What kind of project, {name}?"),
    ] {
        store.upsert_follow_up_template(&t).await.unwrap();
    }
    store
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.dispatch.max_attempts = 3;
    config.dispatch.delivery_timeout_secs = 1;
    config
}

async fn engine_with(store: Store, config: &Config) -> (Engine, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let engine = Engine::new(store, transport.clone(), config);
    (engine, transport)
}

async fn seeded_engine() -> (Engine, Arc<RecordingTransport>) {
    engine_with(seeded_store().await, &test_config()).await
}

fn inbound(phone: &str, at: DateTime<Utc>) -> InboundMessage {
    InboundMessage {
        phone: phone.to_string(),
        name: None,
        received_at: at,
        content: "yes, tell me more".to_string(),
        detected_intent: Some("positive".to_string()),
        response_type: Some("answer".to_string()),
        transition: None,
        attributes: LeadAttributes::default(),
        interested: Some(true),
        angry_behaviour: false,
    }
}

fn booking(phone: &str, date: &str) -> BookingRequest {
    BookingRequest {
        appointment_id: None,
        phone: phone.to_string(),
        name: None,
        email: Some("aoife@example.com".to_string()),
        appointment_date: ts(date),
        consultation_type: Some("site visit".to_string()),
        event_id: Some("evt-1".to_string()),
    }
}

async fn register(engine: &Engine, phone: &str, at: &str) -> Option<ScheduleOutcome> {
    let (_, outcome) = engine
        .register_lead(phone, Some("Aoife"), ts(at))
        .await
        .unwrap();
    outcome
}

// ---------------------------------------------------------------------------
// Follow-up dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_first_follow_up_fires_and_chain_continues() {
    let (engine, transport) = seeded_engine().await;
    let outcome = register(&engine, PHONE, "2024-01-01T00:00").await;
    assert!(matches!(
        outcome,
        Some(ScheduleOutcome::Scheduled { follow_up_number: 1, scheduled_time, .. })
            if scheduled_time == ts("2024-01-01T04:00")
    ));

    let early = engine.run_tick(ts("2024-01-01T03:59")).await;
    assert_eq!(early.due, 0);
    assert!(transport.phones().is_empty());

    let report = engine.run_tick(ts("2024-01-01T04:00")).await;
    assert_eq!(report.sent, 1);
    assert_eq!(report.continued, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(transport.messages(), vec!["Hi Aoife, any questions?"]);

    let rows = engine.store().follow_ups_for_lead(PHONE).await.unwrap();
    assert_eq!(rows.len(), 2);
    let first = &rows[0];
    assert!(first.is_sent);
    assert!(first.is_active);
    assert_eq!(first.delivery_status, "sent");
    assert_eq!(first.sent_time, Some(ts("2024-01-01T04:00")));
    assert_eq!(first.stage_when_sent, Some(Stage::InitialContact));
    let second = &rows[1];
    assert_eq!(second.follow_up_number, 2);
    assert_eq!(second.scheduled_time, ts("2024-01-02T04:00"));
    assert_eq!(second.previous_followup_id.as_deref(), Some(first.id.as_str()));

    let lead = engine.store().get_lead(PHONE).await.unwrap().unwrap();
    assert_eq!(lead.total_messages_sent, 1);
    assert_eq!(lead.last_message_time, Some(ts("2024-01-01T04:00")));
}

#[tokio::test]
async fn test_chain_ends_when_no_next_template() {
    let (engine, transport) = seeded_engine().await;
    register(&engine, PHONE, "2024-01-01T00:00").await;
    let change = engine
        .advance_stage(PHONE, &Transition::Next, ts("2024-01-01T01:00"))
        .await
        .unwrap();
    assert_eq!(change.to, Stage::ProjectType);
    assert_eq!(change.deactivated_follow_ups, 1);

    let report = engine.run_tick(ts("2024-01-01T03:00")).await;
    assert_eq!(report.sent, 1);
    assert_eq!(report.continued, 0);
    assert_eq!(transport.messages(), vec!["What kind of project, Aoife?"]);

    let rows = engine.store().follow_ups_for_lead(PHONE).await.unwrap();
    assert_eq!(rows.len(), 2);
    let initial = rows
        .iter()
        .find(|f| f.stage_when_scheduled == Stage::InitialContact)
        .unwrap();
    assert!(!initial.is_active);
    assert_eq!(initial.deactivation_reason.as_deref(), Some(reason::STAGE_ADVANCED));
    assert_eq!(engine.store().pending_follow_up_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reply_before_due_means_never_sent() {
    let (engine, transport) = seeded_engine().await;
    register(&engine, PHONE, "2024-01-01T00:00").await;

    let outcome = engine
        .handle_inbound(&inbound(PHONE, ts("2024-01-01T03:00")), ts("2024-01-01T03:00"))
        .await
        .unwrap();
    assert_eq!(outcome.cancelled_follow_ups, 1);
    assert!(!outcome.lead_created);

    let report = engine.run_tick(ts("2024-01-01T04:00")).await;
    assert_eq!(report.due, 0);
    assert!(transport.phones().is_empty());

    let rows = engine.store().follow_ups_for_lead(PHONE).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].is_sent);
    assert!(!rows[0].is_active);
    assert_eq!(
        rows[0].deactivation_reason.as_deref(),
        Some(reason::CUSTOMER_RESPONDED)
    );
    assert_eq!(rows[0].deactivated_at, Some(ts("2024-01-01T03:00")));
}

#[tokio::test]
async fn test_inbound_from_unknown_phone_starts_campaign() {
    let (engine, transport) = seeded_engine().await;
    let outcome = engine
        .handle_inbound(&inbound(OTHER, ts("2024-01-01T00:00")), ts("2024-01-01T00:00"))
        .await
        .unwrap();
    assert!(outcome.lead_created);
    assert!(matches!(
        outcome.initial_schedule,
        Some(ScheduleOutcome::Scheduled { follow_up_number: 1, .. })
    ));

    let report = engine.run_tick(ts("2024-01-01T04:00")).await;
    assert_eq!(report.sent, 1);
    // No name known yet.
    assert_eq!(transport.messages(), vec!["Hi there, any questions?"]);
}

// ---------------------------------------------------------------------------
// Failures, retries, timeouts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_delivery_retries_then_exhausts() {
    let (engine, transport) = seeded_engine().await;
    register(&engine, PHONE, "2024-01-01T00:00").await;
    transport.fail_all.store(true, Ordering::SeqCst);

    let now = ts("2024-01-01T04:00");
    let first = engine.run_tick(now).await;
    assert_eq!((first.failed, first.exhausted), (1, 0));
    let row = &engine.store().follow_ups_for_lead(PHONE).await.unwrap()[0];
    assert_eq!(row.delivery_status, "failed");
    assert!(row.error_message.as_deref().unwrap().contains("connection reset"));
    assert!(row.is_active);
    assert_eq!(row.scheduled_time, now);

    let second = engine.run_tick(now).await;
    assert_eq!((second.failed, second.exhausted), (1, 0));
    let third = engine.run_tick(now).await;
    assert_eq!((third.failed, third.exhausted), (0, 1));

    let row = &engine.store().follow_ups_for_lead(PHONE).await.unwrap()[0];
    assert!(!row.is_active);
    assert!(!row.is_sent);
    assert_eq!(row.attempt_count, 3);
    assert_eq!(
        row.deactivation_reason.as_deref(),
        Some(reason::DELIVERY_EXHAUSTED)
    );

    assert_eq!(engine.run_tick(now).await.due, 0);
    assert_eq!(engine.store().pending_follow_up_count().await.unwrap(), 0);

    let attempts = engine
        .delivery_log()
        .attempts_for(ItemKind::FollowUp, &row.id)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| !a.success));
    assert_eq!(attempts[0].transport, "recording");
}

#[tokio::test]
async fn test_delivery_recovers_on_next_tick() {
    let (engine, transport) = seeded_engine().await;
    register(&engine, PHONE, "2024-01-01T00:00").await;
    transport.fail_all.store(true, Ordering::SeqCst);
    assert_eq!(engine.run_tick(ts("2024-01-01T04:00")).await.failed, 1);

    transport.fail_all.store(false, Ordering::SeqCst);
    let report = engine.run_tick(ts("2024-01-01T04:01")).await;
    assert_eq!(report.sent, 1);

    let row = &engine.store().follow_ups_for_lead(PHONE).await.unwrap()[0];
    assert!(row.is_sent);
    assert_eq!(row.delivery_status, "sent");
    assert_eq!(row.error_message, None);
    assert_eq!(row.attempt_count, 2);
}

#[tokio::test]
async fn test_slow_transport_counts_as_failure() {
    let (engine, transport) = seeded_engine().await;
    register(&engine, PHONE, "2024-01-01T00:00").await;
    transport.stall.store(true, Ordering::SeqCst);

    let report = engine.run_tick(ts("2024-01-01T04:00")).await;
    assert_eq!(report.failed, 1);
    let row = &engine.store().follow_ups_for_lead(PHONE).await.unwrap()[0];
    assert!(!row.is_sent);
    assert!(row.error_message.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_rejected_item_does_not_abort_batch() {
    let (engine, transport) = seeded_engine().await;
    register(&engine, PHONE, "2024-01-01T00:00").await;
    register(&engine, OTHER, "2024-01-01T00:10").await;
    *transport.fail_phone.lock().unwrap() = Some(PHONE.to_string());

    let report = engine.run_tick(ts("2024-01-01T05:00")).await;
    assert_eq!(report.due, 2);
    assert_eq!(report.sent, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(transport.phones(), vec![OTHER.to_string()]);

    let failed = &engine.store().follow_ups_for_lead(PHONE).await.unwrap()[0];
    assert_eq!(failed.error_message.as_deref(), Some("invalid recipient"));
    let attempts = engine
        .delivery_log()
        .attempts_for(ItemKind::FollowUp, &failed.id)
        .await
        .unwrap();
    assert_eq!(attempts[0].provider_status.as_deref(), Some("400"));
}

// ---------------------------------------------------------------------------
// Races between delivery and other actors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reply_during_delivery_wins() {
    let store = seeded_store().await;
    let transport = Arc::new(InterferingTransport {
        store: store.clone(),
        action: Interference::Reply(PHONE),
        at: ts("2024-01-01T04:00"),
        done: AtomicBool::new(false),
        sent: Mutex::new(Vec::new()),
    });
    let engine = Engine::new(store, transport.clone(), &test_config());
    register(&engine, PHONE, "2024-01-01T00:00").await;

    let report = engine.run_tick(ts("2024-01-01T04:00")).await;
    assert_eq!(report.sent, 0);
    assert_eq!(report.stale, 1);

    let rows = engine.store().follow_ups_for_lead(PHONE).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].is_sent);
    assert!(!rows[0].is_active);
    assert_eq!(
        rows[0].deactivation_reason.as_deref(),
        Some(reason::CUSTOMER_RESPONDED)
    );
    let lead = engine.store().get_lead(PHONE).await.unwrap().unwrap();
    assert_eq!(lead.total_messages_sent, 0);
}

#[tokio::test]
async fn test_row_cancelled_after_listing_is_skipped() {
    let store = seeded_store().await;
    let transport = Arc::new(InterferingTransport {
        store: store.clone(),
        action: Interference::Stop(OTHER),
        at: ts("2024-01-01T04:00"),
        done: AtomicBool::new(false),
        sent: Mutex::new(Vec::new()),
    });
    let engine = Engine::new(store, transport.clone(), &test_config());
    register(&engine, PHONE, "2024-01-01T00:00").await;
    register(&engine, OTHER, "2024-01-01T00:30").await;

    let report = engine.run_tick(ts("2024-01-01T05:00")).await;
    assert_eq!(report.due, 2);
    assert_eq!(report.sent, 1);
    assert_eq!(report.stale, 1);
    assert_eq!(*transport.sent.lock().unwrap(), vec![PHONE.to_string()]);

    let other = &engine.store().follow_ups_for_lead(OTHER).await.unwrap()[0];
    assert!(!other.is_sent);
    assert_eq!(other.deactivation_reason.as_deref(), Some(reason::MANUAL_STOP));
}

// ---------------------------------------------------------------------------
// Reminders
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_booked_reminders_fire_on_time() {
    // No templates: the lead gets no follow-ups to muddy the queue.
    let (engine, transport) =
        engine_with(Store::in_memory().await.unwrap(), &test_config()).await;
    register(&engine, PHONE, "2024-01-20T09:00").await;

    let booked = engine
        .book_appointment(&booking(PHONE, "2024-02-01T10:00"), ts("2024-01-25T12:00"))
        .await
        .unwrap();
    let times: Vec<_> = booked.reminders.iter().map(|r| r.scheduled_time).collect();
    assert_eq!(times, vec![ts("2024-01-31T10:00"), ts("2024-02-01T08:00")]);
    assert!(booked.reminders.iter().all(|r| r.is_active));

    assert_eq!(engine.run_tick(ts("2024-01-31T09:59")).await.due, 0);

    let day_before = engine.run_tick(ts("2024-01-31T10:00")).await;
    assert_eq!(day_before.sent, 1);
    let appt = engine
        .store()
        .get_appointment(&booked.appointment.id)
        .await
        .unwrap()
        .unwrap();
    assert!(appt.reminder_24h_sent);
    assert!(!appt.reminder_2h_sent);

    let two_hours = engine.run_tick(ts("2024-02-01T08:00")).await;
    assert_eq!(two_hours.sent, 1);
    assert_eq!(transport.phones(), vec![PHONE.to_string(), PHONE.to_string()]);
    let appt = engine
        .store()
        .get_appointment(&booked.appointment.id)
        .await
        .unwrap()
        .unwrap();
    assert!(appt.reminder_2h_sent);

    let lead = engine.store().get_lead(PHONE).await.unwrap().unwrap();
    assert_eq!(lead.total_messages_sent, 2);
    assert_eq!(engine.store().pending_reminder_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_appointment_sends_nothing() {
    let (engine, transport) =
        engine_with(Store::in_memory().await.unwrap(), &test_config()).await;
    register(&engine, PHONE, "2024-01-20T09:00").await;
    let booked = engine
        .book_appointment(&booking(PHONE, "2024-02-01T10:00"), ts("2024-01-25T12:00"))
        .await
        .unwrap();
    let dropped = engine
        .cancel_appointment(&booked.appointment.id, ts("2024-01-26T12:00"))
        .await
        .unwrap();
    assert_eq!(dropped, 2);

    let report = engine.run_tick(ts("2024-02-01T09:00")).await;
    assert_eq!(report.due, 0);
    assert!(transport.phones().is_empty());
}

#[tokio::test]
async fn test_rescheduled_appointment_fires_at_new_time() {
    let (engine, transport) =
        engine_with(Store::in_memory().await.unwrap(), &test_config()).await;
    register(&engine, PHONE, "2024-01-20T09:00").await;
    let booked = engine
        .book_appointment(&booking(PHONE, "2024-02-01T10:00"), ts("2024-01-25T12:00"))
        .await
        .unwrap();
    engine
        .reschedule_appointment(
            &booked.appointment.id,
            ts("2024-02-03T10:00"),
            ts("2024-01-26T12:00"),
        )
        .await
        .unwrap();

    assert_eq!(engine.run_tick(ts("2024-02-01T09:00")).await.due, 0);
    assert_eq!(engine.run_tick(ts("2024-02-02T10:00")).await.sent, 1);
    assert_eq!(transport.phones().len(), 1);
}

#[tokio::test]
async fn test_reminders_disabled_leaves_them_pending() {
    let mut config = test_config();
    config.reminder.enabled = false;
    let (engine, transport) = engine_with(Store::in_memory().await.unwrap(), &config).await;
    register(&engine, PHONE, "2024-01-20T09:00").await;
    engine
        .book_appointment(&booking(PHONE, "2024-02-01T10:00"), ts("2024-01-25T12:00"))
        .await
        .unwrap();

    let report = engine.run_tick(ts("2024-02-01T09:00")).await;
    assert_eq!(report.due, 0);
    assert!(transport.phones().is_empty());
    assert_eq!(engine.store().pending_reminder_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_due_items_go_out_earliest_first() {
    let (engine, transport) = seeded_engine().await;
    register(&engine, PHONE, "2024-01-01T00:00").await; // follow-up 04:00
    register(&engine, OTHER, "2024-01-01T00:30").await; // follow-up 04:30
    let third = "+353870000003";
    register(&engine, third, "2024-01-01T01:00").await; // follow-up 05:00
    // 24h reminder is already past; the 2h one lands at 04:15.
    engine
        .book_appointment(&booking(third, "2024-01-01T06:15"), ts("2024-01-01T01:00"))
        .await
        .unwrap();

    let report = engine.run_tick(ts("2024-01-01T05:00")).await;
    assert_eq!(report.due, 4);
    assert_eq!(report.sent, 4);
    assert_eq!(
        transport.phones(),
        vec![
            PHONE.to_string(),
            third.to_string(),
            OTHER.to_string(),
            third.to_string()
        ]
    );
}

#[tokio::test]
async fn test_tick_report_display() {
    let report = TickReport {
        due: 3,
        sent: 2,
        failed: 1,
        ..TickReport::default()
    };
    assert_eq!(
        report.to_string(),
        "due=3 sent=2 failed=1 exhausted=0 suppressed=0 stale=0 continued=0 errors=0"
    );
}
