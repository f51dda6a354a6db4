//! Dispatch worker: deliver due follow-ups and reminders.
//!
//! Each tick merges both due queues by `scheduled_time`, re-checks every
//! row right before sending, delivers through the transport under a timeout,
//! logs the attempt, and records the outcome with a guarded update. One
//! item's failure never aborts the rest of the batch.

use super::Engine;
use chrono::{DateTime, Utc};
use leadflow_core::{
    error::LeadflowError,
    message::DeliveryReport,
    model::{
        reason, AppointmentStatus, CasOutcome, FailureOutcome, FollowUp, Reminder,
        ScheduleOutcome,
    },
};
use leadflow_store::{DeliveryAttempt, ItemKind};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Counters for one dispatch pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub sent: usize,
    /// Failed attempts that stay due for a retry.
    pub failed: usize,
    /// Failed attempts that hit the bound and were deactivated.
    pub exhausted: usize,
    /// Rows deactivated by the pre-send re-check instead of being sent.
    pub suppressed: usize,
    /// Rows deactivated concurrently while their delivery was in flight.
    pub stale: usize,
    /// Follow-ups queued as the continuation of a sent one.
    pub continued: usize,
    pub errors: usize,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "due={} sent={} failed={} exhausted={} suppressed={} stale={} continued={} errors={}",
            self.due,
            self.sent,
            self.failed,
            self.exhausted,
            self.suppressed,
            self.stale,
            self.continued,
            self.errors
        )
    }
}

enum DueItem {
    FollowUp(FollowUp),
    Reminder(Reminder),
}

impl DueItem {
    fn kind(&self) -> ItemKind {
        match self {
            Self::FollowUp(_) => ItemKind::FollowUp,
            Self::Reminder(_) => ItemKind::Reminder,
        }
    }

    fn id(&self) -> &str {
        match self {
            Self::FollowUp(f) => &f.id,
            Self::Reminder(r) => &r.id,
        }
    }

    fn phone(&self) -> &str {
        match self {
            Self::FollowUp(f) => &f.customer_phone,
            Self::Reminder(r) => &r.customer_phone,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::FollowUp(f) => &f.message_content,
            Self::Reminder(r) => &r.message_content,
        }
    }

    fn scheduled_time(&self) -> DateTime<Utc> {
        match self {
            Self::FollowUp(f) => f.scheduled_time,
            Self::Reminder(r) => r.scheduled_time,
        }
    }
}

enum Recheck {
    Send,
    /// Already sent or deactivated by another actor.
    Gone,
    Deactivate(&'static str),
}

enum ItemOutcome {
    Sent { continued: bool },
    Failed(FailureOutcome),
    Suppressed,
    Stale,
}

impl Engine {
    /// Run one dispatch pass as of `now`.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let _guard = self.tick_lock.lock().await;
        let mut report = TickReport::default();

        let items = match self.collect_due(now).await {
            Ok(items) => items,
            Err(e) => {
                error!("dispatch: failed to load due items: {e}");
                report.errors += 1;
                return report;
            }
        };
        report.due = items.len();

        for item in &items {
            match self.process(item, now).await {
                Ok(ItemOutcome::Sent { continued }) => {
                    report.sent += 1;
                    if continued {
                        report.continued += 1;
                    }
                }
                Ok(ItemOutcome::Failed(FailureOutcome::WillRetry { .. })) => report.failed += 1,
                Ok(ItemOutcome::Failed(FailureOutcome::Exhausted { .. })) => report.exhausted += 1,
                Ok(ItemOutcome::Failed(FailureOutcome::Stale)) | Ok(ItemOutcome::Stale) => {
                    report.stale += 1
                }
                Ok(ItemOutcome::Suppressed) => report.suppressed += 1,
                Err(e) => {
                    error!(
                        "dispatch: {} {} failed: {e}",
                        item.kind().as_str(),
                        item.id()
                    );
                    report.errors += 1;
                }
            }
        }
        report
    }

    /// Both due queues, merged earliest first.
    async fn collect_due(&self, now: DateTime<Utc>) -> Result<Vec<DueItem>, LeadflowError> {
        let batch = self.dispatch.batch_size;
        let mut items: Vec<DueItem> = self
            .store
            .list_due_follow_ups(now, batch)
            .await?
            .into_iter()
            .map(DueItem::FollowUp)
            .collect();
        if self.reminders_enabled {
            items.extend(
                self.store
                    .list_due_reminders(now, batch)
                    .await?
                    .into_iter()
                    .map(DueItem::Reminder),
            );
        }
        // Stable: follow-ups stay ahead of reminders due at the same instant.
        items.sort_by_key(DueItem::scheduled_time);
        Ok(items)
    }

    async fn process(
        &self,
        item: &DueItem,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, LeadflowError> {
        let why = match self.recheck(item).await? {
            Recheck::Send => None,
            Recheck::Gone => {
                debug!(
                    "dispatch: {} {} no longer pending, skipped",
                    item.kind().as_str(),
                    item.id()
                );
                return Ok(ItemOutcome::Stale);
            }
            Recheck::Deactivate(why) => Some(why),
        };
        if let Some(why) = why {
            let cas = match item {
                DueItem::FollowUp(f) => self.store.deactivate_follow_up(&f.id, why, now).await?,
                DueItem::Reminder(r) => self.store.deactivate_reminder(&r.id, why, now).await?,
            };
            return Ok(match cas {
                CasOutcome::Applied => {
                    info!(
                        "dispatch: suppressed {} {} for {} ({why})",
                        item.kind().as_str(),
                        item.id(),
                        item.phone()
                    );
                    ItemOutcome::Suppressed
                }
                CasOutcome::Stale => ItemOutcome::Stale,
            });
        }

        let started = Instant::now();
        let result = self.deliver(item).await;
        let latency_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let (success, provider_status, error_text) = match &result {
            Ok(report) => (
                report.success,
                Some(report.provider_status.as_str()),
                report.error.clone(),
            ),
            Err(e) => (false, None, Some(e.to_string())),
        };
        let attempt = DeliveryAttempt {
            kind: item.kind(),
            item_id: item.id(),
            phone: item.phone(),
            transport: self.transport.name(),
            success,
            provider_status,
            error: error_text.as_deref(),
            latency_ms,
            attempted_at: now,
        };
        if let Err(e) = self.delivery_log.record(&attempt).await {
            warn!("delivery log write failed: {e}");
        }

        if !success {
            let reason_text = error_text.unwrap_or_else(|| "delivery failed".to_string());
            return self.record_failure(item, &reason_text, now).await;
        }

        match item {
            DueItem::FollowUp(f) => {
                let completion = self
                    .store
                    .complete_follow_up(&f.id, now, now, &self.policy)
                    .await?;
                if completion.cas == CasOutcome::Stale {
                    warn!(
                        "dispatch: follow-up {} to {} was cancelled while in flight",
                        f.id, f.customer_phone
                    );
                    return Ok(ItemOutcome::Stale);
                }
                info!(
                    "dispatch: sent follow-up {} #{} to {}",
                    f.follow_up_type, f.follow_up_number, f.customer_phone
                );
                let continued = matches!(completion.next, Some(ScheduleOutcome::Scheduled { .. }));
                if let Some(next) = &completion.next {
                    debug!("follow-up {} continuation: {next:?}", f.id);
                }
                Ok(ItemOutcome::Sent { continued })
            }
            DueItem::Reminder(r) => match self.store.complete_reminder(&r.id, now, now).await? {
                CasOutcome::Applied => {
                    info!(
                        "dispatch: sent {} reminder for appointment {} to {}",
                        r.reminder_type.as_str(),
                        r.appointment_id,
                        r.customer_phone
                    );
                    Ok(ItemOutcome::Sent { continued: false })
                }
                CasOutcome::Stale => {
                    warn!(
                        "dispatch: reminder {} to {} was cancelled while in flight",
                        r.id, r.customer_phone
                    );
                    Ok(ItemOutcome::Stale)
                }
            },
        }
    }

    /// Look at a listed row again right before sending it.
    async fn recheck(&self, item: &DueItem) -> Result<Recheck, LeadflowError> {
        match item {
            DueItem::FollowUp(f) => {
                let Some(current) = self.store.get_follow_up(&f.id).await? else {
                    return Err(LeadflowError::NotFound(format!("follow-up {}", f.id)));
                };
                if !current.is_active || current.is_sent {
                    return Ok(Recheck::Gone);
                }
                let Some(lead) = self.store.get_lead(&f.customer_phone).await? else {
                    return Err(LeadflowError::NotFound(format!("lead {}", f.customer_phone)));
                };
                if !lead.accepts_follow_ups() {
                    return Ok(Recheck::Deactivate(reason::LEAD_OPTED_OUT));
                }
                if lead.current_stage != f.stage_when_scheduled {
                    return Ok(Recheck::Deactivate(reason::STAGE_ADVANCED));
                }
                Ok(Recheck::Send)
            }
            DueItem::Reminder(r) => {
                let Some(current) = self.store.get_reminder(&r.id).await? else {
                    return Err(LeadflowError::NotFound(format!("reminder {}", r.id)));
                };
                if !current.is_active || current.is_sent {
                    return Ok(Recheck::Gone);
                }
                let Some(appointment) = self.store.get_appointment(&r.appointment_id).await? else {
                    return Err(LeadflowError::NotFound(format!(
                        "appointment {}",
                        r.appointment_id
                    )));
                };
                if appointment.status == AppointmentStatus::Cancelled {
                    return Ok(Recheck::Deactivate(reason::APPOINTMENT_CANCELLED));
                }
                Ok(Recheck::Send)
            }
        }
    }

    /// One transport call, bounded by `delivery_timeout_secs`.
    async fn deliver(&self, item: &DueItem) -> Result<DeliveryReport, LeadflowError> {
        let timeout = Duration::from_secs(self.dispatch.delivery_timeout_secs);
        match tokio::time::timeout(timeout, self.transport.deliver(item.phone(), item.message()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(LeadflowError::Transport(format!(
                "delivery timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn record_failure(
        &self,
        item: &DueItem,
        error_text: &str,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, LeadflowError> {
        let max = self.dispatch.max_attempts;
        let outcome = match item {
            DueItem::FollowUp(f) => self.store.fail_follow_up(&f.id, error_text, max, now).await?,
            DueItem::Reminder(r) => self.store.fail_reminder(&r.id, error_text, max, now).await?,
        };
        match outcome {
            FailureOutcome::WillRetry { attempts } => warn!(
                "dispatch: {} {} to {} failed (attempt {attempts}/{max}): {error_text}",
                item.kind().as_str(),
                item.id(),
                item.phone()
            ),
            FailureOutcome::Exhausted { attempts } => error!(
                "dispatch: {} {} to {} exhausted after {attempts} attempts: {error_text}",
                item.kind().as_str(),
                item.id(),
                item.phone()
            ),
            FailureOutcome::Stale => debug!(
                "dispatch: {} {} failed but was already deactivated",
                item.kind().as_str(),
                item.id()
            ),
        }
        Ok(ItemOutcome::Failed(outcome))
    }
}
