use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;

use crate::config::{Config, SweepConfig};
use crate::db::models::{
    CreateNotification, Notification, NotificationCategory, NotificationChannel, Recipient,
    SourceRef,
};
use crate::db::repository::{
    NotificationPreferenceRepository, NotificationRepository, TemplateRepository,
};
use crate::error::{AppError, AppResult};
use crate::services::email::EmailService;
use crate::services::push::PushService;
use crate::services::sms::SmsService;
use crate::services::template;

/// Failure reason stamped on opted-out sends. The retry budget is exhausted
/// alongside it, so the retry sweep treats these rows as terminal.
const OPT_OUT_REASON: &str = "recipient has disabled this type of notification";

/// Capability shared by every delivery backend.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> AppResult<()>;
}

/// Content and routing for a new notification. The recipient is passed
/// separately so contact details and tenant scope are always taken from the
/// entity itself, never from ambient state.
#[derive(Debug, Clone)]
pub struct NotificationDraft {
    pub channel: NotificationChannel,
    pub category: NotificationCategory,
    pub subject: String,
    pub message: String,
    pub data: Value,
    pub source: Option<SourceRef>,
    pub scheduled_at: Option<NaiveDateTime>,
}

/// Per-recipient outcome partition of a bulk send.
#[derive(Debug, Serialize)]
pub struct BulkSendReport {
    pub sent: Vec<BulkRecipientOutcome>,
    pub failed: Vec<BulkRecipientFailure>,
}

#[derive(Debug, Serialize)]
pub struct BulkRecipientOutcome {
    pub recipient_id: String,
    pub notification_id: String,
}

#[derive(Debug, Serialize)]
pub struct BulkRecipientFailure {
    pub recipient_id: String,
    pub notification_id: Option<String>,
    pub reason: String,
}

/// Single entry point for creating and delivering notifications, plus the
/// two sweep drivers that advance records no inline call could.
///
/// Delivery outcomes are always written back to the record store: a sender
/// error becomes a `failed` row with a reason, never an error surfaced to
/// the caller of [`NotificationService::send`]. Only infrastructure
/// failures (the database itself) propagate.
pub struct NotificationService {
    pool: SqlitePool,
    email: Option<EmailService>,
    sms: SmsService,
    push: PushService,
    sweep: SweepConfig,
}

impl NotificationService {
    pub fn new(
        pool: SqlitePool,
        email: Option<EmailService>,
        sms: SmsService,
        push: PushService,
        sweep: SweepConfig,
    ) -> Self {
        Self {
            pool,
            email,
            sms,
            push,
            sweep,
        }
    }

    /// Wire up every channel sender from configuration.
    pub fn from_config(pool: SqlitePool, config: &Config) -> AppResult<Self> {
        let email = EmailService::from_config(&config.email)?;
        if email.is_none() {
            tracing::warn!("SMTP_HOST not set; email notifications will fail until it is configured");
        }
        let sms = SmsService::from_config(&config.sms)?;

        Ok(Self::new(pool, email, sms, PushService, config.sweep.clone()))
    }

    /// Persist a new notification for `recipient`. Contact details and the
    /// owning company are denormalized onto the row here; no delivery is
    /// attempted.
    pub async fn create_notification(
        &self,
        recipient: &Recipient,
        draft: NotificationDraft,
    ) -> AppResult<Notification> {
        let data = serde_json::to_string(&draft.data).unwrap_or_else(|_| "{}".to_string());

        let input = CreateNotification {
            company_id: recipient.company_id().to_string(),
            channel: draft.channel,
            category: draft.category,
            recipient_kind: recipient.kind(),
            recipient_id: recipient.id().to_string(),
            recipient_email: recipient.contact_email().map(str::to_string),
            recipient_phone: recipient.contact_phone().map(str::to_string),
            subject: draft.subject,
            message: draft.message,
            data,
            source: draft.source,
            scheduled_at: draft.scheduled_at,
            max_retries: Some(self.sweep.max_retries as i32),
        };

        let notification = NotificationRepository::create(&self.pool, input).await?;
        tracing::debug!(
            "Created notification {} ({}/{} for {} {})",
            notification.id,
            notification.channel,
            notification.category,
            notification.recipient_kind,
            notification.recipient_id
        );
        Ok(notification)
    }

    /// Render an active template and send (or schedule) the result.
    ///
    /// A missing or inactive slug is a configuration gap, not a runtime
    /// error: it logs a warning and returns `Ok(None)`, and callers must
    /// treat that as a no-op.
    pub async fn send_from_template(
        &self,
        slug: &str,
        recipient: &Recipient,
        data: Value,
        channel: Option<NotificationChannel>,
        scheduled_at: Option<NaiveDateTime>,
        source: Option<SourceRef>,
    ) -> AppResult<Option<Notification>> {
        let template = match TemplateRepository::find_active_by_slug(&self.pool, slug).await? {
            Some(template) => template,
            None => {
                tracing::warn!("Notification template '{}' not found or inactive; skipping", slug);
                return Ok(None);
            }
        };

        let (subject, message) = template::render_template(&template, &data);
        let draft = NotificationDraft {
            channel: channel.unwrap_or(template.channel),
            category: template.category,
            subject,
            message,
            data,
            source,
            scheduled_at,
        };
        let notification = self.create_notification(recipient, draft).await?;

        if scheduled_at.is_none() {
            self.send(&notification).await?;
            // Hand back the post-send row, not the pending snapshot.
            let refreshed = NotificationRepository::find_by_id(&self.pool, &notification.id).await?;
            return Ok(Some(refreshed.unwrap_or(notification)));
        }

        Ok(Some(notification))
    }

    /// Attempt delivery of one notification. Returns `Ok(true)` only when a
    /// channel sender accepted the message and this call won the transition
    /// to `sent`.
    ///
    /// Sender failures are captured on the row (`failed` plus a reason) and
    /// reported as `Ok(false)`; they never propagate. The retry budget is
    /// untouched here, the retry sweep owns it.
    pub async fn send(&self, notification: &Notification) -> AppResult<bool> {
        // Work from the stored row, not the caller's copy: under
        // at-least-once delivery a stale caller must not bypass the guard.
        let fresh = match NotificationRepository::find_by_id(&self.pool, &notification.id).await? {
            Some(row) => row,
            None => {
                tracing::debug!("Notification {} no longer exists; skipping send", notification.id);
                return Ok(false);
            }
        };

        let now = Utc::now().naive_utc();
        if !fresh.should_send_now(now) {
            tracing::debug!(
                "Skipping notification {}: status={}, scheduled_at={:?}",
                fresh.id,
                fresh.status,
                fresh.scheduled_at
            );
            return Ok(false);
        }

        let enabled = NotificationPreferenceRepository::is_enabled(
            &self.pool,
            &fresh.company_id,
            fresh.recipient_kind,
            &fresh.recipient_id,
            fresh.category,
            fresh.channel,
        )
        .await?;
        if !enabled {
            NotificationRepository::mark_failed_terminal(&self.pool, &fresh.id, OPT_OUT_REASON)
                .await?;
            tracing::info!(
                "Notification {} suppressed: {} {} opted out of {}/{}",
                fresh.id,
                fresh.recipient_kind,
                fresh.recipient_id,
                fresh.category,
                fresh.channel
            );
            return Ok(false);
        }

        let outcome = match fresh.channel {
            // The persisted row is the in-app delivery artifact.
            NotificationChannel::InApp => Ok(()),
            NotificationChannel::Email => match &self.email {
                Some(email) => email.deliver(&fresh).await,
                None => Err(AppError::ServiceUnavailable(
                    "email transport not configured".to_string(),
                )),
            },
            NotificationChannel::Sms => self.sms.deliver(&fresh).await,
            NotificationChannel::Push => self.push.deliver(&fresh).await,
        };

        match outcome {
            Ok(()) => {
                let claimed = NotificationRepository::mark_sent(&self.pool, &fresh.id).await?;
                if claimed {
                    tracing::info!("Notification {} sent via {}", fresh.id, fresh.channel);
                } else {
                    tracing::debug!(
                        "Notification {} was finalized by another worker; not recording this send",
                        fresh.id
                    );
                }
                Ok(claimed)
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!("Notification {} failed on {}: {}", fresh.id, fresh.channel, reason);
                NotificationRepository::mark_failed(&self.pool, &fresh.id, &reason).await?;
                Ok(false)
            }
        }
    }

    /// Create-and-send the same content for many recipients at once.
    ///
    /// Every recipient is processed independently: one bad contact or one
    /// transport failure is recorded against that recipient alone and the
    /// rest of the batch proceeds.
    pub async fn send_bulk(
        &self,
        recipients: &[Recipient],
        channel: NotificationChannel,
        category: NotificationCategory,
        subject: &str,
        message: &str,
    ) -> BulkSendReport {
        let sends = recipients
            .iter()
            .map(|recipient| self.send_bulk_one(recipient, channel, category, subject, message));
        let outcomes = join_all(sends).await;

        let mut report = BulkSendReport {
            sent: Vec::new(),
            failed: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                Ok(sent) => report.sent.push(sent),
                Err(failure) => report.failed.push(failure),
            }
        }

        if !report.failed.is_empty() {
            tracing::warn!(
                "Bulk send: {} delivered, {} failed",
                report.sent.len(),
                report.failed.len()
            );
        }
        report
    }

    async fn send_bulk_one(
        &self,
        recipient: &Recipient,
        channel: NotificationChannel,
        category: NotificationCategory,
        subject: &str,
        message: &str,
    ) -> Result<BulkRecipientOutcome, BulkRecipientFailure> {
        let draft = NotificationDraft {
            channel,
            category,
            subject: subject.to_string(),
            message: message.to_string(),
            data: serde_json::json!({}),
            source: None,
            scheduled_at: None,
        };

        let notification = match self.create_notification(recipient, draft).await {
            Ok(notification) => notification,
            Err(e) => {
                return Err(BulkRecipientFailure {
                    recipient_id: recipient.id().to_string(),
                    notification_id: None,
                    reason: e.to_string(),
                })
            }
        };

        match self.send(&notification).await {
            Ok(true) => Ok(BulkRecipientOutcome {
                recipient_id: recipient.id().to_string(),
                notification_id: notification.id,
            }),
            Ok(false) => {
                // The reason was recorded on the row by `send`.
                let reason = NotificationRepository::find_by_id(&self.pool, &notification.id)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|row| row.failure_reason)
                    .unwrap_or_else(|| "delivery failed".to_string());
                Err(BulkRecipientFailure {
                    recipient_id: recipient.id().to_string(),
                    notification_id: Some(notification.id),
                    reason,
                })
            }
            Err(e) => Err(BulkRecipientFailure {
                recipient_id: recipient.id().to_string(),
                notification_id: Some(notification.id),
                reason: e.to_string(),
            }),
        }
    }

    /// Sweep over due notifications (pending, or scheduled with a passed
    /// schedule) and attempt each in priority order. Returns how many were
    /// actually sent. Individual failures never abort the sweep.
    pub async fn process_scheduled_notifications(&self) -> AppResult<u64> {
        let due =
            NotificationRepository::find_due(&self.pool, i64::from(self.sweep.batch_size)).await?;
        if due.is_empty() {
            return Ok(0);
        }
        tracing::debug!("Scheduled sweep picked up {} due notification(s)", due.len());

        let mut sent = 0u64;
        for notification in due {
            match self.send(&notification).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        "Scheduled sweep failed on notification {}: {:?}",
                        notification.id,
                        e
                    );
                }
            }
        }
        Ok(sent)
    }

    /// Claim failed notifications still inside their retry budget and
    /// re-attempt them. Each claim atomically consumes one retry, so
    /// repeated failures converge on budget exhaustion; a failed retry
    /// pushes the next claim out by an exponential backoff window.
    /// Returns how many retries actually went out.
    pub async fn retry_failed_notifications(&self) -> AppResult<u64> {
        let claimed = NotificationRepository::claim_failed_for_retry(
            &self.pool,
            i64::from(self.sweep.batch_size),
        )
        .await?;
        if claimed.is_empty() {
            return Ok(0);
        }
        tracing::debug!("Retry sweep claimed {} failed notification(s)", claimed.len());

        let mut recovered = 0u64;
        for notification in claimed {
            let succeeded = match self.send(&notification).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(
                        "Retry sweep failed on notification {}: {:?}",
                        notification.id,
                        e
                    );
                    false
                }
            };

            if succeeded {
                recovered += 1;
                continue;
            }

            // Still failed. The claim already consumed the retry, so only
            // the backoff window needs recording here.
            let delay = retry_backoff(&self.sweep, notification.retry_count);
            let next = Utc::now().naive_utc() + chrono::Duration::seconds(delay as i64);
            if let Err(e) =
                NotificationRepository::schedule_retry(&self.pool, &notification.id, next).await
            {
                tracing::warn!(
                    "Failed to schedule backoff for notification {}: {:?}",
                    notification.id,
                    e
                );
            }
        }
        Ok(recovered)
    }
}

/// Seconds until the next retry claim is allowed: the initial backoff
/// doubles for every retry already consumed, capped at the configured
/// maximum.
fn retry_backoff(sweep: &SweepConfig, retries_done: i32) -> u64 {
    let mut delay = sweep.initial_backoff_seconds;
    let doublings = retries_done.saturating_sub(1).max(0) as u32;
    for _ in 0..doublings {
        delay = delay.saturating_mul(2);
        if delay >= sweep.max_backoff_seconds {
            return sweep.max_backoff_seconds;
        }
    }
    delay.min(sweep.max_backoff_seconds)
}
