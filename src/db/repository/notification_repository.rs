use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{
    CreateNotification, Notification, NotificationCategory, NotificationChannel,
    NotificationStatus,
};
use crate::error::{AppError, AppResult};

/// Repository for the notification record store.
///
/// Implementation notes:
/// - The retry sweep claims rows with an atomic single-statement
///   `UPDATE ... WHERE id = (SELECT id ... LIMIT 1) RETURNING ...` so two
///   concurrent sweeps can never consume the same retry attempt. The claim
///   itself increments `retry_count`, which is what makes repeated failures
///   converge on budget exhaustion.
/// - Status transitions out of the sendable states are conditional updates
///   (`WHERE status IN ('pending', 'scheduled')`); the affected-row count
///   tells the caller whether it won the transition.
pub struct NotificationRepository;

impl NotificationRepository {
    /// Insert a new notification row.
    ///
    /// `status` is derived from `scheduled_at` (`scheduled` when present,
    /// `pending` otherwise) and `priority` from the category. `max_retries`
    /// defaults to 3 when the caller does not override it.
    pub async fn create(
        pool: &SqlitePool,
        input: CreateNotification,
    ) -> AppResult<Notification> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let status = if input.scheduled_at.is_some() {
            NotificationStatus::Scheduled
        } else {
            NotificationStatus::Pending
        };
        let priority = input.category.priority();
        let max_retries = input.max_retries.unwrap_or(3);
        let (source_kind, source_id) = match input.source {
            Some(source) => (Some(source.kind), Some(source.id)),
            None => (None, None),
        };

        let row = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (
                id, company_id, channel, category, priority, status,
                recipient_kind, recipient_id, recipient_email, recipient_phone,
                subject, message, data, source_kind, source_id,
                scheduled_at, sent_at, retry_count, max_retries, next_retry_at,
                failure_reason, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING
                id, company_id, channel, category, priority, status,
                recipient_kind, recipient_id, recipient_email, recipient_phone,
                subject, message, data, source_kind, source_id,
                scheduled_at, sent_at, retry_count, max_retries, next_retry_at,
                failure_reason, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(input.company_id)
        .bind(input.channel)
        .bind(input.category)
        .bind(priority)
        .bind(status)
        .bind(input.recipient_kind)
        .bind(input.recipient_id)
        .bind(input.recipient_email)
        .bind(input.recipient_phone)
        .bind(input.subject)
        .bind(input.message)
        .bind(input.data)
        .bind(source_kind)
        .bind(source_id)
        .bind(input.scheduled_at)
        .bind::<Option<NaiveDateTime>>(None) // sent_at
        .bind(0i32) // retry_count
        .bind(max_retries)
        .bind::<Option<NaiveDateTime>>(None) // next_retry_at
        .bind::<Option<String>>(None) // failure_reason
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Fetch a notification by id.
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>(
            r#"
            SELECT
                id, company_id, channel, category, priority, status,
                recipient_kind, recipient_id, recipient_email, recipient_phone,
                subject, message, data, source_kind, source_id,
                scheduled_at, sent_at, retry_count, max_retries, next_retry_at,
                failure_reason, created_at, updated_at
            FROM notifications
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Select up to `limit` notifications that are due for delivery: pending
    /// or scheduled, with no schedule or one that has passed.
    ///
    /// Ordering is deterministic: category priority first (lower number =
    /// more urgent), then the effective due time, then id as the final
    /// tie-breaker.
    pub async fn find_due(pool: &SqlitePool, limit: i64) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            r#"
            SELECT
                id, company_id, channel, category, priority, status,
                recipient_kind, recipient_id, recipient_email, recipient_phone,
                subject, message, data, source_kind, source_id,
                scheduled_at, sent_at, retry_count, max_retries, next_retry_at,
                failure_reason, created_at, updated_at
            FROM notifications
            WHERE status IN ('pending', 'scheduled')
              AND (scheduled_at IS NULL OR scheduled_at <= CURRENT_TIMESTAMP)
            ORDER BY priority ASC, COALESCE(scheduled_at, created_at) ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Claim up to `limit` failed notifications for a retry attempt.
    ///
    /// Each claim is a single atomic statement that flips `failed` back to
    /// `pending` and consumes one unit of retry budget. Rows past their
    /// budget or still inside their backoff window are never selected, so
    /// the 4th sweep after three failed retries finds nothing.
    pub async fn claim_failed_for_retry(
        pool: &SqlitePool,
        limit: i64,
    ) -> AppResult<Vec<Notification>> {
        let mut claimed: Vec<Notification> = Vec::new();
        if limit <= 0 {
            return Ok(claimed);
        }

        for _ in 0..(limit as usize) {
            let now = Utc::now().naive_utc();

            let opt = sqlx::query_as::<_, Notification>(
                r#"
                UPDATE notifications
                SET status = 'pending', retry_count = retry_count + 1, updated_at = ?
                WHERE id = (
                    SELECT id FROM notifications
                    WHERE status = 'failed'
                      AND retry_count < max_retries
                      AND (next_retry_at IS NULL OR next_retry_at <= CURRENT_TIMESTAMP)
                    ORDER BY priority ASC, id ASC
                    LIMIT 1
                )
                RETURNING
                    id, company_id, channel, category, priority, status,
                    recipient_kind, recipient_id, recipient_email, recipient_phone,
                    subject, message, data, source_kind, source_id,
                    scheduled_at, sent_at, retry_count, max_retries, next_retry_at,
                    failure_reason, created_at, updated_at
                "#,
            )
            .bind(now)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

            if let Some(notification) = opt {
                claimed.push(notification);
            } else {
                break;
            }
        }

        Ok(claimed)
    }

    /// Transition a sendable notification to `sent`, stamping `sent_at`.
    ///
    /// Returns `false` when the row was no longer pending/scheduled (already
    /// sent by a concurrent worker, cancelled, ...), in which case nothing
    /// was written.
    pub async fn mark_sent(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'sent', sent_at = ?, failure_reason = NULL, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'scheduled')
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition a sendable notification to `failed`, recording the reason.
    pub async fn mark_failed(pool: &SqlitePool, id: &str, reason: &str) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'failed', failure_reason = ?, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'scheduled')
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    /// Like [`Self::mark_failed`], but also exhausts the retry budget so the
    /// retry sweep never picks the row up. Used for failures that retrying
    /// cannot fix (recipient opted out).
    pub async fn mark_failed_terminal(
        pool: &SqlitePool,
        id: &str,
        reason: &str,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'failed', failure_reason = ?, retry_count = max_retries, updated_at = ?
            WHERE id = ? AND status IN ('pending', 'scheduled')
            "#,
        )
        .bind(reason)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    /// Set the backoff window after a failed retry. A no-op unless the row
    /// is still `failed` (it may have been sent by a racing worker since).
    pub async fn schedule_retry(
        pool: &SqlitePool,
        id: &str,
        next_retry_at: NaiveDateTime,
    ) -> AppResult<bool> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET next_retry_at = ?, updated_at = ?
            WHERE id = ? AND status = 'failed'
            "#,
        )
        .bind(next_retry_at)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    /// Find notifications for a tenant with optional filters and pagination.
    pub async fn find_by_company_with_filters(
        pool: &SqlitePool,
        company_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
        channel: Option<NotificationChannel>,
        category: Option<NotificationCategory>,
        status: Option<NotificationStatus>,
    ) -> AppResult<Vec<Notification>> {
        let limit_val = limit.unwrap_or(100);
        let offset_val = offset.unwrap_or(0);

        let rows = sqlx::query_as::<_, Notification>(
            r#"
            SELECT
                id, company_id, channel, category, priority, status,
                recipient_kind, recipient_id, recipient_email, recipient_phone,
                subject, message, data, source_kind, source_id,
                scheduled_at, sent_at, retry_count, max_retries, next_retry_at,
                failure_reason, created_at, updated_at
            FROM notifications
            WHERE company_id = ?
              AND (? IS NULL OR channel = ?)
              AND (? IS NULL OR category = ?)
              AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC
            LIMIT ?
            OFFSET ?
            "#,
        )
        .bind(company_id)
        .bind(channel)
        .bind(channel)
        .bind(category)
        .bind(category)
        .bind(status)
        .bind(status)
        .bind(limit_val)
        .bind(offset_val)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Count notifications for a tenant with optional filters.
    pub async fn count_by_company_with_filters(
        pool: &SqlitePool,
        company_id: &str,
        channel: Option<NotificationChannel>,
        category: Option<NotificationCategory>,
        status: Option<NotificationStatus>,
    ) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE company_id = ?
              AND (? IS NULL OR channel = ?)
              AND (? IS NULL OR category = ?)
              AND (? IS NULL OR status = ?)
            "#,
        )
        .bind(company_id)
        .bind(channel)
        .bind(channel)
        .bind(category)
        .bind(category)
        .bind(status)
        .bind(status)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count)
    }

    /// Count notifications for a tenant in a specific status.
    pub async fn count_by_company_and_status(
        pool: &SqlitePool,
        company_id: &str,
        status: NotificationStatus,
    ) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE company_id = ? AND status = ?",
        )
        .bind(company_id)
        .bind(status)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count)
    }

    /// Counts grouped by category for a tenant.
    pub async fn counts_by_category(
        pool: &SqlitePool,
        company_id: &str,
    ) -> AppResult<HashMap<String, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT category, COUNT(*)
            FROM notifications
            WHERE company_id = ?
            GROUP BY category
            "#,
        )
        .bind(company_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows.into_iter().collect())
    }

    /// Counts grouped by channel for a tenant.
    pub async fn counts_by_channel(
        pool: &SqlitePool,
        company_id: &str,
    ) -> AppResult<HashMap<String, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT channel, COUNT(*)
            FROM notifications
            WHERE company_id = ?
            GROUP BY channel
            "#,
        )
        .bind(company_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows.into_iter().collect())
    }

    /// Delete the undelivered notifications spawned by a business entity,
    /// typically because that entity was removed. Sent history is preserved.
    pub async fn purge_pending_for_source(
        pool: &SqlitePool,
        company_id: &str,
        source_kind: &str,
        source_id: &str,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM notifications
            WHERE company_id = ?
              AND source_kind = ?
              AND source_id = ?
              AND status IN ('pending', 'scheduled', 'failed')
            "#,
        )
        .bind(company_id)
        .bind(source_kind)
        .bind(source_id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{RecipientKind, SourceRef};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn make_input(
        channel: NotificationChannel,
        category: NotificationCategory,
    ) -> CreateNotification {
        CreateNotification {
            company_id: "co-1".to_string(),
            channel,
            category,
            recipient_kind: RecipientKind::Customer,
            recipient_id: "c-1".to_string(),
            recipient_email: Some("customer@example.com".to_string()),
            recipient_phone: Some("+15551234567".to_string()),
            subject: "subject".to_string(),
            message: "body".to_string(),
            data: "{}".to_string(),
            source: None,
            scheduled_at: None,
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn create_derives_status_and_priority() {
        let pool = test_pool().await;

        let pending = NotificationRepository::create(
            &pool,
            make_input(NotificationChannel::Email, NotificationCategory::Emergency),
        )
        .await
        .unwrap();
        assert_eq!(pending.status, NotificationStatus::Pending);
        assert_eq!(pending.priority, 1);
        assert_eq!(pending.retry_count, 0);
        assert_eq!(pending.max_retries, 3);

        let mut input = make_input(NotificationChannel::Email, NotificationCategory::Marketing);
        input.scheduled_at = Some(Utc::now().naive_utc() + chrono::Duration::hours(2));
        let scheduled = NotificationRepository::create(&pool, input).await.unwrap();
        assert_eq!(scheduled.status, NotificationStatus::Scheduled);
        assert_eq!(scheduled.priority, 10);
    }

    #[tokio::test]
    async fn find_due_orders_by_priority_then_id() {
        let pool = test_pool().await;

        let marketing = NotificationRepository::create(
            &pool,
            make_input(NotificationChannel::InApp, NotificationCategory::Marketing),
        )
        .await
        .unwrap();
        let emergency = NotificationRepository::create(
            &pool,
            make_input(NotificationChannel::InApp, NotificationCategory::Emergency),
        )
        .await
        .unwrap();
        let invoice = NotificationRepository::create(
            &pool,
            make_input(NotificationChannel::InApp, NotificationCategory::Invoice),
        )
        .await
        .unwrap();

        let due = NotificationRepository::find_due(&pool, 10).await.unwrap();
        let ids: Vec<String> = due.into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![emergency.id, invoice.id, marketing.id]);
    }

    #[tokio::test]
    async fn find_due_skips_future_schedules() {
        let pool = test_pool().await;

        let mut input = make_input(NotificationChannel::Email, NotificationCategory::Invoice);
        input.scheduled_at = Some(Utc::now().naive_utc() + chrono::Duration::hours(1));
        NotificationRepository::create(&pool, input).await.unwrap();

        let due = NotificationRepository::find_due(&pool, 10).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn claim_consumes_budget_and_flips_status() {
        let pool = test_pool().await;

        let n = NotificationRepository::create(
            &pool,
            make_input(NotificationChannel::Email, NotificationCategory::Invoice),
        )
        .await
        .unwrap();
        NotificationRepository::mark_failed(&pool, &n.id, "smtp unreachable")
            .await
            .unwrap();

        let claimed = NotificationRepository::claim_failed_for_retry(&pool, 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, NotificationStatus::Pending);
        assert_eq!(claimed[0].retry_count, 1);

        // The row is pending now, so a second pass has nothing to claim.
        let again = NotificationRepository::claim_failed_for_retry(&pool, 10)
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn claim_respects_exhausted_budget() {
        let pool = test_pool().await;

        let n = NotificationRepository::create(
            &pool,
            make_input(NotificationChannel::Email, NotificationCategory::Invoice),
        )
        .await
        .unwrap();
        NotificationRepository::mark_failed_terminal(&pool, &n.id, "recipient opted out")
            .await
            .unwrap();

        let claimed = NotificationRepository::claim_failed_for_retry(&pool, 10)
            .await
            .unwrap();
        assert!(claimed.is_empty());

        let row = NotificationRepository::find_by_id(&pool, &n.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, NotificationStatus::Failed);
        assert_eq!(row.retry_count, row.max_retries);
    }

    #[tokio::test]
    async fn claim_respects_backoff_window() {
        let pool = test_pool().await;

        let n = NotificationRepository::create(
            &pool,
            make_input(NotificationChannel::Email, NotificationCategory::Invoice),
        )
        .await
        .unwrap();
        NotificationRepository::mark_failed(&pool, &n.id, "timeout").await.unwrap();
        let future = Utc::now().naive_utc() + chrono::Duration::minutes(10);
        NotificationRepository::schedule_retry(&pool, &n.id, future)
            .await
            .unwrap();

        let claimed = NotificationRepository::claim_failed_for_retry(&pool, 10)
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn mark_sent_claims_the_transition_exactly_once() {
        let pool = test_pool().await;

        let n = NotificationRepository::create(
            &pool,
            make_input(NotificationChannel::Email, NotificationCategory::Invoice),
        )
        .await
        .unwrap();

        assert!(NotificationRepository::mark_sent(&pool, &n.id).await.unwrap());
        assert!(!NotificationRepository::mark_sent(&pool, &n.id).await.unwrap());

        let row = NotificationRepository::find_by_id(&pool, &n.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, NotificationStatus::Sent);
        assert!(row.sent_at.is_some());
    }

    #[tokio::test]
    async fn purge_removes_undelivered_but_keeps_sent_history() {
        let pool = test_pool().await;
        let source = SourceRef {
            kind: "invoice".to_string(),
            id: "inv-9".to_string(),
        };

        let mut pending = make_input(NotificationChannel::Email, NotificationCategory::Invoice);
        pending.source = Some(source.clone());
        let pending = NotificationRepository::create(&pool, pending).await.unwrap();

        let mut sent = make_input(NotificationChannel::Email, NotificationCategory::Invoice);
        sent.source = Some(source.clone());
        let sent = NotificationRepository::create(&pool, sent).await.unwrap();
        NotificationRepository::mark_sent(&pool, &sent.id).await.unwrap();

        let purged =
            NotificationRepository::purge_pending_for_source(&pool, "co-1", "invoice", "inv-9")
                .await
                .unwrap();
        assert_eq!(purged, 1);

        assert!(NotificationRepository::find_by_id(&pool, &pending.id)
            .await
            .unwrap()
            .is_none());
        assert!(NotificationRepository::find_by_id(&pool, &sent.id)
            .await
            .unwrap()
            .is_some());
    }
}
