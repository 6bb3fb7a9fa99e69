use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{
    NotificationCategory, NotificationChannel, NotificationPreference, RecipientKind,
    SetNotificationPreference,
};
use crate::error::{AppError, AppResult};

pub struct NotificationPreferenceRepository;

impl NotificationPreferenceRepository {
    /// Whether a recipient accepts notifications of this category over this
    /// channel. No stored row means opted in; a channel-specific row takes
    /// precedence over a category-wide one (`channel IS NULL`).
    pub async fn is_enabled(
        pool: &SqlitePool,
        company_id: &str,
        recipient_kind: RecipientKind,
        recipient_id: &str,
        category: NotificationCategory,
        channel: NotificationChannel,
    ) -> AppResult<bool> {
        let enabled = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT enabled FROM notification_preferences
            WHERE company_id = ?
              AND recipient_kind = ?
              AND recipient_id = ?
              AND category = ?
              AND (channel IS NULL OR channel = ?)
            ORDER BY channel IS NULL
            LIMIT 1
            "#,
        )
        .bind(company_id)
        .bind(recipient_kind)
        .bind(recipient_id)
        .bind(category)
        .bind(channel)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(enabled.unwrap_or(true))
    }

    /// Create or update a preference row for the given scope.
    pub async fn set(
        pool: &SqlitePool,
        pref: SetNotificationPreference,
    ) -> AppResult<NotificationPreference> {
        let now = Utc::now().naive_utc();

        let existing = sqlx::query_scalar::<_, String>(
            r#"
            SELECT id FROM notification_preferences
            WHERE company_id = ?
              AND recipient_kind = ?
              AND recipient_id = ?
              AND category = ?
              AND ((? IS NULL AND channel IS NULL) OR channel = ?)
            "#,
        )
        .bind(&pref.company_id)
        .bind(pref.recipient_kind)
        .bind(&pref.recipient_id)
        .bind(pref.category)
        .bind(pref.channel)
        .bind(pref.channel)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        let row = if let Some(id) = existing {
            sqlx::query_as::<_, NotificationPreference>(
                r#"
                UPDATE notification_preferences
                SET enabled = ?, updated_at = ?
                WHERE id = ?
                RETURNING
                    id, company_id, recipient_kind, recipient_id, category, channel,
                    enabled, created_at, updated_at
                "#,
            )
            .bind(pref.enabled)
            .bind(now)
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?
        } else {
            let id = Uuid::new_v4().to_string();
            sqlx::query_as::<_, NotificationPreference>(
                r#"
                INSERT INTO notification_preferences (
                    id, company_id, recipient_kind, recipient_id, category, channel,
                    enabled, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING
                    id, company_id, recipient_kind, recipient_id, category, channel,
                    enabled, created_at, updated_at
                "#,
            )
            .bind(id)
            .bind(pref.company_id)
            .bind(pref.recipient_kind)
            .bind(pref.recipient_id)
            .bind(pref.category)
            .bind(pref.channel)
            .bind(pref.enabled)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?
        };

        Ok(row)
    }

    /// All preference rows stored for one recipient.
    pub async fn list_for_recipient(
        pool: &SqlitePool,
        company_id: &str,
        recipient_kind: RecipientKind,
        recipient_id: &str,
    ) -> AppResult<Vec<NotificationPreference>> {
        let rows = sqlx::query_as::<_, NotificationPreference>(
            r#"
            SELECT
                id, company_id, recipient_kind, recipient_id, category, channel,
                enabled, created_at, updated_at
            FROM notification_preferences
            WHERE company_id = ? AND recipient_kind = ? AND recipient_id = ?
            ORDER BY category, channel
            "#,
        )
        .bind(company_id)
        .bind(recipient_kind)
        .bind(recipient_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn opt_out(
        category: NotificationCategory,
        channel: Option<NotificationChannel>,
    ) -> SetNotificationPreference {
        SetNotificationPreference {
            company_id: "co-1".to_string(),
            recipient_kind: RecipientKind::Customer,
            recipient_id: "c-1".to_string(),
            category,
            channel,
            enabled: false,
        }
    }

    #[tokio::test]
    async fn missing_row_means_enabled() {
        let pool = test_pool().await;
        let enabled = NotificationPreferenceRepository::is_enabled(
            &pool,
            "co-1",
            RecipientKind::Customer,
            "c-1",
            NotificationCategory::Marketing,
            NotificationChannel::Email,
        )
        .await
        .unwrap();
        assert!(enabled);
    }

    #[tokio::test]
    async fn category_wide_opt_out_covers_all_channels() {
        let pool = test_pool().await;
        NotificationPreferenceRepository::set(&pool, opt_out(NotificationCategory::Marketing, None))
            .await
            .unwrap();

        for channel in [NotificationChannel::Email, NotificationChannel::Sms] {
            let enabled = NotificationPreferenceRepository::is_enabled(
                &pool,
                "co-1",
                RecipientKind::Customer,
                "c-1",
                NotificationCategory::Marketing,
                channel,
            )
            .await
            .unwrap();
            assert!(!enabled, "{} should be opted out", channel);
        }
    }

    #[tokio::test]
    async fn channel_specific_row_overrides_category_row() {
        let pool = test_pool().await;
        // Category disabled as a whole, but email explicitly re-enabled.
        NotificationPreferenceRepository::set(&pool, opt_out(NotificationCategory::Invoice, None))
            .await
            .unwrap();
        let mut email_on = opt_out(NotificationCategory::Invoice, Some(NotificationChannel::Email));
        email_on.enabled = true;
        NotificationPreferenceRepository::set(&pool, email_on).await.unwrap();

        let email = NotificationPreferenceRepository::is_enabled(
            &pool,
            "co-1",
            RecipientKind::Customer,
            "c-1",
            NotificationCategory::Invoice,
            NotificationChannel::Email,
        )
        .await
        .unwrap();
        let sms = NotificationPreferenceRepository::is_enabled(
            &pool,
            "co-1",
            RecipientKind::Customer,
            "c-1",
            NotificationCategory::Invoice,
            NotificationChannel::Sms,
        )
        .await
        .unwrap();
        assert!(email);
        assert!(!sms);
    }

    #[tokio::test]
    async fn set_updates_existing_row_in_place() {
        let pool = test_pool().await;
        NotificationPreferenceRepository::set(&pool, opt_out(NotificationCategory::Pickup, None))
            .await
            .unwrap();
        let mut back_on = opt_out(NotificationCategory::Pickup, None);
        back_on.enabled = true;
        NotificationPreferenceRepository::set(&pool, back_on).await.unwrap();

        let rows = NotificationPreferenceRepository::list_for_recipient(
            &pool,
            "co-1",
            RecipientKind::Customer,
            "c-1",
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].enabled);
    }
}
