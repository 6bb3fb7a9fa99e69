use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateNotificationTemplate, NotificationTemplate};
use crate::error::{AppError, AppResult};

pub struct TemplateRepository;

impl TemplateRepository {
    pub async fn create(
        pool: &SqlitePool,
        template: CreateNotificationTemplate,
    ) -> AppResult<NotificationTemplate> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, NotificationTemplate>(
            r#"
            INSERT INTO notification_templates (
                id, slug, channel, category, subject, body, active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING
                id, slug, channel, category, subject, body, active, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(template.slug)
        .bind(template.channel)
        .bind(template.category)
        .bind(template.subject)
        .bind(template.body)
        .bind(template.active)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Look up a template by slug, ignoring inactive ones. The send path
    /// treats an absent template as a configuration gap, not an error.
    pub async fn find_active_by_slug(
        pool: &SqlitePool,
        slug: &str,
    ) -> AppResult<Option<NotificationTemplate>> {
        let row = sqlx::query_as::<_, NotificationTemplate>(
            r#"
            SELECT id, slug, channel, category, subject, body, active, created_at, updated_at
            FROM notification_templates
            WHERE slug = ? AND active = 1
            "#,
        )
        .bind(slug)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
