use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::notification::{NotificationCategory, NotificationChannel, RecipientKind};

/// Per-recipient opt-out for a notification category, optionally narrowed to
/// a single channel (`channel = NULL` covers the whole category). Recipients
/// without a matching row are considered opted in.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub id: String,
    pub company_id: String,
    pub recipient_kind: RecipientKind,
    pub recipient_id: String,
    pub category: NotificationCategory,
    pub channel: Option<NotificationChannel>,
    pub enabled: bool,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetNotificationPreference {
    pub company_id: String,
    pub recipient_kind: RecipientKind,
    pub recipient_id: String,
    pub category: NotificationCategory,
    pub channel: Option<NotificationChannel>,
    pub enabled: bool,
}
