use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::notification::{NotificationCategory, NotificationChannel};

/// A reusable subject/body pattern with `{{placeholder}}` tokens, looked up
/// by slug. Templates are read-only at send time; the rendered output is
/// copied onto the notification row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub id: String,
    /// Unique lookup key (e.g. 'invoice_sent').
    pub slug: String,
    /// Default channel; callers may override per send.
    pub channel: NotificationChannel,
    pub category: NotificationCategory,
    pub subject: String,
    pub body: String,
    /// Inactive templates are invisible to the send path.
    pub active: bool,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNotificationTemplate {
    pub slug: String,
    pub channel: NotificationChannel,
    pub category: NotificationCategory,
    pub subject: String,
    pub body: String,
    pub active: bool,
}
