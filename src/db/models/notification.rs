use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    Push,
    InApp,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
            Self::InApp => "in_app",
        }
    }
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Domain classification of a notification. Drives template selection,
/// preference filtering and sweep ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    ServiceReminder,
    PaymentDue,
    Emergency,
    Dispatch,
    Invoice,
    Quote,
    Maintenance,
    Delivery,
    Pickup,
    Marketing,
    SystemUpdate,
}

impl NotificationCategory {
    /// Sweep priority: lower numbers are processed first when multiple
    /// notifications are due at the same time.
    pub fn priority(&self) -> i32 {
        match self {
            Self::Emergency => 1,
            Self::Dispatch => 2,
            Self::PaymentDue => 3,
            Self::ServiceReminder => 4,
            Self::Delivery => 5,
            Self::Pickup => 6,
            Self::Maintenance => 7,
            Self::Invoice => 8,
            Self::Quote => 9,
            Self::SystemUpdate => 10,
            Self::Marketing => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceReminder => "service_reminder",
            Self::PaymentDue => "payment_due",
            Self::Emergency => "emergency",
            Self::Dispatch => "dispatch",
            Self::Invoice => "invoice",
            Self::Quote => "quote",
            Self::Maintenance => "maintenance",
            Self::Delivery => "delivery",
            Self::Pickup => "pickup",
            Self::Marketing => "marketing",
            Self::SystemUpdate => "system_update",
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Created and eligible for delivery as soon as a send is attempted.
    Pending,
    /// Created with a future `scheduled_at`; held back until that passes.
    Scheduled,
    /// Handed to the channel transport successfully.
    Sent,
    /// Receipt confirmed by the provider (set by external callbacks, not here).
    Delivered,
    /// Last delivery attempt failed; retryable while budget remains.
    Failed,
    /// Provider reported a hard bounce (set by external callbacks, not here).
    Bounced,
    /// Administratively withdrawn; never picked up again.
    Cancelled,
}

impl NotificationStatus {
    /// Whether the orchestrator may still attempt delivery from this state.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Bounced => "bounced",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which kind of entity a notification targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    Customer,
    Driver,
    User,
}

impl RecipientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Driver => "driver",
            Self::User => "user",
        }
    }
}

impl fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity and contact details shared by every recipient kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientContact {
    pub id: String,
    pub company_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// A delivery target: customer, driver or staff user.
///
/// Contact details are captured here once and denormalized onto the
/// notification row at creation time, so delivery never needs a live lookup
/// against the owning entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    Customer(RecipientContact),
    Driver(RecipientContact),
    User(RecipientContact),
}

impl Recipient {
    pub fn kind(&self) -> RecipientKind {
        match self {
            Self::Customer(_) => RecipientKind::Customer,
            Self::Driver(_) => RecipientKind::Driver,
            Self::User(_) => RecipientKind::User,
        }
    }

    fn contact(&self) -> &RecipientContact {
        match self {
            Self::Customer(c) | Self::Driver(c) | Self::User(c) => c,
        }
    }

    pub fn id(&self) -> &str {
        &self.contact().id
    }

    pub fn company_id(&self) -> &str {
        &self.contact().company_id
    }

    pub fn contact_email(&self) -> Option<&str> {
        self.contact().email.as_deref()
    }

    pub fn contact_phone(&self) -> Option<&str> {
        self.contact().phone.as_deref()
    }
}

/// Link back to the business entity that spawned a notification
/// (e.g. an invoice). Lets cleanup purge still-pending notifications when
/// the source entity is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: String,
    pub id: String,
}

/// A single notification delivery record.
///
/// Content is stored fully rendered (`subject`/`message`), so retries send
/// exactly what was composed at creation time even if the template changes
/// later. The retry bookkeeping (`retry_count`, `max_retries`,
/// `next_retry_at`) is owned by this row and advanced only by the sweep
/// driver, never by the send path itself.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notification {
    /// Primary key (UUID)
    pub id: String,

    /// Owning tenant. Serving queries must filter by this.
    pub company_id: String,

    /// Delivery channel ('email', 'sms', 'push', 'in_app')
    pub channel: NotificationChannel,

    /// Domain category (e.g. 'invoice', 'emergency')
    pub category: NotificationCategory,

    /// Sweep ordering key, denormalized from `category` at insert.
    pub priority: i32,

    /// Lifecycle state, see [`NotificationStatus`].
    pub status: NotificationStatus,

    /// Kind of the target entity ('customer', 'driver', 'user')
    pub recipient_kind: RecipientKind,

    /// Id of the target entity within its kind.
    pub recipient_id: String,

    /// Email captured from the recipient at creation time.
    pub recipient_email: Option<String>,

    /// Phone number captured from the recipient at creation time.
    pub recipient_phone: Option<String>,

    /// Rendered subject line (used by email; informational elsewhere).
    pub subject: String,

    /// Rendered message body.
    pub message: String,

    /// JSON-serialized payload the content was rendered from; also carries
    /// downstream links (invoice id, work order id, ...).
    pub data: String,

    /// Kind of the business entity that spawned this notification, if any.
    pub source_kind: Option<String>,

    /// Id of the spawning business entity.
    pub source_id: Option<String>,

    /// When set, the record is not eligible for sending before this time.
    pub scheduled_at: Option<NaiveDateTime>,

    /// Set when the channel transport accepted the message.
    pub sent_at: Option<NaiveDateTime>,

    /// Retries already consumed. Incremented by the retry sweep when it
    /// claims the row, not by the send path.
    pub retry_count: i32,

    /// Retry budget for this notification.
    pub max_retries: i32,

    /// Earliest time the retry sweep may claim this row again (backoff).
    pub next_retry_at: Option<NaiveDateTime>,

    /// Last delivery error observed, for operator inspection.
    pub failure_reason: Option<String>,

    /// Creation timestamp
    pub created_at: NaiveDateTime,

    /// Last update timestamp
    pub updated_at: NaiveDateTime,
}

impl Notification {
    /// Gate applied before every delivery attempt: only pending/scheduled
    /// rows whose schedule has passed may go out. Terminal states and
    /// future-scheduled rows are skipped without side effects.
    pub fn should_send_now(&self, now: NaiveDateTime) -> bool {
        if !self.status.can_send() {
            return false;
        }
        match self.scheduled_at {
            Some(at) => at <= now,
            None => true,
        }
    }
}

/// Data required to insert a new notification row.
///
/// `status` and `priority` are derived by the repository (`scheduled` when
/// `scheduled_at` is set, `pending` otherwise; priority from the category).
/// `max_retries` defaults to the standard budget when omitted.
#[derive(Debug, Clone)]
pub struct CreateNotification {
    pub company_id: String,
    pub channel: NotificationChannel,
    pub category: NotificationCategory,
    pub recipient_kind: RecipientKind,
    pub recipient_id: String,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub data: String,
    pub source: Option<SourceRef>,
    pub scheduled_at: Option<NaiveDateTime>,
    pub max_retries: Option<i32>,
}
