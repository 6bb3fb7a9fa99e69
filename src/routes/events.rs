use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::models::{Recipient, SourceRef};
use crate::db::repository::NotificationRepository;
use crate::error::{AppError, AppResult};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", post(handle_domain_event))
}

/// A business event emitted by the wider system (billing, dispatch,
/// scheduling, ...). Events that map to a template produce a notification;
/// everything else is acknowledged and dropped.
#[derive(Debug, Deserialize)]
pub struct DomainEvent {
    /// Dotted event name, e.g. "invoice.sent".
    pub event: String,
    /// Target of the notification. Required for notification-producing
    /// events, optional for deletions.
    pub recipient: Option<Recipient>,
    /// Template payload; also stored on the notification row.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Link to the business entity behind the event.
    pub source: Option<SourceRef>,
    /// Tenant scope for events that carry no recipient (deletions).
    pub company_id: Option<String>,
    pub scheduled_at: Option<NaiveDateTime>,
}

#[derive(Debug, Serialize)]
pub struct EventOutcome {
    pub event: String,
    pub handled: bool,
    pub notification_id: Option<String>,
    pub status: Option<String>,
    pub purged: Option<u64>,
}

impl EventOutcome {
    fn ignored(event: String) -> Self {
        EventOutcome {
            event,
            handled: false,
            notification_id: None,
            status: None,
            purged: None,
        }
    }
}

/// Template slug for each notification-producing event. Unknown events are
/// fine; emitters never have to know which events produce notifications.
fn template_slug_for(event: &str) -> Option<&'static str> {
    match event {
        "invoice.sent" => Some("invoice_sent"),
        "invoice.paid" => Some("invoice_paid"),
        "invoice.overdue" => Some("invoice_overdue"),
        "work_order.completed" => Some("work_order_completed"),
        "service.emergency_requested" => Some("emergency_dispatch"),
        "pickup.scheduled" => Some("pickup_scheduled"),
        "delivery.scheduled" => Some("delivery_scheduled"),
        _ => None,
    }
}

async fn handle_domain_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<DomainEvent>,
) -> AppResult<(StatusCode, Json<EventOutcome>)> {
    tracing::info!("Received domain event '{}'", event.event);

    // Entity deletions retract undelivered notifications instead of
    // producing new ones.
    if event.event.ends_with(".deleted") {
        return purge_for_deleted_source(&state, event).await;
    }

    let slug = match template_slug_for(&event.event) {
        Some(slug) => slug,
        None => {
            tracing::debug!("No notification mapped for event '{}', ignoring", event.event);
            return Ok((StatusCode::ACCEPTED, Json(EventOutcome::ignored(event.event))));
        }
    };

    let recipient = event.recipient.ok_or_else(|| {
        AppError::BadRequest(format!("event '{}' requires a recipient", event.event))
    })?;

    let notification = state
        .notifications
        .send_from_template(
            slug,
            &recipient,
            event.data,
            None,
            event.scheduled_at,
            event.source,
        )
        .await?;

    let outcome = match notification {
        Some(n) => EventOutcome {
            event: event.event,
            handled: true,
            notification_id: Some(n.id),
            status: Some(n.status.to_string()),
            purged: None,
        },
        // Template disabled by the operator: acknowledged, nothing sent.
        None => EventOutcome::ignored(event.event),
    };

    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

/// Drop still-undelivered notifications spawned by a now-deleted entity.
/// Sent history is kept.
async fn purge_for_deleted_source(
    state: &Arc<AppState>,
    event: DomainEvent,
) -> AppResult<(StatusCode, Json<EventOutcome>)> {
    let source = event.source.ok_or_else(|| {
        AppError::BadRequest("deletion events require a source reference".to_string())
    })?;
    let company_id = event
        .company_id
        .or_else(|| event.recipient.as_ref().map(|r| r.company_id().to_string()))
        .ok_or_else(|| AppError::BadRequest("deletion events require a company_id".to_string()))?;

    let purged = NotificationRepository::purge_pending_for_source(
        &state.db,
        &company_id,
        &source.kind,
        &source.id,
    )
    .await?;
    tracing::info!(
        "Purged {} undelivered notification(s) for deleted {} {}",
        purged,
        source.kind,
        source.id
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(EventOutcome {
            event: event.event,
            handled: true,
            notification_id: None,
            status: None,
            purged: Some(purged),
        }),
    ))
}
