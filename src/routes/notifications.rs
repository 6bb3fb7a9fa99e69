use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::db::models::{
    Notification, NotificationCategory, NotificationChannel, NotificationPreference,
    NotificationStatus, Recipient, RecipientKind, SetNotificationPreference, SourceRef,
};
use crate::db::repository::{NotificationPreferenceRepository, NotificationRepository};
use crate::error::{AppError, AppResult};
use crate::services::notifications::{BulkSendReport, NotificationDraft};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications).post(send_notification))
        .route("/from-template", post(send_from_template))
        .route("/broadcast", post(broadcast_notification))
        .route("/stats", get(get_notification_stats))
        .route(
            "/preferences",
            get(list_preferences).put(set_preference),
        )
        .route("/:id", get(get_notification))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    /// Tenant scope; every serving query must carry it.
    pub company_id: String,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub channel: Option<NotificationChannel>,
    pub category: Option<NotificationCategory>,
    pub status: Option<NotificationStatus>,
}

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub company_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PreferencesQuery {
    pub company_id: String,
    pub recipient_kind: RecipientKind,
    pub recipient_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub recipient: Recipient,
    pub channel: NotificationChannel,
    pub category: NotificationCategory,
    pub subject: String,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub source: Option<SourceRef>,
    pub scheduled_at: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct SendFromTemplateRequest {
    pub template: String,
    pub recipient: Recipient,
    pub data: Option<serde_json::Value>,
    /// Overrides the template's default channel when set.
    pub channel: Option<NotificationChannel>,
    pub source: Option<SourceRef>,
    pub scheduled_at: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub recipients: Vec<Recipient>,
    pub channel: NotificationChannel,
    pub category: NotificationCategory,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct NotificationsListResponse {
    pub items: Vec<NotificationResponse>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: String,
    pub company_id: String,
    pub channel: NotificationChannel,
    pub category: NotificationCategory,
    pub status: NotificationStatus,
    pub recipient_kind: RecipientKind,
    pub recipient_id: String,
    pub subject: String,
    pub message: String,
    pub source_kind: Option<String>,
    pub source_id: Option<String>,
    pub scheduled_at: Option<NaiveDateTime>,
    pub sent_at: Option<NaiveDateTime>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub failure_reason: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        NotificationResponse {
            id: n.id,
            company_id: n.company_id,
            channel: n.channel,
            category: n.category,
            status: n.status,
            recipient_kind: n.recipient_kind,
            recipient_id: n.recipient_id,
            subject: n.subject,
            message: n.message,
            source_kind: n.source_kind,
            source_id: n.source_id,
            scheduled_at: n.scheduled_at,
            sent_at: n.sent_at,
            retry_count: n.retry_count,
            max_retries: n.max_retries,
            failure_reason: n.failure_reason,
            created_at: n.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotificationStatsResponse {
    pub total_sent: i64,
    pub total_failed: i64,
    pub total_pending: i64,
    pub by_category: std::collections::HashMap<String, i64>,
    pub by_channel: std::collections::HashMap<String, i64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List notifications for a tenant, newest first, with optional filters.
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListNotificationsQuery>,
) -> AppResult<Json<NotificationsListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;

    let notifications = NotificationRepository::find_by_company_with_filters(
        &state.db,
        &query.company_id,
        Some(per_page),
        Some(offset),
        query.channel,
        query.category,
        query.status,
    )
    .await?;

    let total = NotificationRepository::count_by_company_with_filters(
        &state.db,
        &query.company_id,
        query.channel,
        query.category,
        query.status,
    )
    .await?;

    let total_pages = (total as f64 / per_page as f64).ceil() as i64;

    Ok(Json(NotificationsListResponse {
        items: notifications.into_iter().map(Into::into).collect(),
        total,
        page,
        per_page,
        total_pages,
    }))
}

/// Fetch one notification, scoped to the requesting tenant. A row owned by
/// another company reads as not found rather than forbidden.
async fn get_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TenantQuery>,
) -> AppResult<Json<NotificationResponse>> {
    let notification = NotificationRepository::find_by_id(&state.db, &id)
        .await?
        .filter(|n| n.company_id == query.company_id)
        .ok_or_else(|| AppError::NotFound(format!("notification {}", id)))?;

    Ok(Json(notification.into()))
}

/// Create a notification with caller-provided content and attempt delivery
/// immediately (unless scheduled for later). The response carries the stored
/// row after the attempt, so callers see `sent`/`failed` rather than the
/// pending snapshot.
async fn send_notification(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendNotificationRequest>,
) -> AppResult<(StatusCode, Json<NotificationResponse>)> {
    let SendNotificationRequest {
        recipient,
        channel,
        category,
        subject,
        message,
        data,
        source,
        scheduled_at,
    } = req;

    let draft = NotificationDraft {
        channel,
        category,
        subject,
        message,
        data: data.unwrap_or_else(|| serde_json::json!({})),
        source,
        scheduled_at,
    };

    let notification = state
        .notifications
        .create_notification(&recipient, draft)
        .await?;
    if scheduled_at.is_none() {
        state.notifications.send(&notification).await?;
    }

    let row = NotificationRepository::find_by_id(&state.db, &notification.id)
        .await?
        .unwrap_or(notification);

    Ok((StatusCode::CREATED, Json(row.into())))
}

/// Render a stored template and deliver (or schedule) the result. An unknown
/// or inactive slug is a 404.
async fn send_from_template(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendFromTemplateRequest>,
) -> AppResult<(StatusCode, Json<NotificationResponse>)> {
    let data = req.data.unwrap_or_else(|| serde_json::json!({}));

    let notification = state
        .notifications
        .send_from_template(
            &req.template,
            &req.recipient,
            data,
            req.channel,
            req.scheduled_at,
            req.source,
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("notification template '{}'", req.template)))?;

    Ok((StatusCode::CREATED, Json(notification.into())))
}

/// Send the same content to many recipients. Always answers 200 with a
/// per-recipient partition; individual failures never fail the batch.
async fn broadcast_notification(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BroadcastRequest>,
) -> AppResult<Json<BulkSendReport>> {
    if req.recipients.is_empty() {
        return Err(AppError::BadRequest("recipients must not be empty".to_string()));
    }

    let report = state
        .notifications
        .send_bulk(
            &req.recipients,
            req.channel,
            req.category,
            &req.subject,
            &req.message,
        )
        .await;

    Ok(Json(report))
}

/// Per-tenant delivery statistics.
async fn get_notification_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TenantQuery>,
) -> AppResult<Json<NotificationStatsResponse>> {
    // Run aggregation queries in parallel
    let db = state.db.clone();
    let company_id = query.company_id.clone();

    let (total_sent, total_failed, total_pending, by_category, by_channel) = tokio::try_join!(
        {
            let db = db.clone();
            let company_id = company_id.clone();
            async move {
                NotificationRepository::count_by_company_and_status(
                    &db,
                    &company_id,
                    NotificationStatus::Sent,
                )
                .await
            }
        },
        {
            let db = db.clone();
            let company_id = company_id.clone();
            async move {
                NotificationRepository::count_by_company_and_status(
                    &db,
                    &company_id,
                    NotificationStatus::Failed,
                )
                .await
            }
        },
        {
            let db = db.clone();
            let company_id = company_id.clone();
            async move {
                NotificationRepository::count_by_company_and_status(
                    &db,
                    &company_id,
                    NotificationStatus::Pending,
                )
                .await
            }
        },
        {
            let db = db.clone();
            let company_id = company_id.clone();
            async move { NotificationRepository::counts_by_category(&db, &company_id).await }
        },
        {
            let db = db.clone();
            let company_id = company_id.clone();
            async move { NotificationRepository::counts_by_channel(&db, &company_id).await }
        }
    )?;

    Ok(Json(NotificationStatsResponse {
        total_sent,
        total_failed,
        total_pending,
        by_category,
        by_channel,
    }))
}

/// Stored preference rows for one recipient. Categories without a row are
/// implicitly enabled and do not appear here.
async fn list_preferences(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PreferencesQuery>,
) -> AppResult<Json<Vec<NotificationPreference>>> {
    let rows = NotificationPreferenceRepository::list_for_recipient(
        &state.db,
        &query.company_id,
        query.recipient_kind,
        &query.recipient_id,
    )
    .await?;

    Ok(Json(rows))
}

/// Create or update an opt-out/opt-in for a recipient.
async fn set_preference(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetNotificationPreference>,
) -> AppResult<Json<NotificationPreference>> {
    let row = NotificationPreferenceRepository::set(&state.db, req).await?;
    Ok(Json(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use sqlx::sqlite::SqlitePoolOptions;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::db::models::CreateNotification;
    use crate::services::notifications::NotificationService;
    use crate::services::push::PushService;
    use crate::services::sms::{LogOnlyProvider, SmsService};

    async fn test_state() -> Arc<AppState> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        let config = Config::default();
        let notifications = NotificationService::new(
            pool.clone(),
            None,
            SmsService::new(Arc::new(LogOnlyProvider)),
            PushService,
            config.sweep.clone(),
        );

        Arc::new(AppState {
            db: pool,
            config,
            notifications,
        })
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .nest("/api/notifications", router())
            .with_state(state)
    }

    async fn seed_notification(
        state: &Arc<AppState>,
        company_id: &str,
        channel: NotificationChannel,
    ) -> Notification {
        NotificationRepository::create(
            &state.db,
            CreateNotification {
                company_id: company_id.to_string(),
                channel,
                category: NotificationCategory::Invoice,
                recipient_kind: RecipientKind::Customer,
                recipient_id: "c-1".to_string(),
                recipient_email: Some("customer@example.com".to_string()),
                recipient_phone: None,
                subject: "subject".to_string(),
                message: "body".to_string(),
                data: "{}".to_string(),
                source: None,
                scheduled_at: None,
                max_retries: None,
            },
        )
        .await
        .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_requires_company_id() {
        let state = test_state().await;
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/notifications")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_is_tenant_scoped() {
        let state = test_state().await;
        seed_notification(&state, "co-1", NotificationChannel::Email).await;
        seed_notification(&state, "co-2", NotificationChannel::Email).await;

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/notifications?company_id=co-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["total"], 1);
        assert_eq!(json["items"][0]["company_id"], "co-1");
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let state = test_state().await;
        let sent = seed_notification(&state, "co-1", NotificationChannel::Email).await;
        NotificationRepository::mark_sent(&state.db, &sent.id).await.unwrap();
        seed_notification(&state, "co-1", NotificationChannel::Email).await;

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/notifications?company_id=co-1&status=sent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["total"], 1);
        assert_eq!(json["items"][0]["status"], "sent");
    }

    #[tokio::test]
    async fn get_notification_hides_other_tenants() {
        let state = test_state().await;
        let n = seed_notification(&state, "co-1", NotificationChannel::Email).await;

        let owner = app(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/api/notifications/{}?company_id=co-1", n.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(owner.status(), StatusCode::OK);

        let stranger = app(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/api/notifications/{}?company_id=co-2", n.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(stranger.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn send_endpoint_creates_and_delivers_in_app() {
        let state = test_state().await;
        let payload = serde_json::json!({
            "recipient": {
                "kind": "user",
                "id": "u-1",
                "company_id": "co-1",
                "email": null,
                "phone": null
            },
            "channel": "in_app",
            "category": "system_update",
            "subject": "Maintenance tonight",
            "message": "The portal will be unavailable from 2am to 3am."
        });

        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/notifications")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let json = body_json(response).await;
        assert_eq!(json["status"], "sent");
        assert_eq!(json["recipient_kind"], "user");
        assert_eq!(json["company_id"], "co-1");
    }

    #[tokio::test]
    async fn send_endpoint_schedules_future_deliveries() {
        let state = test_state().await;
        let payload = serde_json::json!({
            "recipient": {
                "kind": "customer",
                "id": "c-1",
                "company_id": "co-1",
                "email": "customer@example.com",
                "phone": null
            },
            "channel": "in_app",
            "category": "service_reminder",
            "subject": "Upcoming service",
            "message": "See you Tuesday.",
            "scheduled_at": "2099-06-01T09:00:00"
        });

        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/notifications")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let json = body_json(response).await;
        assert_eq!(json["status"], "scheduled");
        assert!(json["sent_at"].is_null());
    }

    #[tokio::test]
    async fn broadcast_partitions_good_and_bad_recipients() {
        let state = test_state().await;
        let payload = serde_json::json!({
            "recipients": [
                { "kind": "driver", "id": "d-1", "company_id": "co-1", "email": null, "phone": "5551230001" },
                { "kind": "driver", "id": "d-2", "company_id": "co-1", "email": null, "phone": "12" }
            ],
            "channel": "sms",
            "category": "dispatch",
            "subject": "Route change",
            "message": "Route 4 starts at the depot today."
        });

        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/notifications/broadcast")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["sent"].as_array().unwrap().len(), 1);
        assert_eq!(json["failed"].as_array().unwrap().len(), 1);
        assert_eq!(json["sent"][0]["recipient_id"], "d-1");
        assert_eq!(json["failed"][0]["recipient_id"], "d-2");
    }

    #[tokio::test]
    async fn broadcast_rejects_empty_recipient_list() {
        let state = test_state().await;
        let payload = serde_json::json!({
            "recipients": [],
            "channel": "sms",
            "category": "dispatch",
            "subject": "s",
            "message": "m"
        });

        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/notifications/broadcast")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn from_template_endpoint_rejects_unknown_slug() {
        let state = test_state().await;
        let payload = serde_json::json!({
            "template": "no_such_template",
            "recipient": {
                "kind": "customer",
                "id": "c-1",
                "company_id": "co-1",
                "email": "customer@example.com",
                "phone": null
            }
        });

        let response = app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/notifications/from-template")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_reflect_stored_rows() {
        let state = test_state().await;
        let sent = seed_notification(&state, "co-1", NotificationChannel::Email).await;
        NotificationRepository::mark_sent(&state.db, &sent.id).await.unwrap();
        let failed = seed_notification(&state, "co-1", NotificationChannel::Sms).await;
        NotificationRepository::mark_failed(&state.db, &failed.id, "timeout")
            .await
            .unwrap();
        seed_notification(&state, "co-2", NotificationChannel::Email).await;

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/notifications/stats?company_id=co-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["total_sent"], 1);
        assert_eq!(json["total_failed"], 1);
        assert_eq!(json["total_pending"], 0);
        assert_eq!(json["by_channel"]["email"], 1);
        assert_eq!(json["by_channel"]["sms"], 1);
    }

    #[tokio::test]
    async fn preferences_roundtrip_over_http() {
        let state = test_state().await;
        let put_payload = serde_json::json!({
            "company_id": "co-1",
            "recipient_kind": "customer",
            "recipient_id": "c-1",
            "category": "marketing",
            "channel": null,
            "enabled": false
        });

        let put = app(state.clone())
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/notifications/preferences")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(put_payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::OK);

        let get = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/notifications/preferences?company_id=co-1&recipient_kind=customer&recipient_id=c-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get.status(), StatusCode::OK);

        let json = body_json(get).await;
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["category"], "marketing");
        assert_eq!(rows[0]["enabled"], false);
    }
}
