use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::error::AppResult;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/scheduled", post(run_scheduled_sweep))
        .route("/retries", post(run_retry_sweep))
}

#[derive(Debug, Serialize)]
pub struct SweepOutcome {
    /// Notifications actually delivered by this pass.
    pub processed: u64,
}

/// Run one scheduled-delivery sweep pass on demand. The background worker
/// runs the same pass on its own interval; this endpoint exists for
/// operators who do not want to wait for it.
async fn run_scheduled_sweep(State(state): State<Arc<AppState>>) -> AppResult<Json<SweepOutcome>> {
    let processed = state.notifications.process_scheduled_notifications().await?;
    Ok(Json(SweepOutcome { processed }))
}

/// Run one retry sweep pass on demand.
async fn run_retry_sweep(State(state): State<Arc<AppState>>) -> AppResult<Json<SweepOutcome>> {
    let processed = state.notifications.retry_failed_notifications().await?;
    Ok(Json(SweepOutcome { processed }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use sqlx::sqlite::SqlitePoolOptions;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::db::models::{
        CreateNotification, NotificationCategory, NotificationChannel, NotificationStatus,
        RecipientKind,
    };
    use crate::db::repository::NotificationRepository;
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
        Router::new().nest("/api/sweeps", router()).with_state(state)
    }

    fn trigger(path: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    async fn seed_in_app(state: &Arc<AppState>) -> String {
        NotificationRepository::create(
            &state.db,
            CreateNotification {
                company_id: "co-1".to_string(),
                channel: NotificationChannel::InApp,
                category: NotificationCategory::SystemUpdate,
                recipient_kind: RecipientKind::User,
                recipient_id: "u-1".to_string(),
                recipient_email: None,
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
        .id
    }

    #[tokio::test]
    async fn scheduled_sweep_endpoint_delivers_due_rows() {
        let state = test_state().await;
        let id = seed_in_app(&state).await;

        let response = app(state.clone())
            .oneshot(trigger("/api/sweeps/scheduled"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["processed"], 1);

        let row = NotificationRepository::find_by_id(&state.db, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn retry_sweep_endpoint_recovers_failed_rows() {
        let state = test_state().await;
        let id = seed_in_app(&state).await;
        NotificationRepository::mark_failed(&state.db, &id, "transient outage")
            .await
            .unwrap();

        let response = app(state.clone())
            .oneshot(trigger("/api/sweeps/retries"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["processed"], 1);

        let row = NotificationRepository::find_by_id(&state.db, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, NotificationStatus::Sent);
        assert_eq!(row.retry_count, 1);
    }
}
