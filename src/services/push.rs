use async_trait::async_trait;

use crate::db::models::Notification;
use crate::error::{AppError, AppResult};
use crate::services::notifications::ChannelSender;

/// Placeholder push sender. No push backend is wired up yet, so every
/// delivery fails and the notification lands in `failed` with an explicit
/// reason instead of silently disappearing.
pub struct PushService;

#[async_trait]
impl ChannelSender for PushService {
    async fn deliver(&self, notification: &Notification) -> AppResult<()> {
        tracing::warn!(
            "Push delivery requested for notification {} but push is not implemented",
            notification.id
        );
        Err(AppError::ServiceUnavailable(
            "push delivery is not implemented".to_string(),
        ))
    }
}
