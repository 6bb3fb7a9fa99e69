use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::EmailConfig;
use crate::db::models::Notification;
use crate::error::{AppError, AppResult};
use crate::services::notifications::ChannelSender;

/// Outbound mail seam. The production implementation speaks SMTP; tests
/// substitute recording or failing doubles.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> AppResult<()>;
}

/// SMTP transport built on lettre (STARTTLS relay, optional credentials).
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &EmailConfig) -> AppResult<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| {
                AppError::Email(format!("Invalid SMTP relay '{}': {}", config.smtp_host, e))
            })?
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_seconds)));

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let from = match &config.from_name {
            Some(name) => format!("{} <{}>", name, config.from_address),
            None => config.from_address.clone(),
        }
        .parse::<Mailbox>()
        .map_err(|e| {
            AppError::Email(format!("Invalid from address '{}': {}", config.from_address, e))
        })?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send_mail(&self, to: &str, subject: &str, body: &str) -> AppResult<()> {
        let to = to
            .parse::<Mailbox>()
            .map_err(|e| AppError::Email(format!("Invalid recipient address '{}': {}", to, e)))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::Email(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| AppError::Email(format!("SMTP send failed: {}", e)))?;

        Ok(())
    }
}

/// Channel sender for email notifications. Content arrives on the
/// notification row already rendered; this only validates the destination
/// and hands off to the transport.
#[derive(Clone)]
pub struct EmailService {
    transport: Arc<dyn MailTransport>,
}

impl EmailService {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }

    /// Build the SMTP-backed service, or `None` when no relay is configured
    /// (email delivery disabled).
    pub fn from_config(config: &EmailConfig) -> AppResult<Option<Self>> {
        if config.smtp_host.is_empty() {
            return Ok(None);
        }
        let mailer = SmtpMailer::from_config(config)?;
        Ok(Some(Self::new(Arc::new(mailer))))
    }
}

#[async_trait]
impl ChannelSender for EmailService {
    async fn deliver(&self, notification: &Notification) -> AppResult<()> {
        let to = notification
            .recipient_email
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                AppError::Validation("notification has no recipient email address".to_string())
            })?;

        self.transport
            .send_mail(to, &notification.subject, &notification.message)
            .await?;

        tracing::debug!("Email notification {} handed to transport for {}", notification.id, to);
        Ok(())
    }
}
