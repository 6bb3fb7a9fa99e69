use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::SmsConfig;
use crate::db::models::Notification;
use crate::error::{AppError, AppResult};
use crate::services::notifications::ChannelSender;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Normalize a raw phone number into `+1NNNNNNNNNN` form.
///
/// Strips everything that is not a digit, prefixes the US country code when
/// exactly ten digits remain, and rejects anything that does not end up as a
/// valid US number. Returns `None` for unusable input; the caller treats
/// that as a validation failure, not a provider error.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = if digits.len() == 10 {
        format!("1{}", digits)
    } else {
        digits
    };

    let candidate = format!("+{}", digits);
    if is_valid_us_number(&candidate) {
        Some(candidate)
    } else {
        None
    }
}

/// `^\+1[0-9]{10}$`
fn is_valid_us_number(number: &str) -> bool {
    match number.strip_prefix("+1") {
        Some(rest) => rest.len() == 10 && rest.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Provider strategy for actually moving an SMS. Selected once from config
/// at construction time.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    /// Deliver one message to a normalized number. Returns the provider's
    /// confirmation id on success.
    async fn send_sms(&self, to: &str, body: &str) -> AppResult<String>;

    fn name(&self) -> &'static str;
}

/// Twilio Messages API: form POST with basic auth.
pub struct TwilioProvider {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl TwilioProvider {
    pub fn from_config(config: &SmsConfig) -> AppResult<Self> {
        let account_sid = config
            .twilio_account_sid
            .clone()
            .ok_or_else(|| AppError::Config("TWILIO_ACCOUNT_SID is not set".to_string()))?;
        let auth_token = config
            .twilio_auth_token
            .clone()
            .ok_or_else(|| AppError::Config("TWILIO_AUTH_TOKEN is not set".to_string()))?;
        let from_number = config
            .twilio_from_number
            .clone()
            .ok_or_else(|| AppError::Config("TWILIO_FROM_NUMBER is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::Sms(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            account_sid,
            auth_token,
            from_number,
        })
    }
}

#[async_trait]
impl SmsProvider for TwilioProvider {
    async fn send_sms(&self, to: &str, body: &str) -> AppResult<String> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let params = [("To", to), ("From", self.from_number.as_str()), ("Body", body)];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::Sms(format!("Failed to reach Twilio: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Sms(format!(
                "Twilio API error ({}): {}",
                status, error_text
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AppError::Sms(format!("Invalid Twilio response: {}", e)))?;
        let sid = payload
            .get("sid")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(sid)
    }

    fn name(&self) -> &'static str {
        "twilio"
    }
}

/// Telnyx Messages API: JSON POST with bearer auth.
pub struct TelnyxProvider {
    client: reqwest::Client,
    api_key: String,
    sender_id: String,
}

impl TelnyxProvider {
    pub fn from_config(config: &SmsConfig) -> AppResult<Self> {
        let api_key = config
            .telnyx_api_key
            .clone()
            .ok_or_else(|| AppError::Config("TELNYX_API_KEY is not set".to_string()))?;
        let sender_id = config
            .telnyx_sender_id
            .clone()
            .ok_or_else(|| AppError::Config("TELNYX_SENDER_ID is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::Sms(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            sender_id,
        })
    }
}

#[async_trait]
impl SmsProvider for TelnyxProvider {
    async fn send_sms(&self, to: &str, body: &str) -> AppResult<String> {
        let payload = serde_json::json!({
            "from": self.sender_id,
            "to": to,
            "text": body,
        });

        let response = self
            .client
            .post("https://api.telnyx.com/v2/messages")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Sms(format!("Failed to reach Telnyx: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Sms(format!(
                "Telnyx API error ({}): {}",
                status, error_text
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AppError::Sms(format!("Invalid Telnyx response: {}", e)))?;
        let id = payload
            .pointer("/data/id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(id)
    }

    fn name(&self) -> &'static str {
        "telnyx"
    }
}

/// Non-production default: logs the message instead of sending it.
pub struct LogOnlyProvider;

#[async_trait]
impl SmsProvider for LogOnlyProvider {
    async fn send_sms(&self, to: &str, body: &str) -> AppResult<String> {
        tracing::info!("SMS (log only) to {}: {}", to, body);
        Ok("log-only".to_string())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Channel sender for SMS notifications: validates and normalizes the
/// destination, then delegates to the configured provider strategy.
#[derive(Clone)]
pub struct SmsService {
    provider: Arc<dyn SmsProvider>,
}

impl SmsService {
    pub fn new(provider: Arc<dyn SmsProvider>) -> Self {
        Self { provider }
    }

    pub fn from_config(config: &SmsConfig) -> AppResult<Self> {
        let provider: Arc<dyn SmsProvider> = match config.provider.as_str() {
            "twilio" => Arc::new(TwilioProvider::from_config(config)?),
            "telnyx" => Arc::new(TelnyxProvider::from_config(config)?),
            _ => Arc::new(LogOnlyProvider),
        };
        tracing::info!("SMS provider: {}", provider.name());
        Ok(Self { provider })
    }
}

#[async_trait]
impl ChannelSender for SmsService {
    async fn deliver(&self, notification: &Notification) -> AppResult<()> {
        let raw = notification
            .recipient_phone
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                AppError::Validation("notification has no recipient phone number".to_string())
            })?;
        let to = normalize_phone(raw)
            .ok_or_else(|| AppError::Validation(format!("invalid phone number '{}'", raw)))?;

        let confirmation = self.provider.send_sms(&to, &notification.message).await?;

        tracing::info!(
            "SMS notification {} accepted by {} (confirmation {})",
            notification.id,
            self.provider.name(),
            confirmation
        );
        Ok(())
    }
}
