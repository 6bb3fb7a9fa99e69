use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub email: EmailConfig,
    pub sms: SmsConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// SMTP relay hostname. Leave empty to disable email delivery entirely.
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Address used in the `From` header of every outgoing message.
    pub from_address: String,
    /// Optional display name for the `From` header.
    pub from_name: Option<String>,
    /// Timeout (seconds) for a single SMTP exchange.
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    /// Which SMS provider to use: "twilio", "telnyx" or "log" (logs instead of sending).
    pub provider: String,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_from_number: Option<String>,
    pub telnyx_api_key: Option<String>,
    pub telnyx_sender_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Whether the background sweep worker is enabled.
    pub enabled: bool,
    /// How often (seconds) the worker runs the scheduled and retry sweeps.
    pub poll_interval_seconds: u64,
    /// Maximum notifications picked up by a single sweep pass.
    pub batch_size: u32,
    /// Default retry budget stamped onto new notifications.
    pub max_retries: u32,
    /// Backoff in seconds before the second retry attempt (first is immediate).
    pub initial_backoff_seconds: u64,
    /// Cap for exponential backoff (seconds).
    pub max_backoff_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8000".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/notifications.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            email: EmailConfig {
                smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
                smtp_port: env::var("SMTP_PORT")
                    .unwrap_or_else(|_| "587".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("SMTP_PORT".to_string()))?,
                smtp_username: env::var("SMTP_USERNAME").ok(),
                smtp_password: env::var("SMTP_PASSWORD").ok(),
                from_address: env::var("SMTP_FROM_ADDRESS")
                    .unwrap_or_else(|_| "no-reply@localhost".to_string()),
                from_name: env::var("SMTP_FROM_NAME").ok(),
                timeout_seconds: env::var("SMTP_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30u64),
            },
            sms: SmsConfig {
                provider: env::var("SMS_PROVIDER").unwrap_or_else(|_| "log".to_string()),
                twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").ok(),
                twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").ok(),
                twilio_from_number: env::var("TWILIO_FROM_NUMBER").ok(),
                telnyx_api_key: env::var("TELNYX_API_KEY").ok(),
                telnyx_sender_id: env::var("TELNYX_SENDER_ID").ok(),
            },
            sweep: SweepConfig {
                enabled: match env::var("NOTIFICATION_SWEEP_ENABLED") {
                    Ok(v) => match v.to_lowercase().as_str() {
                        "1" | "true" | "yes" => true,
                        "0" | "false" | "no" => false,
                        _ => true,
                    },
                    Err(_) => true,
                },
                poll_interval_seconds: env::var("NOTIFICATION_SWEEP_POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60u64),
                batch_size: env::var("NOTIFICATION_SWEEP_BATCH_SIZE")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()
                    .unwrap_or(50u32),
                max_retries: env::var("NOTIFICATION_MAX_RETRIES")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3u32),
                initial_backoff_seconds: env::var("NOTIFICATION_RETRY_INITIAL_BACKOFF_SECONDS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300u64),
                max_backoff_seconds: env::var("NOTIFICATION_RETRY_MAX_BACKOFF_SECONDS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600u64),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Credentials are only required for the provider actually selected, so the
    /// check has to run after the whole config is assembled.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.sms.provider.as_str() {
            "twilio" => {
                if self.sms.twilio_account_sid.is_none() {
                    return Err(ConfigError::MissingEnv("TWILIO_ACCOUNT_SID".to_string()));
                }
                if self.sms.twilio_auth_token.is_none() {
                    return Err(ConfigError::MissingEnv("TWILIO_AUTH_TOKEN".to_string()));
                }
                if self.sms.twilio_from_number.is_none() {
                    return Err(ConfigError::MissingEnv("TWILIO_FROM_NUMBER".to_string()));
                }
            }
            "telnyx" => {
                if self.sms.telnyx_api_key.is_none() {
                    return Err(ConfigError::MissingEnv("TELNYX_API_KEY".to_string()));
                }
                if self.sms.telnyx_sender_id.is_none() {
                    return Err(ConfigError::MissingEnv("TELNYX_SENDER_ID".to_string()));
                }
            }
            "log" => {}
            other => {
                tracing::warn!("Unknown SMS_PROVIDER '{}', falling back to log-only", other);
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            database: DatabaseConfig {
                url: "sqlite://data/notifications.db".to_string(),
                max_connections: 5,
            },
            email: EmailConfig {
                smtp_host: String::new(),
                smtp_port: 587,
                smtp_username: None,
                smtp_password: None,
                from_address: "no-reply@localhost".to_string(),
                from_name: None,
                timeout_seconds: 30,
            },
            sms: SmsConfig {
                provider: "log".to_string(),
                twilio_account_sid: None,
                twilio_auth_token: None,
                twilio_from_number: None,
                telnyx_api_key: None,
                telnyx_sender_id: None,
            },
            sweep: SweepConfig {
                enabled: true,
                poll_interval_seconds: 60,
                batch_size: 50,
                max_retries: 3,
                initial_backoff_seconds: 300,
                max_backoff_seconds: 3600,
            },
        }
    }
}
