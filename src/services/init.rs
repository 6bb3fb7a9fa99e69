//! Startup helpers:
//! - database connection + migrations
//! - background sweep worker spawn helpers
//!
//! This module centralizes bits that used to live in `main.rs`.

use std::{path::Path, sync::Arc};

use anyhow::Result;

use crate::config::Config;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Initialize the SQLite connection pool and run migrations.
///
/// Creates the parent directory for the database file (if applicable) and
/// opens the pool with `create_if_missing(true)`.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Spawn the notification sweep worker.
///
/// A single loop runs both sweeps back to back each cycle: the scheduled
/// sweep first (newly due work), then the retry sweep (recovery of failed
/// sends). The worker listens for a shutdown notification via a
/// `tokio::sync::broadcast::Sender<()>` and the returned `JoinHandle`s let
/// callers await an orderly exit.
pub fn spawn_background_workers(
    state: Arc<crate::AppState>,
    shutdown: tokio::sync::broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    {
        let mut shutdown_rx = shutdown.subscribe();
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            loop {
                // Exit early if shutdown was requested while we were busy.
                if shutdown_rx.try_recv().is_ok() {
                    tracing::info!("Notification sweep worker received shutdown signal");
                    break;
                }

                // If sweeping is disabled, idle and re-check periodically.
                if !state.config.sweep.enabled {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            tracing::info!("Notification sweep worker shutting down");
                            break;
                        }
                        _ = tokio::time::sleep(std::time::Duration::from_secs(60)) => {}
                    }
                    continue;
                }

                tracing::debug!("Running notification sweeps");

                match state.notifications.process_scheduled_notifications().await {
                    Ok(sent) if sent > 0 => {
                        tracing::info!("Scheduled sweep delivered {} notification(s)", sent);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Scheduled sweep failed: {:?}", e);
                    }
                }

                match state.notifications.retry_failed_notifications().await {
                    Ok(recovered) if recovered > 0 => {
                        tracing::info!("Retry sweep recovered {} notification(s)", recovered);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Retry sweep failed: {:?}", e);
                    }
                }

                // Wait before the next cycle or exit early on shutdown.
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Notification sweep worker shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_secs(
                        state.config.sweep.poll_interval_seconds,
                    )) => {}
                }
            }
        }));
    }

    handles
}
