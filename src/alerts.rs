//! Fire-and-forget operational alerts.
//!
//! Request handlers only ever `try_send` into a bounded queue; a single
//! background worker drains it towards Slack. A slow or unreachable Slack
//! therefore costs dropped alerts, never request latency.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::config::AlertsConfig;

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub message: String,
}

#[derive(Clone)]
pub struct AlertSink {
    queue: mpsc::Sender<Alert>,
}

impl AlertSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        assert!(capacity > 0, "Alert queue capacity must be positive");
        let (queue, receiver) = mpsc::channel(capacity);
        (Self { queue }, receiver)
    }

    /// Never blocks and never fails the caller.
    pub fn notify(&self, message: impl Into<String>) {
        let alert = Alert {
            message: message.into(),
        };
        match self.queue.try_send(alert) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!("Alert queue full, dropping alert: {}", dropped.message);
            }
            Err(TrySendError::Closed(dropped)) => {
                warn!("Alert worker gone, dropping alert: {}", dropped.message);
            }
        }
    }
}

/// Where drained alerts end up.
pub enum AlertDestination {
    Slack(SlackClient),
    Log,
}

impl AlertDestination {
    pub fn from_config(config: &AlertsConfig) -> Result<Self> {
        match (&config.slack_token, &config.slack_channel) {
            (Some(token), Some(channel)) => Ok(Self::Slack(SlackClient::new(
                token.expose(),
                channel,
                config.mention.clone(),
                config.request_timeout(),
            )?)),
            _ => {
                info!("Slack alerting not configured, alerts will only be logged");
                Ok(Self::Log)
            }
        }
    }

    async fn deliver(&self, alert: &Alert) -> Result<()> {
        match self {
            Self::Slack(client) => client.post(&alert.message).await,
            Self::Log => {
                warn!("ALERT: {}", alert.message);
                Ok(())
            }
        }
    }
}

/// Drains the queue until every sender is dropped.
pub async fn run_worker(destination: AlertDestination, mut receiver: mpsc::Receiver<Alert>) {
    info!("Starting alert worker");
    while let Some(alert) = receiver.recv().await {
        if let Err(err) = destination.deliver(&alert).await {
            warn!("Failed to deliver alert: {err:#}");
        }
    }
    debug!("Alert queue closed, worker exiting");
}

pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    channel: String,
    mention: Option<String>,
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: String,
    link_names: bool,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackClient {
    pub fn new(
        token: &str,
        channel: &str,
        mention: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        assert!(!token.is_empty(), "Slack token must be provided");
        assert!(!channel.is_empty(), "Slack channel must be provided");
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Slack HTTP client")?;
        Ok(Self {
            http,
            token: token.to_string(),
            channel: channel.to_string(),
            mention,
        })
    }

    fn render(&self, message: &str) -> String {
        match &self.mention {
            Some(handle) => format!("@{} {message}", handle.trim_start_matches('@')),
            None => message.to_string(),
        }
    }

    async fn post(&self, message: &str) -> Result<()> {
        let body = PostMessage {
            channel: &self.channel,
            text: self.render(message),
            link_names: true,
        };
        let response: PostMessageResponse = self
            .http
            .post(SLACK_POST_MESSAGE_URL)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("Slack request failed")?
            .error_for_status()
            .context("Slack returned an error status")?
            .json()
            .await
            .context("Slack returned an unreadable body")?;
        if !response.ok {
            return Err(anyhow!(
                "Slack rejected message: {}",
                response.error.unwrap_or_else(|| "unknown".to_string())
            ));
        }
        Ok(())
    }
}
