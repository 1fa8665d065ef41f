//! A2A client: discovers specialists and sends them tasks

use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::*;

#[derive(Debug, Error)]
pub enum A2aClientError {
    #[error("connection refused by {url}")]
    ConnectionRefused {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}: {body}")]
    Http {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("discovery of {url} failed: {reason}")]
    Discovery { url: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl A2aClientError {
    /// Stable name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionRefused { .. } => "ConnectionRefused",
            Self::Http { .. } => "HttpError",
            Self::MalformedResponse { .. } => "MalformedResponse",
            Self::Discovery { .. } => "DiscoveryError",
            Self::Transport { .. } => "TransportError",
        }
    }

    fn from_send(url: &str, source: reqwest::Error) -> Self {
        if source.is_connect() {
            Self::ConnectionRefused {
                url: url.to_string(),
                source,
            }
        } else {
            Self::Transport {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// A2A client; one attempt per call, no retries
#[derive(Clone)]
pub struct A2aClient {
    http: Client,
}

impl Default for A2aClient {
    fn default() -> Self {
        Self::new()
    }
}

impl A2aClient {
    /// Client with a 60s request timeout.
    ///
    /// # Panics
    ///
    /// If the TLS backend cannot be initialized. Use [`A2aClient::with_timeout`]
    /// to handle that case.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(60)).expect("failed to build HTTP client")
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Fetch a specialist's agent card
    pub async fn discover(&self, base_url: &str) -> Result<AgentCard, A2aClientError> {
        let url = format!("{}/.well-known/agent.json", base_url.trim_end_matches('/'));
        debug!("Fetching agent card from {}", url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| A2aClientError::from_send(&url, e))?;

        if !resp.status().is_success() {
            return Err(A2aClientError::Discovery {
                url,
                reason: format!("HTTP {}", resp.status()),
            });
        }

        let card: AgentCard = resp.json().await.map_err(|e| A2aClientError::Discovery {
            url: url.clone(),
            reason: format!("invalid agent card: {e}"),
        })?;

        info!(
            "Discovered agent '{}' at {} ({} skills)",
            card.name,
            base_url,
            card.skills.len()
        );
        Ok(card)
    }

    /// Submit a task and wait for its terminal state
    pub async fn send_task(
        &self,
        base_url: &str,
        params: &TaskSendParams,
    ) -> Result<Task, A2aClientError> {
        let url = format!("{}/tasks/send", base_url.trim_end_matches('/'));
        debug!("Sending task {} to {}", params.id, url);

        let resp = self
            .http
            .post(&url)
            .json(params)
            .send()
            .await
            .map_err(|e| A2aClientError::from_send(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(A2aClientError::Http { url, status, body });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| A2aClientError::Transport {
                url: url.clone(),
                source: e,
            })?;
        let task: Task =
            serde_json::from_str(&body).map_err(|e| A2aClientError::MalformedResponse {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        info!("Task {} finished: {}", task.id, task.state);
        Ok(task)
    }
}
