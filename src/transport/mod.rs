//! Heartbeat-aware backend transport.
//!
//! One place owns response classification and the two bounded recovery
//! paths: a lost server session triggers exactly one resynchronization
//! (pushing the client's full session snapshot) followed by one retry of
//! the original call, and a rejected validation token triggers exactly
//! one refresh followed by one retry. Nothing here retries beyond those
//! bounds; any further retry is an explicit caller action.

pub mod protocol;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::session::SessionStore;
use protocol::{RESTORE_ENDPOINT, Reply};

/// "Still running"; filtered out before any error classification.
pub const HEARTBEAT_STATUS: u16 = 202;
/// The distinguished "session lost, resync required" status.
pub const SESSION_LOST_STATUS: u16 = 409;
/// Validation-token rejection, recoverable by one refresh.
pub const TOKEN_REJECTED_STATUS: u16 = 422;

/// One response, sorted into exactly one bucket.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Terminal(Value),
    Heartbeat,
    SessionLost,
    TokenRejected,
    Auth,
    Backend { status: u16, detail: String },
}

/// Pure status/body classification; testable without a socket.
pub fn classify(status: u16, body: &str) -> Classified {
    match status {
        HEARTBEAT_STATUS => Classified::Heartbeat,
        200..=299 => Classified::Terminal(serde_json::from_str(body).unwrap_or(Value::Null)),
        401 | 403 => Classified::Auth,
        SESSION_LOST_STATUS => Classified::SessionLost,
        TOKEN_REJECTED_STATUS => Classified::TokenRejected,
        status => Classified::Backend {
            status,
            detail: extract_detail(body),
        },
    }
}

/// Pull a human-readable detail out of a structured error body, falling
/// back to the raw text. The transport populates this once; nothing
/// downstream re-parses formatted strings.
pub fn extract_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for found in [
            value.pointer("/error/message").and_then(Value::as_str),
            value.get("error").and_then(Value::as_str),
            value.get("detail").and_then(Value::as_str),
            value.get("message").and_then(Value::as_str),
        ]
        .into_iter()
        .flatten()
        {
            return found.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no error detail provided".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Issues validation tokens. The production implementation talks to the
/// token service; the CLI uses a static configured token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn refresh(&self) -> Result<String, TransportError>;
}

/// A fixed token from configuration. A refresh re-issues the same value,
/// which is correct for long-lived personal tokens: if the server still
/// rejects it, the transport surfaces `Validation`.
pub struct StaticTokenSource(pub String);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn refresh(&self) -> Result<String, TransportError> {
        Ok(self.0.clone())
    }
}

/// Raw request execution, separated so recovery logic is testable with a
/// scripted wire.
#[async_trait]
trait Wire: Send + Sync {
    async fn post(
        &self,
        url: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<(u16, String), TransportError>;
}

struct HttpWire {
    client: reqwest::Client,
}

#[async_trait]
impl Wire for HttpWire {
    async fn post(
        &self,
        url: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<(u16, String), TransportError> {
        let mut req = self.client.post(url).json(body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok((status, text))
    }
}

/// The backend transport. See the module docs for the recovery bounds.
pub struct HeartbeatTransport {
    wire: Arc<dyn Wire>,
    base_url: String,
    token: Mutex<Option<String>>,
    tokens: Arc<dyn TokenSource>,
    session: Arc<SessionStore>,
}

impl HeartbeatTransport {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        tokens: Arc<dyn TokenSource>,
        session: Arc<SessionStore>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self::with_wire(
            Arc::new(HttpWire { client }),
            base_url,
            tokens,
            session,
        ))
    }

    fn with_wire(
        wire: Arc<dyn Wire>,
        base_url: &str,
        tokens: Arc<dyn TokenSource>,
        session: Arc<SessionStore>,
    ) -> Self {
        Self {
            wire,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
            tokens,
            session,
        }
    }

    /// Seed the validation token, e.g. from configuration.
    pub async fn set_token(&self, token: &str) {
        *self.token.lock().await = Some(token.to_string());
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Send one request and classify the response.
    ///
    /// `SessionLost` and `TokenRejected` are recovered here, each exactly
    /// once and non-recursively; every other failure propagates to the
    /// caller as the card-local error it becomes.
    pub async fn send(&self, endpoint: &str, body: &Value) -> Result<Reply<Value>, TransportError> {
        match self.post_classified(endpoint, body).await? {
            Classified::Terminal(v) => Ok(Reply::Terminal(v)),
            Classified::Heartbeat => Ok(Reply::Heartbeat),
            Classified::Auth => Err(TransportError::Auth),
            Classified::Backend { status, detail } => {
                Err(TransportError::Backend { status, detail })
            }
            Classified::SessionLost => {
                warn!(endpoint, "server session lost; resyncing once");
                self.resync().await?;
                Self::settle(self.post_classified(endpoint, body).await?)
            }
            Classified::TokenRejected => {
                debug!(endpoint, "validation token rejected; refreshing once");
                let fresh = self.tokens.refresh().await?;
                *self.token.lock().await = Some(fresh);
                Self::settle(self.post_classified(endpoint, body).await?)
            }
        }
    }

    /// Terminal mapping for the single permitted retry: a repeat of the
    /// recoverable condition becomes the error, with no further recovery.
    fn settle(classified: Classified) -> Result<Reply<Value>, TransportError> {
        match classified {
            Classified::Terminal(v) => Ok(Reply::Terminal(v)),
            Classified::Heartbeat => Ok(Reply::Heartbeat),
            Classified::SessionLost => Err(TransportError::SessionLost),
            Classified::TokenRejected => Err(TransportError::Validation),
            Classified::Auth => Err(TransportError::Auth),
            Classified::Backend { status, detail } => {
                Err(TransportError::Backend { status, detail })
            }
        }
    }

    async fn post_classified(
        &self,
        endpoint: &str,
        body: &Value,
    ) -> Result<Classified, TransportError> {
        let token = self.token.lock().await.clone();
        let (status, text) = self
            .wire
            .post(&self.url(endpoint), token.as_deref(), body)
            .await?;
        Ok(classify(status, &text))
    }

    /// Push the full client-held session snapshot to the restore
    /// endpoint. Anything but a terminal answer means the session could
    /// not be rebuilt.
    async fn resync(&self) -> Result<(), TransportError> {
        let body = serde_json::to_value(self.session.restore_request())
            .map_err(|e| TransportError::Payload(e.to_string()))?;
        match self.post_classified(RESTORE_ENDPOINT, &body).await? {
            Classified::Terminal(_) => {
                debug!("session restored");
                Ok(())
            }
            Classified::Auth => Err(TransportError::Auth),
            _ => Err(TransportError::SessionLost),
        }
    }
}
