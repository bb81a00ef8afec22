//! Typed backend seam over the heartbeat transport.
//!
//! The orchestrator talks to generation vendors only through the
//! `Backend` trait; `HttpBackend` is the production implementation.
//! Session restore is not part of this surface; it belongs to the
//! transport's session-loss recovery and is never invoked directly.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::TransportError;
use crate::transport::HeartbeatTransport;
use crate::transport::protocol::{
    Ack, BACKGROUND_ENDPOINT, BackgroundReply, BackgroundRequest, DRAFT_ENDPOINT, DraftReply,
    DraftRequest, INIT_ENDPOINT, InitRequest, REFINE_ENDPOINT, RefineReply, RefineRequest, Reply,
};

/// The backend contract the workflow consumes.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn init(&self, req: &InitRequest) -> Result<Reply<Ack>, TransportError>;
    async fn background(
        &self,
        req: &BackgroundRequest,
    ) -> Result<Reply<BackgroundReply>, TransportError>;
    async fn draft(&self, req: &DraftRequest) -> Result<Reply<DraftReply>, TransportError>;
    async fn refine(&self, req: &RefineRequest) -> Result<Reply<RefineReply>, TransportError>;
}

/// Production backend over HTTP.
pub struct HttpBackend {
    transport: HeartbeatTransport,
}

impl HttpBackend {
    pub fn new(transport: HeartbeatTransport) -> Self {
        Self { transport }
    }

    async fn call<Req, Resp>(&self, endpoint: &str, req: &Req) -> Result<Reply<Resp>, TransportError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body =
            serde_json::to_value(req).map_err(|e| TransportError::Payload(e.to_string()))?;
        decode_reply(self.transport.send(endpoint, &body).await?)
    }
}

/// Decode a terminal payload against the contract type; heartbeats pass
/// through untouched.
fn decode_reply<T: DeserializeOwned>(reply: Reply<Value>) -> Result<Reply<T>, TransportError> {
    match reply {
        Reply::Heartbeat => Ok(Reply::Heartbeat),
        Reply::Terminal(value) => serde_json::from_value(value)
            .map(Reply::Terminal)
            .map_err(|e| TransportError::Payload(e.to_string())),
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn init(&self, req: &InitRequest) -> Result<Reply<Ack>, TransportError> {
        self.call(INIT_ENDPOINT, req).await
    }

    async fn background(
        &self,
        req: &BackgroundRequest,
    ) -> Result<Reply<BackgroundReply>, TransportError> {
        self.call(BACKGROUND_ENDPOINT, req).await
    }

    async fn draft(&self, req: &DraftRequest) -> Result<Reply<DraftReply>, TransportError> {
        self.call(DRAFT_ENDPOINT, req).await
    }

    async fn refine(&self, req: &RefineRequest) -> Result<Reply<RefineReply>, TransportError> {
        self.call(REFINE_ENDPOINT, req).await
    }
}
