//! Scripted webhook transport for testing.

use crate::application::ports::{OutboundRequest, WebhookTransport};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Result<u16, TransportError>>,
    fallback: Option<Result<u16, TransportError>>,
    requests: Vec<OutboundRequest>,
    received_at: Vec<Instant>,
}

/// Transport that answers from a script and records every request.
///
/// Scripted replies are consumed in order. Once the script is exhausted the
/// fallback reply is repeated (HTTP 200 unless set otherwise).
///
/// # Examples
///
/// ```
/// use outbound_shield::infrastructure::mocks::ScriptedTransport;
///
/// let transport = ScriptedTransport::new()
///     .then_status(503)
///     .then_status(200);
/// assert_eq!(transport.request_count(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Create a transport that answers 200 to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that always answers with `status`.
    pub fn always_status(status: u16) -> Self {
        let transport = Self::new();
        transport.lock().fallback = Some(Ok(status));
        transport
    }

    /// Create a transport that always fails with `error`.
    pub fn always_error(error: TransportError) -> Self {
        let transport = Self::new();
        transport.lock().fallback = Some(Err(error));
        transport
    }

    /// Queue a status code reply.
    pub fn then_status(self, status: u16) -> Self {
        self.lock().replies.push_back(Ok(status));
        self
    }

    /// Queue a transport failure.
    pub fn then_error(self, error: TransportError) -> Self {
        self.lock().replies.push_back(Err(error));
        self
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Copies of every request received so far.
    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.lock().requests.clone()
    }

    /// When each request arrived, on the tokio clock.
    ///
    /// Under a paused runtime the gaps between entries are exactly the
    /// backoff delays slept between attempts.
    pub fn request_times(&self) -> Vec<Instant> {
        self.lock().received_at.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WebhookTransport for ScriptedTransport {
    async fn post(&self, request: OutboundRequest) -> Result<u16, TransportError> {
        let mut script = self.lock();
        script.requests.push(request);
        script.received_at.push(Instant::now());
        match script.replies.pop_front() {
            Some(reply) => reply,
            None => script.fallback.clone().unwrap_or(Ok(200)),
        }
    }
}
