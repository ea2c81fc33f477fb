//! Test helpers: a [`Transport`] that replays scripted outcomes.

use crate::transport::{ApiRequest, Transport, TransportError, UpstreamResponse};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

type Outcome = Result<UpstreamResponse, TransportError>;

#[derive(Default)]
struct Script {
    queue: VecDeque<Outcome>,
    fallback: Option<Outcome>,
    calls: Vec<ApiRequest>,
}

/// Answers requests from a queue of outcomes, in order.
///
/// Once the queue is drained the fallback outcome is returned, or a 200 with
/// a `null` body when none is set. Clones share the same script and call log.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    #[must_use]
    pub fn then(self, outcome: Outcome) -> Self {
        self.push(outcome);
        self
    }

    #[must_use]
    pub fn then_status(self, status: u16, body: Value) -> Self {
        self.then(Ok(UpstreamResponse::new(status, body)))
    }

    #[must_use]
    pub fn then_ok(self, body: Value) -> Self {
        self.then(Ok(UpstreamResponse::ok(body)))
    }

    #[must_use]
    pub fn then_error(self, err: TransportError) -> Self {
        self.then(Err(err))
    }

    /// Answer used after the queue runs out.
    #[must_use]
    pub fn otherwise(self, outcome: Outcome) -> Self {
        self.script.lock().fallback = Some(outcome);
        self
    }

    pub fn push(&self, outcome: Outcome) {
        self.script.lock().queue.push_back(outcome);
    }

    /// Requests received so far, in arrival order.
    pub fn calls(&self) -> Vec<ApiRequest> {
        self.script.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.script.lock().calls.len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().queue.len()
    }

    fn next(&self, request: &ApiRequest) -> Outcome {
        let mut script = self.script.lock();
        script.calls.push(request.clone());
        match script.queue.pop_front() {
            Some(outcome) => outcome,
            None => script.fallback.clone().unwrap_or_else(|| Ok(UpstreamResponse::ok(Value::Null))),
        }
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<UpstreamResponse, TransportError> {
        let outcome = self.next(request);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        outcome
    }
}
