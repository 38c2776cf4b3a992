//! Scripted in-memory gateway for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{AgentGateway, AgentRequest};
use crate::errors::GatewayError;

enum Reply {
    Value(Value),
    Silence,
    Failure,
}

/// Replays a fixed sequence of replies and records every request it sees.
/// Once the script runs out every call answers with silence.
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, value: Value) -> Self {
        self.push(Reply::Value(value))
    }

    pub fn silence(self) -> Self {
        self.push(Reply::Silence)
    }

    /// Script a process failure (non-zero exit).
    pub fn fail(self) -> Self {
        self.push(Reply::Failure)
    }

    fn push(self, reply: Reply) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
        self
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl AgentGateway for ScriptedGateway {
    async fn invoke(&self, request: &AgentRequest) -> Result<Option<Value>, GatewayError> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        match next {
            Some(Reply::Value(v)) => Ok(Some(v)),
            Some(Reply::Failure) => Err(GatewayError::NonZeroExit { exit_code: 1 }),
            Some(Reply::Silence) | None => Ok(None),
        }
    }
}
