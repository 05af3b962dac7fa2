// Remote tool protocol: JSON-RPC 2.0 over streamable HTTP with
// server-sent events. The session id is carried in a response header and
// echoed back on every subsequent request; a lost session is detected from
// a 401/404 and re-established once before retrying the call. The SSE body
// is read incrementally via `eventsource-stream` rather than buffered and
// line-scanned: reads events until it observes the terminating JSON-RPC
// result frame, then closes the stream.

use crate::error::WorkflowError;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "Mcp-Session-Id";

#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Ensures the session has completed `initialize` at least once. The
    /// default no-op suits test doubles and any session that is always
    /// ready; `RemoteToolSession` overrides it to lazily bootstrap (and the
    /// maintenance agent treats a failure here as "server unavailable").
    async fn ensure_initialized(&self) -> Result<(), WorkflowError> {
        Ok(())
    }

    /// Calls a named tool with JSON arguments and returns the JSON-RPC
    /// `result` value, or a `WorkflowError` describing a protocol or logic
    /// failure.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, WorkflowError>;
}

/// One JSON-RPC/SSE session per workflow, scoped to the agent that owns it
/// and released on drop. `next_id` and `session_id` are the only mutable
/// state, guarded individually since calls are not expected to race within
/// a single agent (the coordinator only ever drives one maintenance agent
/// at a time).
pub struct RemoteToolSession {
    base_url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
}

impl RemoteToolSession {
    pub fn new(base_url: impl Into<String>) -> Self {
        RemoteToolSession {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// POSTs an `initialize` request and captures the session identifier
    /// from the response header; all subsequent requests echo it.
    pub async fn initialize(&self) -> Result<(), WorkflowError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id(),
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "plant-agent-core", "version": env!("CARGO_PKG_VERSION") }
            }
        });
        self.do_request(&payload).await?;

        let notif = json!({"jsonrpc": "2.0", "method": "notifications/initialized", "params": {}});
        // Best-effort; servers are not required to reply to a notification.
        let _ = self.do_request(&notif).await;
        Ok(())
    }

    async fn reinitialize(&self) -> Result<(), WorkflowError> {
        *self.session_id.lock().unwrap() = None;
        self.initialize().await
    }

    fn build_request(&self, method: &str, params: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id(),
            "method": method,
            "params": params,
        })
    }

    async fn do_request(&self, payload: &Value) -> Result<Value, WorkflowError> {
        let session_id = self.session_id.lock().unwrap().clone();

        let mut req = self
            .http
            .post(&self.base_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream");
        if let Some(sid) = &session_id {
            req = req.header(SESSION_HEADER, sid.as_str());
        }

        let response = req
            .json(payload)
            .send()
            .await
            .map_err(|e| WorkflowError::ToolProtocolError(format!("transport error: {e}")))?;

        let status = response.status();
        if let Some(sid) = response.headers().get(SESSION_HEADER) {
            if let Ok(sid) = sid.to_str() {
                *self.session_id.lock().unwrap() = Some(sid.to_string());
            }
        }

        if status.as_u16() == 401 || status.as_u16() == 404 {
            return Err(WorkflowError::ToolProtocolError(format!(
                "session rejected with HTTP {status}"
            )));
        }
        if !status.is_success() {
            return Err(WorkflowError::ToolProtocolError(format!(
                "http {status} from maintenance server"
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            self.read_sse_result(response).await
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| WorkflowError::ToolProtocolError(format!("body read failed: {e}")))?;
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&body)
                .map_err(|e| WorkflowError::ToolProtocolError(format!("invalid JSON body: {e}")))
        }
    }

    /// Reads SSE frames until a JSON-RPC response (a `data:` frame carrying
    /// `result` or `error`) is observed, then stops consuming the stream.
    async fn read_sse_result(&self, response: reqwest::Response) -> Result<Value, WorkflowError> {
        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event
                .map_err(|e| WorkflowError::ToolProtocolError(format!("sse stream error: {e}")))?;
            if event.data.trim().is_empty() {
                continue;
            }
            let frame: Value = serde_json::from_str(&event.data)
                .map_err(|e| WorkflowError::ToolProtocolError(format!("invalid sse frame: {e}")))?;
            if frame.get("result").is_some() || frame.get("error").is_some() {
                return Ok(frame);
            }
        }
        Err(WorkflowError::ToolProtocolError(
            "sse stream closed before a result frame arrived".to_string(),
        ))
    }

    fn extract_result(frame: Value, sensor: &str) -> Result<Value, WorkflowError> {
        if let Some(error) = frame.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown tool error")
                .to_string();
            return Err(WorkflowError::ToolLogicError {
                sensor: sensor.to_string(),
                message,
            });
        }
        frame
            .get("result")
            .cloned()
            .ok_or_else(|| WorkflowError::ToolProtocolError("response had neither result nor error".to_string()))
    }
}

#[async_trait]
impl ToolSession for RemoteToolSession {
    async fn ensure_initialized(&self) -> Result<(), WorkflowError> {
        if self.session_id.lock().unwrap().is_some() {
            return Ok(());
        }
        self.initialize().await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, WorkflowError> {
        let sensor = arguments
            .get("sensor_name")
            .and_then(|v| v.as_str())
            .unwrap_or(name)
            .to_string();

        let payload = self.build_request(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        );

        match self.do_request(&payload).await {
            Ok(frame) => Self::extract_result(frame, &sensor),
            Err(WorkflowError::ToolProtocolError(_)) => {
                // Session renewal: re-initialize once and retry.
                self.reinitialize().await?;
                let retry_payload = self.build_request(
                    "tools/call",
                    json!({ "name": name, "arguments": arguments }),
                );
                let frame = self.do_request(&retry_payload).await?;
                Self::extract_result(frame, &sensor)
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;

    /// Hand-written test double returning scripted results per tool
    /// argument.
    pub struct ScriptedToolSession {
        pub by_sensor: HashMap<String, Result<Value, WorkflowError>>,
    }

    #[async_trait]
    impl ToolSession for ScriptedToolSession {
        async fn call_tool(&self, _name: &str, arguments: Value) -> Result<Value, WorkflowError> {
            let sensor = arguments
                .get("sensor_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            match self.by_sensor.get(sensor) {
                Some(Ok(value)) => Ok(value.clone()),
                Some(Err(e)) => Err(e.clone()),
                None => Ok(json!([])),
            }
        }
    }
}
