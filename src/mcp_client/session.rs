//! RPC session — one child process and its JSON-RPC conversation.
//!
//! Lifecycle: `NotStarted → Starting → Initializing → Ready → Closing → Closed`.
//! Any failure before `Ready` goes straight to `Closed`. Requests are
//! serialized per session: the exchange lock is held from the moment a
//! request is written until its response is read, so at most one request is
//! ever outstanding and two callers can never read each other's response.

use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::transport::LineTransport;
use super::types::{
    error_codes, Implementation, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ServerConfig, ToolDescriptor, PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default bound on spawn + initialize handshake.
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a single request/response exchange.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the stderr drain to catch up after the peer hangs up.
const STDERR_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Stderr tail kept for diagnostics, in bytes.
const MAX_STDERR_CHARS: usize = 2000;

type ChildTransport = LineTransport<ChildStdout, ChildStdin>;

// ─── SessionState ────────────────────────────────────────────────────────────

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Starting,
    Initializing,
    Ready,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::NotStarted => "not_started",
            SessionState::Starting => "starting",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A request written to the server and not yet answered.
#[derive(Debug)]
struct PendingRequest {
    id: u64,
    method: String,
    created_at: Instant,
}

/// How an incoming message relates to the outstanding request.
#[derive(Debug)]
enum Incoming {
    /// The response to the outstanding request.
    Matched(JsonRpcResponse),
    /// A response to an earlier request abandoned after a timeout.
    Stale(u64),
    /// A server-initiated request (`Some(id)`) or notification (`None`).
    ServerMessage {
        id: Option<serde_json::Value>,
        method: String,
    },
}

// ─── McpSession ──────────────────────────────────────────────────────────────

/// Client-side connection to one running tool server.
pub struct McpSession {
    config: ServerConfig,
    client_info: Implementation,
    state: Mutex<SessionState>,
    /// Per-session, strictly increasing.
    next_id: AtomicU64,
    /// Held across write + read of one exchange.
    exchange: tokio::sync::Mutex<()>,
    transport: Option<ChildTransport>,
    /// Behind a mutex only so the session is `Sync`; touched from `&mut self`.
    child: Mutex<Option<Child>>,
    /// Tail of the server's stderr, at most `MAX_STDERR_CHARS` bytes.
    stderr_tail: Arc<Mutex<String>>,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
    server_info: Option<Implementation>,
}

impl McpSession {
    /// Create a session for `config`. Nothing is spawned until [`start`](Self::start).
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            client_info: Implementation {
                name: "toolbridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            state: Mutex::new(SessionState::NotStarted),
            next_id: AtomicU64::new(1),
            exchange: tokio::sync::Mutex::new(()),
            transport: None,
            child: Mutex::new(None),
            stderr_tail: Arc::new(Mutex::new(String::new())),
            stderr_task: Mutex::new(None),
            server_info: None,
        }
    }

    /// The configured server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `serverInfo` reported during the handshake, if any.
    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    fn set_state(&self, state: SessionState) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard != state {
            tracing::debug!(server = %self.config.name, from = %*guard, to = %state, "session state");
            *guard = state;
        }
    }

    fn startup_timeout(&self) -> Duration {
        self.config
            .startup_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT)
    }

    fn call_timeout(&self) -> Duration {
        self.config
            .call_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CALL_TIMEOUT)
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Spawn the server and perform the MCP handshake.
    ///
    /// Bounded by the startup timeout. On any failure the child is killed,
    /// the session is `Closed`, and the error carries captured stderr.
    pub async fn start(&mut self) -> Result<(), McpError> {
        let state = self.state();
        if state != SessionState::NotStarted {
            return Err(McpError::NotReady {
                server: self.config.name.clone(),
                state: state.to_string(),
            });
        }

        let started = Instant::now();
        let timeout = self.startup_timeout();
        self.set_state(SessionState::Starting);

        let outcome = tokio::time::timeout(timeout, self.connect()).await;

        let err = match outcome {
            Ok(Ok(())) => {
                self.set_state(SessionState::Ready);
                tracing::info!(
                    server = %self.config.name,
                    server_name = self.server_info.as_ref().map(|i| i.name.as_str()).unwrap_or(""),
                    server_version = self.server_info.as_ref().map(|i| i.version.as_str()).unwrap_or(""),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "MCP server ready"
                );
                return Ok(());
            }
            Ok(Err(e @ (McpError::SpawnFailed { .. } | McpError::InitFailed { .. }))) => e,
            Ok(Err(e)) => McpError::InitFailed {
                name: self.config.name.clone(),
                reason: e.to_string(),
            },
            Err(_) => McpError::InitFailed {
                name: self.config.name.clone(),
                reason: format!("initialization timed out after {}s", timeout.as_secs()),
            },
        };

        self.force_kill().await;
        let stderr = self.take_stderr_tail().await;
        if !stderr.is_empty() {
            tracing::warn!(
                server = %self.config.name,
                stderr = %stderr,
                "server stderr captured on failure"
            );
        }
        self.set_state(SessionState::Closed);

        Err(match err {
            McpError::InitFailed { name, reason }
                if !stderr.is_empty() && !reason.contains(stderr.trim()) =>
            {
                McpError::InitFailed {
                    name,
                    reason: format!("{reason} | stderr: {}", stderr.trim()),
                }
            }
            other => other,
        })
    }

    /// Spawn the child process and run the handshake.
    async fn connect(&mut self) -> Result<(), McpError> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| McpError::SpawnFailed {
                name: self.config.name.clone(),
                reason: "empty command".into(),
            })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.cwd {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        tracing::info!(server = %self.config.name, command = ?self.config.command, "starting MCP server");

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: self.config.name.clone(),
            reason: format!("{e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::SpawnFailed {
            name: self.config.name.clone(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::SpawnFailed {
            name: self.config.name.clone(),
            reason: "failed to capture stdout".into(),
        })?;
        if let Some(stderr) = child.stderr.take() {
            let handle = spawn_stderr_drain(
                self.config.name.clone(),
                stderr,
                Arc::clone(&self.stderr_tail),
            );
            *self.stderr_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }

        *self.child_slot() = Some(child);
        self.transport = Some(LineTransport::new(&self.config.name, stdout, stdin));
        self.set_state(SessionState::Initializing);

        self.handshake().await
    }

    /// `initialize` request, then the `notifications/initialized` notification.
    async fn handshake(&mut self) -> Result<(), McpError> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: self.client_info.clone(),
        };
        let params = serde_json::to_value(params).map_err(|e| McpError::InitFailed {
            name: self.config.name.clone(),
            reason: format!("failed to encode initialize params: {e}"),
        })?;

        let result = self.send_request("initialize", Some(params)).await?;

        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InitFailed {
                name: self.config.name.clone(),
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        if let Some(version) = init.protocol_version.as_deref() {
            if version != PROTOCOL_VERSION {
                tracing::warn!(
                    server = %self.config.name,
                    server_version = version,
                    client_version = PROTOCOL_VERSION,
                    "protocol version mismatch"
                );
            }
        }
        self.server_info = init.server_info;

        self.send_notification("notifications/initialized", None).await
    }

    /// Stop the server: close its stdin, wait up to 5s, then kill.
    ///
    /// Idempotent; always leaves the session `Closed`.
    pub async fn stop(&mut self) {
        if self.transport.is_none() && self.child_slot().is_none() {
            self.set_state(SessionState::Closed);
            return;
        }

        self.set_state(SessionState::Closing);
        tracing::info!(server = %self.config.name, "stopping MCP server");

        // Closing stdin is the stdio transport's terminate signal.
        if let Some(transport) = self.transport.take() {
            transport.close_writer().await;
        }

        let child = self.child_slot().take();
        if let Some(mut child) = child {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %self.config.name, %status, "server exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(server = %self.config.name, error = %e, "failed to wait for server");
                    let _ = child.kill().await;
                }
                Err(_) => {
                    tracing::warn!(
                        server = %self.config.name,
                        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                        "server did not exit in time, killing"
                    );
                    if let Err(e) = child.kill().await {
                        tracing::warn!(server = %self.config.name, error = %e, "failed to kill server");
                    }
                }
            }
        }

        if let Some(handle) = self.stderr_task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
        self.set_state(SessionState::Closed);
    }

    fn child_slot(&mut self) -> &mut Option<Child> {
        self.child.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    async fn force_kill(&mut self) {
        self.transport = None;
        let child = self.child_slot().take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
        }
    }

    /// Collect the stderr tail, giving the drain task a moment to finish.
    async fn take_stderr_tail(&self) -> String {
        let handle = self
            .stderr_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(STDERR_DRAIN_GRACE, handle).await;
        }
        self.stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ─── Requests ────────────────────────────────────────────────────────

    fn ensure_ready(&self) -> Result<(), McpError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            state => Err(McpError::NotReady {
                server: self.config.name.clone(),
                state: state.to_string(),
            }),
        }
    }

    /// Send a request and wait for its result.
    ///
    /// JSON-RPC errors become [`McpError::Rpc`] and leave the session
    /// usable; transport failures close it.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        self.ensure_ready()?;
        self.send_request(method, params).await
    }

    /// Send a notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.ensure_ready()?;
        self.send_notification(method, params).await
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let transport = self.transport()?;
        let notification = JsonRpcNotification::new(method, params);
        if let Err(e) = transport.write_message(&notification).await {
            self.set_state(SessionState::Closed);
            return Err(e);
        }
        Ok(())
    }

    fn transport(&self) -> Result<&ChildTransport, McpError> {
        self.transport.as_ref().ok_or_else(|| McpError::NotReady {
            server: self.config.name.clone(),
            state: self.state().to_string(),
        })
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let transport = self.transport()?;
        let _exchange = self.exchange.lock().await;

        let pending = PendingRequest {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            method: method.to_string(),
            created_at: Instant::now(),
        };

        let request = JsonRpcRequest::new(pending.id, method, params);
        if let Err(e) = transport.write_message(&request).await {
            self.set_state(SessionState::Closed);
            return Err(e);
        }

        let timeout = self.call_timeout();
        let outcome = tokio::time::timeout(timeout, self.await_response(transport, &pending)).await;

        let elapsed_ms = pending.created_at.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(response)) => {
                tracing::debug!(
                    server = %self.config.name,
                    id = pending.id,
                    method = %pending.method,
                    elapsed_ms,
                    "request completed"
                );
                extract_result(response, &self.config.name, &pending.method)
            }
            Ok(Err(e)) => {
                if e.is_fatal() {
                    self.set_state(SessionState::Closed);
                }
                tracing::warn!(
                    server = %self.config.name,
                    id = pending.id,
                    method = %pending.method,
                    error = %e,
                    "request failed"
                );
                Err(e)
            }
            Err(_) => {
                tracing::warn!(
                    server = %self.config.name,
                    id = pending.id,
                    method = %pending.method,
                    elapsed_ms,
                    "request timed out"
                );
                Err(McpError::Timeout {
                    server: self.config.name.clone(),
                    method: pending.method.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Read until the response for `pending` arrives.
    async fn await_response(
        &self,
        transport: &ChildTransport,
        pending: &PendingRequest,
    ) -> Result<JsonRpcResponse, McpError> {
        loop {
            let Some(message) = transport.read_message().await? else {
                return Err(McpError::ConnectionClosed {
                    server: self.config.name.clone(),
                    stderr: self.take_stderr_tail().await,
                });
            };

            match classify(message, pending.id, &self.config.name)? {
                Incoming::Matched(response) => return Ok(response),
                Incoming::Stale(id) => {
                    tracing::warn!(
                        server = %self.config.name,
                        id,
                        pending = pending.id,
                        "discarding response to abandoned request"
                    );
                }
                Incoming::ServerMessage { id: None, method } => {
                    tracing::debug!(server = %self.config.name, %method, "ignoring server notification");
                }
                Incoming::ServerMessage { id: Some(id), method } => {
                    let reply = if method == "ping" {
                        JsonRpcResponse::success(id, serde_json::json!({}))
                    } else {
                        JsonRpcResponse::failure(
                            id,
                            error_codes::METHOD_NOT_FOUND,
                            format!("client does not support '{method}'"),
                        )
                    };
                    transport.write_message(&reply).await?;
                }
            }
        }
    }

    // ─── MCP Operations ──────────────────────────────────────────────────

    /// `tools/list`, mapped to descriptors.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let result = self.request("tools/list", None).await?;

        let Some(tools) = result.get("tools") else {
            return Ok(Vec::new());
        };

        serde_json::from_value(tools.clone()).map_err(|e| McpError::InvalidResult {
            server: self.config.name.clone(),
            method: "tools/list".into(),
            reason: e.to_string(),
        })
    }

    /// `tools/call`, reduced to text.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, McpError> {
        let arguments = if arguments.is_null() {
            serde_json::json!({})
        } else {
            arguments
        };
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let result = self
            .request("tools/call", Some(params))
            .await
            .map_err(|e| e.for_tool(name))?;
        Ok(extract_text(&result))
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        if self.child_slot().is_some() {
            // `kill_on_drop` reaps the process; this is only a diagnostic.
            tracing::warn!(server = %self.config.name, "session dropped without stop()");
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Relate an incoming message to the outstanding request id.
fn classify(
    message: serde_json::Value,
    pending_id: u64,
    server: &str,
) -> Result<Incoming, McpError> {
    if let Some(method) = message.get("method").and_then(|m| m.as_str()) {
        return Ok(Incoming::ServerMessage {
            id: message.get("id").cloned(),
            method: method.to_string(),
        });
    }

    let response: JsonRpcResponse =
        serde_json::from_value(message).map_err(|e| McpError::TransportParse {
            server: server.to_string(),
            reason: format!("not a JSON-RPC response: {e}"),
        })?;

    match response.id.as_u64() {
        Some(id) if id == pending_id => Ok(Incoming::Matched(response)),
        Some(id) if id < pending_id => Ok(Incoming::Stale(id)),
        _ => Err(McpError::TransportParse {
            server: server.to_string(),
            reason: format!(
                "response id {} does not match pending request {pending_id}",
                response.id
            ),
        }),
    }
}

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
fn extract_result(
    response: JsonRpcResponse,
    server: &str,
    method: &str,
) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::Rpc {
            server: server.to_string(),
            method: method.to_string(),
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or_else(|| McpError::Rpc {
        server: server.to_string(),
        method: method.to_string(),
        code: Some(error_codes::INTERNAL_ERROR),
        message: "response missing both result and error".into(),
        data: None,
    })
}

/// Join all `text` content blocks with newlines; fall back to the raw result.
fn extract_text(result: &serde_json::Value) -> String {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if texts.is_empty() {
        result.to_string()
    } else {
        texts.join("\n")
    }
}

/// Continuously drain a child's stderr so it can never block on a full pipe.
///
/// Lines are decoded lossily; only EOF or an I/O error ends the drain.
fn spawn_stderr_drain<R>(server: String, stderr: R, tail: Arc<Mutex<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(server = %server, error = %e, "stderr drain stopped");
                    break;
                }
            }

            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            tracing::debug!(server = %server, line = %line, "server stderr");
            let mut buf = tail.lock().unwrap_or_else(PoisonError::into_inner);
            buf.push_str(line);
            buf.push('\n');
            trim_front(&mut buf, MAX_STDERR_CHARS);
        }
    })
}

/// Keep only the last `max` bytes of `buf`, cut on a char boundary.
fn trim_front(buf: &mut String, max: usize) {
    if buf.len() <= max {
        return;
    }
    let mut cut = buf.len() - max;
    while !buf.is_char_boundary(cut) {
        cut += 1;
    }
    buf.drain(..cut);
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_joins_text_blocks() {
        let result = serde_json::json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "...", "mimeType": "image/png"},
                {"type": "text", "text": "line two"}
            ]
        });
        assert_eq!(extract_text(&result), "line one\nline two");
    }

    #[test]
    fn test_extract_text_falls_back_to_raw_result() {
        let result = serde_json::json!({"content": [{"type": "image", "data": "x"}]});
        assert_eq!(extract_text(&result), result.to_string());

        let bare = serde_json::json!({"value": 3});
        assert_eq!(extract_text(&bare), r#"{"value":3}"#);
    }

    #[test]
    fn test_extract_result_rpc_error() {
        let resp: JsonRpcResponse = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0", "id": 4, "error": {"code": -32601, "message": "Method not found"}
        }))
        .unwrap();
        match extract_result(resp, "alpha", "tools/list").unwrap_err() {
            McpError::Rpc {
                server,
                method,
                code,
                message,
                ..
            } => {
                assert_eq!(server, "alpha");
                assert_eq!(method, "tools/list");
                assert_eq!(code, Some(-32601));
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected Rpc, got {other:?}"),
        }
    }

    #[test]
    fn test_extract_result_missing_both() {
        let resp: JsonRpcResponse =
            serde_json::from_value(serde_json::json!({"jsonrpc": "2.0", "id": 1})).unwrap();
        assert!(matches!(
            extract_result(resp, "alpha", "ping"),
            Err(McpError::Rpc { .. })
        ));
    }

    #[test]
    fn test_classify_matched_stale_and_mismatch() {
        let matched = classify(serde_json::json!({"jsonrpc": "2.0", "id": 5, "result": {}}), 5, "s");
        assert!(matches!(matched, Ok(Incoming::Matched(_))));

        let stale = classify(serde_json::json!({"jsonrpc": "2.0", "id": 3, "result": {}}), 5, "s");
        assert!(matches!(stale, Ok(Incoming::Stale(3))));

        let ahead = classify(serde_json::json!({"jsonrpc": "2.0", "id": 9, "result": {}}), 5, "s");
        assert!(matches!(ahead, Err(McpError::TransportParse { .. })));

        let null_id = classify(
            serde_json::json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "x"}}),
            5,
            "s",
        );
        assert!(matches!(null_id, Err(McpError::TransportParse { .. })));
    }

    #[test]
    fn test_classify_server_messages() {
        let note = classify(
            serde_json::json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}}),
            1,
            "s",
        )
        .unwrap();
        assert!(matches!(note, Incoming::ServerMessage { id: None, .. }));

        let req = classify(serde_json::json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}), 1, "s")
            .unwrap();
        match req {
            Incoming::ServerMessage { id: Some(id), method } => {
                assert_eq!(id, 7);
                assert_eq!(method, "ping");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stderr_drain_survives_invalid_utf8() {
        use tokio::io::AsyncWriteExt;

        let (mut child_side, drain_side) = tokio::io::duplex(64);
        let tail = Arc::new(Mutex::new(String::new()));
        let handle = spawn_stderr_drain("junk".into(), drain_side, Arc::clone(&tail));

        child_side.write_all(b"\xff\xfe bad bytes\n").await.unwrap();
        // Far more than the duplex buffer: only a live drain lets this finish.
        for i in 0..200 {
            child_side
                .write_all(format!("line {i} {}\n", "x".repeat(40)).as_bytes())
                .await
                .unwrap();
        }
        child_side.write_all(b"last words\n").await.unwrap();
        drop(child_side);
        handle.await.unwrap();

        let tail = tail.lock().unwrap().clone();
        assert!(tail.ends_with("last words\n"), "tail was: {tail:?}");
        assert!(tail.len() <= MAX_STDERR_CHARS);

        let (mut child_side, drain_side) = tokio::io::duplex(64);
        let tail = Arc::new(Mutex::new(String::new()));
        let handle = spawn_stderr_drain("junk".into(), drain_side, Arc::clone(&tail));
        child_side.write_all(b"\xff\xfe bad bytes\r\n").await.unwrap();
        drop(child_side);
        handle.await.unwrap();
        assert_eq!(*tail.lock().unwrap(), "\u{FFFD}\u{FFFD} bad bytes\n");
    }

    #[test]
    fn test_trim_front_keeps_tail() {
        let mut buf = "abcdef".to_string();
        trim_front(&mut buf, 4);
        assert_eq!(buf, "cdef");

        let mut multibyte = "ééé".to_string(); // 6 bytes
        trim_front(&mut multibyte, 3);
        assert_eq!(multibyte, "é");
    }

    #[tokio::test]
    async fn test_request_before_start_is_not_ready() {
        let session = McpSession::new(ServerConfig::new("demo", ["demo-server"]));
        let err = session.request("tools/list", None).await.unwrap_err();
        match err {
            McpError::NotReady { server, state } => {
                assert_eq!(server, "demo");
                assert_eq!(state, "not_started");
            }
            other => panic!("expected NotReady, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_closes_session() {
        let mut session = McpSession::new(ServerConfig::new(
            "ghost",
            ["toolbridge-definitely-missing-binary-7f3a"],
        ));
        let err = session.start().await.unwrap_err();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
        assert_eq!(session.state(), SessionState::Closed);

        // Idempotent stop on a closed session.
        session.stop().await;
        session.stop().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_empty_command_is_spawn_failure() {
        let mut session = McpSession::new(ServerConfig::new("empty", Vec::<String>::new()));
        let err = session.start().await.unwrap_err();
        assert!(err.to_string().contains("empty command"));
    }

    #[tokio::test]
    async fn test_stop_never_started_is_noop() {
        let mut session = McpSession::new(ServerConfig::new("demo", ["demo-server"]));
        session.stop().await;
        assert_eq!(session.state(), SessionState::Closed);
    }
}
