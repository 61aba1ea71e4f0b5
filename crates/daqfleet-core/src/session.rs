//! One command/response exchange with a host's control agent.
//!
//! The wire format is plain text: the request is a single CRLF-terminated
//! line, the response is zero or more lines followed by a terminal `ok` or
//! `fail`. A [`Session`] owns exactly one socket and never outlives its
//! exchange; every exit path drops the socket.

use crate::topology::AgentConfig;
use crate::types::Endpoint;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, warn};

const TERMINAL_OK: &str = "ok";
const TERMINAL_FAIL: &str = "fail";

/// Longest response line accepted, newline included.
pub const MAX_LINE_BYTES: u64 = 8 * 1024;

// ---------------------------------------------------------------------------
// SessionPolicy
// ---------------------------------------------------------------------------

/// Retry and timeout bounds for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    pub io_timeout: Duration,
    pub response_timeout: Duration,
    pub max_response_lines: usize,
}

impl From<&AgentConfig> for SessionPolicy {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            connect_attempts: cfg.connect_attempts,
            connect_backoff: Duration::from_millis(cfg.connect_backoff_ms),
            io_timeout: Duration::from_millis(cfg.io_timeout_ms),
            response_timeout: Duration::from_millis(cfg.response_timeout_ms),
            max_response_lines: cfg.max_response_lines,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

// ---------------------------------------------------------------------------
// SessionOutcome / SessionState
// ---------------------------------------------------------------------------

/// Result of one exchange. Response lines never include the terminal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SessionOutcome {
    Ok(Vec<String>),
    Fail(Vec<String>),
    ConnectFailed { reason: String },
    /// No terminal line within the time or line bound, or the peer closed early.
    ProtocolTimeout(Vec<String>),
}

impl SessionOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, SessionOutcome::Ok(_))
    }

    pub fn is_connect_failed(&self) -> bool {
        matches!(self, SessionOutcome::ConnectFailed { .. })
    }

    pub fn lines(&self) -> &[String] {
        match self {
            SessionOutcome::Ok(lines)
            | SessionOutcome::Fail(lines)
            | SessionOutcome::ProtocolTimeout(lines) => lines,
            SessionOutcome::ConnectFailed { .. } => &[],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Ok(_) => "ok",
            SessionOutcome::Fail(_) => "fail",
            SessionOutcome::ConnectFailed { .. } => "connect_failed",
            SessionOutcome::ProtocolTimeout(_) => "protocol_timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Connected,
    AwaitingResponse,
    Closed,
    Failed,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct Session {
    endpoint: Endpoint,
    policy: SessionPolicy,
    state: SessionState,
    conn: Option<Connection>,
    connect_error: Option<String>,
}

impl Session {
    /// Open a connection, retrying per `policy`. Never fails outright: a
    /// session that could not connect reports `ConnectFailed` when read.
    pub async fn connect(endpoint: Endpoint, policy: SessionPolicy) -> Self {
        let mut session = Self {
            endpoint,
            policy,
            state: SessionState::Connecting,
            conn: None,
            connect_error: None,
        };

        let addr = session.endpoint.to_string();
        let attempts = session.policy.connect_attempts;
        let mut last_error = String::from("no connect attempts configured");

        for attempt in 1..=attempts {
            match timeout(session.policy.io_timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => {
                    let (reader, writer) = stream.into_split();
                    session.conn = Some(Connection {
                        reader: BufReader::new(reader),
                        writer,
                    });
                    session.state = SessionState::Connected;
                    debug!(endpoint = %addr, attempt, "connected to agent");
                    return session;
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("timed out after {:?}", session.policy.io_timeout)
                }
            }
            debug!(endpoint = %addr, attempt, error = %last_error, "connect attempt failed");
            if attempt < attempts {
                sleep(session.policy.connect_backoff).await;
            }
        }

        session.state = SessionState::Failed;
        session.connect_error = Some(format!(
            "could not connect to {addr} after {attempts} attempts: {last_error}"
        ));
        session
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Write the request line followed by CRLF.
    ///
    /// Returns false when the session is not open or the write fails; a
    /// failed write closes the socket and the exchange ends as a protocol
    /// timeout with no lines.
    pub async fn send(&mut self, line: &str) -> bool {
        let Some(conn) = self.conn.as_mut() else {
            return false;
        };
        let frame = format!("{line}\r\n");
        let result = timeout(self.policy.io_timeout, write_frame(&mut conn.writer, &frame)).await;
        match result {
            Ok(Ok(())) => {
                self.state = SessionState::AwaitingResponse;
                true
            }
            Ok(Err(e)) => {
                warn!(endpoint = %self.endpoint, error = %e, "write to agent failed");
                self.abort();
                false
            }
            Err(_) => {
                warn!(endpoint = %self.endpoint, "write to agent timed out");
                self.abort();
                false
            }
        }
    }

    /// Read the response and close the socket.
    pub async fn read_response(&mut self) -> SessionOutcome {
        let deadline = Instant::now() + self.policy.response_timeout;
        self.read_response_until(deadline).await
    }

    /// Like [`Session::read_response`], bounded by an absolute deadline
    /// shared with other sessions.
    pub async fn read_response_until(&mut self, deadline: Instant) -> SessionOutcome {
        if let Some(reason) = &self.connect_error {
            return SessionOutcome::ConnectFailed {
                reason: reason.clone(),
            };
        }
        let Some(mut conn) = self.conn.take() else {
            return SessionOutcome::ProtocolTimeout(Vec::new());
        };

        let mut lines = Vec::new();
        let mut buf = String::new();

        let outcome = loop {
            if lines.len() >= self.policy.max_response_lines {
                debug!(endpoint = %self.endpoint, "response line cap reached");
                break SessionOutcome::ProtocolTimeout(lines);
            }
            buf.clear();
            let mut limited = (&mut conn.reader).take(MAX_LINE_BYTES);
            match timeout_at(deadline, limited.read_line(&mut buf)).await {
                Err(_) => {
                    debug!(endpoint = %self.endpoint, "response deadline passed");
                    break SessionOutcome::ProtocolTimeout(lines);
                }
                Ok(Err(e)) => {
                    debug!(endpoint = %self.endpoint, error = %e, "read from agent failed");
                    break SessionOutcome::ProtocolTimeout(lines);
                }
                Ok(Ok(0)) => break SessionOutcome::ProtocolTimeout(lines),
                Ok(Ok(n)) if n as u64 >= MAX_LINE_BYTES && !buf.ends_with('\n') => {
                    debug!(endpoint = %self.endpoint, "response line too long");
                    break SessionOutcome::ProtocolTimeout(lines);
                }
                Ok(Ok(_)) => {
                    let line = buf.trim_end_matches(['\r', '\n']);
                    match line {
                        TERMINAL_OK => break SessionOutcome::Ok(lines),
                        TERMINAL_FAIL => break SessionOutcome::Fail(lines),
                        _ => lines.push(line.to_string()),
                    }
                }
            }
        };

        drop(conn);
        self.state = SessionState::Closed;
        outcome
    }

    fn abort(&mut self) {
        self.conn = None;
        self.state = SessionState::Failed;
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &str) -> io::Result<()> {
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}

/// Connect, send one line, read the response.
pub async fn execute(endpoint: &Endpoint, line: &str, policy: &SessionPolicy) -> SessionOutcome {
    let mut session = Session::connect(endpoint.clone(), policy.clone()).await;
    if session.is_open() {
        session.send(line).await;
    }
    session.read_response().await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
