// --- Media-process channel (mpv JSON IPC) ---------------------------------
//
// mpv speaks newline-delimited JSON on its `--input-ipc-server` socket:
//   request:  {"command": ["get_property", "time-pos"]}\n
//   response: {"data": 12.3, "error": "success"}\n
//
// Every `send` is a fresh connect / write / read / close. The channel keeps no
// state between calls and never retries; callers own the retry policy.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, warn};

/// Per-command timeout, covering connect, write and read.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    Absolute,
    Relative,
}

impl SeekMode {
    fn as_str(self) -> &'static str {
        match self {
            SeekMode::Absolute => "absolute",
            SeekMode::Relative => "relative",
        }
    }
}

/// Structured command understood by the player process.
#[derive(Debug, Clone, PartialEq)]
pub enum MpvCommand {
    SetProperty(&'static str, Value),
    GetProperty(&'static str),
    Seek(f64, SeekMode),
}

impl MpvCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            MpvCommand::SetProperty(..) => "set_property",
            MpvCommand::GetProperty(_) => "get_property",
            MpvCommand::Seek(..) => "seek",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            MpvCommand::SetProperty(name, value) => {
                json!({ "command": ["set_property", name, value] })
            }
            MpvCommand::GetProperty(name) => json!({ "command": ["get_property", name] }),
            MpvCommand::Seek(amount, mode) => {
                json!({ "command": ["seek", amount, mode.as_str()] })
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MpvReply {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl MpvReply {
    pub fn is_success(&self) -> bool {
        self.error.as_deref().map_or(true, |e| e == "success")
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.data.as_ref().and_then(Value::as_f64)
    }
}

/// Narrow command/response capability the supervisor drives the player through.
///
/// `None` means "no usable answer": socket missing, connect failure, timeout or
/// a malformed reply. Implementations log the cause themselves.
pub trait MediaChannel: Send + Sync {
    fn send(&self, command: MpvCommand) -> impl Future<Output = Option<MpvReply>> + Send;
}

/// Unix-socket channel to a running mpv.
#[derive(Debug, Clone)]
pub struct MpvIpc {
    socket_path: PathBuf,
    timeout: Duration,
}

impl MpvIpc {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: SEND_TIMEOUT,
        }
    }

    async fn round_trip(&self, command: &MpvCommand) -> anyhow::Result<MpvReply> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (rd, mut wr) = stream.into_split();

        let mut line = serde_json::to_string(&command.to_json())?;
        line.push('\n');
        wr.write_all(line.as_bytes()).await?;

        // mpv broadcasts events to every client. A fresh connection can see an
        // event line before our reply, so skip anything carrying "event".
        let mut lines = BufReader::new(rd).lines();
        loop {
            let Some(raw) = lines.next_line().await? else {
                anyhow::bail!("connection closed before a reply arrived");
            };
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(raw)
                .map_err(|e| anyhow::anyhow!("malformed reply {raw:?}: {e}"))?;
            if value.get("event").is_some() {
                debug!("mpv ipc: skipping event line {raw}");
                continue;
            }
            return Ok(serde_json::from_value(value)?);
        }
    }
}

impl MediaChannel for MpvIpc {
    async fn send(&self, command: MpvCommand) -> Option<MpvReply> {
        if !self.socket_path.exists() {
            debug!(
                "mpv ipc: socket {} absent, dropping {}",
                self.socket_path.display(),
                command.verb()
            );
            return None;
        }

        match tokio::time::timeout(self.timeout, self.round_trip(&command)).await {
            Ok(Ok(reply)) => Some(reply),
            Ok(Err(e)) => {
                warn!("mpv ipc: {} failed: {e}", command.verb());
                None
            }
            Err(_) => {
                warn!(
                    "mpv ipc: {} timed out after {}ms",
                    command.verb(),
                    self.timeout.as_millis()
                );
                None
            }
        }
    }
}
