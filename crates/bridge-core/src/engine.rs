//! # Process-Hosted Decision Engine
//!
//! Runs the engine as a child process speaking newline-delimited JSON
//! envelopes: the bridge's engine-bound traffic goes to its stdin, and every
//! line it prints on stdout is an effect request. The first line written is
//! the flags object the engine boots with.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bridge::EngineChannel;
use crate::envelope::Envelope;
use crate::error::BridgeError;

/// Boot parameters for the engine.
#[derive(Debug, Clone)]
pub struct EngineFlags {
    pub secret: Arc<SecretString>,
    pub action_timeout_ms: u64,
    pub action_check_interval_ms: u64,
}

impl EngineFlags {
    fn to_line(&self) -> Result<Vec<u8>, BridgeError> {
        let flags = json!({
            "secret": self.secret.expose_secret(),
            "jsActionTimeout": self.action_timeout_ms,
            "jsActionCheckInterval": self.action_check_interval_ms,
        });
        let mut line = serde_json::to_vec(&flags).map_err(|e| BridgeError::Config(e.to_string()))?;
        line.push(b'\n');
        Ok(line)
    }
}

pub struct ProcessEngine {
    child: Child,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl ProcessEngine {
    /// Spawns `command` and wires it to `channel`.
    pub async fn spawn(
        command: &[String],
        flags: &EngineFlags,
        channel: EngineChannel,
    ) -> Result<Self, BridgeError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| BridgeError::Config("engine command is empty".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Config("failed to capture engine stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Config("failed to capture engine stdout".into()))?;

        stdin.write_all(&flags.to_line()?).await?;
        tracing::info!(program = %program, pid = ?child.id(), "ProcessEngine: started");

        let (inbound, outbound) = channel.split();
        let writer = tokio::spawn(pump_to_engine(inbound, stdin));
        let reader = tokio::spawn(pump_from_engine(stdout, outbound));

        Ok(Self { child, writer, reader })
    }

    /// Waits for the engine to exit and stops both pumps.
    pub async fn wait(mut self) -> Result<ExitStatus, BridgeError> {
        let status = self.child.wait().await?;
        self.writer.abort();
        self.reader.abort();
        tracing::warn!(%status, "ProcessEngine: exited");
        Ok(status)
    }
}

async fn pump_to_engine(mut inbound: mpsc::Receiver<Envelope>, mut stdin: ChildStdin) {
    while let Some(envelope) = inbound.recv().await {
        let mut line = match serde_json::to_vec(&envelope) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(connection_id = %envelope.connection_id, "ProcessEngine: unencodable envelope: {e}");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = stdin.write_all(&line).await {
            tracing::error!("ProcessEngine: write to engine failed: {e}");
            break;
        }
    }
}

async fn pump_from_engine(stdout: ChildStdout, outbound: mpsc::Sender<Envelope>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match serde_json::from_str::<Envelope>(&line) {
                Ok(envelope) => {
                    if outbound.send(envelope).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("ProcessEngine: skipping malformed line: {e}"),
            },
            Ok(None) => {
                tracing::warn!("ProcessEngine: engine closed stdout");
                break;
            }
            Err(e) => {
                tracing::error!("ProcessEngine: read from engine failed: {e}");
                break;
            }
        }
    }
}
