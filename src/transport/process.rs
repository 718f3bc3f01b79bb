//! Plugin process spawning.
//!
//! A plugin is any executable that speaks the frame protocol on its
//! stdin/stdout. Its stderr is inherited so plugin logs land next to the
//! host's.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::stream::StreamClient;
use crate::error::{CallResult, TransportError};

/// How to launch one plugin executable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginCommand {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl PluginCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

/// A running plugin process and the client bound to its stdio.
pub struct PluginProcess {
    pub pid: u32,
    child: Mutex<Child>,
    client: Arc<StreamClient>,
}

impl PluginProcess {
    pub async fn spawn(spec: &PluginCommand, timeout: Option<Duration>) -> CallResult<Self> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true); // Prevent zombie processes

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::ConnectionFailed(format!("Failed to spawn '{}': {e}", spec.command))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| TransportError::ConnectionFailed("Failed to get process ID".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("Failed to get stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::ConnectionFailed("Failed to get stdout".into()))?;

        let mut client = StreamClient::new(stdout, stdin);
        if let Some(limit) = timeout {
            client = client.with_timeout(limit);
        }

        info!(pid, command = %spec.command, "Plugin process started");

        Ok(Self {
            pid,
            child: Mutex::new(child),
            client: Arc::new(client),
        })
    }

    pub fn client(&self) -> Arc<StreamClient> {
        self.client.clone()
    }

    pub async fn is_running(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    /// Kills the process and reaps it. Calls still waiting on it fail with
    /// a transport error.
    pub async fn shutdown(&self) {
        let mut child = self.child.lock().await;
        if let Ok(Some(status)) = child.try_wait() {
            debug!(pid = self.pid, %status, "Plugin process already exited");
            return;
        }
        if let Err(e) = child.kill().await {
            warn!(pid = self.pid, error = %e, "Failed to kill plugin process");
        } else {
            info!(pid = self.pid, "Plugin process stopped");
        }
    }
}
