//! Remote command execution
//!
//! [`RemoteExecutor`] is the transport seam: run one shell command on one host
//! or copy one file to it. [`Runner`] layers the orchestration policy on top:
//! a caller-supplied retry count with backoff, and whether a non-zero exit is
//! fatal.
//!
//! [`OpenSshExecutor`] is the production transport. It shells out to the
//! system `ssh` and `scp` binaries so host keys, agents and `~/.ssh/config`
//! behave exactly as they do for an operator at a terminal.

use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::Node;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// Captured result of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited zero
    pub success: bool,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given stderr
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout with surrounding whitespace removed
    pub fn text(&self) -> &str {
        self.stdout.trim()
    }

    /// Everything the command printed, for error messages
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Transport for running commands on hosts (allows mocking in tests)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run one shell command on `host` and capture its output.
    ///
    /// Returns `Err` only when the command could not be run at all; a
    /// non-zero exit is reported through [`CommandOutput::success`].
    async fn execute(&self, host: &Node, command: &str) -> Result<CommandOutput>;

    /// Copy a local file to `remote_path` on `host`
    async fn copy_file(&self, host: &Node, local_path: &Path, remote_path: &str) -> Result<()>;
}

/// Per-call execution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Extra attempts after the first one
    pub retries: u32,
    /// Whether a non-zero exit is an error
    pub fatal: bool,
}

impl ExecOptions {
    /// Non-zero exit is an error, retried `retries` times
    pub fn fatal(retries: u32) -> Self {
        Self {
            retries,
            fatal: true,
        }
    }

    /// Output is returned whatever the exit status; only transport errors retry
    pub fn lenient(retries: u32) -> Self {
        Self {
            retries,
            fatal: false,
        }
    }
}

/// Runs commands through a [`RemoteExecutor`] with retry and exit-status policy
#[derive(Clone)]
pub struct Runner {
    executor: Arc<dyn RemoteExecutor>,
    backoff: RetryConfig,
}

impl Runner {
    /// Create a runner with the default backoff between retries
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            backoff: RetryConfig::default(),
        }
    }

    /// Override the delay parameters used between retries
    pub fn with_backoff(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.backoff.initial_delay = initial_delay;
        self.backoff.max_delay = max_delay;
        self
    }

    /// Run `command` on `host` under `opts`.
    ///
    /// `operation` describes the step for error messages.
    pub async fn run(
        &self,
        host: &Node,
        command: &str,
        opts: ExecOptions,
        operation: &str,
    ) -> Result<CommandOutput> {
        let config = RetryConfig {
            max_attempts: opts.retries.saturating_add(1),
            ..self.backoff.clone()
        };

        trace!(host = %host.name, command = %command, "Running remote command");

        retry_with_backoff(&config, operation, move || async move {
            let output = self
                .executor
                .execute(host, command)
                .await
                .map_err(|e| e.context(operation))?;
            if opts.fatal && !output.success {
                return Err(Error::exec(operation, output.combined()));
            }
            Ok(output)
        })
        .await
    }

    /// Copy a local file to the host
    pub async fn copy_file(
        &self,
        host: &Node,
        local_path: &Path,
        remote_path: &str,
        operation: &str,
    ) -> Result<()> {
        self.executor
            .copy_file(host, local_path, remote_path)
            .await
            .map_err(|e| e.context(operation))
    }
}

/// Connection settings for [`OpenSshExecutor`]
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Seconds to wait for the TCP/SSH handshake
    pub connect_timeout: Duration,
    /// Skip host key verification (fresh machines have unknown keys)
    pub accept_new_host_keys: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            accept_new_host_keys: true,
        }
    }
}

/// Executor that runs commands through the system OpenSSH client
#[derive(Debug, Clone, Default)]
pub struct OpenSshExecutor {
    options: SshOptions,
}

impl OpenSshExecutor {
    /// Create an executor with custom connection settings
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    fn common_args(&self, host: &Node) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs()),
        ];
        if self.options.accept_new_host_keys {
            args.push("-o".to_string());
            args.push("StrictHostKeyChecking=accept-new".to_string());
        }
        if let Some(key) = &host.private_key_path {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args
    }

    fn destination(host: &Node) -> String {
        format!("{}@{}", host.user, host.address)
    }
}

#[async_trait]
impl RemoteExecutor for OpenSshExecutor {
    async fn execute(&self, host: &Node, command: &str) -> Result<CommandOutput> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_args(host))
            .arg("-p")
            .arg(host.port.to_string())
            .arg(Self::destination(host))
            .arg("--")
            .arg(command)
            .stdin(Stdio::null());

        debug!(host = %host.name, "Executing over ssh");

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::exec("ssh", format!("failed to execute ssh: {}", e)))?;

        Ok(CommandOutput::from(output))
    }

    async fn copy_file(&self, host: &Node, local_path: &Path, remote_path: &str) -> Result<()> {
        let output = Command::new("scp")
            .args(self.common_args(host))
            .arg("-P")
            .arg(host.port.to_string())
            .arg(local_path)
            .arg(format!("{}:{}", Self::destination(host), remote_path))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::exec("scp", format!("failed to execute scp: {}", e)))?;

        let output = CommandOutput::from(output);
        if !output.success {
            return Err(Error::exec(
                format!("scp {} to {}", local_path.display(), host.name),
                output.combined(),
            ));
        }
        Ok(())
    }
}
