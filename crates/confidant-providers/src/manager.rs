//! Model management through the `lms` command-line tool.
//!
//! Only three operations are used: list downloaded models, load one, unload
//! everything. Each subprocess runs under its own timeout and is killed if
//! the timeout fires.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ManagerError {
    #[error("'{0}' no encontrado en el PATH")]
    NotFound(String),

    #[error("tiempo de espera agotado tras {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Failed(String),
}

/// Loads and unloads models on the local server.
#[async_trait]
pub trait ModelManager: Send + Sync {
    /// Names of downloaded models, as reported by the tool.
    async fn list(&self) -> Result<Vec<String>, ManagerError>;

    async fn load(&self, name: &str) -> Result<(), ManagerError>;

    async fn unload(&self) -> Result<(), ManagerError>;
}

/// [`ModelManager`] backed by the LM Studio CLI.
#[derive(Clone, Debug)]
pub struct LmsCli {
    binary: String,
    list_timeout: Duration,
    load_timeout: Duration,
    unload_timeout: Duration,
}

impl LmsCli {
    pub fn new(binary: impl Into<String>) -> Self {
        LmsCli {
            binary: binary.into(),
            list_timeout: Duration::from_secs(10),
            load_timeout: Duration::from_secs(30),
            unload_timeout: Duration::from_secs(10),
        }
    }

    async fn run(&self, args: &[&str], limit: Duration) -> Result<String, ManagerError> {
        debug!(binary = %self.binary, ?args, "running model manager");

        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(limit, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ManagerError::NotFound(self.binary.clone()))
            }
            Ok(Err(e)) => return Err(ManagerError::Failed(e.to_string())),
            Err(_) => return Err(ManagerError::Timeout(limit.as_secs())),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            Err(ManagerError::Failed(detail.trim().to_string()))
        }
    }
}

/// First whitespace-separated token of every non-blank line.
pub fn parse_model_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ModelManager for LmsCli {
    async fn list(&self) -> Result<Vec<String>, ManagerError> {
        let out = self.run(&["ls"], self.list_timeout).await?;
        Ok(parse_model_list(out.trim()))
    }

    async fn load(&self, name: &str) -> Result<(), ManagerError> {
        self.run(&["load", name], self.load_timeout).await.map(|_| ())
    }

    async fn unload(&self) -> Result<(), ManagerError> {
        self.run(&["unload"], self.unload_timeout).await.map(|_| ())
    }
}
