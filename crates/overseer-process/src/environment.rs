//! Run-and-capture convenience layer on top of [`LaunchConfig`]

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    config::LaunchConfig,
    error::{ProcessError, Result},
};

/// Environment for running shell commands and collecting their output
#[async_trait]
pub trait Environment: Send + Sync {
    /// Set the working directory for subsequent commands
    fn set_dir(&mut self, dir: PathBuf) -> &mut Self
    where
        Self: Sized;

    /// Set an environment variable for subsequent commands
    fn set_env(&mut self, key: &str, value: &str) -> &mut Self
    where
        Self: Sized;

    /// Configured variables as `KEY=VALUE` strings
    fn get_envs(&self) -> Vec<String>;

    /// Value of a configured variable
    fn get_env(&self, key: &str) -> Option<String>;

    /// Run `command` through the platform shell and return its stdout
    async fn run_command(&self, ctx: &CancellationToken, command: &str) -> Result<Vec<u8>>;
}

/// [`Environment`] backed by the platform shell
#[derive(Debug, Clone)]
pub struct ShellEnvironment {
    config: LaunchConfig,
}

impl ShellEnvironment {
    /// Environment whose commands see the parent's variables plus the
    /// configured ones
    pub fn new() -> Self {
        let mut config = LaunchConfig::new();
        config.inherit_env(true);
        Self { config }
    }

    /// Environment whose commands see only the configured variables
    pub fn isolated() -> Self {
        Self {
            config: LaunchConfig::new(),
        }
    }
}

impl Default for ShellEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Environment for ShellEnvironment {
    fn set_dir(&mut self, dir: PathBuf) -> &mut Self {
        self.config.set_dir(dir);
        self
    }

    fn set_env(&mut self, key: &str, value: &str) -> &mut Self {
        self.config.set_env(key, value);
        self
    }

    fn get_envs(&self) -> Vec<String> {
        self.config.envs()
    }

    fn get_env(&self, key: &str) -> Option<String> {
        self.config.env(key).map(str::to_string)
    }

    async fn run_command(&self, ctx: &CancellationToken, command: &str) -> Result<Vec<u8>> {
        let mut config = self.config.clone();
        config.set_command(command);

        let mut cmd = config.command()?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %command, "Running command");
        let child = cmd.spawn().map_err(ProcessError::SpawnFailed)?;

        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = ctx.cancelled() => {
                debug!(command = %command, "Command canceled");
                return Err(ProcessError::Canceled);
            }
        };

        if !output.status.success() {
            return Err(ProcessError::CommandFailed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output.stdout)
    }
}
