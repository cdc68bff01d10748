//! Launch configuration

use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::io::{self, PipeReader, PipeWriter};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::{ProcessError, Result};

/// Both ends of one standard-stream pipe
#[derive(Debug)]
struct StreamPipe {
    reader: PipeReader,
    writer: PipeWriter,
}

impl StreamPipe {
    fn open() -> Result<Arc<Self>> {
        let (reader, writer) = io::pipe().map_err(ProcessError::Pipe)?;
        Ok(Arc::new(Self { reader, writer }))
    }
}

/// Description of how to start an OS process
///
/// A `LaunchConfig` is fully configured by the caller before it is handed to a
/// [`crate::ProcessController`]. Cloning is cheap: clones share the pipes
/// (which are created at most once per stream) and copy everything else, so
/// every run works on its own snapshot.
///
/// The parent keeps both ends of every enabled pipe for the lifetime of the
/// configuration, so the same pipe can serve several sequential runs. Readers
/// therefore see the output of each run but no end-of-file between runs.
#[derive(Debug, Clone, Default)]
pub struct LaunchConfig {
    dir: Option<PathBuf>,
    program: Option<String>,
    args: Vec<String>,
    env: HashMap<String, String>,
    inherit_env: bool,
    stdin: Option<Arc<StreamPipe>>,
    stdout: Option<Arc<StreamPipe>>,
    stderr: Option<Arc<StreamPipe>>,
    /// Wait for an explicit readiness signal before treating the process as
    /// up. Carried for callers; the controller does not act on it yet.
    readiness_probe: bool,
}

impl LaunchConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn set_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.dir = Some(dir.into());
        self
    }

    /// Set an environment variable (last write wins)
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Layer the configured variables over the parent environment instead of
    /// replacing it
    pub fn inherit_env(&mut self, inherit: bool) -> &mut Self {
        self.inherit_env = inherit;
        self
    }

    /// Run `command` through the platform shell
    ///
    /// - Windows: `cmd /S /C <command>`
    /// - Unix: `/bin/sh -c <command>`
    pub fn set_command(&mut self, command: impl Into<String>) -> &mut Self {
        let command = command.into();
        if cfg!(windows) {
            self.set_executable("cmd", ["/S".to_string(), "/C".to_string(), command])
        } else {
            self.set_executable("/bin/sh", ["-c".to_string(), command])
        }
    }

    /// Set the executable and its arguments (without the program name)
    pub fn set_executable<I, S>(&mut self, program: impl Into<String>, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program = Some(program.into());
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the readiness-probe flag
    pub fn set_readiness_probe(&mut self, enabled: bool) -> &mut Self {
        self.readiness_probe = enabled;
        self
    }

    /// Create the stdin pipe; a second call is a no-op
    pub fn enable_stdin(&mut self) -> Result<()> {
        if self.stdin.is_none() {
            self.stdin = Some(StreamPipe::open()?);
        }
        Ok(())
    }

    /// Create the stdout pipe; a second call is a no-op
    pub fn enable_stdout(&mut self) -> Result<()> {
        if self.stdout.is_none() {
            self.stdout = Some(StreamPipe::open()?);
        }
        Ok(())
    }

    /// Create the stderr pipe; a second call is a no-op
    pub fn enable_stderr(&mut self) -> Result<()> {
        if self.stderr.is_none() {
            self.stderr = Some(StreamPipe::open()?);
        }
        Ok(())
    }

    /// Writable end of the stdin pipe, if enabled
    pub fn stdin(&self) -> Option<&PipeWriter> {
        self.stdin.as_deref().map(|pipe| &pipe.writer)
    }

    /// Readable end of the stdout pipe, if enabled
    pub fn stdout(&self) -> Option<&PipeReader> {
        self.stdout.as_deref().map(|pipe| &pipe.reader)
    }

    /// Readable end of the stderr pipe, if enabled
    pub fn stderr(&self) -> Option<&PipeReader> {
        self.stderr.as_deref().map(|pipe| &pipe.reader)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn readiness_probe(&self) -> bool {
        self.readiness_probe
    }

    /// Value of a configured environment variable
    pub fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    /// Configured environment as sorted `KEY=VALUE` strings
    pub fn envs(&self) -> Vec<String> {
        let mut envs: Vec<String> = self
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        envs.sort();
        envs
    }

    /// Start the configured process
    ///
    /// Enabled pipes are attached to the child; streams that were not enabled
    /// are connected to the null device. No retry is attempted. The process
    /// is killed if the returned handle is dropped before it exits.
    ///
    /// # Errors
    /// - [`ProcessError::InvalidConfig`] when no executable is set
    /// - [`ProcessError::NotFound`] when the executable cannot be resolved
    /// - [`ProcessError::Pipe`] / [`ProcessError::SpawnFailed`] on OS failures
    pub fn start(&self) -> Result<Child> {
        let mut cmd = self.command()?;

        cmd.stdin(match &self.stdin {
            Some(pipe) => Stdio::from(pipe.reader.try_clone().map_err(ProcessError::Pipe)?),
            None => Stdio::null(),
        });
        cmd.stdout(match &self.stdout {
            Some(pipe) => Stdio::from(pipe.writer.try_clone().map_err(ProcessError::Pipe)?),
            None => Stdio::null(),
        });
        cmd.stderr(match &self.stderr {
            Some(pipe) => Stdio::from(pipe.writer.try_clone().map_err(ProcessError::Pipe)?),
            None => Stdio::null(),
        });

        cmd.kill_on_drop(true);
        cmd.spawn().map_err(ProcessError::SpawnFailed)
    }

    /// Build a command with the resolved executable, arguments, directory and
    /// environment applied. Standard streams are left to the caller.
    pub(crate) fn command(&self) -> Result<Command> {
        let program = self
            .program
            .as_deref()
            .ok_or_else(|| ProcessError::InvalidConfig("no executable configured".to_string()))?;
        let path = self.resolve(program)?;

        debug!(program = %program, path = %path.display(), args = ?self.args, "Resolved executable");

        let mut cmd = Command::new(&path);
        cmd.args(&self.args);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        if !self.inherit_env {
            cmd.env_clear();
        }
        cmd.envs(&self.env);
        Ok(cmd)
    }

    /// Resolve `program` the way the child will see it: relative paths against
    /// the configured directory, bare names against the configured `PATH`
    /// (falling back to the parent's).
    fn resolve(&self, program: &str) -> Result<PathBuf> {
        let search_path: Option<OsString> = self
            .env
            .get("PATH")
            .map(OsString::from)
            .or_else(|| env::var_os("PATH"));
        let cwd = match &self.dir {
            Some(dir) => dir.clone(),
            None => env::current_dir()?,
        };

        which::which_in(program, search_path, cwd).map_err(|source| ProcessError::NotFound {
            program: program.to_string(),
            source,
        })
    }
}
