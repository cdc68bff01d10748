//! Declarative process definitions
//!
//! A [`ProcessDefinition`] is the serializable form of a [`LaunchConfig`] plus
//! the controller settings, so supervised processes can be described in TOML:
//!
//! ```toml
//! external_id = "svc-1"
//! command = "./server --port 8080"
//! dir = "/srv/app"
//! stdout = true
//! grace_period_ms = 2000
//!
//! [env]
//! RUST_LOG = "info"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    collector::StatusCollector,
    config::LaunchConfig,
    controller::ProcessController,
    error::{ProcessError, Result},
};

/// Serializable description of one supervised process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessDefinition {
    /// Identifier reported to the status collector
    pub external_id: Option<String>,
    /// Shell command line (mutually exclusive with `program`)
    pub command: Option<String>,
    /// Executable name or path (mutually exclusive with `command`)
    pub program: Option<String>,
    /// Arguments for `program`
    pub args: Vec<String>,
    /// Working directory
    pub dir: Option<PathBuf>,
    /// Layer `env` over the parent environment
    pub inherit_env: bool,
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub readiness_probe: bool,
    /// Time between the termination request and the kill
    pub grace_period_ms: Option<u64>,
    /// Environment variables
    pub env: HashMap<String, String>,
}

impl ProcessDefinition {
    /// Parse a definition from TOML
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let definition: Self =
            toml::from_str(input).map_err(|e| ProcessError::Parse(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Load a definition from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    /// Serialize the definition to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ProcessError::Parse(e.to_string()))
    }

    /// Check that exactly one of `command` and `program` is set
    pub fn validate(&self) -> Result<()> {
        match (&self.command, &self.program) {
            (Some(_), Some(_)) => Err(ProcessError::InvalidConfig(
                "`command` and `program` are mutually exclusive".to_string(),
            )),
            (None, None) => Err(ProcessError::InvalidConfig(
                "one of `command` or `program` is required".to_string(),
            )),
            (Some(_), None) if !self.args.is_empty() => Err(ProcessError::InvalidConfig(
                "`args` only apply to `program`".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn grace_period(&self) -> Option<Duration> {
        self.grace_period_ms.map(Duration::from_millis)
    }

    /// Build the launch configuration, creating the requested pipes
    pub fn launch_config(&self) -> Result<LaunchConfig> {
        self.validate()?;

        let mut config = LaunchConfig::new();
        if let Some(command) = &self.command {
            config.set_command(command.clone());
        } else if let Some(program) = &self.program {
            config.set_executable(program.clone(), self.args.clone());
        }
        if let Some(dir) = &self.dir {
            config.set_dir(dir.clone());
        }
        for (key, value) in &self.env {
            config.set_env(key.clone(), value.clone());
        }
        config
            .inherit_env(self.inherit_env)
            .set_readiness_probe(self.readiness_probe);

        if self.stdin {
            config.enable_stdin()?;
        }
        if self.stdout {
            config.enable_stdout()?;
        }
        if self.stderr {
            config.enable_stderr()?;
        }
        Ok(config)
    }

    /// Build an idle controller bound to this definition
    pub fn controller(&self) -> Result<ProcessController> {
        let controller = ProcessController::with_config(self.launch_config()?);
        if let Some(external_id) = &self.external_id {
            controller.set_external_id(external_id.clone());
        }
        controller.set_grace_period(self.grace_period());
        Ok(controller)
    }

    /// Build an idle controller reporting to `collector`
    pub fn controller_with_collector(
        &self,
        collector: Arc<dyn StatusCollector>,
    ) -> Result<ProcessController> {
        let controller = self.controller()?;
        controller.set_collector(collector);
        Ok(controller)
    }
}
