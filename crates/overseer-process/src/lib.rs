//! # overseer-process
//!
//! **Purpose**: Supervise one OS process at a time through an explicit
//! lifecycle state machine
//!
//! ## Features
//!
//! - **Launch Configuration**: directory, executable or shell command,
//!   environment and optional standard-stream pipes
//! - **Process Controller**: asynchronous start, `Up → Running → NotRunning`
//!   tracking, cooperative or forced stop
//! - **Completion Handle**: any number of waiters observe the end of a run
//! - **Status Collectors**: every transition reported to an external sink
//! - **Definitions**: TOML-loadable process descriptions
//! - **Environment**: run a shell command and capture its output
//!
//! ## Usage
//!
//! ```rust,no_run
//! use overseer_process::{LaunchConfig, ProcessController, Status};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = LaunchConfig::new();
//! config.set_dir("/srv/app").set_command("./server");
//!
//! let controller = ProcessController::with_config(config);
//! let ctx = CancellationToken::new();
//! controller.run(&ctx)?;
//!
//! // ... later
//! controller.stop(&ctx)?;
//! controller.done().await;
//! assert_eq!(controller.status(), Status::NotRunning);
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod controller;
pub mod definition;
pub mod done;
pub mod environment;
pub mod error;
pub mod status;
mod watcher;

pub use collector::{ChannelCollector, MemoryCollector, StatusCollector, StatusEvent};
pub use config::LaunchConfig;
pub use controller::ProcessController;
pub use definition::ProcessDefinition;
pub use done::Done;
pub use environment::{Environment, ShellEnvironment};
pub use error::{ProcessError, Result};
pub use status::Status;
