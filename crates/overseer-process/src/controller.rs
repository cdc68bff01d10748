//! Process controller - lifecycle state machine for one process instance

use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    collector::StatusCollector,
    config::LaunchConfig,
    done::Done,
    error::{ProcessError, Result},
    status::Status,
    watcher::watch,
};

/// Owns the lifecycle of one logical process instance
///
/// The controller starts a [`LaunchConfig`] in the background, tracks it
/// through [`Status`] and kills it when asked to stop. Runs are sequential:
/// while one is in flight further `run` calls are no-ops.
///
/// | From | Event | To |
/// |---|---|---|
/// | `NotRunning` | `run` | `Up` |
/// | `Up` | process started | `Running` |
/// | `Up`, `Running` | process exited or failed to start | `NotRunning` |
/// | `Up`, `Running` | `stop` | `Down` |
/// | `Down` | process exited | `NotRunning` |
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct ProcessController {
    inner: Arc<Inner>,
}

struct Inner {
    /// Configuration used by [`ProcessController::run`]
    config: RwLock<Option<LaunchConfig>>,
    state: RwLock<RunState>,
}

/// Mutable state of the controller, guarded by one lock
#[derive(Default)]
struct RunState {
    status: Status,
    external_id: String,
    collector: Option<Arc<dyn StatusCollector>>,
    grace_period: Option<Duration>,
    /// Cancels the in-flight run and triggers the watcher
    job: Option<CancellationToken>,
    /// Resolved when the current (or last) run completes
    subscribers: Option<CancellationToken>,
    pid: Option<u32>,
    exit_status: Option<ExitStatus>,
}

impl RunState {
    fn transition(&mut self, next: Status) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {} -> {}",
            self.status,
            next
        );
        debug!(
            external_id = %self.external_id,
            from = %self.status,
            to = %next,
            "Status transition"
        );
        self.status = next;
        if let Some(collector) = &self.collector {
            collector.record_status(&self.external_id, next);
        }
    }
}

impl ProcessController {
    /// Create an idle controller without a bound configuration
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(None),
                state: RwLock::new(RunState::default()),
            }),
        }
    }

    /// Create an idle controller bound to `config`
    pub fn with_config(config: LaunchConfig) -> Self {
        let controller = Self::new();
        controller.set_config(config);
        controller
    }

    /// Bind the configuration used by subsequent [`run`](Self::run) calls
    ///
    /// A run already in flight keeps the snapshot it was started with.
    pub fn set_config(&self, config: LaunchConfig) {
        *self.inner.config.write() = Some(config);
    }

    /// Currently bound configuration
    pub fn config(&self) -> Option<LaunchConfig> {
        self.inner.config.read().clone()
    }

    /// Identifier reported to the collector with every transition
    pub fn set_external_id(&self, external_id: impl Into<String>) {
        self.inner.state.write().external_id = external_id.into();
    }

    pub fn external_id(&self) -> String {
        self.inner.state.read().external_id.clone()
    }

    /// Attach a collector that receives every status transition
    ///
    /// The collector runs under the controller's state lock and must not call
    /// back into this controller.
    pub fn set_collector(&self, collector: Arc<dyn StatusCollector>) {
        self.inner.state.write().collector = Some(collector);
    }

    /// Ask the process to terminate and wait up to `grace` before killing it
    ///
    /// `None` (the default) kills immediately once the run is cancelled.
    /// Applies to runs started after the call.
    pub fn set_grace_period(&self, grace: Option<Duration>) {
        self.inner.state.write().grace_period = grace;
    }

    /// Start the bound configuration
    ///
    /// See [`run_with`](Self::run_with).
    ///
    /// # Errors
    /// [`ProcessError::NoConfig`] when a new run would start but no
    /// configuration is bound, plus the errors of `run_with`.
    pub fn run(&self, ctx: &CancellationToken) -> Result<()> {
        let config = self.inner.config.read().clone();
        self.launch(ctx, config)
    }

    /// Start `config` in the background
    ///
    /// Returns immediately. Whether the process actually started is only
    /// observable through [`status`](Self::status) and [`done`](Self::done).
    /// Cancelling `ctx` has the same effect as [`stop`](Self::stop).
    ///
    /// Calling this while a run is `Up` or `Running` is a no-op.
    ///
    /// # Errors
    /// - [`ProcessError::Terminating`] while the previous run is `Down`
    /// - [`ProcessError::NoRuntime`] outside a Tokio runtime
    pub fn run_with(&self, ctx: &CancellationToken, config: &LaunchConfig) -> Result<()> {
        self.launch(ctx, Some(config.clone()))
    }

    fn launch(&self, ctx: &CancellationToken, config: Option<LaunchConfig>) -> Result<()> {
        let mut state = self.inner.state.write();

        let status = state.status;
        match status {
            Status::Up | Status::Running => Ok(()),
            Status::Down => Err(ProcessError::Terminating),
            Status::NotRunning => {
                let config = config.ok_or(ProcessError::NoConfig)?;
                let runtime = Handle::try_current().map_err(|_| ProcessError::NoRuntime)?;

                let job = ctx.child_token();
                let subscribers = CancellationToken::new();

                state.job = Some(job.clone());
                state.subscribers = Some(subscribers.clone());
                state.pid = None;
                state.exit_status = None;
                state.transition(Status::Up);

                let grace = state.grace_period;
                // A runtime that is shutting down drops the future at once,
                // and the guard's drop takes the state lock.
                drop(state);

                // Owned by the task future, so it also fires if the runtime
                // drops the task before its first poll.
                let run = RunGuard::new(Arc::clone(&self.inner), subscribers);
                runtime.spawn(supervise(run, job, config, grace));
                Ok(())
            }
        }
    }

    /// Request termination of the current run
    ///
    /// Moves `Up`/`Running` to `Down` and cancels the run; the kill itself
    /// happens in the background. A no-op in any other state. `_ctx` is
    /// reserved for bounding a graceful wait.
    pub fn stop(&self, _ctx: &CancellationToken) -> Result<()> {
        let job = {
            let mut state = self.inner.state.write();
            match state.status {
                Status::Up | Status::Running => {
                    state.transition(Status::Down);
                    state.job.clone()
                }
                Status::Down | Status::NotRunning => None,
            }
        };

        if let Some(job) = job {
            job.cancel();
        }
        Ok(())
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.inner.state.read().status
    }

    /// Current status, or `None` if the state lock is held elsewhere
    ///
    /// Inside a collector callback this always returns `None`.
    pub fn try_status(&self) -> Option<Status> {
        self.inner.state.try_read().map(|state| state.status)
    }

    /// Completion handle for the current (or most recently started) run
    ///
    /// Resolved immediately when no run is in flight.
    pub fn done(&self) -> Done {
        let state = self.inner.state.read();
        match (&state.status, &state.subscribers) {
            (Status::NotRunning, _) | (_, None) => Done::resolved(),
            (_, Some(subscribers)) => Done::new(subscribers.clone()),
        }
    }

    /// PID of the current or last started process
    pub fn pid(&self) -> Option<u32> {
        self.inner.state.read().pid
    }

    /// Exit status of the last run, if it was reaped successfully
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.state.read().exit_status
    }
}

impl Default for ProcessController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProcessController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("ProcessController")
            .field("status", &state.status)
            .field("external_id", &state.external_id)
            .field("pid", &state.pid)
            .field("exit_status", &state.exit_status)
            .field("collector", &state.collector.is_some())
            .finish()
    }
}

impl Inner {
    fn started(&self, pid: u32) {
        let mut state = self.state.write();
        state.pid = Some(pid);
        // A stop that raced the launch keeps the run in `Down`.
        if state.status == Status::Up {
            state.transition(Status::Running);
        }
    }

    fn finish(&self, exit_status: Option<ExitStatus>) {
        let mut state = self.state.write();
        if exit_status.is_some() {
            state.exit_status = exit_status;
        }
        state.job = None;
        state.transition(Status::NotRunning);
    }
}

/// Ends a run exactly once
///
/// `complete` records the final transition. If the guard is dropped without
/// it (the runtime went away mid-run) the run is recorded as finished without
/// an exit status. `Done` is released afterwards in both cases.
struct RunGuard {
    inner: Arc<Inner>,
    subscribers: CancellationToken,
    completed: bool,
}

impl RunGuard {
    fn new(inner: Arc<Inner>, subscribers: CancellationToken) -> Self {
        Self {
            inner,
            subscribers,
            completed: false,
        }
    }

    fn started(&self, pid: u32) {
        self.inner.started(pid);
    }

    fn complete(mut self, exit_status: Option<ExitStatus>) {
        self.inner.finish(exit_status);
        self.completed = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.completed {
            warn!("Run abandoned before completion");
            self.inner.finish(None);
        }
        self.subscribers.cancel();
    }
}

/// Launch task: start the process and wait for it, killing it on cancel
async fn supervise(
    run: RunGuard,
    job: CancellationToken,
    config: LaunchConfig,
    grace: Option<Duration>,
) {
    if job.is_cancelled() {
        debug!("Run cancelled before start");
        run.complete(None);
        return;
    }

    // Killed on drop, so an abandoned run does not leave the process behind.
    let mut child = match config.start() {
        Ok(child) => child,
        Err(e) => {
            warn!(program = ?config.program(), error = %e, "Failed to start process");
            run.complete(None);
            return;
        }
    };

    let pid = child.id().unwrap_or(0);
    info!(pid = %pid, program = ?config.program(), "Process started");
    run.started(pid);

    match watch(&mut child, &job, grace).await {
        Ok(status) => {
            info!(pid = %pid, status = %status, "Process exited");
            run.complete(Some(status));
        }
        Err(e) => {
            warn!(pid = %pid, error = %e, "Failed to wait for process");
            run.complete(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MemoryCollector;
    use std::sync::OnceLock;
    use tokio::time::{sleep, Instant};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn current_thread_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    /// Gone or a zombie waiting to be reaped
    #[cfg(target_os = "linux")]
    fn process_has_exited(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        }
    }

    async fn wait_for(controller: &ProcessController, status: Status, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if controller.status() == status {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        controller.status() == status
    }

    fn shell(command: &str) -> LaunchConfig {
        let mut config = LaunchConfig::new();
        config.set_command(command);
        config
    }

    #[test]
    fn test_run_outside_runtime() {
        init_tracing();
        let controller = ProcessController::with_config(shell("exit 0"));
        let err = controller.run(&CancellationToken::new()).unwrap_err();

        assert!(matches!(err, ProcessError::NoRuntime));
        assert_eq!(controller.status(), Status::NotRunning);
    }

    #[tokio::test]
    async fn test_idle_controller() {
        init_tracing();
        let controller = ProcessController::new();
        assert_eq!(controller.status(), Status::NotRunning);
        assert!(controller.done().is_done());
        assert!(controller.pid().is_none());
        assert!(controller.exit_status().is_none());

        controller.stop(&CancellationToken::new()).unwrap();
        assert_eq!(controller.status(), Status::NotRunning);
    }

    #[tokio::test]
    async fn test_run_without_config() {
        init_tracing();
        let controller = ProcessController::new();
        let err = controller.run(&CancellationToken::new()).unwrap_err();
        assert!(matches!(err, ProcessError::NoConfig));
        assert_eq!(controller.status(), Status::NotRunning);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_to_completion() {
        init_tracing();
        let controller = ProcessController::with_config(shell("exit 3"));
        controller.run(&CancellationToken::new()).unwrap();
        assert_eq!(controller.status(), Status::Up);

        let done = controller.done();
        assert!(!done.is_done());
        tokio::time::timeout(Duration::from_secs(5), done.wait())
            .await
            .unwrap();

        assert_eq!(controller.status(), Status::NotRunning);
        assert!(controller.pid().is_some());
        assert_eq!(controller.exit_status().unwrap().code(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reentrant_run_is_noop() {
        init_tracing();
        let collector = Arc::new(MemoryCollector::new());
        let controller = ProcessController::with_config(shell("sleep 10"));
        controller.set_external_id("svc");
        controller.set_collector(collector.clone());

        let ctx = CancellationToken::new();
        controller.run(&ctx).unwrap();
        controller.run(&ctx).unwrap();
        assert!(wait_for(&controller, Status::Running, Duration::from_secs(2)).await);
        controller.run(&ctx).unwrap();

        assert_eq!(collector.history_for("svc"), [Status::Up, Status::Running]);

        controller.stop(&ctx).unwrap();
        controller.done().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_while_down_fails() {
        init_tracing();
        let controller = ProcessController::with_config(shell("sleep 10"));
        let ctx = CancellationToken::new();
        controller.run(&ctx).unwrap();
        assert!(wait_for(&controller, Status::Running, Duration::from_secs(2)).await);

        controller.stop(&ctx).unwrap();
        assert_eq!(controller.status(), Status::Down);

        // Single-threaded runtime: the run cannot finish until we yield.
        let err = controller.run(&ctx).unwrap_err();
        assert!(matches!(err, ProcessError::Terminating));
        assert_eq!(controller.status(), Status::Down);

        controller.stop(&ctx).unwrap();
        assert_eq!(controller.status(), Status::Down);

        tokio::time::timeout(Duration::from_secs(5), controller.done().wait())
            .await
            .unwrap();
        assert_eq!(controller.status(), Status::NotRunning);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_before_launch_task_runs() {
        init_tracing();
        let collector = Arc::new(MemoryCollector::new());
        let controller = ProcessController::with_config(shell("sleep 10"));
        controller.set_collector(collector.clone());

        let ctx = CancellationToken::new();
        controller.run(&ctx).unwrap();
        let done = controller.done();
        controller.stop(&ctx).unwrap();

        tokio::time::timeout(Duration::from_secs(5), done.wait())
            .await
            .unwrap();
        assert_eq!(
            collector.history_for(""),
            [Status::Up, Status::Down, Status::NotRunning]
        );
        assert!(controller.pid().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_parent_cancellation_stops_run() {
        init_tracing();
        let controller = ProcessController::with_config(shell("sleep 10"));
        let ctx = CancellationToken::new();
        controller.run(&ctx).unwrap();
        assert!(wait_for(&controller, Status::Running, Duration::from_secs(2)).await);

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(5), controller.done().wait())
            .await
            .unwrap();

        assert_eq!(controller.status(), Status::NotRunning);
        assert!(!controller.exit_status().unwrap().success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_controller_is_reusable() {
        init_tracing();
        let controller = ProcessController::with_config(shell("exit 0"));
        let ctx = CancellationToken::new();

        for _ in 0..3 {
            controller.run(&ctx).unwrap();
            let done = controller.done();
            tokio::time::timeout(Duration::from_secs(5), done.wait())
                .await
                .unwrap();
            assert!(done.is_done());
            assert_eq!(controller.status(), Status::NotRunning);
            assert!(controller.exit_status().unwrap().success());
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_with_overrides_bound_config() {
        init_tracing();
        let controller = ProcessController::with_config(shell("exit 1"));
        controller
            .run_with(&CancellationToken::new(), &shell("exit 4"))
            .unwrap();
        controller.done().await;

        assert_eq!(controller.exit_status().unwrap().code(), Some(4));
        assert_eq!(controller.config().unwrap().args(), ["-c", "exit 1"]);
    }

    #[tokio::test]
    async fn test_collector_cannot_reenter_controller() {
        init_tracing();
        struct Reentrant {
            controller: OnceLock<ProcessController>,
            observed: parking_lot::Mutex<Vec<Option<Status>>>,
        }

        impl StatusCollector for Reentrant {
            fn record_status(&self, _external_id: &str, _status: Status) {
                if let Some(controller) = self.controller.get() {
                    self.observed.lock().push(controller.try_status());
                }
            }
        }

        let collector = Arc::new(Reentrant {
            controller: OnceLock::new(),
            observed: parking_lot::Mutex::new(Vec::new()),
        });
        let mut config = LaunchConfig::new();
        config.set_executable("overseer-definitely-missing-binary", Vec::<String>::new());
        let controller = ProcessController::with_config(config);
        controller.set_collector(collector.clone());
        let _ = collector.controller.set(controller.clone());

        controller.run(&CancellationToken::new()).unwrap();
        controller.done().await;

        let observed = collector.observed.lock().clone();
        assert_eq!(observed, [None::<Status>, None]);
        assert_eq!(controller.try_status(), Some(Status::NotRunning));
    }

    #[cfg(unix)]
    #[test]
    fn test_dropped_runtime_ends_run() {
        init_tracing();
        let collector = Arc::new(MemoryCollector::new());
        let controller = ProcessController::with_config(shell("exec sleep 30"));
        controller.set_collector(collector.clone());

        let runtime = current_thread_runtime();
        runtime.block_on(async {
            controller.run(&CancellationToken::new()).unwrap();
            assert!(wait_for(&controller, Status::Running, Duration::from_secs(2)).await);
        });
        let done = controller.done();
        let pid = controller.pid().unwrap();
        drop(runtime);

        assert_eq!(controller.status(), Status::NotRunning);
        assert!(done.is_done());
        assert_eq!(
            collector.history_for(""),
            [Status::Up, Status::Running, Status::NotRunning]
        );
        assert!(controller.exit_status().is_none());

        #[cfg(target_os = "linux")]
        {
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while !process_has_exited(pid) && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            assert!(process_has_exited(pid), "process {pid} outlived its runtime");
        }
        #[cfg(not(target_os = "linux"))]
        let _ = pid;

        // The controller is usable again from a fresh runtime.
        current_thread_runtime().block_on(async {
            controller
                .run_with(&CancellationToken::new(), &shell("exit 0"))
                .unwrap();
            tokio::time::timeout(Duration::from_secs(5), controller.done().wait())
                .await
                .unwrap();
            assert!(controller.exit_status().unwrap().success());
        });
        assert_eq!(controller.status(), Status::NotRunning);
    }

    #[cfg(unix)]
    #[test]
    fn test_unpolled_launch_task_is_released() {
        init_tracing();
        let collector = Arc::new(MemoryCollector::new());
        let controller = ProcessController::with_config(shell("exec sleep 30"));
        controller.set_collector(collector.clone());

        let runtime = current_thread_runtime();
        let done = runtime.block_on(async {
            controller.run(&CancellationToken::new()).unwrap();
            controller.done()
        });
        assert!(!done.is_done());
        drop(runtime);

        assert!(done.is_done());
        assert_eq!(controller.status(), Status::NotRunning);
        let history = collector.history_for("");
        assert_eq!(history.first(), Some(&Status::Up));
        assert_eq!(history.last(), Some(&Status::NotRunning));
    }
}
