use crate::config::ServerConfig;
use crate::error::{GovernorError, Result};
use crate::monitor::{MetricsSource, ResourceMonitor};
use crate::process::output::capture_output;
use crate::process::probe::ServerProbe;
use crate::process::restart::{RestartDecision, RestartPolicy, RestartTracker};
use crate::process::spawner::{spawn_server, SpawnedServer};
use crate::process::types::{ServerMetrics, ServerStatus};
use async_trait::async_trait;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How long to wait for the process to disappear after a forced kill
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Supervisor for the single model-server process.
///
/// Cheap to clone; all clones share one process slot. Must be created inside
/// a Tokio runtime because it spawns a control task that runs delayed
/// restarts and the health-monitor loop.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    config: ServerConfig,
    probe: ServerProbe,
    policy: RestartPolicy,
    state: Mutex<SupervisorState>,
    /// Serializes start/stop so only one lifecycle transition runs at a time
    lifecycle: tokio::sync::Mutex<()>,
    shutting_down: AtomicBool,
    control: mpsc::UnboundedSender<Control>,
    monitor: Mutex<Option<ResourceMonitor>>,
}

#[derive(Default)]
struct SupervisorState {
    current: Option<RunningServer>,
    tracker: RestartTracker,
    generation: u64,
    spawn_count: u64,
    /// Bumped by every explicit `stop()`; stale scheduled restarts compare against it
    stop_epoch: u64,
}

struct RunningServer {
    generation: u64,
    pid: u32,
    started_at: Instant,
    /// Set by `stop()`; the exit that follows is expected
    stop_requested: bool,
    exited: watch::Receiver<bool>,
    kill: Option<oneshot::Sender<()>>,
}

impl RunningServer {
    fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }
}

enum Control {
    RestartAfter { delay: Duration, epoch: u64 },
    StartHealthMonitor,
    StopHealthMonitor,
}

impl ProcessSupervisor {
    pub fn new(config: ServerConfig) -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SupervisorInner {
            probe: ServerProbe::new(config.base_url(), config.probe_timeout()),
            policy: RestartPolicy::from_config(&config),
            config,
            state: Mutex::new(SupervisorState::default()),
            lifecycle: tokio::sync::Mutex::new(()),
            shutting_down: AtomicBool::new(false),
            control,
            monitor: Mutex::new(None),
        });

        tokio::spawn(run_control(Arc::downgrade(&inner), control_rx));

        Self { inner }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Wire the monitor that `start()` and `stop()` toggle
    pub fn attach_monitor(&self, monitor: ResourceMonitor) {
        *lock(&self.inner.monitor) = Some(monitor);
    }

    /// Start the model server and block until it is healthy.
    ///
    /// Returns `true` when the server is (already) running and healthy.
    pub async fn start(&self) -> bool {
        match self.try_start().await {
            Ok(()) => true,
            Err(GovernorError::ShuttingDown) => {
                warn!("Cannot start model server during shutdown");
                false
            }
            Err(e) => {
                error!("Failed to start model server: {}", e);
                false
            }
        }
    }

    /// Same as [`start`](Self::start) but reports why the start failed
    pub async fn try_start(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        self.start_locked().await
    }

    /// Automatic restart; skipped when `stop()` ran after it was scheduled
    async fn start_scheduled(&self, epoch: u64) {
        let _guard = self.inner.lifecycle.lock().await;

        if lock(&self.inner.state).stop_epoch != epoch {
            info!("Scheduled model server restart cancelled by stop");
            return;
        }

        if let Err(e) = self.start_locked().await {
            warn!("Scheduled model server restart did not succeed: {}", e);
        }
    }

    async fn start_locked(&self) -> Result<()> {
        if self.is_running() {
            info!("Model server is already running");
            return Ok(());
        }

        if self.is_shutting_down() {
            return Err(GovernorError::ShuttingDown);
        }

        info!(
            "Starting model server: {} {} in {}",
            self.inner.config.interpreter,
            self.inner.config.entrypoint,
            self.inner.config.server_dir.display()
        );

        let (pid, mut exited) = self.launch()?;

        match self.wait_until_healthy(&mut exited).await {
            Ok(()) => {
                lock(&self.inner.state).tracker.reset();
                self.start_monitoring();
                info!(pid, "Model server started successfully");
                Ok(())
            }
            Err(e @ GovernorError::StartTimeout(_)) => {
                error!(pid, "Model server failed to become ready within timeout");
                self.stop_locked().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Spawn the process, hook up output capture and the exit waiter
    fn launch(&self) -> Result<(u32, watch::Receiver<bool>)> {
        let SpawnedServer { mut child, pid } = spawn_server(&self.inner.config)?;
        capture_output(&mut child, pid);

        let (exit_tx, exit_rx) = watch::channel(false);
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();

        let generation = {
            let mut state = lock(&self.inner.state);
            state.generation += 1;
            state.spawn_count += 1;
            state.current = Some(RunningServer {
                generation: state.generation,
                pid,
                started_at: Instant::now(),
                stop_requested: false,
                exited: exit_rx.clone(),
                kill: Some(kill_tx),
            });
            state.generation
        };

        let supervisor = self.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Ok(()) = &mut kill_rx => {
                    if let Err(e) = child.start_kill() {
                        error!(pid, "Failed to kill model server: {}", e);
                    }
                    child.wait().await
                }
            };
            supervisor.handle_exit(generation, pid, status, exit_tx);
        });

        info!(pid, "Model server process spawned");
        Ok((pid, exit_rx))
    }

    async fn wait_until_healthy(&self, exited: &mut watch::Receiver<bool>) -> Result<()> {
        let timeout = self.inner.config.startup_timeout();
        let interval = self.inner.config.probe_interval();
        let deadline = Instant::now() + timeout;

        loop {
            if *exited.borrow() {
                return Err(GovernorError::ExitedDuringStartup(
                    "process exited before passing a health check".to_string(),
                ));
            }

            match self.inner.probe.health().await {
                Ok(_) => return Ok(()),
                Err(e) => debug!("Model server not ready yet: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(GovernorError::StartTimeout(timeout));
            }

            // Wake early if the process dies while we wait
            tokio::select! {
                _ = sleep(interval.min(deadline - now)) => {}
                _ = exited.changed() => {}
            }
        }
    }

    /// Runs on the waiter task once the child has exited
    fn handle_exit(
        &self,
        generation: u64,
        pid: u32,
        status: std::io::Result<ExitStatus>,
        exit_tx: watch::Sender<bool>,
    ) {
        let expected = {
            let mut state = lock(&self.inner.state);
            match state.current.take() {
                Some(current) if current.generation == generation => current.stop_requested,
                other => {
                    state.current = other;
                    true
                }
            }
        };
        exit_tx.send_replace(true);

        match status {
            Ok(status) => info!(pid, "Model server process exited with {}", status),
            Err(e) => warn!(pid, "Failed to read model server exit status: {}", e),
        }

        if expected || self.is_shutting_down() {
            return;
        }

        let (decision, epoch) = {
            let mut state = lock(&self.inner.state);
            (state.tracker.next(&self.inner.policy), state.stop_epoch)
        };

        match decision {
            RestartDecision::Restart { attempt, delay } => {
                warn!(
                    "Attempting model server restart ({}/{}) in {:?}",
                    attempt, self.inner.policy.max_attempts, delay
                );
                let _ = self
                    .inner
                    .control
                    .send(Control::RestartAfter { delay, epoch });
            }
            RestartDecision::GiveUp { attempts } => {
                error!(
                    attempts,
                    "Max restart attempts reached. Model server will not be restarted automatically."
                );
            }
        }
    }

    /// Stop the server: SIGTERM, wait, then force kill
    pub async fn stop(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        lock(&self.inner.state).stop_epoch += 1;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        self.stop_monitoring();

        let target = {
            let mut state = lock(&self.inner.state);
            state.current.as_mut().map(|current| {
                current.stop_requested = true;
                (
                    current.generation,
                    current.pid,
                    current.exited.clone(),
                    current.kill.take(),
                )
            })
        };

        let Some((generation, pid, mut exited, kill)) = target else {
            return;
        };

        info!(pid, "Stopping model server");

        if let Err(e) = terminate(pid) {
            warn!(pid, "{}", e);
        }

        let timeout = self.inner.config.stop_timeout();
        if !wait_for_exit(&mut exited, timeout).await {
            warn!(pid, "Model server did not exit within {:?}, forcing shutdown", timeout);
            if let Some(kill) = kill {
                let _ = kill.send(());
            }
            if !wait_for_exit(&mut exited, KILL_WAIT).await {
                error!(pid, "Model server still alive after forced kill");
            }
        }

        {
            let mut state = lock(&self.inner.state);
            if state.current.as_ref().map(|c| c.generation) == Some(generation) {
                state.current = None;
            }
        }

        info!(pid, "Model server stopped");
    }

    /// Stop, pause, start
    pub async fn restart(&self) -> bool {
        info!("Restarting model server");
        self.stop().await;
        sleep(self.inner.config.restart_pause()).await;
        self.start().await
    }

    /// Current status; probes `/health` when the process is running
    pub async fn status(&self) -> ServerStatus {
        let Some((pid, uptime)) = self.running_info() else {
            return ServerStatus::not_running();
        };

        match self.inner.probe.health().await {
            Ok(report) => ServerStatus::healthy(report.model_loaded, Some(uptime), Some(pid)),
            Err(e) => ServerStatus::unhealthy(
                format!("Health check failed: {}", e),
                Some(uptime),
                Some(pid),
            ),
        }
    }

    /// Server-reported metrics, `None` on any failure
    pub async fn metrics(&self) -> Option<ServerMetrics> {
        match self.inner.probe.metrics().await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                debug!("Failed to get server metrics: {}", e);
                None
            }
        }
    }

    pub async fn is_healthy(&self) -> bool {
        self.status().await.healthy
    }

    /// Idempotent; suppresses auto-restart, stops monitors and the process
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down process supervisor");
        self.stop_monitoring();
        self.stop().await;
        lock(&self.inner.monitor).take();
        info!("Process supervisor shutdown complete");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.state)
            .current
            .as_ref()
            .map(|c| !c.has_exited())
            .unwrap_or(false)
    }

    pub fn pid(&self) -> Option<u32> {
        self.running_info().map(|(pid, _)| pid)
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.running_info().map(|(_, uptime)| uptime)
    }

    /// Automatic restarts since the last healthy start
    pub fn restart_attempts(&self) -> u32 {
        lock(&self.inner.state).tracker.attempts()
    }

    /// Processes spawned over the supervisor's lifetime
    pub fn spawn_count(&self) -> u64 {
        lock(&self.inner.state).spawn_count
    }

    fn running_info(&self) -> Option<(u32, Duration)> {
        let state = lock(&self.inner.state);
        state
            .current
            .as_ref()
            .filter(|c| !c.has_exited())
            .map(|c| (c.pid, c.started_at.elapsed()))
    }

    fn start_monitoring(&self) {
        let _ = self.inner.control.send(Control::StartHealthMonitor);
        if let Some(monitor) = lock(&self.inner.monitor).as_ref() {
            monitor.start_sampling(monitor.config().sample_interval());
        }
    }

    fn stop_monitoring(&self) {
        let _ = self.inner.control.send(Control::StopHealthMonitor);
        if let Some(monitor) = lock(&self.inner.monitor).as_ref() {
            monitor.stop_sampling();
        }
    }
}

#[async_trait]
impl MetricsSource for ProcessSupervisor {
    async fn status(&self) -> ServerStatus {
        ProcessSupervisor::status(self).await
    }

    async fn metrics(&self) -> Option<ServerMetrics> {
        ProcessSupervisor::metrics(self).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn wait_for_exit(exited: &mut watch::Receiver<bool>, timeout: Duration) -> bool {
    // A dropped sender means the waiter task is gone, so is the process
    !matches!(
        tokio::time::timeout(timeout, exited.wait_for(|exited| *exited)).await,
        Err(_)
    )
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| GovernorError::SignalError(format!("Failed to send SIGTERM: {}", e)))
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> Result<()> {
    Err(GovernorError::SignalError(
        "graceful termination is not supported on this platform".to_string(),
    ))
}

/// Executes deferred lifecycle work so `start()` never has to spawn itself
async fn run_control(inner: Weak<SupervisorInner>, mut rx: mpsc::UnboundedReceiver<Control>) {
    let mut health_task: Option<JoinHandle<()>> = None;

    while let Some(command) = rx.recv().await {
        match command {
            Control::RestartAfter { delay, epoch } => {
                let inner = inner.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    let supervisor = ProcessSupervisor { inner };
                    if supervisor.is_shutting_down() {
                        return;
                    }
                    supervisor.start_scheduled(epoch).await;
                });
            }
            Control::StartHealthMonitor => {
                if health_task.as_ref().map_or(true, |t| t.is_finished()) {
                    let Some(period) = inner.upgrade().map(|i| i.config.health_check_interval())
                    else {
                        break;
                    };
                    debug!("Starting health monitor (interval: {:?})", period);
                    health_task = Some(tokio::spawn(health_loop(inner.clone(), period)));
                }
            }
            Control::StopHealthMonitor => {
                if let Some(task) = health_task.take() {
                    debug!("Stopping health monitor");
                    task.abort();
                }
            }
        }
    }

    if let Some(task) = health_task.take() {
        task.abort();
    }
}

/// Restarts the server whenever it is running but fails its health probe
async fn health_loop(inner: Weak<SupervisorInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let supervisor = ProcessSupervisor { inner };

        let status = supervisor.status().await;
        if status.running && !status.healthy {
            warn!(
                error = status.error.as_deref().unwrap_or("unknown"),
                "Model server health check failed, attempting restart"
            );
            // Detached: the restart stops this loop while it runs
            tokio::spawn(async move {
                supervisor.restart().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// A loopback port with nothing listening on it
    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn create_test_config(script: &str) -> (TempDir, ServerConfig) {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("main.sh"), script).unwrap();

        let config = ServerConfig {
            server_dir: temp_dir.path().to_path_buf(),
            entrypoint: "main.sh".to_string(),
            interpreter: "/bin/sh".to_string(),
            port: closed_port(),
            startup_timeout_ms: 2_000,
            probe_interval_ms: 50,
            probe_timeout_ms: 200,
            stop_timeout_ms: 1_000,
            restart_delay_ms: 50,
            restart_pause_ms: 10,
            ..ServerConfig::default()
        };
        (temp_dir, config)
    }

    async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_start_missing_server_dir_fails_fast() {
        let config = ServerConfig {
            server_dir: "/nonexistent/model-server".into(),
            ..ServerConfig::default()
        };
        let supervisor = ProcessSupervisor::new(config);

        assert!(!supervisor.start().await);
        assert!(matches!(
            supervisor.try_start().await,
            Err(GovernorError::ServerDirNotFound(_))
        ));
        assert_eq!(supervisor.spawn_count(), 0);
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_status_when_not_running() {
        let (_dir, config) = create_test_config("exit 0\n");
        let supervisor = ProcessSupervisor::new(config);

        let status = supervisor.status().await;
        assert!(!status.running);
        assert!(!status.healthy);
        assert!(supervisor.metrics().await.is_none());
        assert!(supervisor.uptime().is_none());
    }

    #[tokio::test]
    async fn test_crash_loop_stops_after_three_restarts() {
        let (_dir, config) = create_test_config("exit 1\n");
        let supervisor = ProcessSupervisor::new(config);

        assert!(!supervisor.start().await);

        let settled = wait_until(
            || supervisor.restart_attempts() == 3 && supervisor.spawn_count() == 4,
            Duration::from_secs(10),
        )
        .await;
        assert!(settled, "spawned {} times", supervisor.spawn_count());

        // No further attempts once the budget is spent
        sleep(Duration::from_millis(300)).await;
        assert_eq!(supervisor.spawn_count(), 4);
        assert_eq!(supervisor.restart_attempts(), 3);
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_start_timeout_stops_process() {
        let (_dir, mut config) = create_test_config("exec sleep 30\n");
        config.startup_timeout_ms = 300;
        let supervisor = ProcessSupervisor::new(config);

        assert!(matches!(
            supervisor.try_start().await,
            Err(GovernorError::StartTimeout(_))
        ));
        assert!(!supervisor.is_running());

        // The stop was requested, so no automatic restart follows
        sleep(Duration::from_millis(200)).await;
        assert_eq!(supervisor.spawn_count(), 1);
        assert_eq!(supervisor.restart_attempts(), 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_scheduled_restart() {
        let (_dir, mut config) = create_test_config("exit 1\n");
        config.restart_delay_ms = 300;
        let supervisor = ProcessSupervisor::new(config);

        assert!(!supervisor.start().await);
        assert!(wait_until(|| supervisor.restart_attempts() == 1, Duration::from_secs(2)).await);

        // Stopped inside the backoff window
        supervisor.stop().await;
        sleep(Duration::from_millis(600)).await;

        assert_eq!(supervisor.spawn_count(), 1);
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_blocks_start() {
        let (_dir, config) = create_test_config("exec sleep 30\n");
        let supervisor = ProcessSupervisor::new(config);

        supervisor.shutdown().await;
        supervisor.shutdown().await;

        assert!(supervisor.is_shutting_down());
        assert!(matches!(
            supervisor.try_start().await,
            Err(GovernorError::ShuttingDown)
        ));
        assert_eq!(supervisor.spawn_count(), 0);
    }
}
