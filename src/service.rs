//! Composition root: one supervisor, one monitor, one governor.

use crate::config::GovernorConfig;
use crate::error::{GovernorError, Result};
use crate::governor::{GovernorStats, QueueStatus, RequestGovernor, WorkError};
use crate::monitor::{PerformanceSummary, ResourceMonitor};
use crate::process::{ProcessSupervisor, ServerStatus};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything an embedding application needs to display governor state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub server: ServerStatus,
    pub queue: QueueStatus,
    pub requests: GovernorStats,
    pub performance: PerformanceSummary,
    pub restart_attempts: u32,
    pub alert_count: usize,
}

/// Owns the three governor components and wires them together.
///
/// Construct it once at startup (inside a Tokio runtime) and hand clones to
/// whoever needs to submit work or read status.
#[derive(Clone)]
pub struct GovernorService {
    config: Arc<GovernorConfig>,
    supervisor: ProcessSupervisor,
    monitor: ResourceMonitor,
    governor: RequestGovernor,
}

impl GovernorService {
    /// Validates every section before anything is spawned
    pub fn new(config: GovernorConfig) -> Result<Self> {
        config.validate()?;

        let supervisor = ProcessSupervisor::new(config.server.clone());
        let monitor = ResourceMonitor::new(Arc::new(supervisor.clone()), config.monitor.clone())?;
        supervisor.attach_monitor(monitor.clone());
        let governor = RequestGovernor::new(config.governor.clone(), Arc::new(monitor.clone()))?;

        Ok(Self {
            config: Arc::new(config),
            supervisor,
            monitor,
            governor,
        })
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn monitor(&self) -> &ResourceMonitor {
        &self.monitor
    }

    pub fn governor(&self) -> &RequestGovernor {
        &self.governor
    }

    /// Start the model server; `true` once it is healthy
    pub async fn start(&self) -> bool {
        info!("Starting inference governor");
        self.supervisor.start().await
    }

    /// Route a generation request through the governor.
    ///
    /// Refused with [`GovernorError::ServerUnavailable`] while the server is
    /// not healthy, so no queue slot is spent on a dead backend.
    pub async fn submit_generation<F, Fut, T, E>(
        &self,
        work: F,
        priority: u8,
        timeout: Option<Duration>,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Into<WorkError> + Send + 'static,
    {
        let status = self.supervisor.status().await;
        if !status.healthy {
            return Err(GovernorError::ServerUnavailable(
                status
                    .error
                    .unwrap_or_else(|| "model server is not healthy".to_string()),
            ));
        }

        Ok(self.governor.submit(work, priority, timeout).await?)
    }

    pub async fn status_report(&self) -> StatusReport {
        StatusReport {
            server: self.supervisor.status().await,
            queue: self.governor.queue_status(),
            requests: self.governor.stats(),
            performance: self.monitor.performance_summary(),
            restart_attempts: self.supervisor.restart_attempts(),
            alert_count: self.monitor.alerts().len(),
        }
    }

    /// Drain the governor, then stop the server
    pub async fn shutdown(&self) {
        info!("Shutting down inference governor");
        self.governor.shutdown().await;
        self.supervisor.shutdown().await;
        info!("Inference governor stopped");
    }
}
