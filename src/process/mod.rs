// Process module - model-server lifecycle, probes and restart policy

pub mod output;
pub mod probe;
pub mod restart;
pub mod spawner;
mod supervisor;
pub mod types;

pub use probe::ServerProbe;
pub use restart::{RestartDecision, RestartPolicy, RestartTracker};
pub use spawner::{check_layout, spawn_server, SpawnedServer};
pub use supervisor::ProcessSupervisor;
pub use types::{CpuMetrics, HealthReport, MemoryMetrics, ServerMetrics, ServerStatus};
