// Library exports for the inference-server governor

pub mod cli;
pub mod config;
pub mod error;
pub mod governor;
pub mod monitor;
pub mod process;
pub mod service;

pub use config::GovernorConfig;
pub use error::{GovernorError, Result};
pub use governor::{RequestError, RequestGovernor};
pub use monitor::ResourceMonitor;
pub use process::ProcessSupervisor;
pub use service::GovernorService;
