//! assetscan - network device discovery, auto-classification and liveness
//! tracking for an IT asset inventory
//!
//! Scans stage one record per probed address in a discovery queue. The
//! auto-assignment engine turns pending records into inventory devices and
//! files them under a department and equipment unit. The liveness monitor
//! re-probes devices and keeps a transition history for uptime reporting.

pub mod app;
pub mod assignment;
pub mod cli;
mod command_handlers;
pub mod config;
pub mod database;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod network;
pub mod scanner;
pub mod stats;

#[doc(hidden)]
pub use tracing as __tracing;

pub use app::{
    ActionResult, AppCommandResult, AppContext, OutputHook, StatsReport, execute_command,
    execute_command_typed, execute_command_with_context, run, run_with_context, run_with_ctrl_c,
};
pub use assignment::{AssignmentReport, AssignmentStats, AutoAssignmentEngine, RuleSpec};
pub use cli::{CliCommand, parse_cli_args};
pub use config::DiscoveryConfig;
pub use database::Database;
pub use discovery::{DiscoveryService, SingleDiscovery, SubnetDiscovery};
pub use error::{Error, ProbeError, Result};
pub use logging::{get_current_log_file, init_logging};
pub use monitor::{BackgroundMonitor, LivenessMonitor, MonitorEvent, MonitoringStatus};
pub use scanner::{EchoProbe, LivenessProber, MetadataProber, SnmpTransport};
