use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::assignment::{AssignmentReport, AssignmentStats};
use crate::cli::{CliCommand, parse_cli_args, usage_text, version_text};
use crate::command_handlers::{
    handle_assign, handle_assign_stats, handle_delete_record, handle_discover,
    handle_mark_processed, handle_monitor, handle_ping, handle_ping_stats, handle_purge,
    handle_queue, handle_scan, handle_stats,
};
use crate::config::DiscoveryConfig;
use crate::database::{Database, DiscoveryRecord, Page};
use crate::discovery::{SingleDiscovery, SubnetDiscovery};
use crate::monitor::{MonitorEvent, MonitoringStatus, PingOutcome, PingStats};
use crate::scanner::{EchoProbe, Snmp2Transport, SnmpTransport};
use crate::stats::{DiscoveryStats, InventorySummary};

pub type OutputHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything a command needs from its environment
#[derive(Clone)]
pub struct AppContext {
    config: DiscoveryConfig,
    db_path: PathBuf,
    output_hook: OutputHook,
    echo_probe: Option<Arc<dyn EchoProbe>>,
    snmp_transport: Arc<dyn SnmpTransport>,
    cancel: CancellationToken,
}

/// Combined output of the `stats` command
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub discovery: DiscoveryStats,
    pub inventory: InventorySummary,
}

/// Outcome of a simple mutation
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum AppCommandResult {
    HelpText(String),
    VersionText(String),
    Discover(SingleDiscovery),
    Scan(SubnetDiscovery),
    Queue(Page<DiscoveryRecord>),
    Assign(AssignmentReport),
    AssignStats(AssignmentStats),
    Stats(StatsReport),
    Purge { success: bool, deleted: usize },
    Action(ActionResult),
    Ping(PingOutcome),
    PingStats(PingStats),
    Monitor(MonitoringStatus),
}

impl Default for AppContext {
    fn default() -> Self {
        Self::from_env()
    }
}

impl AppContext {
    pub fn from_env() -> Self {
        let config = DiscoveryConfig::from_env();
        let db_path = config
            .database_path
            .clone()
            .unwrap_or_else(Database::default_path);
        Self {
            config,
            db_path,
            output_hook: Arc::new(|line| println!("{}", line)),
            echo_probe: None,
            snmp_transport: Arc::new(Snmp2Transport),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_db_path(mut self, db_path: PathBuf) -> Self {
        self.db_path = db_path;
        self
    }

    pub fn with_output_hook(mut self, output_hook: OutputHook) -> Self {
        self.output_hook = output_hook;
        self
    }

    /// Replaces the ICMP socket, e.g. for unprivileged runs or tests
    pub fn with_echo_probe(mut self, probe: Arc<dyn EchoProbe>) -> Self {
        self.echo_probe = Some(probe);
        self
    }

    pub fn with_snmp_transport(mut self, transport: Arc<dyn SnmpTransport>) -> Self {
        self.snmp_transport = transport;
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn echo_probe(&self) -> Option<Arc<dyn EchoProbe>> {
        self.echo_probe.clone()
    }

    pub(crate) fn snmp_transport(&self) -> Arc<dyn SnmpTransport> {
        Arc::clone(&self.snmp_transport)
    }

    pub fn emit_line(&self, line: &str) {
        (self.output_hook)(line);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Run the app by parsing CLI-style args and dispatching the command.
pub async fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let context = AppContext::from_env();
    run_with_context(args, &context).await
}

/// Run the app with an explicit context (config, database path, probes, output).
pub async fn run_with_context<I, S>(args: I, context: &AppContext) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let command = parse_cli_args(args)?;
    execute_command_with_context(command, context).await
}

/// Run the app with Ctrl+C wired to the context's cancellation token.
pub async fn run_with_ctrl_c<I, S>(args: I, context: &AppContext) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let cancel_context = context.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_context.cancel();
            crate::log_stderr!("Cancellation requested (Ctrl+C). Finishing in-flight probes...");
        }
    });

    let run_result = run_with_context(args, context).await;
    signal_task.abort();
    run_result
}

/// Execute a pre-parsed command. This is reusable for non-CLI entrypoints.
pub async fn execute_command(command: CliCommand) -> Result<()> {
    let context = AppContext::from_env();
    execute_command_with_context(command, &context).await
}

/// Execute a pre-parsed command with an explicit execution context.
pub async fn execute_command_with_context(command: CliCommand, context: &AppContext) -> Result<()> {
    let result = execute_command_typed(command, context).await?;
    emit_command_result(&result, context)
}

/// Execute a pre-parsed command and return a strongly-typed result payload.
pub async fn execute_command_typed(command: CliCommand, context: &AppContext) -> Result<AppCommandResult> {
    match command {
        CliCommand::Help => Ok(AppCommandResult::HelpText(usage_text())),
        CliCommand::Version => Ok(AppCommandResult::VersionText(version_text())),
        CliCommand::Discover { ip } => Ok(AppCommandResult::Discover(handle_discover(&ip, context).await?)),
        CliCommand::Scan { cidr } => Ok(AppCommandResult::Scan(handle_scan(&cidr, context).await?)),
        CliCommand::Queue {
            status,
            page,
            page_size,
        } => Ok(AppCommandResult::Queue(handle_queue(status, page, page_size, context)?)),
        CliCommand::Assign => Ok(AppCommandResult::Assign(handle_assign(context)?)),
        CliCommand::AssignStats => Ok(AppCommandResult::AssignStats(handle_assign_stats(context)?)),
        CliCommand::Stats => Ok(AppCommandResult::Stats(handle_stats(context)?)),
        CliCommand::Purge { days } => Ok(AppCommandResult::Purge {
            success: true,
            deleted: handle_purge(days, context)?,
        }),
        CliCommand::MarkProcessed { record_id } => {
            handle_mark_processed(record_id, context)?;
            Ok(AppCommandResult::Action(ActionResult {
                success: true,
                message: format!("Discovery record {} marked processed", record_id),
            }))
        }
        CliCommand::Delete { record_id } => {
            handle_delete_record(record_id, context)?;
            Ok(AppCommandResult::Action(ActionResult {
                success: true,
                message: format!("Discovery record {} deleted", record_id),
            }))
        }
        CliCommand::Ping { device_id } => Ok(AppCommandResult::Ping(handle_ping(device_id, context).await?)),
        CliCommand::PingStats { device_id, days } => {
            Ok(AppCommandResult::PingStats(handle_ping_stats(device_id, days, context)?))
        }
        CliCommand::Monitor { interval } => {
            Ok(AppCommandResult::Monitor(handle_monitor(interval, context).await?))
        }
    }
}

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string_pretty(value).with_context(|| format!("Failed to serialize {}", what))
}

fn emit_command_result(result: &AppCommandResult, context: &AppContext) -> Result<()> {
    let output = match result {
        AppCommandResult::HelpText(text) | AppCommandResult::VersionText(text) => text.clone(),
        AppCommandResult::Discover(r) => to_json(r, "discovery result")?,
        AppCommandResult::Scan(r) => to_json(r, "scan summary")?,
        AppCommandResult::Queue(r) => to_json(r, "discovery queue")?,
        AppCommandResult::Assign(r) => to_json(r, "assignment report")?,
        AppCommandResult::AssignStats(r) => to_json(r, "assignment stats")?,
        AppCommandResult::Stats(r) => to_json(r, "statistics")?,
        AppCommandResult::Purge { success, deleted } => to_json(
            &serde_json::json!({ "success": success, "deleted": deleted }),
            "purge result",
        )?,
        AppCommandResult::Action(r) => to_json(r, "action result")?,
        AppCommandResult::Ping(r) => to_json(r, "ping outcome")?,
        AppCommandResult::PingStats(r) => to_json(r, "ping stats")?,
        AppCommandResult::Monitor(r) => to_json(r, "monitoring status")?,
    };
    context.emit_line(&output);
    Ok(())
}

/// One JSON line per monitor event
pub(crate) fn monitor_event_line(event: &MonitorEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"type\":\"SerializeError\",\"data\":\"{}\"}}", e))
}
