use anyhow::{Result, anyhow};

use crate::config::DEFAULT_PING_STATS_DAYS;
use crate::database::DiscoveryStatus;

const DEFAULT_QUEUE_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Discover {
        ip: String,
    },
    Scan {
        cidr: String,
    },
    Queue {
        status: Option<DiscoveryStatus>,
        page: u32,
        page_size: u32,
    },
    Assign,
    AssignStats,
    Stats,
    Purge {
        days: u32,
    },
    MarkProcessed {
        record_id: i64,
    },
    Delete {
        record_id: i64,
    },
    Ping {
        device_id: i64,
    },
    PingStats {
        device_id: i64,
        days: u32,
    },
    Monitor {
        interval: Option<u64>,
    },
    Help,
    Version,
}

pub fn version_text() -> String {
    format!("assetscan {}", env!("CARGO_PKG_VERSION"))
}

pub fn usage_text() -> String {
    format!(
        "{version}
Network device discovery, classification and liveness tracking

Usage:
  assetscan discover <IP>
  assetscan scan <CIDR>
  assetscan queue [--status <pending|processed|failed>] [--page <N>] [--page-size <N>]
  assetscan assign
  assetscan assign-stats
  assetscan stats
  assetscan purge <DAYS>
  assetscan mark-processed <RECORD_ID>
  assetscan delete <RECORD_ID>
  assetscan ping <DEVICE_ID>
  assetscan ping-stats <DEVICE_ID> [--days <N>]
  assetscan monitor [--interval <SECONDS>]
  assetscan --help
  assetscan --version

Options:
      --status <S>        Queue: only records with this status
      --page <N>          Queue: page number, starting at 1 (default: 1)
      --page-size <N>     Queue: records per page (default: {page_size})
      --days <N>          Ping-stats: trailing window in days (default: {days})
      --interval <N>      Monitor: seconds between sweeps
  -h, --help              Show this help text
  -V, --version           Show version

Results are printed to stdout as JSON. Logs go to stderr.",
        version = version_text(),
        page_size = DEFAULT_QUEUE_PAGE_SIZE,
        days = DEFAULT_PING_STATS_DAYS,
    )
}

fn invalid(message: String) -> anyhow::Error {
    anyhow!("{}\n\n{}", message, usage_text())
}

fn parse_positive<T>(flag: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    raw.trim()
        .parse::<T>()
        .ok()
        .filter(|v| *v > T::default())
        .ok_or_else(|| {
            invalid(format!(
                "Invalid value for {}: '{}'. Expected a positive integer.",
                flag, raw
            ))
        })
}

/// Splits `--flag=value` and `--flag value` forms
fn flag_value<I, S>(arg: &str, flag: &str, iter: &mut I) -> Result<Option<String>>
where
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    if arg == flag {
        let value = iter
            .next()
            .ok_or_else(|| invalid(format!("Missing value for {}.", flag)))?;
        return Ok(Some(value.as_ref().to_string()));
    }
    if let Some(value) = arg.strip_prefix(flag).and_then(|rest| rest.strip_prefix('=')) {
        if value.is_empty() {
            return Err(invalid(format!("Missing value for {}.", flag)));
        }
        return Ok(Some(value.to_string()));
    }
    Ok(None)
}

const COMMANDS: &[&str] = &[
    "discover",
    "scan",
    "queue",
    "assign",
    "assign-stats",
    "stats",
    "purge",
    "mark-processed",
    "delete",
    "ping",
    "ping-stats",
    "monitor",
];

pub fn parse_cli_args<I, S>(args: I) -> Result<CliCommand>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut iter = args.into_iter();
    let _program_name = iter.next();

    let mut command: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut status: Option<DiscoveryStatus> = None;
    let mut page: Option<u32> = None;
    let mut page_size: Option<u32> = None;
    let mut days: Option<u32> = None;
    let mut interval: Option<u64> = None;

    while let Some(arg) = iter.next() {
        let arg = arg.as_ref().to_string();
        match arg.as_str() {
            "-h" | "--help" => return Ok(CliCommand::Help),
            "-V" | "--version" => return Ok(CliCommand::Version),
            a if command.is_none() && COMMANDS.contains(&a) => command = Some(a.to_string()),
            a if a.starts_with("--") => {
                if let Some(v) = flag_value(a, "--status", &mut iter)? {
                    status = Some(v.parse::<DiscoveryStatus>().map_err(invalid)?);
                } else if let Some(v) = flag_value(a, "--page-size", &mut iter)? {
                    page_size = Some(parse_positive("--page-size", &v)?);
                } else if let Some(v) = flag_value(a, "--page", &mut iter)? {
                    page = Some(parse_positive("--page", &v)?);
                } else if let Some(v) = flag_value(a, "--days", &mut iter)? {
                    days = Some(parse_positive("--days", &v)?);
                } else if let Some(v) = flag_value(a, "--interval", &mut iter)? {
                    interval = Some(parse_positive("--interval", &v)?);
                } else {
                    return Err(invalid(format!("Unknown argument: {}", a)));
                }
            }
            _ if command.is_some() => positional.push(arg.clone()),
            _ => return Err(invalid(format!("Unknown command: {}", arg))),
        }
    }

    let Some(command) = command else {
        return Ok(CliCommand::Help);
    };

    let queue_flags = status.is_some() || page.is_some() || page_size.is_some();
    if queue_flags && command != "queue" {
        return Err(invalid(
            "--status/--page/--page-size are only valid with queue.".to_string(),
        ));
    }
    if days.is_some() && command != "ping-stats" {
        return Err(invalid("--days is only valid with ping-stats.".to_string()));
    }
    if interval.is_some() && command != "monitor" {
        return Err(invalid("--interval is only valid with monitor.".to_string()));
    }

    let expect_args = |count: usize, what: &str| -> Result<()> {
        if positional.len() != count {
            return Err(invalid(format!(
                "{} expects {}, got {} argument(s).",
                command,
                what,
                positional.len()
            )));
        }
        Ok(())
    };
    let id_arg = |name: &str| -> Result<i64> { parse_positive(name, &positional[0]) };

    match command.as_str() {
        "discover" => {
            expect_args(1, "an IP address")?;
            Ok(CliCommand::Discover {
                ip: positional[0].clone(),
            })
        }
        "scan" => {
            expect_args(1, "a CIDR range")?;
            Ok(CliCommand::Scan {
                cidr: positional[0].clone(),
            })
        }
        "queue" => {
            expect_args(0, "no positional arguments")?;
            Ok(CliCommand::Queue {
                status,
                page: page.unwrap_or(1),
                page_size: page_size.unwrap_or(DEFAULT_QUEUE_PAGE_SIZE),
            })
        }
        "assign" => {
            expect_args(0, "no positional arguments")?;
            Ok(CliCommand::Assign)
        }
        "assign-stats" => {
            expect_args(0, "no positional arguments")?;
            Ok(CliCommand::AssignStats)
        }
        "stats" => {
            expect_args(0, "no positional arguments")?;
            Ok(CliCommand::Stats)
        }
        "purge" => {
            expect_args(1, "a number of days")?;
            Ok(CliCommand::Purge {
                days: parse_positive("<DAYS>", &positional[0])?,
            })
        }
        "mark-processed" => {
            expect_args(1, "a record id")?;
            Ok(CliCommand::MarkProcessed {
                record_id: id_arg("<RECORD_ID>")?,
            })
        }
        "delete" => {
            expect_args(1, "a record id")?;
            Ok(CliCommand::Delete {
                record_id: id_arg("<RECORD_ID>")?,
            })
        }
        "ping" => {
            expect_args(1, "a device id")?;
            Ok(CliCommand::Ping {
                device_id: id_arg("<DEVICE_ID>")?,
            })
        }
        "ping-stats" => {
            expect_args(1, "a device id")?;
            Ok(CliCommand::PingStats {
                device_id: id_arg("<DEVICE_ID>")?,
                days: days.unwrap_or(DEFAULT_PING_STATS_DAYS as u32),
            })
        }
        "monitor" => {
            expect_args(0, "no positional arguments")?;
            Ok(CliCommand::Monitor { interval })
        }
        other => Err(invalid(format!("Unknown command: {}", other))),
    }
}
