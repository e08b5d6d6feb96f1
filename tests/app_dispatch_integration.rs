use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde_json::Value;

use assetscan::database::{NewDiscovery, upsert_discovery};
use assetscan::error::ProbeError;
use assetscan::scanner::{EchoFuture, EchoProbe, SnmpFuture, SnmpTransport, SnmpValue};
use assetscan::{
    AppCommandResult, AppContext, CliCommand, OutputHook, execute_command_typed,
    Database, execute_command_with_context, run_with_context,
};

/// Answers for every address in 10.2.0.0/24
struct LabSegment;

impl EchoProbe for LabSegment {
    fn echo<'a>(&'a self, ip: Ipv4Addr, _sequence: u16, _timeout: Duration) -> EchoFuture<'a> {
        Box::pin(async move {
            if ip.octets()[..3] == [10, 2, 0] {
                Ok(Duration::from_millis(1))
            } else {
                Err(ProbeError::Unreachable("no route".to_string()))
            }
        })
    }
}

struct PrinterAgent;

impl SnmpTransport for PrinterAgent {
    fn get<'a>(
        &'a self,
        _target: SocketAddr,
        _community: &'a str,
        _oids: &'a [&'static [u64]],
        _timeout: Duration,
    ) -> SnmpFuture<'a> {
        Box::pin(async {
            Ok(vec![
                (0, SnmpValue::Octets(b"HP LaserJet M404".to_vec())),
                (3, SnmpValue::Octets(b"prn-floor2".to_vec())),
            ])
        })
    }
}

fn unique_temp_db_path(prefix: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{}_{}.db", prefix, timestamp))
}

fn make_test_context(db_path: PathBuf) -> (AppContext, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let output_hook: OutputHook = Arc::new(move |line| {
        sink.lock()
            .expect("output lock should not be poisoned")
            .push(line.to_string());
    });

    let context = AppContext::from_env()
        .with_db_path(db_path)
        .with_output_hook(output_hook)
        .with_echo_probe(Arc::new(LabSegment))
        .with_snmp_transport(Arc::new(PrinterAgent));

    (context, lines)
}

fn last_json(lines: &Arc<Mutex<Vec<String>>>) -> Value {
    let lines = lines.lock().expect("output lock should not be poisoned");
    let last = lines.last().expect("command should emit output");
    serde_json::from_str(last).expect("command output should be JSON")
}

#[tokio::test]
async fn discover_then_assign_flows_through_the_cli() {
    let db_path = unique_temp_db_path("assetscan_dispatch");
    let (context, lines) = make_test_context(db_path.clone());

    run_with_context(["assetscan", "discover", "10.2.0.5"], &context)
        .await
        .expect("discover should succeed");
    let discovered = last_json(&lines);
    assert_eq!(discovered["ip_address"], "10.2.0.5");
    assert_eq!(discovered["alive"], true);
    assert_eq!(discovered["snmp_available"], true);

    run_with_context(["assetscan", "queue", "--status", "pending"], &context)
        .await
        .expect("queue should succeed");
    let queue = last_json(&lines);
    assert_eq!(queue["total"], 1);
    assert_eq!(queue["items"][0]["sys_name"], "prn-floor2");

    run_with_context(["assetscan", "assign"], &context)
        .await
        .expect("assign should succeed");
    let report = last_json(&lines);
    assert_eq!(report["success"], true);

    run_with_context(["assetscan", "stats"], &context)
        .await
        .expect("stats should succeed");
    let stats = last_json(&lines);
    assert_eq!(stats["inventory"]["devices"]["total"], 1);
    assert_eq!(stats["discovery"]["processed"], 1);

    let _ = std::fs::remove_file(db_path);
}

#[tokio::test]
async fn typed_scan_reports_per_address_counts() {
    let db_path = unique_temp_db_path("assetscan_typed_scan");
    let (context, _lines) = make_test_context(db_path.clone());

    let result = execute_command_typed(
        CliCommand::Scan {
            cidr: "10.2.0.0/30".to_string(),
        },
        &context,
    )
    .await
    .expect("scan should succeed");

    match result {
        AppCommandResult::Scan(summary) => {
            assert_eq!(summary.host_count, 2);
            assert_eq!(summary.alive_count, 2);
            assert_eq!(summary.staged_count, 2);
        }
        other => panic!("expected scan result, got {:?}", other),
    }

    let _ = std::fs::remove_file(db_path);
}

#[tokio::test]
async fn invalid_targets_are_rejected_before_probing() {
    let db_path = unique_temp_db_path("assetscan_invalid");
    let (context, lines) = make_test_context(db_path.clone());

    let err = run_with_context(["assetscan", "discover", "10.2.0.0/24"], &context)
        .await
        .expect_err("a range is not a single address");
    assert!(format!("{:#}", err).contains("validation"));

    let err = run_with_context(["assetscan", "purge", "0"], &context)
        .await
        .expect_err("zero-day retention should be rejected");
    assert!(err.to_string().contains("positive integer"));

    assert!(lines.lock().unwrap().is_empty());
    let _ = std::fs::remove_file(db_path);
}

#[tokio::test]
async fn monitor_streams_events_until_cancelled() {
    let db_path = unique_temp_db_path("assetscan_monitor");
    let (context, lines) = make_test_context(db_path.clone());
    context.cancel();

    execute_command_with_context(CliCommand::Monitor { interval: Some(30) }, &context)
        .await
        .expect("monitor should stop cleanly");

    let lines = lines.lock().unwrap();
    let events: Vec<Value> = lines[..lines.len() - 1]
        .iter()
        .map(|line| serde_json::from_str(line).expect("event lines should be JSON"))
        .collect();
    assert_eq!(events.first().unwrap()["type"], "MonitoringStarted");
    assert_eq!(events.first().unwrap()["data"]["interval_seconds"], 30);
    assert_eq!(events.last().unwrap()["type"], "MonitoringStopped");

    let status: Value = serde_json::from_str(lines.last().unwrap()).unwrap();
    assert_eq!(status["is_running"], false);

    let _ = std::fs::remove_file(db_path);
}

#[tokio::test]
async fn queue_maintenance_runs_without_an_icmp_socket() {
    let db_path = unique_temp_db_path("assetscan_queue_only");
    let record_id = {
        let db = Database::new(db_path.clone()).expect("database should open");
        let conn = db.lock().expect("database lock");
        upsert_discovery(
            &conn,
            &NewDiscovery {
                ip_address: "10.2.0.77".to_string(),
                is_alive: true,
                ..NewDiscovery::default()
            },
            Utc::now(),
        )
        .expect("staging should succeed")
    };

    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let context = AppContext::from_env()
        .with_db_path(db_path.clone())
        .with_output_hook(Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        }));

    let id = record_id.to_string();
    run_with_context(["assetscan", "mark-processed", id.as_str()], &context)
        .await
        .expect("mark-processed should not need a socket");
    run_with_context(["assetscan", "queue", "--status", "processed"], &context)
        .await
        .expect("queue should not need a socket");
    assert_eq!(last_json(&lines)["total"], 1);

    run_with_context(["assetscan", "delete", id.as_str()], &context)
        .await
        .expect("delete should succeed");
    let err = run_with_context(["assetscan", "delete", id.as_str()], &context)
        .await
        .expect_err("a deleted record is gone");
    assert!(format!("{:#}", err).contains("not found"));

    let _ = std::fs::remove_file(db_path);
}

#[tokio::test]
async fn typed_purge_of_zero_days_is_rejected_by_the_service() {
    let db_path = unique_temp_db_path("assetscan_purge_zero");
    let (context, _lines) = make_test_context(db_path.clone());

    let err = execute_command_typed(CliCommand::Purge { days: 0 }, &context)
        .await
        .expect_err("zero-day retention should be rejected");
    assert!(format!("{:#}", err).contains("retention must be at least one day"));

    let _ = std::fs::remove_file(db_path);
}
