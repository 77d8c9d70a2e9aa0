use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::str::contains;

#[tokio::test]
async fn status_command_reports_counters() {
    let server = MockServer::start_async().await;

    let _health = server
        .mock_async(|when, then| {
            when.method(GET).path("/healthz");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"status":"ok"}"#);
        })
        .await;

    let _status = server
        .mock_async(|when, then| {
            when.method(GET).path("/status");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    r#"{
                    "version": "0.3.0",
                    "counters": {
                        "uptime_secs": 3600,
                        "metric_ticks": 720,
                        "enforce_ticks": 1200,
                        "anomalies_flagged": 3,
                        "leak_warnings": 1,
                        "enforcement_alerts": 2,
                        "failed_actions": 1,
                        "last_snapshot_ms": 140
                    },
                    "rules": 2,
                    "whitelist": 1,
                    "history_records": 720,
                    "model_present": true,
                    "last_tick": 1760000000,
                    "process_count": 312
                }"#,
                );
        })
        .await;

    let _system = server
        .mock_async(|when, then| {
            when.method(GET).path("/system");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    r#"{"timestamp":1760000000,"cpu_percent":42.0,"cpu_per_core":[40.0,44.0],"mem_percent":61.5,"mem_used_mb":9840.0,"mem_available_mb":6160.0,"mem_total_mb":16000.0,"disk_percent":55.0,"disk_free_gb":200.0,"net_tx_bytes":0,"net_rx_bytes":0,"process_count":312,"boot_time":1759990000}"#,
                );
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("procsentry-cli"))
        .args(["--url", &server.base_url(), "--no-color", "status"])
        .assert()
        .success()
        .stdout(contains("procsentry status"))
        .stdout(contains("0.3.0"))
        .stdout(contains("2 alerts (1 failed)"))
        .stdout(contains("2 rules, 1 whitelisted"))
        .stdout(contains("trained"));
}

#[tokio::test]
async fn status_before_first_tick_has_no_snapshot() {
    let server = MockServer::start_async().await;
    let _health = server
        .mock_async(|when, then| {
            when.method(GET).path("/healthz");
            then.status(200).body(r#"{"status":"ok"}"#);
        })
        .await;
    let _status = server
        .mock_async(|when, then| {
            when.method(GET).path("/status");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    r#"{"version":"0.3.0","counters":{"uptime_secs":2,"metric_ticks":0,"enforce_ticks":0,"anomalies_flagged":0,"leak_warnings":0,"enforcement_alerts":0,"failed_actions":0,"last_snapshot_ms":0},"rules":0,"whitelist":0,"history_records":0,"model_present":false,"last_tick":null,"process_count":null}"#,
                );
        })
        .await;
    let _system = server
        .mock_async(|when, then| {
            when.method(GET).path("/system");
            then.status(200)
                .header("content-type", "application/json")
                .body("null");
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("procsentry-cli"))
        .args(["--url", &server.base_url(), "--no-color", "status"])
        .assert()
        .success()
        .stdout(contains("Just started"))
        .stdout(contains("no snapshot yet"))
        .stdout(contains("not trained"));
}

#[tokio::test]
async fn status_command_handles_unreachable_server() {
    Command::new(assert_cmd::cargo::cargo_bin!("procsentry-cli"))
        .args(["--url", "http://127.0.0.1:59999", "--no-color", "status"])
        .assert()
        .success()
        .stdout(contains("FAIL"));
}
