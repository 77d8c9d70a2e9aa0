use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::str::contains;

#[tokio::test]
async fn rules_list_prints_thresholds() {
    let server = MockServer::start_async().await;
    let _m = server
        .mock_async(|when, then| {
            when.method(GET).path("/rules");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"chrome":{"cpu":null,"ram":1000.0,"time":null,"action":"terminate"}}"#);
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("procsentry-cli"))
        .args(["--url", &server.base_url(), "--no-color", "rules", "list"])
        .assert()
        .success()
        .stdout(contains("chrome"))
        .stdout(contains("1000"))
        .stdout(contains("terminate"));
}

#[tokio::test]
async fn rules_add_puts_the_rule() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path("/rules/chrome")
                .json_body_partial(r#"{"ram":500.0,"action":"suspend"}"#);
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"pattern":"chrome","rule":{"cpu":null,"ram":500.0,"time":null,"action":"suspend"}}"#);
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("procsentry-cli"))
        .args([
            "--url",
            &server.base_url(),
            "--no-color",
            "rules",
            "add",
            "chrome",
            "--ram",
            "500",
            "--action",
            "suspend",
        ])
        .assert()
        .success()
        .stdout(contains("Saved rule 'chrome'"));
    m.assert_async().await;
}

#[tokio::test]
async fn rules_add_surfaces_rejection() {
    let server = MockServer::start_async().await;
    let _m = server
        .mock_async(|when, then| {
            when.method(PUT).path("/rules/chrome");
            then.status(400)
                .header("content-type", "application/json")
                .body(r#"{"error":"invalid rule: unknown action 'obliterate'"}"#);
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("procsentry-cli"))
        .args([
            "--url",
            &server.base_url(),
            "rules",
            "add",
            "chrome",
            "--cpu",
            "80",
            "--action",
            "obliterate",
        ])
        .assert()
        .failure()
        .stderr(contains("unknown action 'obliterate'"));
}

#[tokio::test]
async fn rules_remove_missing_pattern_fails() {
    let server = MockServer::start_async().await;
    let _m = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/rules/ghost");
            then.status(404)
                .header("content-type", "application/json")
                .body(r#"{"error":"no rule for 'ghost'"}"#);
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("procsentry-cli"))
        .args(["--url", &server.base_url(), "rules", "remove", "ghost"])
        .assert()
        .failure()
        .stderr(contains("no rule for 'ghost'"));
}

#[tokio::test]
async fn mutating_commands_fail_when_daemon_is_down() {
    Command::new(assert_cmd::cargo::cargo_bin!("procsentry-cli"))
        .args(["--url", "http://127.0.0.1:59999", "whitelist", "add", "postgres"])
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[tokio::test]
async fn whitelist_add_reports_existing_entry() {
    let server = MockServer::start_async().await;
    let _m = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/whitelist")
                .json_body_partial(r#"{"name":"postgres"}"#);
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"name":"postgres","added":false}"#);
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("procsentry-cli"))
        .args(["--url", &server.base_url(), "--no-color", "whitelist", "add", "postgres"])
        .assert()
        .success()
        .stdout(contains("already whitelisted"));
}

#[tokio::test]
async fn forecast_train_without_history_fails() {
    let server = MockServer::start_async().await;
    let _m = server
        .mock_async(|when, then| {
            when.method(POST).path("/forecast/train");
            then.status(422)
                .header("content-type", "application/json")
                .body(r#"{"error":"not enough history to train: have 12, need 30"}"#);
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("procsentry-cli"))
        .args(["--url", &server.base_url(), "forecast", "--train"])
        .assert()
        .failure()
        .stderr(contains("need 30"));
}

#[tokio::test]
async fn forecast_shows_prediction() {
    let server = MockServer::start_async().await;
    let _m = server
        .mock_async(|when, then| {
            when.method(GET).path("/forecast");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"prediction":37.25,"model":{"intercept":1.5,"cpu_coef":0.9,"memory_coef":0.01,"trained_at":"2026-10-16T09:00:00","samples":120}}"#);
        })
        .await;

    Command::new(assert_cmd::cargo::cargo_bin!("procsentry-cli"))
        .args(["--url", &server.base_url(), "--no-color", "forecast"])
        .assert()
        .success()
        .stdout(contains("37.25%"))
        .stdout(contains("120 samples"));
}
