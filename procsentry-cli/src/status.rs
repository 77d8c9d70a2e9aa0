use crate::http::endpoint;
use colored::*;
use reqwest::Client;
use serde::Deserialize;
use std::error::Error;

#[derive(Deserialize, Debug)]
struct StatusResponse {
    version: String,
    counters: Counters,
    rules: usize,
    whitelist: usize,
    history_records: usize,
    model_present: bool,
    process_count: Option<usize>,
}

#[derive(Deserialize, Debug)]
struct Counters {
    uptime_secs: u64,
    metric_ticks: u64,
    enforce_ticks: u64,
    anomalies_flagged: u64,
    leak_warnings: u64,
    enforcement_alerts: u64,
    failed_actions: u64,
    last_snapshot_ms: u64,
}

#[derive(Deserialize, Debug)]
struct SystemView {
    cpu_percent: f32,
    mem_percent: f32,
    mem_total_mb: f64,
    disk_percent: f32,
}

pub async fn run_status(client: &Client, url: &str) -> Result<(), Box<dyn Error>> {
    println!("{}", "procsentry status".bold().cyan());
    println!();

    print!("• Daemon:           ");
    match client.get(endpoint(url, &["healthz"])?).send().await {
        Ok(resp) if resp.status().is_success() => println!("{}", "OK".green()),
        Ok(resp) => {
            println!("{}", format!("FAIL (Status {})", resp.status()).red());
            return Ok(());
        }
        Err(e) => {
            println!("{}", format!("FAIL ({e})").red());
            println!("  → Is procsentryd running? Try 'systemctl status procsentryd'");
            return Ok(());
        }
    }

    let status: StatusResponse = client
        .get(endpoint(url, &["status"])?)
        .send()
        .await?
        .json()
        .await?;
    let counters = &status.counters;
    println!("• Version:          {}", status.version.green());

    print!("• Uptime:           ");
    if counters.uptime_secs < 60 {
        println!("{}", format!("{}s (Just started)", counters.uptime_secs).yellow());
    } else {
        println!("{}", format!("{}s", counters.uptime_secs).green());
    }

    let system: Option<SystemView> = client
        .get(endpoint(url, &["system"])?)
        .send()
        .await?
        .json()
        .await?;
    print!("• Host:             ");
    match system {
        Some(sys) => println!(
            "CPU {} | RAM {} of {:.0} MB | Disk {}",
            pct(sys.cpu_percent),
            pct(sys.mem_percent),
            sys.mem_total_mb,
            pct(sys.disk_percent)
        ),
        None => println!("{}", "no snapshot yet".dimmed()),
    }

    println!(
        "• Ticks:            {} metrics, {} enforcement (last snapshot {} ms)",
        counters.metric_ticks, counters.enforce_ticks, counters.last_snapshot_ms
    );
    if let Some(count) = status.process_count {
        println!("• Processes:        {count}");
    }

    print!("• Anomalies:        ");
    if counters.anomalies_flagged > 0 {
        println!(
            "{}",
            format!(
                "{} flagged, {} leak warnings",
                counters.anomalies_flagged, counters.leak_warnings
            )
            .yellow()
        );
    } else {
        println!("{}", "0".green());
    }

    print!("• Enforcement:      ");
    if counters.failed_actions > 0 {
        println!(
            "{}",
            format!(
                "{} alerts ({} failed)",
                counters.enforcement_alerts, counters.failed_actions
            )
            .red()
        );
    } else {
        println!("{} alerts", counters.enforcement_alerts);
    }

    println!(
        "• Rules:            {} rules, {} whitelisted",
        status.rules, status.whitelist
    );

    print!("• Forecast model:   ");
    if status.model_present {
        println!("{} ({} history records)", "trained".green(), status.history_records);
    } else {
        println!(
            "{}",
            format!("not trained ({} history records)", status.history_records).dimmed()
        );
    }

    Ok(())
}

fn pct(value: f32) -> ColoredString {
    let text = format!("{value:.1}%");
    if value >= 90.0 {
        text.red()
    } else if value >= 70.0 {
        text.yellow()
    } else {
        text.green()
    }
}
