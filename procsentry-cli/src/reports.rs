use crate::http::{endpoint, format_opt, json_or_error};
use colored::*;
use reqwest::Client;
use serde::Deserialize;
use std::error::Error;

#[derive(Debug, Deserialize)]
struct Anomaly {
    detected_at: String,
    pid: u32,
    name: String,
    cpu: f32,
    memory_mb: f64,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    time: String,
    process: String,
    detail: String,
}

#[derive(Debug, Deserialize)]
struct Leak {
    pid: u32,
    name: String,
    severity: String,
    warning: String,
}

#[derive(Debug, Deserialize)]
struct AlertRecord {
    timestamp: u64,
    alert: String,
}

#[derive(Debug, Deserialize)]
struct Model {
    intercept: f64,
    cpu_coef: f64,
    memory_coef: f64,
    trained_at: String,
    samples: usize,
}

#[derive(Debug, Deserialize)]
struct ForecastView {
    prediction: Option<f64>,
    model: Option<Model>,
}

#[derive(Debug, Deserialize)]
struct TrainReport {
    model: Model,
    score: f64,
    train_rows: usize,
    test_rows: usize,
}

pub async fn run_anomalies(
    client: &Client,
    url: &str,
    recent: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    if let Some(n) = recent {
        let mut target = endpoint(url, &["anomalies", "recent"])?;
        target.query_pairs_mut().append_pair("limit", &n.to_string());
        let entries: Vec<LogEntry> = json_or_error(client.get(target).send().await?).await?;
        if entries.is_empty() {
            println!("{}", "anomaly log is empty".dimmed());
        }
        for entry in entries {
            println!("{}  {:<32} {}", entry.time.dimmed(), entry.process, entry.detail);
        }
        return Ok(());
    }

    let anomalies: Vec<Anomaly> =
        json_or_error(client.get(endpoint(url, &["anomalies"])?).send().await?).await?;
    if anomalies.is_empty() {
        println!("{}", "no outliers in the latest snapshot".green());
    } else {
        println!(
            "{:<9} {:<8} {:<6} {:<10} {:<8} NAME",
            "TIME", "PID", "CPU%", "MEM(MB)", "SCORE"
        );
        for a in anomalies {
            println!(
                "{:<9} {:<8} {:<6.1} {:<10.0} {} {}",
                a.detected_at,
                a.pid,
                a.cpu,
                a.memory_mb,
                format!("{:<8.4}", a.score).red(),
                a.name
            );
        }
    }

    let leaks: Vec<Leak> =
        json_or_error(client.get(endpoint(url, &["leaks"])?).send().await?).await?;
    for leak in leaks {
        let line = format!("{} ({}): {}", leak.name, leak.pid, leak.warning);
        if leak.severity == "critical" {
            println!("{}", line.red().bold());
        } else {
            println!("{}", line.yellow());
        }
    }
    Ok(())
}

pub async fn run_alerts(client: &Client, url: &str, limit: usize) -> Result<(), Box<dyn Error>> {
    let mut target = endpoint(url, &["alerts"])?;
    target
        .query_pairs_mut()
        .append_pair("limit", &limit.to_string());
    let alerts: Vec<AlertRecord> = json_or_error(client.get(target).send().await?).await?;

    if alerts.is_empty() {
        println!("{}", "no enforcement alerts".green());
    }
    for record in alerts {
        let when = record.timestamp.to_string().dimmed();
        if record.alert.starts_with("FAILED") {
            println!("{when} {}", record.alert.red());
        } else {
            println!("{when} {}", record.alert.yellow());
        }
    }
    Ok(())
}

pub async fn run_forecast(client: &Client, url: &str, train: bool) -> Result<(), Box<dyn Error>> {
    if train {
        let resp = client
            .post(endpoint(url, &["forecast", "train"])?)
            .send()
            .await?;
        let report: TrainReport = json_or_error(resp).await?;
        println!(
            "{} on {} rows, R² {:.3} on {} held out",
            "Model trained".green(),
            report.train_rows,
            report.score,
            report.test_rows
        );
        print_model(&report.model);
        return Ok(());
    }

    let view: ForecastView =
        json_or_error(client.get(endpoint(url, &["forecast"])?).send().await?).await?;
    match view.prediction {
        Some(cpu) => println!("Next-interval CPU: {}", format!("{cpu:.2}%").bold()),
        None => println!("{}", "no forecast available".dimmed()),
    }
    if let Some(model) = view.model {
        print_model(&model);
    }
    Ok(())
}

fn print_model(model: &Model) {
    println!(
        "  cpu' = {} + {}·cpu + {}·mem  ({} samples, trained {})",
        format_opt(Some(model.intercept), 3),
        format_opt(Some(model.cpu_coef), 3),
        format_opt(Some(model.memory_coef), 3),
        model.samples,
        model.trained_at
    );
}
