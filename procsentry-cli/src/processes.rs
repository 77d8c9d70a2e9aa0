use crate::http::{endpoint, json_or_error};
use colored::*;
use reqwest::Client;
use serde::Deserialize;
use std::error::Error;

#[derive(Debug, Deserialize)]
pub struct ProcessRow {
    pub pid: u32,
    pub name: String,
    pub cpu: f32,
    pub memory_mb: f64,
    pub threads: u64,
    pub age_min: f64,
    pub status: String,
    pub parent: Option<u32>,
}

fn cpu_color(cpu: f32) -> Color {
    if cpu >= 80.0 {
        Color::Red
    } else if cpu >= 50.0 {
        Color::Yellow
    } else {
        Color::Green
    }
}

pub async fn run_processes(client: &Client, url: &str, limit: usize) -> Result<(), Box<dyn Error>> {
    let mut target = endpoint(url, &["processes"])?;
    target
        .query_pairs_mut()
        .append_pair("limit", &limit.to_string());
    let processes: Vec<ProcessRow> = json_or_error(client.get(target).send().await?).await?;

    if processes.is_empty() {
        println!("{}", "no processes reported yet".dimmed());
        return Ok(());
    }

    println!(
        "{:<8} {:<8} {:<6} {:<10} {:<5} {:<9} {:<10} NAME",
        "PID", "PPID", "CPU%", "MEM(MB)", "THR", "AGE(min)", "STATUS"
    );

    for p in processes {
        let cpu = format!("{:<6.1}", p.cpu).color(cpu_color(p.cpu));
        let parent = p
            .parent
            .map(|pid| pid.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<8} {:<8} {} {:<10.1} {:<5} {:<9.1} {:<10} {}",
            p.pid, parent, cpu, p.memory_mb, p.threads, p.age_min, p.status, p.name
        );
    }

    Ok(())
}
