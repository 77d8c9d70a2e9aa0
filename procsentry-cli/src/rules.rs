use crate::http::{endpoint, format_opt, json_or_error};
use colored::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;

#[derive(Debug, Serialize, Deserialize)]
pub struct Rule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ram: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    pub action: String,
}

#[derive(Debug, Deserialize)]
struct Whitelist {
    apps: Vec<String>,
}

pub async fn list_rules(client: &Client, url: &str) -> Result<(), Box<dyn Error>> {
    let rules: BTreeMap<String, Rule> =
        json_or_error(client.get(endpoint(url, &["rules"])?).send().await?).await?;
    if rules.is_empty() {
        println!("{}", "no limit rules configured".dimmed());
        return Ok(());
    }

    println!(
        "{:<24} {:<8} {:<10} {:<10} ACTION",
        "PATTERN", "CPU%", "RAM(MB)", "AGE(min)"
    );
    for (pattern, rule) in rules {
        println!(
            "{:<24} {:<8} {:<10} {:<10} {}",
            pattern,
            format_opt(rule.cpu, 1),
            format_opt(rule.ram, 0),
            format_opt(rule.time, 1),
            rule.action.bold()
        );
    }
    Ok(())
}

pub async fn add_rule(
    client: &Client,
    url: &str,
    pattern: &str,
    rule: &Rule,
) -> Result<(), Box<dyn Error>> {
    if rule.cpu.is_none() && rule.ram.is_none() && rule.time.is_none() {
        eprintln!(
            "{}",
            "warning: rule has no thresholds and will never trigger".yellow()
        );
    }
    let resp = client
        .put(endpoint(url, &["rules", pattern])?)
        .json(rule)
        .send()
        .await?;
    let body: serde_json::Value = json_or_error(resp).await?;
    let saved = body
        .get("pattern")
        .and_then(|p| p.as_str())
        .unwrap_or(pattern);
    println!("{} rule '{saved}' ({})", "Saved".green(), rule.action);
    Ok(())
}

pub async fn remove_rule(client: &Client, url: &str, pattern: &str) -> Result<(), Box<dyn Error>> {
    let resp = client
        .delete(endpoint(url, &["rules", pattern])?)
        .send()
        .await?;
    let _: serde_json::Value = json_or_error(resp).await?;
    println!("{} rule '{pattern}'", "Removed".green());
    Ok(())
}

pub async fn list_whitelist(client: &Client, url: &str) -> Result<(), Box<dyn Error>> {
    let wl: Whitelist =
        json_or_error(client.get(endpoint(url, &["whitelist"])?).send().await?).await?;
    if wl.apps.is_empty() {
        println!("{}", "whitelist is empty".dimmed());
    }
    for app in wl.apps {
        println!("{app}");
    }
    Ok(())
}

pub async fn add_whitelist(client: &Client, url: &str, name: &str) -> Result<(), Box<dyn Error>> {
    let resp = client
        .post(endpoint(url, &["whitelist"])?)
        .json(&serde_json::json!({ "name": name }))
        .send()
        .await?;
    let body: serde_json::Value = json_or_error(resp).await?;
    if body.get("added").and_then(|a| a.as_bool()) == Some(false) {
        println!("'{name}' is already whitelisted");
    } else {
        println!("{} '{name}'", "Whitelisted".green());
    }
    Ok(())
}

pub async fn remove_whitelist(client: &Client, url: &str, name: &str) -> Result<(), Box<dyn Error>> {
    let resp = client
        .delete(endpoint(url, &["whitelist", name])?)
        .send()
        .await?;
    let _: serde_json::Value = json_or_error(resp).await?;
    println!("{} '{name}' from whitelist", "Removed".green());
    Ok(())
}
