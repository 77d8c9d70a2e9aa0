use clap::{Parser, Subcommand};
use reqwest::Client;
use std::error::Error;

mod http;
mod processes;
mod reports;
mod rules;
mod status;

#[derive(clap::Parser, Debug)]
#[command(version, about = "Terminal client for procsentryd")]
struct Args {
    /// Base URL of the procsentryd API
    #[clap(long, default_value = "http://127.0.0.1:5000")]
    url: String,

    /// Disable colorized output
    #[clap(long)]
    no_color: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Daemon health, counters and latest system metrics
    Status,
    /// Process table from the latest snapshot
    Processes {
        #[clap(long, default_value_t = 25)]
        limit: usize,
    },
    /// Outliers from the latest tick, or the last N anomaly log lines
    Anomalies {
        #[clap(long)]
        recent: Option<usize>,
    },
    /// Recent enforcement alerts
    Alerts {
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
    /// Next-interval CPU forecast
    Forecast {
        /// Retrain the model from history first
        #[clap(long)]
        train: bool,
    },
    /// Manage resource limit rules
    Rules {
        #[clap(subcommand)]
        action: RulesCommand,
    },
    /// Manage the enforcement whitelist
    Whitelist {
        #[clap(subcommand)]
        action: WhitelistCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
enum RulesCommand {
    List,
    /// Add or replace the rule for a name pattern
    Add {
        pattern: String,
        /// CPU percent threshold
        #[clap(long)]
        cpu: Option<f64>,
        /// Resident memory threshold in MB
        #[clap(long)]
        ram: Option<f64>,
        /// Process age threshold in minutes
        #[clap(long)]
        time: Option<f64>,
        /// kill, terminate, suspend or resume
        #[clap(long, default_value = "kill")]
        action: String,
    },
    Remove {
        pattern: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
enum WhitelistCommand {
    List,
    Add { name: String },
    Remove { name: String },
}

impl Command {
    fn is_mutating(&self) -> bool {
        match self {
            Command::Forecast { train } => *train,
            Command::Rules { action } => !matches!(action, RulesCommand::List),
            Command::Whitelist { action } => !matches!(action, WhitelistCommand::List),
            _ => false,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    if args.no_color {
        colored::control::set_override(false);
    }

    let client = Client::new();
    let mutating = args.command.is_mutating();
    if let Err(err) = dispatch(&client, &args.url, args.command).await {
        eprintln!("error: {err}");
        if mutating {
            std::process::exit(1);
        }
    }
}

async fn dispatch(client: &Client, url: &str, command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Status => status::run_status(client, url).await,
        Command::Processes { limit } => processes::run_processes(client, url, limit).await,
        Command::Anomalies { recent } => reports::run_anomalies(client, url, recent).await,
        Command::Alerts { limit } => reports::run_alerts(client, url, limit).await,
        Command::Forecast { train } => reports::run_forecast(client, url, train).await,
        Command::Rules { action } => match action {
            RulesCommand::List => rules::list_rules(client, url).await,
            RulesCommand::Add {
                pattern,
                cpu,
                ram,
                time,
                action,
            } => {
                let rule = rules::Rule {
                    cpu,
                    ram,
                    time,
                    action,
                };
                rules::add_rule(client, url, &pattern, &rule).await
            }
            RulesCommand::Remove { pattern } => rules::remove_rule(client, url, &pattern).await,
        },
        Command::Whitelist { action } => match action {
            WhitelistCommand::List => rules::list_whitelist(client, url).await,
            WhitelistCommand::Add { name } => rules::add_whitelist(client, url, &name).await,
            WhitelistCommand::Remove { name } => rules::remove_whitelist(client, url, &name).await,
        },
    }
}
