#![forbid(unsafe_code)]

//! `gateway-console-ctl` — one-shot gateway commands from the terminal.
//!
//! Opens its own authenticated connection using the same configuration as
//! the server, runs one command, and disconnects.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use gateway_console::config::GlobalConfig;
use gateway_console::models::agent::AgentInfo;
use gateway_console::models::cron::{relative_time, CronListResponse, CronRunEntry, CronSchedule};
use gateway_console::models::list_from_payload;
use gateway_console::models::session::SessionEntry;
use gateway_console::{AppError, GatewayClient, Result};

#[derive(Debug, Parser)]
#[command(
    name = "gateway-console-ctl",
    about = "One-shot gateway RPC commands",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report whether the gateway accepts our handshake.
    Status,

    /// Invoke a gateway method and print its payload.
    Call {
        /// Method name, e.g. `cron.list`.
        method: String,
        /// Parameters as a JSON object.
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// List cron jobs with their schedule, next run and last run.
    Cron,

    /// Show recent runs of one cron job.
    Runs {
        /// Job id.
        id: String,
        /// Maximum number of runs to show.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// List agent sessions, most recently active first.
    Sessions,

    /// List agents.
    Agents,
}

fn main() {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("Error: failed to build tokio runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(args)) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.apply_env_overrides()?;
    config.load_credentials().await?;

    let client = GatewayClient::new(&config);
    let outcome = execute(&client, &args.command).await;
    client.disconnect();
    outcome
}

async fn execute(client: &GatewayClient, command: &Command) -> Result<()> {
    match command {
        Command::Status => {
            if client.is_connected().await {
                println!("connected");
                Ok(())
            } else {
                Err(AppError::Connection("gateway unreachable or handshake failed".into()))
            }
        }
        Command::Call { method, params } => {
            let params: Value = serde_json::from_str(params)
                .map_err(|err| AppError::InvalidRequest(format!("--params is not JSON: {err}")))?;
            let payload = client.call(method, params).await?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        Command::Cron => {
            let list = client
                .call_typed::<Option<CronListResponse>>("cron.list", Value::Null)
                .await?
                .unwrap_or_default();
            let now = chrono::Utc::now();
            for job in &list.jobs {
                let state = job.state.clone().unwrap_or_default();
                let next = state
                    .next_run_at()
                    .map_or_else(|| "-".to_owned(), |at| relative_time(at, now));
                let last = state
                    .last_run_at()
                    .map_or_else(|| "-".to_owned(), |at| relative_time(at, now));
                println!(
                    "{:<8} {:<24} {:<32} next {:<10} last {:<10} {}",
                    if job.enabled.unwrap_or(true) { "enabled" } else { "disabled" },
                    job.label(),
                    job.schedule.as_ref().map_or_else(|| "-".to_owned(), CronSchedule::describe),
                    next,
                    last,
                    state.last_status.as_deref().unwrap_or("-"),
                );
            }
            if list.jobs.is_empty() {
                println!("no cron jobs");
            }
            Ok(())
        }
        Command::Runs { id, limit } => {
            let payload = client
                .call("cron.runs", json!({ "id": id, "limit": limit }))
                .await?;
            let runs: Vec<CronRunEntry> = list_from_payload(payload, "runs")?;
            for run in &runs {
                println!(
                    "{:<26} {:<8} {:>8} {}",
                    run.started_at.as_deref().unwrap_or("-"),
                    run.status.as_deref().unwrap_or("-"),
                    run.duration
                        .as_ref()
                        .map_or_else(|| "-".to_owned(), |ms| format!("{ms}ms")),
                    run.error.as_deref().unwrap_or(""),
                );
            }
            if runs.is_empty() {
                println!("no runs for {id}");
            }
            Ok(())
        }
        Command::Sessions => {
            let payload = client.call("sessions.list", Value::Null).await?;
            let mut sessions: Vec<SessionEntry> = list_from_payload(payload, "sessions")?;
            sessions.sort_by(|a, b| b.last_seen().cmp(&a.last_seen()));
            for session in &sessions {
                println!(
                    "{:<36} {:<12} {:<26} {}",
                    session.id.as_deref().unwrap_or("-"),
                    session.agent_id.as_deref().unwrap_or("-"),
                    session.last_seen().unwrap_or("-"),
                    session.topic.as_deref().unwrap_or(""),
                );
            }
            if sessions.is_empty() {
                println!("no sessions");
            }
            Ok(())
        }
        Command::Agents => {
            let payload = client.call("agents.list", Value::Null).await?;
            let agents: Vec<AgentInfo> = list_from_payload(payload, "agents")?;
            for agent in &agents {
                println!(
                    "{} {:<16} {:<24} {}",
                    agent.emoji.as_deref().unwrap_or(" "),
                    agent.id.as_deref().unwrap_or("-"),
                    agent.name.as_deref().unwrap_or("-"),
                    agent.model.as_deref().unwrap_or(""),
                );
            }
            if agents.is_empty() {
                println!("no agents");
            }
            Ok(())
        }
    }
}
