//! htq - command line front end for the request queue
//!
//! Every subcommand talks to the store named by `HTQ_STORE_URL` and prints
//! JSON on stdout. Unknown ids print "not found" on stderr and exit with 1.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use htq_core::domain::Headers;
use htq_core::{Config, Engine, EngineBuilder, RequestId, SendRequest, WorkerGroup};

#[derive(Debug, Parser)]
#[command(name = "htq")]
#[command(about = "Durable queue of outbound HTTP requests")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run workers until interrupted.
    Worker {
        /// Worker tasks (default: HTQ_WORKERS).
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Queue a request.
    Send {
        url: String,
        #[arg(long, short = 'X')]
        method: Option<String>,
        /// Request body.
        #[arg(long, short = 'd')]
        data: Option<String>,
        /// Header as `Name: value`; repeatable.
        #[arg(long = "header", short = 'H', value_parser = parse_header)]
        headers: Vec<(String, String)>,
        /// Outbound timeout in milliseconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Wait up to this many seconds for the response.
        #[arg(long)]
        wait: Option<u64>,
    },
    /// Print a request record.
    Show { id: RequestId },
    /// Print a request's status.
    Status { id: RequestId },
    /// Cancel a request.
    Cancel { id: RequestId },
    /// Print a request's response.
    Response { id: RequestId },
    /// Delete a request's response.
    Purge { id: RequestId },
    /// List queued requests, head first.
    Queued,
    /// Print the queue length.
    Size,
    /// Put an id back on the queue.
    Push { id: RequestId },
    /// Take the next id off the queue without executing it.
    Pop {
        /// Give up after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name is empty in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Load `.env` before the filter reads `RUST_LOG`, so a level set there applies.
fn load_env_and_filter(
    load: impl FnOnce() -> dotenvy::Result<PathBuf>,
) -> (dotenvy::Result<PathBuf>, EnvFilter) {
    let loaded = load();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "htq=info,htq_core=info".into());
    (loaded, filter)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let (dotenv, filter) = load_env_and_filter(dotenvy::dotenv);

    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    if let Err(e) = dotenv {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let args = Args::parse();
    let config = Config::from_env()?;
    let engine = Arc::new(
        EngineBuilder::from_config(&config)?
            .build()
            .context("building engine")?,
    );

    run(args.command, engine, &config).await
}

async fn run(command: Command, engine: Arc<Engine>, config: &Config) -> Result<ExitCode> {
    match command {
        Command::Worker { concurrency } => {
            let workers = concurrency.unwrap_or(config.workers);
            if workers == 0 {
                bail!("--concurrency must be at least 1");
            }
            info!(workers, store = ?config.store, "starting workers");
            let group = WorkerGroup::spawn(workers, engine, config.poll_interval);
            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            info!("shutdown requested, waiting for in-flight requests");
            group.shutdown_and_join().await;
        }
        Command::Send {
            url,
            method,
            data,
            headers,
            timeout,
            wait,
        } => {
            let mut send = SendRequest::new(url).headers(headers.into_iter().collect::<Headers>());
            if let Some(method) = method {
                send = send.method(method);
            }
            if let Some(data) = data {
                send = send.body(data);
            }
            if let Some(timeout) = timeout {
                send = send.timeout_ms(timeout);
            }
            let request = engine.send(send).await?;

            let Some(wait) = wait else {
                print_json(&request)?;
                return Ok(ExitCode::SUCCESS);
            };
            let status = engine
                .await_terminal(request.id, Duration::from_millis(250), Duration::from_secs(wait))
                .await?;
            match engine.response(request.id).await? {
                Some(response) => print_json(&response)?,
                None => {
                    warn!(request_id = %request.id, ?status, "no response before --wait elapsed");
                    print_json(&request)?;
                }
            }
        }
        Command::Show { id } => match engine.request(id).await? {
            Some(request) => print_json(&request)?,
            None => return Ok(not_found(id)),
        },
        Command::Status { id } => match engine.status(id).await? {
            Some(status) => print_json(&json!({ "uuid": id, "status": status }))?,
            None => return Ok(not_found(id)),
        },
        Command::Cancel { id } => {
            if !engine.cancel(id).await? {
                return Ok(not_found(id));
            }
            print_json(&json!({ "uuid": id, "status": "canceled" }))?;
        }
        Command::Response { id } => match engine.response(id).await? {
            Some(response) => print_json(&response)?,
            None => return Ok(not_found(id)),
        },
        Command::Purge { id } => {
            if !engine.purge(id).await? {
                return Ok(not_found(id));
            }
            print_json(&json!({ "uuid": id, "purged": true }))?;
        }
        Command::Queued => print_json(&engine.queued().await?)?,
        Command::Size => print_json(&json!({ "size": engine.size().await? }))?,
        Command::Push { id } => {
            engine.push(id).await?;
            print_json(&json!({ "uuid": id, "pushed": true }))?;
        }
        Command::Pop { timeout } => {
            let id = match timeout {
                Some(secs) => engine.pop_timeout(Duration::from_secs(secs)).await?,
                None => Some(engine.pop().await?),
            };
            match id {
                Some(id) => print_json(&json!({ "uuid": id }))?,
                None => {
                    eprintln!("queue is empty");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn not_found(id: RequestId) -> ExitCode {
    eprintln!("request {id} not found");
    ExitCode::FAILURE
}
