mod cache;
mod commands;
mod config;
mod db;
mod event;
mod interceptor;
mod lifecycle;
mod net;
mod notify;
mod queue;
mod sync;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use crate::cache::CacheStorage;
use crate::commands::ForegroundCommand;
use crate::event::WorkerHandle;
use crate::net::{Method, Network, ReqwestNetwork, Request};
use crate::sync::{HttpRelay, LocalRelay, Relay};
use crate::worker::{Effect, Worker, WorkerEvent};

#[derive(Parser, Debug)]
#[command(name = "presupuesto-sw")]
#[command(about = "Offline cache and write queue for the presupuesto budgeting app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/presupuesto-sw/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the application shell (and activate unless skip_waiting is off)
  Install,
  /// Activate the installed cache generation and drop stale ones
  Activate,
  /// Issue a request through the worker
  Fetch {
    url: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request body (JSON for mutations)
    #[arg(short, long)]
    data: Option<String>,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Relay pending offline mutations
  Flush,
  /// Show cache generations and the offline queue
  Status,
  /// Render the notification a push message would show
  Push {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    body: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _guard = init_logging(&config.data_dir()?, args.verbose)?;

  // Build the worker over the on-disk store
  let storage = Arc::new(db::Database::open(&config.database_path()?)?);
  let network: Arc<dyn Network> = Arc::new(ReqwestNetwork::new()?);
  let relay: Arc<dyn Relay> = match &config.sync.endpoint {
    Some(endpoint) => Arc::new(HttpRelay::new(endpoint.clone())?),
    None => Arc::new(LocalRelay),
  };
  let worker = Arc::new(Worker::new(&config, storage, network, relay)?);
  worker.lifecycle().restore().await?;
  worker.lifecycle().check_superseded().await?;

  let (handle, _task) = WorkerHandle::spawn(Arc::clone(&worker));

  match args.command {
    Command::Install => print_effects(&handle.send(WorkerEvent::Install).await?),
    Command::Activate => print_effects(&handle.send(WorkerEvent::Activate).await?),
    Command::Fetch {
      url,
      method,
      data,
      navigate,
    } => {
      let request = build_request(&url, &method, data, navigate)?;
      print_effects(&handle.send(WorkerEvent::Fetch(request)).await?);
    }
    Command::Flush => {
      let message = ForegroundCommand::FlushQueue.to_message();
      print_effects(&handle.send(WorkerEvent::Message(message)).await?);
    }
    Command::Status => print_status(&worker).await?,
    Command::Push { title, body } => {
      let data = serde_json::to_vec(&serde_json::json!({ "title": title, "body": body }))?;
      print_effects(&handle.send(WorkerEvent::Push(Some(data))).await?);
    }
  }

  // Let background cache refreshes land before the runtime shuts down
  worker.settle().await;

  Ok(())
}

/// Log to a daily file under the data dir; stderr too with `--verbose`.
fn init_logging(data_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  let log_dir = data_dir.join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "presupuesto-sw.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
  let stderr_layer = verbose.then(|| fmt::layer().with_writer(std::io::stderr));

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn build_request(url: &str, method: &str, data: Option<String>, navigate: bool) -> Result<Request> {
  let url = Url::parse(url).map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

  let mut request = if navigate {
    Request::navigate(url)
  } else {
    Request::new(method, url)
  };
  if let Some(data) = data {
    request = request
      .with_header("Content-Type", "application/json")
      .with_body(data);
  }
  Ok(request)
}

fn print_effects(effects: &[Effect]) {
  if effects.is_empty() {
    println!("(no effect)");
  }
  for effect in effects {
    match effect {
      Effect::Respond(response) if response.is_network_error() => {
        println!("network error (offline and not cached)");
      }
      Effect::Respond(response) => {
        println!("HTTP {}", response.status);
        for (name, value) in &response.headers {
          println!("{}: {}", name, value);
        }
        println!();
        println!("{}", response.text());
      }
      Effect::Installed(state) => println!("installed, now {:?}", state),
      Effect::Activated { purged } if purged.is_empty() => println!("activated"),
      Effect::Activated { purged } => println!("activated, purged {}", purged.join(", ")),
      Effect::ClaimClients => println!("claimed open clients"),
      Effect::Flushed(report) => println!(
        "flushed: {} relayed, {} still pending",
        report.relayed.len(),
        report.failed.len()
      ),
      Effect::ShowNotification(n) => println!("[{}] {} ({})", n.title, n.body, n.icon),
      Effect::FocusClient(id) => println!("focus window {}", id),
      Effect::OpenWindow(url) => println!("open window at {}", url),
    }
  }
}

async fn print_status(worker: &Worker<db::Database>) -> Result<()> {
  println!("cache:     {}", worker.cache().name());
  println!("state:     {:?}", worker.lifecycle().state().await);

  for generation in worker.cache().storage().generations()? {
    let marker = if generation.name == worker.cache().name() {
      "*"
    } else {
      " "
    };
    println!(
      "  {} {} (created {}{})",
      marker,
      generation.name,
      generation.created_at,
      generation
        .activated_at
        .map(|at| format!(", activated {}", at))
        .unwrap_or_default()
    );
  }

  let entries = worker.queue().list_all()?;
  println!("pending:   {}", worker.queue().pending_count());
  for entry in entries {
    println!(
      "  #{} {} {} {} {}",
      entry.id,
      entry.status.as_str(),
      entry.entry_type,
      entry.created_at.format("%Y-%m-%d %H:%M:%S"),
      entry.payload
    );
  }
  Ok(())
}
