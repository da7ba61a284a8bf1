mod cache;
mod config;
mod error;
mod logging;
mod lookup;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use lookup::{Domain, LookupClient};

#[derive(Parser, Debug)]
#[command(name = "govlookup")]
#[command(about = "Cached lookups against slow government data services")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./govlookup.yaml or $XDG_CONFIG_HOME/govlookup/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Look up one key and print the result as JSON
  Lookup {
    #[arg(value_enum)]
    domain: Domain,
    key: String,
  },
  /// Read "<domain> <key>" lines from stdin and print one JSON result per line
  Batch {
    /// Maximum lookups in progress at once
    #[arg(long, default_value_t = 16)]
    concurrency: usize,
  },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

  let config = config::Config::load(args.config.as_deref())?;
  let client = Arc::new(LookupClient::new(&config)?);
  let _sweeper = client.spawn_sweeper();

  match args.command {
    Command::Lookup { domain, key } => {
      let result = client.lookup(domain, &key).await;
      println!("{}", result.to_report(domain, &key));
      Ok(if result.is_failed() {
        ExitCode::FAILURE
      } else {
        ExitCode::SUCCESS
      })
    }
    Command::Batch { concurrency } => {
      run_batch(client, concurrency.max(1)).await?;
      Ok(ExitCode::SUCCESS)
    }
  }
}

/// Run every stdin line through the shared client, printing results in input
/// order. Duplicate keys in flight at the same time share one upstream call.
async fn run_batch(client: Arc<LookupClient>, concurrency: usize) -> Result<()> {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  let mut requests = Vec::new();
  while let Some(line) = lines
    .next_line()
    .await
    .map_err(|e| eyre!("Failed to read stdin: {}", e))?
  {
    if !line.trim().is_empty() && !line.trim_start().starts_with('#') {
      requests.push(line);
    }
  }

  tracing::info!(count = requests.len(), concurrency, "Running batch");

  let mut reports = futures::stream::iter(requests)
    .map(|line| {
      let client = Arc::clone(&client);
      async move {
        match parse_request(&line) {
          Ok((domain, key)) => client.lookup(domain, &key).await.to_report(domain, &key),
          Err(e) => serde_json::json!({ "line": line, "status": "invalid", "error": e }),
        }
      }
    })
    .buffered(concurrency);

  while let Some(report) = reports.next().await {
    println!("{}", report);
  }

  tracing::info!(cached = client.cached_entries(), "Batch finished");

  Ok(())
}

/// Parse a "<domain> <key>" line. The key is everything after the domain.
fn parse_request(line: &str) -> std::result::Result<(Domain, String), String> {
  let line = line.trim();
  let (domain, key) = line
    .split_once(char::is_whitespace)
    .ok_or_else(|| format!("expected '<domain> <key>', got '{}'", line))?;
  Ok((domain.parse()?, key.trim().to_string()))
}
