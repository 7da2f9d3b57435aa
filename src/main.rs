//! riptables-panel: web control panel for iptables on a remote device.

use std::fs;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use riptables_panel::config::SSHConfig;
use riptables_panel::detail::DetailTokenizer;
use riptables_panel::iptparser::ChainParser;
use riptables_panel::web::{self, AppState};

#[derive(Parser)]
#[command(name = "riptables-panel")]
#[command(about = "View and edit iptables rules on a remote device")]
struct Args {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Serve the control panel and its JSON API
  Serve {
    /// Connection settings, JSON or TOML
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,
    #[arg(short, long, default_value = "0.0.0.0:8000")]
    bind: SocketAddr,
  },
  /// Print saved `iptables -L -n --line-numbers` output as JSON
  Parse {
    /// Read from stdin when omitted
    file: Option<PathBuf>,
    /// Extra token that always starts a new detail (repeatable)
    #[arg(long = "break-token")]
    break_tokens: Vec<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_target(false)
    .with_level(true)
    .compact()
    .with_writer(io::stderr)
    .init();

  match Args::parse().command {
    Commands::Serve { config, bind } => serve(config, bind).await,
    Commands::Parse { file, break_tokens } => parse(file, break_tokens),
  }
}

async fn serve(config: PathBuf, bind: SocketAddr) -> Result<()> {
  match SSHConfig::from_file(&config) {
    Ok(ssh) => info!("Using {} for {}@{}:{}", config.display(), ssh.username, ssh.host, ssh.port),
    Err(err) => warn!("{}; API requests will fail until it is fixed", err),
  }

  let state = Arc::new(AppState::new(config));
  web::serve(state, bind).await.context("control panel server failed")?;
  Ok(())
}

fn parse(file: Option<PathBuf>, break_tokens: Vec<String>) -> Result<()> {
  let text = match file {
    Some(path) => fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?,
    None => {
      let mut text = String::new();
      io::stdin().read_to_string(&mut text).context("reading stdin")?;
      text
    }
  };

  let tokenizer = break_tokens.into_iter().fold(DetailTokenizer::new(), |tokenizer, token| tokenizer.break_token(token));
  let chains = ChainParser::new(tokenizer).parse(&text);
  println!("{}", serde_json::to_string_pretty(&json!({ "chains": chains }))?);
  Ok(())
}
