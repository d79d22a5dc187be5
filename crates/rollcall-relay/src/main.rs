//! rollcall relay binary.
//!
//! Reads `config.toml` (or the path given with `--config`), layered with
//! `ROLLCALL_*` environment variables, restores the graph from its SQLite
//! journal, and serves the WebSocket relay and JSON API over HTTP.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use rollcall_relay::{AppState, RelayConfig};
use rollcall_store_sqlite::SqliteJournal;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "rollcall relay peer")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("ROLLCALL"))
    .build()
    .context("failed to read config file")?;

  let mut relay_cfg: RelayConfig = settings
    .try_deserialize()
    .context("failed to deserialise RelayConfig")?;
  relay_cfg.store_path = expand_tilde(&relay_cfg.store_path);

  if let Some(parent) = relay_cfg.store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let journal = SqliteJournal::open(&relay_cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", relay_cfg.store_path))?;

  let address = format!("{}:{}", relay_cfg.host, relay_cfg.port);
  let state = AppState::open(relay_cfg, journal)
    .await
    .context("failed to restore graph")?;
  let app = rollcall_relay::router(state);

  tracing::info!("Listening on http://{address} (peers connect to ws://{address}/ws)");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
