//! `rollcall`: command-line peer for classroom attendance.
//!
//! # Usage
//!
//! ```text
//! rollcall keygen
//! rollcall --relay ws://relay.example:8765/ws roster import class.json
//! rollcall session start
//! rollcall checkin --link 'https://…/#/checkin?session=…&pub=…' --student 101
//! rollcall report --json
//! ```

mod commands;
mod config;
mod identity;
mod peer;
mod transport;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::{ConfigFile, Settings};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rollcall", version, about = "Peer-to-peer classroom attendance")]
struct Args {
  #[command(flatten)]
  global: GlobalArgs,

  #[command(subcommand)]
  command: Command,
}

#[derive(clap::Args, Debug)]
pub struct GlobalArgs {
  /// Path to a TOML config file.
  #[arg(short, long, value_name = "FILE", global = true)]
  config: Option<PathBuf>,

  /// Relay WebSocket URL. Repeat or comma-separate for several.
  #[arg(long = "relay", value_name = "URL", env = "ROLLCALL_RELAYS", value_delimiter = ',', global = true)]
  relays: Vec<String>,

  /// Identity file holding this peer's secret key.
  #[arg(long, value_name = "FILE", env = "ROLLCALL_IDENTITY", global = true)]
  identity: Option<PathBuf>,

  /// Local SQLite store.
  #[arg(long, value_name = "FILE", env = "ROLLCALL_STORE", global = true)]
  store: Option<PathBuf>,

  /// Keep the graph in memory only.
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Ignore configured relays.
  #[arg(long, global = true)]
  offline: bool,

  /// Refuse unsigned writes into identity namespaces.
  #[arg(long, global = true)]
  strict: bool,

  /// Seconds to wait for relays to sync or acknowledge.
  #[arg(long, value_name = "SECS", global = true)]
  timeout: Option<u64>,

  /// Page check-in links point at.
  #[arg(long, value_name = "URL", global = true)]
  link_base: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Generate this peer's identity.
  Keygen {
    /// Replace an existing identity.
    #[arg(long)]
    force: bool,
  },
  /// Print this peer's public key.
  Whoami,
  /// Manage the class roster.
  #[command(subcommand)]
  Roster(RosterCommand),
  /// Open and close attendance sessions.
  #[command(subcommand)]
  Session(SessionCommand),
  /// Print the check-in link for the active session.
  Link,
  /// Record a student's attendance.
  Checkin {
    /// Check-in link, as printed by `rollcall link`.
    #[arg(long, conflicts_with_all = ["session", "admin"], required_unless_present = "session")]
    link:    Option<String>,
    #[arg(long, requires = "admin")]
    session: Option<String>,
    #[arg(long)]
    admin:   Option<String>,
    #[arg(long)]
    student: String,
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat:     Option<f64>,
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon:     Option<f64>,
  },
  /// Follow check-ins live until interrupted.
  Watch {
    /// Defaults to the current session.
    #[arg(long)]
    session: Option<String>,
    /// Admin public key; defaults to this peer's.
    #[arg(long)]
    admin:   Option<String>,
  },
  /// Roster joined with one session's attendance.
  Report {
    #[arg(long)]
    session: Option<String>,
    #[arg(long)]
    admin:   Option<String>,
    #[arg(long)]
    json:    bool,
  },
}

#[derive(Subcommand, Debug)]
pub enum RosterCommand {
  /// Add or rename one student.
  Add { id: String, name: String },
  /// Import `[{"id": ..., "name": ...}]` from a file, or `-` for stdin.
  Import { file: PathBuf },
  List {
    #[arg(long)]
    admin: Option<String>,
    #[arg(long)]
    json:  bool,
  },
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
  /// Start a new session and print its check-in link.
  Start,
  Stop,
  Status {
    #[arg(long)]
    admin: Option<String>,
  },
  /// Every session this admin has run.
  History {
    #[arg(long)]
    admin: Option<String>,
    #[arg(long)]
    json:  bool,
  },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let file_cfg = ConfigFile::load(args.global.config.as_deref())?;
  let settings = Settings::resolve(&args.global, file_cfg);

  commands::run(args.command, &settings).await
}
