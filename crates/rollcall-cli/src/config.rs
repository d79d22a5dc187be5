//! Settings: defaults, then the optional TOML file, then flags and
//! environment.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::GlobalArgs;

const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 10;

/// Shape of the optional TOML config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
  #[serde(default)]
  pub relays:            Vec<String>,
  pub identity_path:     Option<PathBuf>,
  pub store_path:        Option<PathBuf>,
  pub strict:            Option<bool>,
  pub sync_timeout_secs: Option<u64>,
  pub link_base:         Option<String>,
}

impl ConfigFile {
  /// Read `explicit` if given, otherwise the default location if it exists.
  pub fn load(explicit: Option<&Path>) -> Result<Self> {
    let path = match explicit {
      Some(path) => path.to_path_buf(),
      None => match config_dir().map(|dir| dir.join("config.toml")) {
        Some(path) if path.exists() => path,
        _ => return Ok(Self::default()),
      },
    };
    let raw = std::fs::read_to_string(&path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
  }
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
  /// Relay WebSocket URLs. Empty means work offline against the local store.
  pub relays:        Vec<String>,
  pub identity_path: PathBuf,
  /// `None` keeps the graph in memory for this run only.
  pub store_path:    Option<PathBuf>,
  pub strict:        bool,
  pub sync_timeout:  Duration,
  /// Page the check-in fragment is appended to.
  pub link_base:     String,
}

impl Settings {
  /// CLI flags override config file, which overrides defaults.
  pub fn resolve(args: &GlobalArgs, file: ConfigFile) -> Self {
    let relays = if args.offline {
      Vec::new()
    } else if !args.relays.is_empty() {
      args.relays.clone()
    } else {
      file.relays
    };
    let store_path = if args.ephemeral {
      None
    } else {
      Some(
        args
          .store
          .clone()
          .or(file.store_path)
          .unwrap_or_else(|| data_dir().join("peer.db")),
      )
    };
    Self {
      relays,
      identity_path: expand_tilde(
        &args
          .identity
          .clone()
          .or(file.identity_path)
          .unwrap_or_else(|| config_dir().unwrap_or_default().join("identity")),
      ),
      store_path: store_path.map(|p| expand_tilde(&p)),
      strict: args.strict || file.strict.unwrap_or(false),
      sync_timeout: Duration::from_secs(
        args
          .timeout
          .or(file.sync_timeout_secs)
          .unwrap_or(DEFAULT_SYNC_TIMEOUT_SECS),
      ),
      link_base: args
        .link_base
        .clone()
        .or(file.link_base)
        .unwrap_or_else(|| "http://localhost:8080/".to_owned()),
    }
  }
}

fn home() -> Option<PathBuf> { std::env::var_os("HOME").map(PathBuf::from) }

fn config_dir() -> Option<PathBuf> {
  std::env::var_os("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .or_else(|| home().map(|h| h.join(".config")))
    .map(|dir| dir.join("rollcall"))
}

fn data_dir() -> PathBuf {
  std::env::var_os("XDG_DATA_HOME")
    .map(PathBuf::from)
    .or_else(|| home().map(|h| h.join(".local/share")))
    .unwrap_or_default()
    .join("rollcall")
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Some(home) = home()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}
