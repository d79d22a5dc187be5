//! Check-in links: the two values a student needs, packed into a URL.
//!
//! ```text
//! <base>#/checkin?session=<sessionId>&pub=<admin public key>
//! ```
//!
//! Both values are percent-encoded. Session ids are usually UUIDs, but any id
//! without a path separator is accepted.

use std::{fmt, str::FromStr};

use rollcall_core::{PublicKey, path::SEPARATOR};

use crate::{Error, Result};

const ROUTE: &str = "#/checkin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckInLink {
  pub session_id: String,
  pub admin:      PublicKey,
}

impl CheckInLink {
  pub fn new(session_id: impl Into<String>, admin: PublicKey) -> Result<Self> {
    let session_id = session_id.into();
    check_session_id(&session_id)?;
    Ok(Self { session_id, admin })
  }

  /// Render against `base` (e.g. `https://host/app/`). Any fragment already
  /// on `base` is replaced.
  pub fn to_url(&self, base: &str) -> String {
    let base = base.split('#').next().unwrap_or_default();
    format!(
      "{base}{ROUTE}?session={}&pub={}",
      urlencoding::encode(&self.session_id),
      urlencoding::encode(self.admin.as_str())
    )
  }

  /// Parse a full URL, a bare fragment, or a bare query string.
  pub fn parse(url: &str) -> Result<Self> {
    let query = match url.split_once('#') {
      Some((_, fragment)) => fragment
        .strip_prefix(&ROUTE[1..])
        .and_then(|rest| rest.strip_prefix('?'))
        .ok_or_else(|| Error::InvalidLink(format!("not a check-in route: #{fragment}")))?,
      None => url.split_once('?').map_or(url, |(_, query)| query),
    };

    let mut session = None;
    let mut admin = None;
    for pair in query.split('&') {
      match pair.split_once('=') {
        Some(("session", value)) => session = Some(value),
        Some(("pub", value)) => admin = Some(value),
        _ => {}
      }
    }

    let session = session
      .filter(|s| !s.is_empty())
      .ok_or_else(|| Error::InvalidLink("missing session".into()))
      .and_then(decode)?;
    let admin = admin
      .filter(|s| !s.is_empty())
      .ok_or_else(|| Error::InvalidLink("missing pub".into()))
      .and_then(decode)?;
    let admin = PublicKey::parse(&admin)
      .map_err(|e| Error::InvalidLink(e.to_string()))?;
    Self::new(session, admin)
  }
}

fn decode(value: &str) -> Result<String> {
  urlencoding::decode(value)
    .map(|v| v.into_owned())
    .map_err(|e| Error::InvalidLink(e.to_string()))
}

fn check_session_id(session_id: &str) -> Result<()> {
  if session_id.is_empty() || session_id.contains(SEPARATOR) {
    return Err(Error::InvalidLink(format!("bad session id {session_id:?}")));
  }
  Ok(())
}

impl fmt::Display for CheckInLink {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.to_url("")) }
}

impl FromStr for CheckInLink {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}
