//! Paths: ordered sequences of string segments addressing graph nodes.
//!
//! A path whose first segment starts with [`NAMESPACE_SIGIL`] is rooted in an
//! identity namespace (`~<public key>/...`). Every other path lives under the
//! shared root and is writable by anyone.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Marks the first segment of an identity-rooted path.
pub const NAMESPACE_SIGIL: char = '~';

/// Separator used by the textual form of a path.
pub const SEPARATOR: char = '/';

/// An address in the graph. Never empty; no segment is empty or contains
/// [`SEPARATOR`].
///
/// Ordering is segment-wise lexicographic, so all descendants of a path sort
/// contiguously right after it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path(Vec<String>);

impl Path {
  /// Build a path from its segments.
  pub fn new<I, S>(segments: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
    if segments.is_empty() {
      return Err(Error::InvalidPath("path has no segments".into()));
    }
    for segment in &segments {
      check_segment(segment)?;
    }
    Ok(Self(segments))
  }

  /// Parse the `a/b/c` textual form.
  pub fn parse(s: &str) -> Result<Self> {
    Self::new(s.trim_matches(SEPARATOR).split(SEPARATOR))
  }

  /// The root of the namespace owned by `public_key`.
  pub fn namespace_root(public_key: &str) -> Result<Self> {
    Self::new([format!("{NAMESPACE_SIGIL}{public_key}")])
  }

  /// Build from segments already known to be valid.
  pub(crate) fn trusted(segments: Vec<String>) -> Self { Self(segments) }

  pub fn segments(&self) -> &[String] { &self.0 }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// The final segment, i.e. the key this node has under its parent.
  pub fn key(&self) -> &str { self.0.last().map(String::as_str).unwrap_or_default() }

  /// Append one segment.
  pub fn child(&self, segment: impl Into<String>) -> Result<Self> {
    let segment = segment.into();
    check_segment(&segment)?;
    let mut segments = self.0.clone();
    segments.push(segment);
    Ok(Self(segments))
  }

  /// Append several segments.
  pub fn join<I, S>(&self, segments: I) -> Result<Self>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    segments
      .into_iter()
      .try_fold(self.clone(), |path, segment| path.child(segment))
  }

  pub fn parent(&self) -> Option<Self> {
    (self.0.len() > 1).then(|| Self(self.0[..self.0.len() - 1].to_vec()))
  }

  pub fn starts_with(&self, prefix: &Path) -> bool { self.0.starts_with(&prefix.0) }

  /// `true` if `self` sits exactly one level below `prefix`.
  pub fn is_child_of(&self, prefix: &Path) -> bool {
    self.0.len() == prefix.0.len() + 1 && self.starts_with(prefix)
  }

  /// The public key owning this path, if it is identity-rooted.
  pub fn namespace(&self) -> Option<&str> {
    self.0.first().and_then(|s| s.strip_prefix(NAMESPACE_SIGIL))
  }
}

fn check_segment(segment: &str) -> Result<()> {
  if segment.is_empty() {
    return Err(Error::InvalidPath("empty segment".into()));
  }
  if segment.contains(SEPARATOR) {
    return Err(Error::InvalidPath(format!(
      "segment {segment:?} contains {SEPARATOR:?}"
    )));
  }
  Ok(())
}

impl fmt::Display for Path {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0.join("/"))
  }
}

impl TryFrom<String> for Path {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { Self::parse(&s) }
}

impl From<Path> for String {
  fn from(path: Path) -> Self { path.to_string() }
}
