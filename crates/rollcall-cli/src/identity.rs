//! The identity file: one base64url secret key on a single line.

use std::path::Path;

use anyhow::{Context, Result, bail};
use rollcall_core::Identity;

/// Load the identity stored at `path`.
pub fn load(path: &Path) -> Result<Identity> {
  let secret = std::fs::read_to_string(path).with_context(|| {
    format!("no identity at {}; create one with `rollcall keygen`", path.display())
  })?;
  Identity::from_secret(&secret).with_context(|| format!("reading identity {}", path.display()))
}

/// Generate a new identity and write it to `path`. Refuses to replace an
/// existing file unless `force` is set: losing the old secret means losing
/// write access to everything published under it.
pub fn create(path: &Path, force: bool) -> Result<Identity> {
  if path.exists() && !force {
    bail!("{} already exists; pass --force to replace it", path.display());
  }
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("creating {}", parent.display()))?;
  }
  let identity = Identity::generate();
  std::fs::write(path, format!("{}\n", identity.secret()))
    .with_context(|| format!("writing {}", path.display()))?;
  restrict(path)?;
  Ok(identity)
}

#[cfg(unix)]
fn restrict(path: &Path) -> Result<()> {
  use std::os::unix::fs::PermissionsExt as _;
  std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
    .with_context(|| format!("restricting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict(_: &Path) -> Result<()> { Ok(()) }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn create_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys/identity");
    let created = create(&path, false).unwrap();
    let loaded = load(&path).unwrap();
    assert_eq!(created.public_key(), loaded.public_key());
  }

  #[test]
  fn refuses_to_overwrite_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity");
    let first = create(&path, false).unwrap();
    assert!(create(&path, false).is_err());
    assert_eq!(load(&path).unwrap().public_key(), first.public_key());

    let second = create(&path, true).unwrap();
    assert_ne!(second.public_key(), first.public_key());
  }

  #[test]
  fn missing_identity_points_at_keygen() {
    let dir = tempfile::tempdir().unwrap();
    let err = load(&dir.path().join("nope")).unwrap_err();
    assert!(err.to_string().contains("rollcall keygen"));
  }
}
