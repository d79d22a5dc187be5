//! Identity namespaces.
//!
//! An [`Identity`] is an Ed25519 keypair. Its public half, encoded as unpadded
//! URL-safe base64, names a namespace (`~<public key>/...`) that anyone may
//! read and subscribe to. Writes into it are signed field by field, and a
//! graph running in strict mode refuses remote writes whose signature does not
//! verify against the namespace key.

use std::{collections::BTreeMap, fmt, sync::Arc};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as B64};
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

use crate::{
  Result,
  error::IdentityError,
  graph::Graph,
  merge::MergeOutcome,
  node::Write,
  path::{NAMESPACE_SIGIL, Path},
  value::Value,
};

// ─── Public key ──────────────────────────────────────────────────────────────

/// The public half of an identity; safe to share, e.g. in a check-in link.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey {
  encoded: String,
  key:     VerifyingKey,
}

impl PublicKey {
  pub fn parse(s: &str) -> Result<Self, IdentityError> {
    let bytes = B64
      .decode(s)
      .map_err(|_| IdentityError::InvalidKey(s.to_owned()))?;
    let bytes: [u8; 32] = bytes
      .try_into()
      .map_err(|_| IdentityError::InvalidKey(s.to_owned()))?;
    let key = VerifyingKey::from_bytes(&bytes)
      .map_err(|_| IdentityError::InvalidKey(s.to_owned()))?;
    Ok(Self { encoded: s.to_owned(), key })
  }

  pub fn as_str(&self) -> &str { &self.encoded }

  /// Root path of the namespace this key owns.
  pub fn namespace(&self) -> Path {
    // Unpadded URL-safe base64 never contains '/' and is never empty.
    Path::trusted(vec![format!("{NAMESPACE_SIGIL}{}", self.encoded)])
  }

  /// Check a write's signature against this key.
  pub fn verify(&self, write: &Write) -> Result<(), IdentityError> {
    let encoded = write
      .signature
      .as_deref()
      .ok_or_else(|| IdentityError::Unsigned(write.path.clone()))?;
    let bytes = B64
      .decode(encoded)
      .map_err(|_| IdentityError::BadSignature(write.path.clone()))?;
    let signature = Signature::from_slice(&bytes)
      .map_err(|_| IdentityError::BadSignature(write.path.clone()))?;
    self
      .key
      .verify_strict(&signing_bytes(write), &signature)
      .map_err(|_| IdentityError::BadSignature(write.path.clone()))
  }
}

impl fmt::Debug for PublicKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "PublicKey({})", self.encoded)
  }
}

impl fmt::Display for PublicKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.encoded) }
}

impl TryFrom<String> for PublicKey {
  type Error = IdentityError;

  fn try_from(s: String) -> Result<Self, IdentityError> { Self::parse(&s) }
}

impl From<PublicKey> for String {
  fn from(key: PublicKey) -> Self { key.encoded }
}

/// Verify `write` if it targets an identity namespace. Shared-root writes
/// always pass.
pub fn verify_write(write: &Write) -> Result<(), IdentityError> {
  match write.path.namespace() {
    Some(owner) => PublicKey::parse(owner)?.verify(write),
    None => Ok(()),
  }
}

/// The exact bytes covered by a field signature.
fn signing_bytes(write: &Write) -> Vec<u8> {
  serde_json::to_vec(&(
    write.path.to_string(),
    &write.field,
    &write.value,
    write.stamp.at,
    write.stamp.writer.as_str(),
  ))
  .unwrap_or_default()
}

// ─── Identity ────────────────────────────────────────────────────────────────

/// A keypair. The secret half never leaves the process except through
/// [`Identity::secret`].
#[derive(Clone)]
pub struct Identity {
  signing: SigningKey,
  public:  PublicKey,
}

impl Identity {
  pub fn generate() -> Self { Self::from_signing_key(SigningKey::generate(&mut OsRng)) }

  /// Restore from the encoding produced by [`Identity::secret`].
  pub fn from_secret(secret: &str) -> Result<Self, IdentityError> {
    let bytes = B64
      .decode(secret.trim())
      .map_err(|_| IdentityError::InvalidSecret)?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| IdentityError::InvalidSecret)?;
    Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes)))
  }

  fn from_signing_key(signing: SigningKey) -> Self {
    let key = signing.verifying_key();
    let public = PublicKey { encoded: B64.encode(key.as_bytes()), key };
    Self { signing, public }
  }

  /// Base64url encoding of the 32-byte secret key.
  pub fn secret(&self) -> String { B64.encode(self.signing.to_bytes()) }

  pub fn public_key(&self) -> &PublicKey { &self.public }

  pub fn namespace(&self) -> Path { self.public.namespace() }

  /// Attach a signature to `write`.
  pub fn sign(&self, write: &mut Write) {
    let signature = self.signing.sign(&signing_bytes(write));
    write.signature = Some(B64.encode(signature.to_bytes()));
  }
}

impl fmt::Debug for Identity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Identity").field("public", &self.public).finish_non_exhaustive()
  }
}

// ─── Scoped writer ───────────────────────────────────────────────────────────

/// A graph handle bound to one identity, allowed to write inside that
/// identity's namespace.
#[derive(Debug, Clone)]
pub struct ScopedWriter {
  graph:    Arc<Graph>,
  identity: Arc<Identity>,
}

impl ScopedWriter {
  pub fn new(graph: Arc<Graph>, identity: Identity) -> Self {
    Self { graph, identity: Arc::new(identity) }
  }

  pub fn graph(&self) -> &Arc<Graph> { &self.graph }

  pub fn public_key(&self) -> &PublicKey { self.identity.public_key() }

  /// `~<public key>/<segments...>`.
  pub fn path<I, S>(&self, segments: I) -> Result<Path>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.identity.namespace().join(segments)
  }

  /// Field-level merge into `path`, which must lie in this namespace.
  pub fn put(&self, path: &Path, fields: BTreeMap<String, Value>) -> Result<MergeOutcome> {
    let at = self.graph.now();
    self.put_at(path, fields, at)
  }

  pub fn put_at(
    &self,
    path: &Path,
    fields: BTreeMap<String, Value>,
    at: u64,
  ) -> Result<MergeOutcome> {
    if path.namespace() != Some(self.public_key().as_str()) {
      return Err(
        IdentityError::ForeignNamespace {
          path:      path.clone(),
          namespace: path.namespace().unwrap_or_default().to_owned(),
        }
        .into(),
      );
    }
    self.graph.put_signed(path, fields, at, &self.identity)
  }
}
