//! Node state digests, served as ETags.
//!
//! The digest covers every cell (cleared ones included) in field order, so
//! two peers holding the same merged node produce the same tag regardless of
//! the order the writes arrived in.

use rollcall_core::Node;
use sha2::{Digest, Sha256};

pub fn compute_etag(node: &Node) -> String {
  let mut hasher = Sha256::new();
  for (field, cell) in node.cells() {
    hasher.update(field.as_bytes());
    hasher.update([0]);
    hasher.update(cell.value.to_json().to_string().as_bytes());
    hasher.update([0]);
    hasher.update(cell.stamp.at.to_le_bytes());
    hasher.update(cell.stamp.writer.as_str().as_bytes());
    hasher.update([0]);
  }
  format!("\"{}\"", hex::encode(hasher.finalize()))
}

/// `true` if an `If-None-Match` header value names `etag`.
pub fn matches(if_none_match: &str, etag: &str) -> bool {
  if_none_match
    .split(',')
    .map(str::trim)
    .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}

#[cfg(test)]
mod tests {
  use rollcall_core::{Graph, GraphConfig, Origin, Path, Stamp, Value, Write, WriterId};

  use super::*;

  fn write(field: &str, value: &str, at: u64) -> Write {
    Write::new(
      Path::parse("room/1").unwrap(),
      field,
      Value::from(value),
      Stamp::new(at, WriterId::new("w")),
    )
  }

  fn node_after(writes: Vec<Write>) -> Node {
    let graph = Graph::new(GraphConfig::default());
    graph.apply_remote(writes, Origin::Detached);
    graph.get(&Path::parse("room/1").unwrap()).unwrap()
  }

  #[test]
  fn arrival_order_does_not_matter() {
    let a = node_after(vec![write("x", "1", 10), write("y", "2", 20)]);
    let b = node_after(vec![write("y", "2", 20), write("x", "1", 10)]);
    assert_eq!(compute_etag(&a), compute_etag(&b));
  }

  #[test]
  fn a_newer_write_changes_the_tag() {
    let a = node_after(vec![write("x", "1", 10)]);
    let b = node_after(vec![write("x", "1", 10), write("x", "1", 11)]);
    assert_ne!(compute_etag(&a), compute_etag(&b));
  }

  #[test]
  fn if_none_match_lists() {
    assert!(matches("\"a\", \"b\"", "\"b\""));
    assert!(matches("W/\"b\"", "\"b\""));
    assert!(matches("*", "\"b\""));
    assert!(!matches("\"a\"", "\"b\""));
  }
}
