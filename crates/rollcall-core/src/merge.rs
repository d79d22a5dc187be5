//! Last-write-wins conflict resolution, applied per field.
//!
//! For any two peers that have received the same set of writes, in any order,
//! every field ends up holding the write with the greatest [`Stamp`]. When two
//! distinct values carry identical stamps (which a well-behaved writer never
//! produces), the greater canonical encoding wins so peers still agree.

use std::cmp::Ordering;

use serde::Serialize;

use crate::{
  node::{Cell, Stamp},
  value::Value,
};

/// What happens to an incoming field write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  /// The write wins and replaces the stored cell.
  Apply,
  /// The stored cell wins. The write is dropped and must not be re-broadcast.
  Stale,
  /// The write is already stored.
  Duplicate,
}

/// Decide the fate of `(value, stamp)` against the current cell for the same
/// path and field.
pub fn resolve(current: Option<&Cell>, value: &Value, stamp: &Stamp) -> Resolution {
  let Some(current) = current else {
    return Resolution::Apply;
  };

  match stamp.cmp(&current.stamp) {
    Ordering::Greater => Resolution::Apply,
    Ordering::Less => Resolution::Stale,
    Ordering::Equal if *value == current.value => Resolution::Duplicate,
    Ordering::Equal => {
      if value.canonical() > current.value.canonical() {
        Resolution::Apply
      } else {
        Resolution::Stale
      }
    }
  }
}

/// Per-batch tally of resolutions, returned from every graph write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
  /// Fields that changed state.
  pub applied:    usize,
  /// Fields that lost the last-write-wins comparison.
  pub dropped:    usize,
  /// Fields already present with the same stamp and value.
  pub duplicates: usize,
  /// Fields refused by strict-mode signature checks.
  pub rejected:   usize,
}

impl MergeOutcome {
  pub fn changed(&self) -> bool { self.applied > 0 }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;
  use crate::node::{Node, WriterId};

  fn cell(value: Value, at: u64, writer: &str) -> Cell {
    Cell { value, stamp: Stamp::new(at, WriterId::new(writer)), signature: None, seq: 0 }
  }

  fn stamp(at: u64, writer: &str) -> Stamp { Stamp::new(at, WriterId::new(writer)) }

  #[test]
  fn empty_field_accepts_anything() {
    assert_eq!(resolve(None, &Value::from("x"), &stamp(0, "a")), Resolution::Apply);
  }

  #[test]
  fn newer_write_applies() {
    let current = cell(Value::from("old"), 10, "a");
    assert_eq!(
      resolve(Some(&current), &Value::from("new"), &stamp(11, "a")),
      Resolution::Apply
    );
  }

  #[test]
  fn older_write_is_stale() {
    let current = cell(Value::from("new"), 10, "a");
    assert_eq!(
      resolve(Some(&current), &Value::from("old"), &stamp(9, "z")),
      Resolution::Stale
    );
  }

  #[test]
  fn tie_goes_to_smaller_writer() {
    let current = cell(Value::from("from-bob"), 10, "bob");
    assert_eq!(
      resolve(Some(&current), &Value::from("from-alice"), &stamp(10, "alice")),
      Resolution::Apply
    );

    let current = cell(Value::from("from-alice"), 10, "alice");
    assert_eq!(
      resolve(Some(&current), &Value::from("from-bob"), &stamp(10, "bob")),
      Resolution::Stale
    );
  }

  #[test]
  fn identical_write_is_duplicate() {
    let current = cell(Value::from(true), 10, "a");
    assert_eq!(
      resolve(Some(&current), &Value::from(true), &stamp(10, "a")),
      Resolution::Duplicate
    );
  }

  #[test]
  fn identical_stamp_different_value_is_deterministic() {
    let a = cell(Value::from("a"), 10, "w");
    let b = cell(Value::from("b"), 10, "w");
    // Exactly one direction applies, so both orders settle on the same value.
    assert_eq!(resolve(Some(&a), &b.value, &b.stamp), Resolution::Apply);
    assert_eq!(resolve(Some(&b), &a.value, &a.stamp), Resolution::Stale);
  }

  // ── Properties ──────────────────────────────────────────────────────────

  fn apply_all(writes: &[(String, Value, Stamp)]) -> Node {
    let mut node = Node::default();
    for (field, value, stamp) in writes {
      if resolve(node.cell(field), value, stamp) == Resolution::Apply {
        node.insert(field.clone(), Cell {
          value:     value.clone(),
          stamp:     stamp.clone(),
          signature: None,
          seq:       0,
        });
      }
    }
    node
  }

  fn write_strategy() -> impl Strategy<Value = (String, Value, Stamp)> {
    let field = prop_oneof![Just("name"), Just("active"), Just("createdAt")];
    let value = prop_oneof![
      Just(Value::Null),
      any::<bool>().prop_map(Value::Bool),
      (0i64..100).prop_map(Value::from),
      "[a-c]{1,3}".prop_map(Value::Text),
    ];
    let writer = prop_oneof![Just("alice"), Just("bob"), Just("carol")];
    (field, value, 0u64..20, writer).prop_map(|(f, v, at, w)| {
      (f.to_owned(), v, Stamp::new(at, WriterId::new(w)))
    })
  }

  proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

    #[test]
    fn any_delivery_order_converges(
      writes in prop::collection::vec(write_strategy(), 0..24),
      seed in any::<u64>(),
    ) {
      let mut shuffled = writes.clone();
      // Deterministic Fisher–Yates driven by the generated seed.
      let mut state = seed | 1;
      for i in (1..shuffled.len()).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state % (i as u64 + 1)) as usize;
        shuffled.swap(i, j);
      }
      prop_assert_eq!(apply_all(&writes), apply_all(&shuffled));
    }

    #[test]
    fn redelivery_is_idempotent(writes in prop::collection::vec(write_strategy(), 0..16)) {
      let mut twice = writes.clone();
      twice.extend(writes.iter().cloned());
      prop_assert_eq!(apply_all(&writes), apply_all(&twice));
    }

    #[test]
    fn older_write_never_changes_a_field(
      writes in prop::collection::vec(write_strategy(), 1..16),
      late in write_strategy(),
    ) {
      let before = apply_all(&writes);
      let (field, value, stamp) = late;
      if let Some(current) = before.cell(&field)
        && stamp < current.stamp
      {
        prop_assert_eq!(resolve(Some(current), &value, &stamp), Resolution::Stale);
      }
    }
  }
}
