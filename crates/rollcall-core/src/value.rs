//! Scalar field values.
//!
//! Nodes hold only scalars; nesting is expressed through paths. `Null` is a
//! real write that clears a field, so readers treat it as absent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Error, Result};

/// Largest integer an `f64` holds exactly (2^53).
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
  Null,
  Bool(bool),
  Number(f64),
  Text(String),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Self::Number(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Self::Bool(b) => Some(*b),
      _ => None,
    }
  }

  /// Loose truthiness, used for marker fields such as tombstones.
  pub fn is_truthy(&self) -> bool {
    match self {
      Self::Null => false,
      Self::Bool(b) => *b,
      Self::Number(n) => *n != 0.0 && !n.is_nan(),
      Self::Text(s) => !s.is_empty(),
    }
  }

  /// Convert to JSON. Integral numbers render as JSON integers so typed
  /// records can decode them into integer fields.
  pub fn to_json(&self) -> serde_json::Value {
    match self {
      Self::Null => serde_json::Value::Null,
      Self::Bool(b) => serde_json::Value::Bool(*b),
      Self::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_EXACT_INT => {
        serde_json::Value::from(*n as i64)
      }
      Self::Number(n) => serde_json::Number::from_f64(*n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null),
      Self::Text(s) => serde_json::Value::String(s.clone()),
    }
  }

  /// Convert from JSON, rejecting arrays and objects.
  pub fn from_json(value: serde_json::Value) -> Result<Self> {
    match value {
      serde_json::Value::Null => Ok(Self::Null),
      serde_json::Value::Bool(b) => Ok(Self::Bool(b)),
      serde_json::Value::Number(n) => n
        .as_f64()
        .map(Self::Number)
        .ok_or_else(|| Error::MalformedInput(format!("unrepresentable number {n}"))),
      serde_json::Value::String(s) => Ok(Self::Text(s)),
      other => Err(Error::MalformedInput(format!(
        "field values must be scalars, got {other}"
      ))),
    }
  }

  /// Stable text form; the last-resort tie-break between equal stamps.
  pub(crate) fn canonical(&self) -> String { self.to_json().to_string() }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Value {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    if n.is_finite() { Self::Number(n) } else { Self::Null }
  }
}

impl From<i64> for Value {
  fn from(n: i64) -> Self { Self::Number(n as f64) }
}

impl From<u64> for Value {
  fn from(n: u64) -> Self { Self::Number(n as f64) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self { v.map_or(Self::Null, Into::into) }
}

/// Flatten a serialisable record into node fields.
///
/// `record` must serialise to a JSON object of scalars. Fields skipped by
/// serde are simply not written, leaving any stored value untouched.
pub fn fields_of<T: Serialize>(record: &T) -> Result<BTreeMap<String, Value>> {
  match serde_json::to_value(record)? {
    serde_json::Value::Object(map) => map
      .into_iter()
      .map(|(k, v)| Ok((k, Value::from_json(v)?)))
      .collect(),
    other => Err(Error::MalformedInput(format!(
      "records must serialise to objects, got {other}"
    ))),
  }
}

/// Rebuild a typed record from field values. Null fields are omitted so that
/// `Option` members decode as `None`.
pub fn decode_fields<'a, T, I>(fields: I) -> Result<T>
where
  T: DeserializeOwned,
  I: IntoIterator<Item = (&'a str, &'a Value)>,
{
  let map: serde_json::Map<String, serde_json::Value> = fields
    .into_iter()
    .filter(|(_, v)| !v.is_null())
    .map(|(k, v)| (k.to_owned(), v.to_json()))
    .collect();
  Ok(serde_json::from_value(serde_json::Value::Object(map))?)
}

#[cfg(test)]
mod tests {
  use serde::Deserialize;

  use super::*;

  #[test]
  fn untagged_json_forms() {
    let v: Vec<Value> = serde_json::from_str(r#"[null, true, 1.5, 7, "x"]"#).unwrap();
    assert_eq!(
      v,
      vec![
        Value::Null,
        Value::Bool(true),
        Value::Number(1.5),
        Value::Number(7.0),
        Value::Text("x".into()),
      ]
    );
  }

  #[test]
  fn integral_numbers_render_as_integers() {
    assert_eq!(Value::from(1_700_000_000_000_i64).to_json().to_string(), "1700000000000");
    assert_eq!(Value::Number(0.25).to_json().to_string(), "0.25");
  }

  #[test]
  fn non_scalars_are_rejected() {
    assert!(Value::from_json(serde_json::json!([1, 2])).is_err());
    assert!(Value::from_json(serde_json::json!({"a": 1})).is_err());
  }

  #[test]
  fn non_finite_numbers_become_null() {
    assert!(Value::from(f64::NAN).is_null());
    assert!(Value::from(f64::INFINITY).is_null());
  }

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  #[serde(rename_all = "camelCase")]
  struct Sample {
    student_id: String,
    timestamp:  u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    latitude:   Option<f64>,
  }

  #[test]
  fn typed_records_flatten_and_decode() {
    let sample = Sample { student_id: "101".into(), timestamp: 1000, latitude: None };
    let fields = fields_of(&sample).unwrap();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields["studentId"], Value::from("101"));

    let decoded: Sample =
      decode_fields(fields.iter().map(|(k, v)| (k.as_str(), v))).unwrap();
    assert_eq!(decoded, sample);
  }

  #[test]
  fn null_fields_decode_as_none() {
    let fields = [
      ("studentId".to_owned(), Value::from("1")),
      ("timestamp".to_owned(), Value::from(5_i64)),
      ("latitude".to_owned(), Value::Null),
    ];
    let decoded: Sample =
      decode_fields(fields.iter().map(|(k, v)| (k.as_str(), v))).unwrap();
    assert_eq!(decoded.latitude, None);
  }
}
