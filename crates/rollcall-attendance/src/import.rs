//! Bulk roster import.
//!
//! The accepted payload is a JSON array of `{"id": ..., "name": ...}` objects.
//! Ids may be strings or integers. The payload is validated as a whole: one bad
//! entry rejects everything, so an import never half-applies.

use serde_json::Value as Json;

use crate::{Error, Result, model::Student};

/// Parse and validate an import payload.
pub fn parse_roster(payload: &str) -> Result<Vec<Student>> {
  let parsed: Json = serde_json::from_str(payload)
    .map_err(|e| Error::MalformedInput(format!("roster is not valid JSON: {e}")))?;
  let Json::Array(entries) = parsed else {
    return Err(Error::MalformedInput(
      r#"roster must be an array like [{"id": "1", "name": "John"}]"#.into(),
    ));
  };

  entries
    .iter()
    .enumerate()
    .map(|(index, entry)| {
      parse_entry(entry).map_err(|reason| Error::MalformedInput(format!("entry {index}: {reason}")))
    })
    .collect()
}

fn parse_entry(entry: &Json) -> Result<Student, String> {
  let Json::Object(map) = entry else {
    return Err("expected an object".into());
  };
  let id = match map.get("id") {
    Some(Json::String(s)) => s.trim().to_owned(),
    Some(Json::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
    Some(_) => return Err("\"id\" must be a string or an integer".into()),
    None => return Err("missing \"id\"".into()),
  };
  let name = match map.get("name") {
    Some(Json::String(s)) => s.trim().to_owned(),
    Some(_) => return Err("\"name\" must be a string".into()),
    None => return Err("missing \"name\"".into()),
  };
  if id.is_empty() || name.is_empty() {
    return Err("\"id\" and \"name\" must not be empty".into());
  }
  if id.contains(rollcall_core::path::SEPARATOR) {
    return Err(format!("\"id\" {id:?} contains '/'"));
  }
  Ok(Student::new(id, name))
}
