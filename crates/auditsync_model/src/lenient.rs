//! Field-level tolerant deserializers.
//!
//! Audit documents vary by template and API version. A field with an
//! unexpected shape degrades to its default instead of failing the document.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(T::default());
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            debug!("Ignoring malformed field: {}", err);
            Ok(T::default())
        }
    }
}

/// A list parsed one entry at a time: malformed entries are dropped and
/// their siblings kept. A lone object is read as a one-element list.
pub(crate) fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let values = match Value::deserialize(deserializer)? {
        Value::Array(values) => values,
        single @ Value::Object(_) => vec![single],
        Value::Null => return Ok(Vec::new()),
        _ => {
            debug!("Ignoring malformed list field");
            return Ok(Vec::new());
        }
    };
    Ok(values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!(index, "Skipping malformed list entry: {}", err);
                None
            }
        })
        .collect())
}

/// Numbers sometimes arrive as strings ("4.5"); both forms are accepted.
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_as_f64(&value))
}

pub(crate) fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Render a scalar JSON value as display text; containers render empty.
pub(crate) fn value_as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => String::new(),
    }
}
