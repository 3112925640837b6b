//! Tolerant decoding for loosely-typed client payloads.
//!
//! Clients send all kinds of half-valid JSON. One malformed content part or
//! message must not sink the whole payload, so collections are decoded
//! element by element and bad elements are either recovered or dropped.

use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Fallback for elements that failed strict decoding.
pub trait Recover: Sized {
    /// Salvage something from a value that did not match any known shape.
    fn recover(_value: &Value) -> Option<Self> {
        None
    }
}

/// Decode one element, falling back to [`Recover::recover`].
pub fn decode_item<T: DeserializeOwned + Recover>(value: Value) -> Option<T> {
    match T::deserialize(&value) {
        Ok(item) => Some(item),
        Err(err) => {
            let recovered = T::recover(&value);
            if recovered.is_none() {
                debug!(error = %err, "dropping malformed element");
            }
            recovered
        }
    }
}

/// Decode every element of an array, skipping the ones that cannot be salvaged.
pub fn decode_items<T: DeserializeOwned + Recover>(items: Vec<Value>) -> Vec<T> {
    items.into_iter().filter_map(decode_item).collect()
}

/// `deserialize_with` target for `Vec<T>` fields. Non-arrays decode as empty.
pub fn vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Recover,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => decode_items(items),
        Value::Null => Vec::new(),
        other => {
            debug!(kind = %json_kind(&other), "expected an array, ignoring field");
            Vec::new()
        }
    })
}

/// `deserialize_with` target for `Option<Vec<T>>` fields.
pub fn opt_vec<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Recover,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(decode_items(items)),
        _ => None,
    })
}

/// Accepts either a JSON-encoded string or a raw JSON value and yields a string.
pub fn json_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Decode a whole payload, substituting the default shape when it is malformed.
pub fn decode_payload<T: DeserializeOwned + Default>(value: Value) -> T {
    if value.is_null() {
        return T::default();
    }
    match T::deserialize(&value) {
        Ok(decoded) => decoded,
        Err(err) => {
            warn!(error = %err, "malformed payload, substituting defaults");
            T::default()
        }
    }
}

/// `text` field of an arbitrary object, if it is a string.
pub fn text_field(value: &Value) -> Option<String> {
    value.get("text").and_then(Value::as_str).map(str::to_string)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Named {
        name: String,
    }

    impl Recover for Named {
        fn recover(value: &Value) -> Option<Self> {
            text_field(value).map(|name| Named { name })
        }
    }

    #[derive(Debug, Default, Deserialize)]
    struct Holder {
        #[serde(default, deserialize_with = "vec")]
        items: Vec<Named>,
    }

    #[test]
    fn test_bad_elements_are_recovered_or_dropped() {
        let holder: Holder = serde_json::from_value(json!({
            "items": [{"name": "a"}, {"text": "b"}, 42, {"other": true}]
        }))
        .unwrap();
        assert_eq!(
            holder.items,
            vec![
                Named { name: "a".into() },
                Named { name: "b".into() }
            ]
        );
    }

    #[test]
    fn test_non_array_field_is_empty() {
        let holder: Holder = serde_json::from_value(json!({"items": "nope"})).unwrap();
        assert!(holder.items.is_empty());
    }

    #[test]
    fn test_malformed_payload_defaults() {
        let holder: Holder = decode_payload(json!("not an object"));
        assert!(holder.items.is_empty());
        let holder: Holder = decode_payload(Value::Null);
        assert!(holder.items.is_empty());
    }
}
