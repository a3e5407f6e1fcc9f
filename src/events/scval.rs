//! Decoding of contract values from their JSON metadata form
//!
//! Contract topics and payloads arrive as tagged values such as
//! `{"symbol": "reward_distributed"}` or `{"i128": "500"}`. These helpers turn
//! them into plain JSON (strings, numbers, arrays, objects) so event fields can
//! be read without caring about the on-chain encoding.

use serde_json::{Map, Value};

/// Convert a tagged contract value into plain JSON. Untagged input passes through.
pub fn to_plain(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return value.clone();
    };
    if map.len() != 1 {
        return Value::Object(map.iter().map(|(k, v)| (k.clone(), to_plain(v))).collect());
    }

    let Some((tag, inner)) = map.iter().next() else {
        return value.clone();
    };
    match tag.as_str() {
        "symbol" | "string" | "sym" | "str" => inner.clone(),
        "address" => address_text(inner),
        "bool" | "u32" | "i32" => inner.clone(),
        "u64" | "i64" | "u128" | "i128" | "u256" | "i256" | "timepoint" | "duration" => {
            integer_text(inner)
        }
        "bytes" => inner.clone(),
        "void" => Value::Null,
        "vec" => match inner {
            Value::Array(items) => Value::Array(items.iter().map(to_plain).collect()),
            Value::Null => Value::Array(Vec::new()),
            other => to_plain(other),
        },
        "map" => match inner {
            Value::Array(entries) => Value::Object(map_entries(entries)),
            Value::Null => Value::Object(Map::new()),
            other => to_plain(other),
        },
        _ => Value::Object(map.iter().map(|(k, v)| (k.clone(), to_plain(v))).collect()),
    }
}

/// Text form of a decoded value (strings as-is, numbers in decimal)
pub fn as_text(value: &Value) -> Option<String> {
    match to_plain(value) {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integer form of a decoded value, accepting decimal strings
pub fn as_i128(value: &Value) -> Option<i128> {
    match to_plain(value) {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Look up `key` in a decoded map payload
pub fn field<'a>(plain: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let Value::Object(map) = plain else {
        return None;
    };
    keys.iter().find_map(|k| map.get(*k))
}

fn address_text(inner: &Value) -> Value {
    match inner {
        Value::String(_) => inner.clone(),
        Value::Object(map) => map
            .values()
            .next()
            .map(address_text)
            .unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn integer_text(inner: &Value) -> Value {
    match inner {
        Value::Number(_) => inner.clone(),
        Value::String(s) => Value::String(s.clone()),
        // 128-bit parts form: {"hi": .., "lo": ..}
        Value::Object(parts) => {
            let hi = parts.get("hi").and_then(Value::as_i64);
            let lo = parts.get("lo").and_then(Value::as_u64);
            match (hi, lo) {
                (Some(hi), Some(lo)) => {
                    let combined = ((hi as i128) << 64) | lo as i128;
                    Value::String(combined.to_string())
                }
                _ => inner.clone(),
            }
        }
        other => other.clone(),
    }
}

fn map_entries(entries: &[Value]) -> Map<String, Value> {
    let mut out = Map::new();
    for entry in entries {
        let key = entry.get("key").and_then(as_text);
        let val = entry.get("val").or_else(|| entry.get("value"));
        if let (Some(key), Some(val)) = (key, val) {
            out.insert(key, to_plain(val));
        }
    }
    out
}
