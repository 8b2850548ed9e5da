//! `key=value` config-dump decoding.
//!
//! Device config endpoints return flat dumps such as:
//!
//! ```text
//! table.ChannelTitle[0].Name=Front Door
//! table.Network.eth0.IPAddress=192.168.1.108
//! table.Network.eth0.DhcpEnable=true
//! ```
//!
//! [`decode`] reconstructs the nested structure: bracket indices are
//! normalized into path segments (string keys), and scalar values are
//! coerced — `true`/`false` (case-insensitive) to booleans, `null` to
//! null, all-digit strings to integers, anything else left as a string.
//! [`encode`] is the inverse, with all-digit path segments rendered back
//! in bracket form.
//!
//! The event-attach line grammar is a different, simpler format and is
//! handled in [`crate::event`], not here.

use serde_json::{Map, Value};

use crate::error::Error;

/// Coerce one scalar value per the dump rules.
pub fn coerce_scalar(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = raw.parse::<u64>() {
            return Value::from(n);
        }
    }
    Value::String(raw.to_string())
}

/// Decode a newline-separated `dotted.key[index]=value` dump into a
/// nested mapping.
///
/// Blank lines (including trailing ones) are tolerated. A non-blank line
/// without a `=` separator is an [`Error::Decode`]. Duplicate keys keep
/// the last value seen.
pub fn decode(text: &str) -> Result<Map<String, Value>, Error> {
    let mut root = Map::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| Error::Decode {
            line: line.to_string(),
        })?;
        let path = key.replace('[', ".").replace(']', "");
        let segments: Vec<&str> = path.split('.').collect();
        insert_path(&mut root, &segments, coerce_scalar(value));
    }
    Ok(root)
}

fn insert_path(root: &mut Map<String, Value>, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut cursor = root;
    for segment in parents {
        let entry = cursor
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            // a scalar observed earlier on this path loses to the
            // deeper assignment
            *entry = Value::Object(Map::new());
        }
        cursor = entry.as_object_mut().expect("entry was just made an object");
    }
    cursor.insert((*last).to_string(), value);
}

/// Encode a nested mapping back into `dotted.key[index]=value` lines.
pub fn encode(map: &Map<String, Value>) -> String {
    let mut lines = Vec::new();
    encode_into(&mut lines, "", map);
    lines.join("\n")
}

fn encode_into(lines: &mut Vec<String>, prefix: &str, map: &Map<String, Value>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else if !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) {
            format!("{prefix}[{key}]")
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) => encode_into(lines, &path, inner),
            scalar => lines.push(format!("{path}={}", render_scalar(scalar))),
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn coerces_scalars() {
        assert_eq!(coerce_scalar("true"), Value::Bool(true));
        assert_eq!(coerce_scalar("FALSE"), Value::Bool(false));
        assert_eq!(coerce_scalar("null"), Value::Null);
        assert_eq!(coerce_scalar("123"), json!(123));
        assert_eq!(coerce_scalar("007"), json!(7));
        assert_eq!(coerce_scalar("12a"), json!("12a"));
        assert_eq!(coerce_scalar("-5"), json!("-5"));
        assert_eq!(coerce_scalar(""), json!(""));
    }

    #[test]
    fn decodes_dotted_and_bracketed_keys() {
        let text = "table.ChannelTitle[0].Name=Front\n\
                    table.ChannelTitle[1].Name=Back\n\
                    table.Network.eth0.DhcpEnable=true\n\
                    table.Network.eth0.MTU=1500\n";
        let decoded = decode(text).unwrap();
        assert_eq!(
            Value::Object(decoded),
            json!({
                "table": {
                    "ChannelTitle": {
                        "0": { "Name": "Front" },
                        "1": { "Name": "Back" },
                    },
                    "Network": {
                        "eth0": { "DhcpEnable": true, "MTU": 1500 },
                    },
                }
            })
        );
    }

    #[test]
    fn tolerates_blank_trailing_lines() {
        let decoded = decode("a.b=1\n\n\n").unwrap();
        assert_eq!(Value::Object(decoded), json!({ "a": { "b": 1 } }));
    }

    #[test]
    fn value_may_contain_equals() {
        let decoded = decode("a.b=x=y").unwrap();
        assert_eq!(Value::Object(decoded), json!({ "a": { "b": "x=y" } }));
    }

    #[test]
    fn missing_separator_is_an_error() {
        let err = decode("a.b=1\nnot a pair\n").unwrap_err();
        assert!(matches!(err, Error::Decode { ref line } if line == "not a pair"));
    }

    #[test]
    fn duplicate_keys_keep_last_value() {
        let decoded = decode("a.b=1\na.b=2\n").unwrap();
        assert_eq!(Value::Object(decoded), json!({ "a": { "b": 2 } }));
    }

    #[test]
    fn round_trips_with_coercion() {
        let original = "table.Alarm[0].Enable=true\n\
                        table.Alarm[0].Level=3\n\
                        table.Alarm[1].Enable=false\n\
                        table.General.MachineName=lobby\n\
                        table.General.Password=null";
        let decoded = decode(original).unwrap();
        let encoded = encode(&decoded);
        let redecoded = decode(&encoded).unwrap();
        assert_eq!(decoded, redecoded);
        // coercion applied on the way in
        assert_eq!(decoded["table"]["Alarm"]["0"]["Enable"], json!(true));
        assert_eq!(decoded["table"]["Alarm"]["0"]["Level"], json!(3));
        assert_eq!(decoded["table"]["General"]["Password"], Value::Null);
    }
}
