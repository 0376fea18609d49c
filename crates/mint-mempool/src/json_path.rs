//! Dotted-path lookup into feed messages
//!
//! Paths look like `params.result`, `params.result.hash` or `data[0].hash`.
//! Numeric segments index into arrays.

use serde_json::Value;

pub fn extract<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path).try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(|c: char| c == '.' || c == '[' || c == ']')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_nested_fields_and_indices() {
        let message = json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": {
                "subscription": "0x9ce59a13059e417087c02d3236a0b1cc",
                "result": "0xd6f2ea16e5ff4d5f4f4dbcb2f3d62b1e2ab8fdb5e5b3e6a3e1a1c4c8b7a9f0e1"
            },
            "batch": [{ "hash": "0x01" }, { "hash": "0x02" }]
        });

        assert_eq!(
            extract(&message, "params.result").and_then(Value::as_str),
            Some("0xd6f2ea16e5ff4d5f4f4dbcb2f3d62b1e2ab8fdb5e5b3e6a3e1a1c4c8b7a9f0e1")
        );
        assert_eq!(extract(&message, "batch[1].hash"), Some(&json!("0x02")));
        assert_eq!(extract(&message, "batch.0.hash"), Some(&json!("0x01")));
    }

    #[test]
    fn test_missing_paths() {
        let message = json!({ "id": 1, "result": "0xabc" });

        assert!(extract(&message, "params.result").is_none());
        assert!(extract(&message, "result.hash").is_none());
        assert!(extract(&message, "batch[7]").is_none());
        assert_eq!(extract(&message, ""), Some(&message));
    }
}
