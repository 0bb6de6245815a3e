//! Content and snapshot fingerprints for cache keys.

use std::hash::{DefaultHasher, Hash, Hasher};

use serde_json::Value;

/// Hash a piece of template content.
/// Uses DefaultHasher for speed (non-cryptographic, fast).
pub fn content_hash(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// Hex-encoded content hash, handy for logs and diagnostics.
pub fn content_hash_str(content: &str) -> String {
    format!("{:016x}", content_hash(content))
}

/// Hash a JSON value through its canonical serialisation.
///
/// `serde_json` maps are ordered, so equal values always hash equally.
pub fn value_hash(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    hash_value_into(value, &mut hasher);
    hasher.finish()
}

/// Hash the values a computation read, in name order.
///
/// Callers pass `(name, value)` pairs; order does not matter because the pairs
/// are sorted by name before hashing.
pub fn snapshot_hash<'a, I>(entries: I) -> u64
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut entries: Vec<(&str, &Value)> = entries.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = DefaultHasher::new();
    for (name, value) in entries {
        name.hash(&mut hasher);
        hash_value_into(value, &mut hasher);
    }
    hasher.finish()
}

fn hash_value_into(value: &Value, hasher: &mut DefaultHasher) {
    // Value has no Hash impl; its compact JSON form is canonical for our maps.
    value.to_string().hash(hasher);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_hash_str_consistent() {
        let content = "Hello @name, you owe @price|currency";
        assert_eq!(content_hash_str(content), content_hash_str(content));
        assert_eq!(content_hash_str(content).len(), 16);
    }

    #[test]
    fn test_content_hash_different_content() {
        assert_ne!(content_hash("@a"), content_hash("@b"));
    }

    #[test]
    fn test_value_hash_ignores_key_order() {
        let a = json!({"x": 1, "y": [true, "z"]});
        let b: Value = serde_json::from_str(r#"{"y": [true, "z"], "x": 1}"#).unwrap();
        assert_eq!(value_hash(&a), value_hash(&b));
    }

    #[test]
    fn test_snapshot_hash_is_order_independent() {
        let ten = json!(10);
        let name = json!("Ada");
        let h1 = snapshot_hash([("price", &ten), ("name", &name)]);
        let h2 = snapshot_hash([("name", &name), ("price", &ten)]);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_snapshot_hash_changes_with_value() {
        let ten = json!(10);
        let twenty = json!(20);
        assert_ne!(snapshot_hash([("price", &ten)]), snapshot_hash([("price", &twenty)]));
    }
}
