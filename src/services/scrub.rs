use serde_json::Value;

/// Keys whose values are redacted from vendor results before persistence.
/// Matched case-insensitively against each object key.
const SENSITIVE_KEYS: &[&str] = &[
    "ssn",
    "email",
    "phone",
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credit_card",
    "card_number",
    "dob",
];

const REDACTED: &str = "[REDACTED]";

/// Deep-copy `value` with sensitive fields redacted at any nesting depth.
pub fn scrub(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    if is_sensitive(key) {
                        (key.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), scrub(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(scrub).collect()),
        other => other.clone(),
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key == *s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_top_level_keys() {
        let scrubbed = scrub(&json!({"email": "a@b.c", "score": 7}));
        assert_eq!(scrubbed, json!({"email": "[REDACTED]", "score": 7}));
    }

    #[test]
    fn redacts_nested_and_array_values() {
        let scrubbed = scrub(&json!({
            "items": [{"ssn": "123-45-6789", "id": 1}],
            "meta": {"inner": {"password": "hunter2"}}
        }));
        assert_eq!(
            scrubbed,
            json!({
                "items": [{"ssn": "[REDACTED]", "id": 1}],
                "meta": {"inner": {"password": "[REDACTED]"}}
            })
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        let scrubbed = scrub(&json!({"Email": "a@b.c", "API_KEY": "k"}));
        assert_eq!(scrubbed, json!({"Email": "[REDACTED]", "API_KEY": "[REDACTED]"}));
    }

    #[test]
    fn non_sensitive_values_pass_through() {
        let original = json!({"result": {"ok": true}, "count": [1, 2, 3]});
        assert_eq!(scrub(&original), original);
    }
}
