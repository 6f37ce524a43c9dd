//! `%{name}` variable substitution.
//!
//! A string that is exactly one placeholder resolves to the variable's JSON
//! value, preserving arrays and objects (so `each: "%{urls}"` iterates a
//! real array). Placeholders embedded in longer strings splice in textually.
//! Values substituted into URLs are NOT percent-encoded; a step that needs
//! encoding must encode in the producing step.

use std::collections::HashMap;

use serde_json::Value;

/// The rolling variable map.
pub type VarMap = HashMap<String, Value>;

/// Resolve placeholders in every string position of a JSON value.
pub fn substitute(value: &Value, vars: &VarMap) -> Value {
    match value {
        Value::String(s) => substitute_str(s, vars),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve placeholders in one string.
pub fn substitute_str(s: &str, vars: &VarMap) -> Value {
    // Whole-string placeholder: hand back the variable as-is.
    if let Some(name) = whole_placeholder(s) {
        if let Some(value) = vars.get(name) {
            return value.clone();
        }
        return Value::String(s.to_string());
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("%{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(&textual(value)),
                    // Unknown names stay verbatim so typos stay visible.
                    None => {
                        out.push_str("%{");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("%{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// The name inside a string that is exactly `%{name}`.
fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("%{")?.strip_suffix('}')?;
    if inner.contains("%{") || inner.contains('}') {
        return None;
    }
    Some(inner)
}

/// Splice representation: strings verbatim, everything else as JSON.
fn textual(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> VarMap {
        let mut m = VarMap::new();
        m.insert("t".into(), json!("Rust Browser Bridge"));
        m.insert("n".into(), json!(42));
        m.insert("urls".into(), json!(["https://a", "https://b"]));
        m
    }

    #[test]
    fn whole_placeholder_preserves_type() {
        let v = substitute_str("%{urls}", &vars());
        assert_eq!(v, json!(["https://a", "https://b"]));
        let v = substitute_str("%{n}", &vars());
        assert_eq!(v, json!(42));
    }

    #[test]
    fn embedded_placeholder_splices_text() {
        let v = substitute_str("https://s.test/search?q=%{t}", &vars());
        // Substitution is verbatim; no percent-encoding happens here.
        assert_eq!(v, json!("https://s.test/search?q=Rust Browser Bridge"));
    }

    #[test]
    fn numbers_splice_as_json_text() {
        let v = substitute_str("page-%{n}.html", &vars());
        assert_eq!(v, json!("page-42.html"));
    }

    #[test]
    fn unknown_names_stay_verbatim() {
        let v = substitute_str("x=%{missing}", &vars());
        assert_eq!(v, json!("x=%{missing}"));
        let v = substitute_str("%{missing}", &vars());
        assert_eq!(v, json!("%{missing}"));
    }

    #[test]
    fn substitution_recurses_through_args() {
        let args = json!({
            "url": "%{t}",
            "list": ["%{n}", "static"],
            "nested": { "q": "find %{t} now" }
        });
        let out = substitute(&args, &vars());
        assert_eq!(out["url"], "Rust Browser Bridge");
        assert_eq!(out["list"][0], 42);
        assert_eq!(out["nested"]["q"], "find Rust Browser Bridge now");
    }

    #[test]
    fn multiple_placeholders_in_one_string() {
        let v = substitute_str("%{t}/%{n}", &vars());
        assert_eq!(v, json!("Rust Browser Bridge/42"));
    }

    #[test]
    fn unterminated_placeholder_passes_through() {
        let v = substitute_str("broken %{t", &vars());
        assert_eq!(v, json!("broken %{t"));
    }
}
