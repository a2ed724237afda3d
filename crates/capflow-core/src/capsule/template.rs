//! `{{ path }}` placeholder substitution for capsule config strings.
//!
//! Paths start with `inputs.<slot_id>` or `vars.<key>` and may continue
//! into the JSON value with dotted keys or array indices
//! (`inputs.data.items.0.title`). Unknown paths render as an empty string.

use std::collections::HashMap;

use capflow_types::artifact::ArtifactContent;
use serde_json::{Map, Value};

use super::behavior::value_to_text;

/// Lookup scope for template rendering.
pub struct TemplateScope<'a> {
    pub inputs: &'a HashMap<String, ArtifactContent>,
    pub variables: &'a Map<String, Value>,
}

impl TemplateScope<'_> {
    /// Resolve a dotted path to a JSON value.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let mut parts = path.split('.');
        let root = match parts.next()? {
            "inputs" => {
                let slot = parts.next()?;
                self.inputs.get(slot).cloned().map(ArtifactContent::into_json)?
            }
            "vars" => {
                let key = parts.next()?;
                self.variables.get(key).cloned()?
            }
            _ => return None,
        };
        parts.try_fold(root, |value, key| json_child(&value, key))
    }

    pub fn render(&self, template: &str) -> String {
        render(template, |path| self.lookup(path).map(|v| value_to_text(&v)))
    }
}

/// Descend one level into a JSON value by key or array index.
pub fn json_child(value: &Value, key: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(key).cloned(),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
        _ => None,
    }
}

/// Replace every `{{ path }}` with `resolve(path)` (empty when unresolved).
pub fn render(template: &str, resolve: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let path = after_open[..end].trim();
                out.push_str(&resolve(path).unwrap_or_default());
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated placeholder is kept verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Whether `template` references the given path prefix.
pub fn references(template: &str, prefix: &str) -> bool {
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            return false;
        };
        if after_open[..end].trim().starts_with(prefix) {
            return true;
        }
        rest = &after_open[end + 2..];
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope_fixture() -> (HashMap<String, ArtifactContent>, Map<String, Value>) {
        let inputs = HashMap::from([(
            "data".to_string(),
            ArtifactContent::Json(json!({"items": [{"title": "first"}, {"title": "second"}]})),
        )]);
        let vars = json!({"topic": "rust", "count": 3}).as_object().cloned().unwrap();
        (inputs, vars)
    }

    #[test]
    fn renders_inputs_and_vars() {
        let (inputs, variables) = scope_fixture();
        let scope = TemplateScope {
            inputs: &inputs,
            variables: &variables,
        };
        assert_eq!(
            scope.render("{{vars.topic}}: {{ inputs.data.items.1.title }} x{{vars.count}}"),
            "rust: second x3"
        );
    }

    #[test]
    fn unknown_paths_render_empty() {
        let (inputs, variables) = scope_fixture();
        let scope = TemplateScope {
            inputs: &inputs,
            variables: &variables,
        };
        assert_eq!(scope.render("[{{vars.missing}}][{{other.x}}]"), "[][]");
    }

    #[test]
    fn unterminated_placeholder_is_kept() {
        assert_eq!(render("a {{b", |_| Some("x".to_string())), "a {{b");
    }

    #[test]
    fn detects_references() {
        assert!(references("Summarize: {{ inputs.content }}", "inputs.content"));
        assert!(!references("Summarize: {{ vars.topic }}", "inputs.content"));
    }
}
