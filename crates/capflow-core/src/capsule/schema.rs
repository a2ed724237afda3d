//! Schema-driven validation of node configuration.

use capflow_types::capsule::{CapsuleConfigField, CapsuleTypeMeta, ConfigFieldType, FieldValidation};
use serde_json::{Map, Value};

use crate::trigger::schedule::parse_schedule;

/// Validate every field of `meta.config_schema` against `config`.
///
/// One `FieldValidation` per schema field, in schema order.
pub fn validate_fields(meta: &CapsuleTypeMeta, config: &Map<String, Value>) -> Vec<FieldValidation> {
    meta.config_schema
        .iter()
        .map(|field| validate_field(field, config.get(&field.key)))
        .collect()
}

/// Whether every field in a validation report is valid.
pub fn all_valid(validations: &[FieldValidation]) -> bool {
    validations.iter().all(|v| v.valid)
}

/// `config` with schema defaults filled in for absent or blank fields.
pub fn apply_defaults(meta: &CapsuleTypeMeta, config: &Map<String, Value>) -> Map<String, Value> {
    let mut effective = config.clone();
    for field in &meta.config_schema {
        let Some(default) = &field.default_value else {
            continue;
        };
        if effective.get(&field.key).is_none_or(is_empty) {
            effective.insert(field.key.clone(), default.clone());
        }
    }
    effective
}

fn validate_field(field: &CapsuleConfigField, value: Option<&Value>) -> FieldValidation {
    let provided = value.is_some_and(|v| !is_empty(v));

    let message = match value {
        Some(v) if provided => check_type(field, v).err(),
        _ if field.required && field.default_value.is_none() => {
            Some(format!("{} is required", field.label))
        }
        _ => None,
    };

    FieldValidation {
        key: field.key.clone(),
        provided,
        required: field.required,
        valid: message.is_none(),
        message,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn check_type(field: &CapsuleConfigField, value: &Value) -> Result<(), String> {
    match field.field_type {
        ConfigFieldType::Text | ConfigFieldType::Textarea => match value {
            Value::String(_) => Ok(()),
            _ => Err(format!("{} must be text", field.label)),
        },
        ConfigFieldType::Number => {
            let numeric = match value {
                Value::Number(_) => true,
                Value::String(s) => s.trim().parse::<f64>().is_ok(),
                _ => false,
            };
            if numeric {
                Ok(())
            } else {
                Err(format!("{} must be a number", field.label))
            }
        }
        ConfigFieldType::Boolean => match value {
            Value::Bool(_) => Ok(()),
            _ => Err(format!("{} must be true or false", field.label)),
        },
        ConfigFieldType::Select => match value.as_str() {
            Some(s) if field.options.iter().any(|o| o == s) => Ok(()),
            _ => Err(format!(
                "{} must be one of: {}",
                field.label,
                field.options.join(", ")
            )),
        },
        ConfigFieldType::Json => match value {
            Value::String(s) => serde_json::from_str::<Value>(s)
                .map(|_| ())
                .map_err(|e| format!("{} is not valid JSON: {e}", field.label)),
            _ => Ok(()),
        },
        ConfigFieldType::Url => match value.as_str() {
            Some(s) if s.starts_with("http://") || s.starts_with("https://") => Ok(()),
            // Templated URLs are resolved at run time.
            Some(s) if s.contains("{{") => Ok(()),
            _ => Err(format!("{} must be an http(s) URL", field.label)),
        },
        ConfigFieldType::Cron => match value.as_str() {
            Some(s) => parse_schedule(s)
                .map(|_| ())
                .map_err(|e| format!("{}: {e}", field.label)),
            None => Err(format!("{} must be a cron expression", field.label)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capflow_types::capsule::CapsuleCategory;
    use serde_json::json;

    fn field(key: &str, field_type: ConfigFieldType, required: bool) -> CapsuleConfigField {
        CapsuleConfigField {
            key: key.to_string(),
            label: key.to_string(),
            field_type,
            required,
            default_value: None,
            options: Vec::new(),
            help_text: None,
        }
    }

    fn meta(fields: Vec<CapsuleConfigField>) -> CapsuleTypeMeta {
        CapsuleTypeMeta {
            type_key: "test".to_string(),
            name: "Test".to_string(),
            description: String::new(),
            icon: String::new(),
            category: CapsuleCategory::Processor,
            config_schema: fields,
            default_inputs: Vec::new(),
            default_outputs: Vec::new(),
            testable: true,
        }
    }

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn missing_required_field_is_invalid() {
        let m = meta(vec![field("url", ConfigFieldType::Url, true)]);
        let result = validate_fields(&m, &Map::new());
        assert_eq!(result.len(), 1);
        assert!(!result[0].provided);
        assert!(result[0].required);
        assert!(!result[0].valid);
        assert!(!all_valid(&result));
    }

    #[test]
    fn required_field_with_default_is_valid_when_absent() {
        let mut f = field("method", ConfigFieldType::Select, true);
        f.options = vec!["GET".to_string(), "POST".to_string()];
        f.default_value = Some(json!("GET"));
        let result = validate_fields(&meta(vec![f]), &Map::new());
        assert!(result[0].valid);
        assert!(!result[0].provided);
    }

    #[test]
    fn blank_string_counts_as_not_provided() {
        let m = meta(vec![field("prompt", ConfigFieldType::Textarea, true)]);
        let result = validate_fields(&m, &config(json!({"prompt": "   "})));
        assert!(!result[0].provided);
        assert!(!result[0].valid);
    }

    #[test]
    fn type_checks() {
        let mut select = field("mode", ConfigFieldType::Select, false);
        select.options = vec!["a".to_string(), "b".to_string()];
        let m = meta(vec![
            field("n", ConfigFieldType::Number, false),
            field("flag", ConfigFieldType::Boolean, false),
            select,
            field("body", ConfigFieldType::Json, false),
            field("url", ConfigFieldType::Url, false),
            field("schedule", ConfigFieldType::Cron, false),
        ]);
        let good = validate_fields(
            &m,
            &config(json!({
                "n": "42",
                "flag": true,
                "mode": "b",
                "body": "{\"x\": 1}",
                "url": "https://example.com",
                "schedule": "*/5 * * * *"
            })),
        );
        assert!(all_valid(&good), "{good:?}");

        let bad = validate_fields(
            &m,
            &config(json!({
                "n": "forty",
                "flag": "yes",
                "mode": "c",
                "body": "{not json",
                "url": "ftp://example.com",
                "schedule": "whenever"
            })),
        );
        assert!(bad.iter().all(|v| !v.valid), "{bad:?}");
        assert!(bad.iter().all(|v| v.message.is_some()));
    }

    #[test]
    fn defaults_fill_absent_and_blank_fields() {
        let mut method = field("method", ConfigFieldType::Text, false);
        method.default_value = Some(json!("GET"));
        let mut timeout = field("timeout", ConfigFieldType::Number, false);
        timeout.default_value = Some(json!(30));
        let m = meta(vec![method, timeout, field("url", ConfigFieldType::Url, true)]);

        let effective = apply_defaults(
            &m,
            &config(json!({"method": " ", "url": "https://example.com"})),
        );
        assert_eq!(effective["method"], "GET");
        assert_eq!(effective["timeout"], 30);
        assert_eq!(effective["url"], "https://example.com");
    }

    #[test]
    fn templated_url_is_accepted() {
        let m = meta(vec![field("url", ConfigFieldType::Url, true)]);
        let result = validate_fields(&m, &config(json!({"url": "{{vars.endpoint}}"})));
        assert!(result[0].valid);
    }
}
