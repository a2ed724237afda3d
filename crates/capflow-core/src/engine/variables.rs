//! Binding run-time values to a workflow's declared variables.
//!
//! Precedence: an explicit value, then the declared default. A required
//! variable left without either is an error. Values arriving as strings
//! (CLI `--var k=v`, query parameters) are coerced to the declared type.
//!
//! Secret variables carry a secret *name*. The name is what gets stored on
//! the execution; the value is looked up through a `SecretResolver` when the
//! run starts and is only ever held in memory.

use std::future::Future;
use std::pin::Pin;

use capflow_types::workflow::{VariableType, WorkflowVariable};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VariableError {
    #[error("required variable '{0}' has no value")]
    Missing(String),

    #[error("variable '{key}' expects a {expected} value")]
    InvalidType { key: String, expected: &'static str },

    #[error("variable '{key}' must be one of [{options}], got '{value}'")]
    InvalidOption {
        key: String,
        value: String,
        options: String,
    },

    #[error("secret for variable '{key}' could not be resolved: {reason}")]
    SecretUnavailable { key: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SecretError(pub String);

pub type SecretFuture<'a> = Pin<Box<dyn Future<Output = Result<String, SecretError>> + Send + 'a>>;

/// Looks up secret values by name.
pub trait SecretResolver: Send + Sync {
    fn resolve<'a>(&'a self, name: &'a str) -> SecretFuture<'a>;
}

/// Bind `provided` values against `declared` variables.
///
/// Keys that no variable declares are passed through unchanged so templates
/// can still reference them.
pub fn bind_variables(
    declared: &[WorkflowVariable],
    provided: &Map<String, Value>,
) -> Result<Map<String, Value>, VariableError> {
    let mut bound = Map::new();

    for variable in declared {
        let explicit = provided.get(&variable.key).filter(|v| !v.is_null());
        let value = match explicit {
            Some(value) => coerce(variable, value)?,
            None => match &variable.default_value {
                Some(default) if !default.is_null() => default.clone(),
                _ if variable.required => return Err(VariableError::Missing(variable.key.clone())),
                _ => continue,
            },
        };
        bound.insert(variable.key.clone(), value);
    }

    for (key, value) in provided {
        if !bound.contains_key(key) && !declared.iter().any(|v| &v.key == key) {
            bound.insert(key.clone(), value.clone());
        }
    }
    Ok(bound)
}

fn coerce(variable: &WorkflowVariable, value: &Value) -> Result<Value, VariableError> {
    let invalid = |expected| VariableError::InvalidType {
        key: variable.key.clone(),
        expected,
    };

    if variable.is_secret {
        return match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(invalid("secret name")),
        };
    }

    match variable.var_type {
        VariableType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(invalid("string")),
        },
        VariableType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|f| {
                    if f.fract() == 0.0 && f.abs() < 9.0e15 {
                        Some(Value::from(f as i64))
                    } else {
                        serde_json::Number::from_f64(f).map(Value::Number)
                    }
                })
                .ok_or_else(|| invalid("number")),
            _ => Err(invalid("number")),
        },
        VariableType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid("boolean")),
            },
            _ => Err(invalid("boolean")),
        },
        VariableType::Json => match value {
            Value::String(s) => Ok(serde_json::from_str(s).unwrap_or_else(|_| value.clone())),
            _ => Ok(value.clone()),
        },
        VariableType::Select => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return Err(invalid("string")),
            };
            if variable.options.is_empty() || variable.options.contains(&text) {
                Ok(Value::String(text))
            } else {
                Err(VariableError::InvalidOption {
                    key: variable.key.clone(),
                    value: text,
                    options: variable.options.join(", "),
                })
            }
        }
        VariableType::File => match value {
            Value::Object(_) | Value::String(_) => Ok(value.clone()),
            _ => Err(invalid("file")),
        },
    }
}

/// Resolve every bound secret variable to its value.
///
/// The returned map overlays `bound` when handing variables to capsules.
pub async fn resolve_secrets(
    declared: &[WorkflowVariable],
    bound: &Map<String, Value>,
    resolver: Option<&dyn SecretResolver>,
) -> Result<Map<String, Value>, VariableError> {
    let mut secrets = Map::new();
    for variable in declared.iter().filter(|v| v.is_secret) {
        let Some(name) = bound.get(&variable.key).and_then(Value::as_str) else {
            continue;
        };
        let Some(resolver) = resolver else {
            return Err(VariableError::SecretUnavailable {
                key: variable.key.clone(),
                reason: "no secret resolver configured".to_string(),
            });
        };
        let value = resolver
            .resolve(name)
            .await
            .map_err(|e| VariableError::SecretUnavailable {
                key: variable.key.clone(),
                reason: e.to_string(),
            })?;
        secrets.insert(variable.key.clone(), Value::String(value));
    }
    Ok(secrets)
}
