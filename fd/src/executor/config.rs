//! Config field extraction helpers
//!
//! Node configs are free-form JSON; executors resolve the fields they read
//! through the context's resolver and coerce them here. Numeric coercion
//! falls back to the caller's default on unparseable input instead of
//! failing, matching the forgiving behavior modules rely on; required
//! fields use [`required_string`] which does fail.

use serde_json::{Map, Value};

use crate::context::ExecutionContext;
use crate::error::EngineError;

/// Resolve a string field, falling back to `default` when absent or null.
pub fn resolved_string(
    config: &Map<String, Value>,
    ctx: &ExecutionContext,
    key: &str,
    default: &str,
) -> Result<String, EngineError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(value) => {
            let resolved = ctx.resolve_to_string(value)?;
            if resolved.is_empty() {
                Ok(default.to_string())
            } else {
                Ok(resolved)
            }
        }
    }
}

/// Resolve a string field that must be non-empty.
pub fn required_string(config: &Map<String, Value>, ctx: &ExecutionContext, key: &str) -> Result<String, EngineError> {
    let value = resolved_string(config, ctx, key, "")?;
    if value.is_empty() {
        Err(EngineError::validation(format!("missing required field: {key}")))
    } else {
        Ok(value)
    }
}

/// Resolve an integer field; unparseable input yields `default`.
pub fn resolved_i64(
    config: &Map<String, Value>,
    ctx: &ExecutionContext,
    key: &str,
    default: i64,
) -> Result<i64, EngineError> {
    let Some(raw) = config.get(key) else {
        return Ok(default);
    };
    Ok(match ctx.resolve(raw)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(default),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .or_else(|_| s.trim().parse::<f64>().map(|f| f as i64))
            .unwrap_or(default),
        Value::Bool(b) => b as i64,
        _ => default,
    })
}

/// Resolve a float field; unparseable input yields `default`.
pub fn resolved_f64(
    config: &Map<String, Value>,
    ctx: &ExecutionContext,
    key: &str,
    default: f64,
) -> Result<f64, EngineError> {
    let Some(raw) = config.get(key) else {
        return Ok(default);
    };
    Ok(match ctx.resolve(raw)? {
        Value::Number(n) => n.as_f64().unwrap_or(default),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(default),
        _ => default,
    })
}

/// Resolve a boolean field; accepts `true`/`false` and their string forms.
pub fn resolved_bool(
    config: &Map<String, Value>,
    ctx: &ExecutionContext,
    key: &str,
    default: bool,
) -> Result<bool, EngineError> {
    let Some(raw) = config.get(key) else {
        return Ok(default);
    };
    Ok(match ctx.resolve(raw)? {
        Value::Bool(b) => b,
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(default),
        _ => default,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunServices;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        let mut ctx = ExecutionContext::new("test", RunServices::new());
        ctx.set_variable("count", json!(5));
        ctx.set_variable("label", json!("hello"));
        ctx
    }

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_resolved_string_with_reference() {
        let config = config(json!({"message": "say {label}"}));
        assert_eq!(resolved_string(&config, &ctx(), "message", "").unwrap(), "say hello");
    }

    #[test]
    fn test_resolved_string_default() {
        let config = config(json!({}));
        assert_eq!(resolved_string(&config, &ctx(), "missing", "fallback").unwrap(), "fallback");
    }

    #[test]
    fn test_required_string_fails_when_empty() {
        let config = config(json!({"name": ""}));
        assert!(matches!(
            required_string(&config, &ctx(), "name"),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_resolved_i64_variants() {
        let config = config(json!({"a": 3, "b": "4", "c": "{count}", "d": "junk", "e": 2.9}));
        let ctx = ctx();
        assert_eq!(resolved_i64(&config, &ctx, "a", 0).unwrap(), 3);
        assert_eq!(resolved_i64(&config, &ctx, "b", 0).unwrap(), 4);
        assert_eq!(resolved_i64(&config, &ctx, "c", 0).unwrap(), 5);
        assert_eq!(resolved_i64(&config, &ctx, "d", 7).unwrap(), 7);
        assert_eq!(resolved_i64(&config, &ctx, "e", 0).unwrap(), 2);
        assert_eq!(resolved_i64(&config, &ctx, "absent", 9).unwrap(), 9);
    }

    #[test]
    fn test_resolved_f64() {
        let config = config(json!({"x": "2.5", "y": 3}));
        let ctx = ctx();
        assert_eq!(resolved_f64(&config, &ctx, "x", 0.0).unwrap(), 2.5);
        assert_eq!(resolved_f64(&config, &ctx, "y", 0.0).unwrap(), 3.0);
    }

    #[test]
    fn test_resolved_bool() {
        let config = config(json!({"a": true, "b": "false", "c": "yes", "d": 1}));
        let ctx = ctx();
        assert!(resolved_bool(&config, &ctx, "a", false).unwrap());
        assert!(!resolved_bool(&config, &ctx, "b", true).unwrap());
        assert!(resolved_bool(&config, &ctx, "c", false).unwrap());
        assert!(resolved_bool(&config, &ctx, "d", false).unwrap());
        assert!(resolved_bool(&config, &ctx, "absent", true).unwrap());
    }
}
