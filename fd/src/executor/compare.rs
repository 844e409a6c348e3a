//! Value comparison - shared by the conditional executor and while-loops
//!
//! Ordering operators try numeric comparison first and fall back to
//! lexicographic string comparison, so `"10" > "9"` holds numerically while
//! `"b" > "a"` still works for text.

use serde_json::Value;

use crate::error::EngineError;

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(*b as u8 as f64),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn loosely_equal(lhs: &Value, rhs: &Value) -> bool {
    if lhs == rhs {
        return true;
    }
    if let (Some(a), Some(b)) = (as_number(lhs), as_number(rhs)) {
        return a == b;
    }
    as_text(lhs) == as_text(rhs)
}

fn ordering(lhs: &Value, rhs: &Value) -> std::cmp::Ordering {
    if let (Some(a), Some(b)) = (as_number(lhs), as_number(rhs)) {
        return a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal);
    }
    as_text(lhs).cmp(&as_text(rhs))
}

fn contains(lhs: &Value, rhs: &Value) -> bool {
    match lhs {
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, rhs)),
        Value::Object(map) => map.contains_key(&as_text(rhs)),
        _ => as_text(lhs).contains(&as_text(rhs)),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Compare two resolved operands under a named comparator.
pub fn compare_values(lhs: &Value, op: &str, rhs: &Value) -> Result<bool, EngineError> {
    use std::cmp::Ordering::*;

    Ok(match op {
        "equals" | "==" => loosely_equal(lhs, rhs),
        "not_equals" | "!=" => !loosely_equal(lhs, rhs),
        "contains" => contains(lhs, rhs),
        "not_contains" => !contains(lhs, rhs),
        "gt" | ">" => ordering(lhs, rhs) == Greater,
        "gte" | ">=" => ordering(lhs, rhs) != Less,
        "lt" | "<" => ordering(lhs, rhs) == Less,
        "lte" | "<=" => ordering(lhs, rhs) != Greater,
        "matches_regex" => {
            let pattern = as_text(rhs);
            let regex = regex::Regex::new(&pattern)
                .map_err(|e| EngineError::validation(format!("invalid regex {pattern:?}: {e}")))?;
            regex.is_match(&as_text(lhs))
        }
        "exists" => !lhs.is_null(),
        "not_exists" => lhs.is_null(),
        "is_empty" => is_empty(lhs),
        "not_empty" => !is_empty(lhs),
        other => return Err(EngineError::validation(format!("unknown comparator: {other}"))),
    })
}
