//! Variable-reference resolver
//!
//! Expands `${name}` / `{name}` references (with optional bracketed access
//! paths) against a [`Variables`] map. A hand-written scanner is used instead
//! of a regex because accessors may themselves contain references
//! (`{list[{i}]}`), which requires balanced-brace tracking.

use serde_json::Value;
use thiserror::Error;

use crate::store::Variables;

/// Maximum number of substitution passes over one input string.
///
/// Each pass may expose new references (an inner reference expanding into
/// text that itself contains `{…}`); resolution stops once no pass changes
/// the text or this depth is reached.
pub const MAX_RESOLVE_DEPTH: usize = 5;

/// Raised only for malformed accessor syntax. Missing variables, bad
/// indices, and unknown keys all resolve to `Null` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unterminated accessor in `{0}`")]
    UnterminatedAccessor(String),
    #[error("empty accessor in `{0}`")]
    EmptyAccessor(String),
    #[error("unterminated quote in accessor of `{0}`")]
    UnterminatedQuote(String),
}

/// One parsed reference path: a base name plus zero or more accessors.
#[derive(Debug, Clone, PartialEq)]
struct Path {
    name: String,
    accessors: Vec<Accessor>,
}

#[derive(Debug, Clone, PartialEq)]
enum Accessor {
    /// `[3]` or `[-1]`
    Index(i64),
    /// `["key"]`, `['key']`, or a bare word `[key]`
    Key(String),
    /// `[{i}]` - the accessor is itself a reference, resolved first
    Reference(String),
}

/// Resolve references inside `value` if it is a string; any other value
/// passes through unchanged.
pub fn resolve_value(value: &Value, vars: &Variables) -> Result<Value, ResolveError> {
    match value {
        Value::String(s) => resolve_str(s, vars),
        other => Ok(other.clone()),
    }
}

/// Resolve references inside `input`.
///
/// If the entire input is a single bare reference the raw referenced value
/// is returned (deep-copied; `Null` when the reference does not resolve).
/// Otherwise each resolvable reference is interpolated into the surrounding
/// text, compound values rendered as JSON, and the result is a string.
/// References that do not resolve are left in place as literal text.
pub fn resolve_str(input: &str, vars: &Variables) -> Result<Value, ResolveError> {
    if let Some(path_text) = whole_reference(input) {
        if let Some(path) = parse_path(path_text)? {
            return Ok(eval_path(&path, vars, MAX_RESOLVE_DEPTH)?.unwrap_or(Value::Null));
        }
    }

    let mut text = input.to_string();
    for _ in 0..MAX_RESOLVE_DEPTH {
        let (next, changed) = interpolate_once(&text, vars)?;
        text = next;
        if !changed || !contains_reference(&text) {
            break;
        }
    }
    Ok(Value::String(text))
}

/// True when `text` still contains something shaped like a reference.
pub fn contains_reference(text: &str) -> bool {
    next_reference(text, 0).is_some()
}

/// If `input` consists of exactly one reference, return its path text.
fn whole_reference(input: &str) -> Option<&str> {
    let (start, path_start, end) = next_reference(input, 0)?;
    if start == 0 && end == input.len() {
        Some(&input[path_start..end - 1])
    } else {
        None
    }
}

/// Find the next reference at or after byte offset `from`.
///
/// Returns `(start, path_start, end)` byte offsets where `start..end` spans
/// the whole reference including braces. Braces inside quoted accessor text
/// do not count toward nesting.
fn next_reference(text: &str, from: usize) -> Option<(usize, usize, usize)> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        let (start, path_start) = if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            (i, i + 2)
        } else if bytes[i] == b'{' && (i == 0 || bytes[i - 1] != b'$') {
            (i, i + 1)
        } else {
            i += 1;
            continue;
        };

        if let Some(end) = scan_balanced(text, path_start) {
            return Some((start, path_start, end));
        }
        // Unclosed brace: not a reference, keep scanning after it.
        i = path_start;
    }
    None
}

/// Scan from just inside an opening brace to its matching `}`.
/// Returns the byte offset one past the closing brace.
fn scan_balanced(text: &str, path_start: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (off, ch) in text[path_start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(path_start + off + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// One substitution pass: every resolvable reference is replaced.
/// Returns the new text and whether anything changed.
fn interpolate_once(text: &str, vars: &Variables) -> Result<(String, bool), ResolveError> {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    let mut changed = false;

    while let Some((start, path_start, end)) = next_reference(text, cursor) {
        out.push_str(&text[cursor..start]);
        let path_text = &text[path_start..end - 1];

        let replacement = match parse_path(path_text)? {
            Some(path) => eval_path(&path, vars, MAX_RESOLVE_DEPTH)?,
            None => None,
        };

        match replacement {
            Some(Value::Null) | None => {
                // Unresolved: keep the literal reference text.
                out.push_str(&text[start..end]);
            }
            Some(value) => {
                out.push_str(&render(&value));
                changed = true;
            }
        }
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    Ok((out, changed))
}

/// Render a value for interpolation into surrounding text.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
        other => other.to_string(),
    }
}

/// Parse a reference path: `Name ("[" Accessor "]")*`.
///
/// Returns `Ok(None)` when the text is not name-shaped at all (the caller
/// leaves the literal text in place). Trailing text after the accessors is
/// ignored, mirroring the permissive matching of the original resolver.
fn parse_path(text: &str) -> Result<Option<Path>, ResolveError> {
    let text = text.trim();
    let mut chars = text.char_indices().peekable();

    let mut name_end = 0usize;
    match chars.peek() {
        Some(&(_, ch)) if ch == '_' || ch.is_alphabetic() => {}
        _ => return Ok(None),
    }
    while let Some(&(off, ch)) = chars.peek() {
        if ch == '_' || ch.is_alphanumeric() {
            name_end = off + ch.len_utf8();
            chars.next();
        } else {
            break;
        }
    }
    let name = text[..name_end].to_string();

    let mut accessors = Vec::new();
    let mut rest = &text[name_end..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let (accessor, consumed) = parse_accessor(stripped, text)?;
        accessors.push(accessor);
        rest = &stripped[consumed..];
    }
    // Anything after the last accessor is ignored.

    Ok(Some(Path { name, accessors }))
}

/// Parse one accessor starting just after `[`. Returns the accessor and the
/// number of bytes consumed including the closing `]`.
fn parse_accessor(body: &str, whole: &str) -> Result<(Accessor, usize), ResolveError> {
    let trimmed = body.trim_start();
    let lead = body.len() - trimmed.len();

    // Quoted key: ["key"] or ['key']
    if let Some(q) = trimmed.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let inner = &trimmed[q.len_utf8()..];
        let close = inner
            .find(q)
            .ok_or_else(|| ResolveError::UnterminatedQuote(whole.to_string()))?;
        let key = inner[..close].to_string();
        let after = &inner[close + q.len_utf8()..];
        let after_trim = after.trim_start();
        let Some(rest) = after_trim.strip_prefix(']') else {
            return Err(ResolveError::UnterminatedAccessor(whole.to_string()));
        };
        let consumed = body.len() - rest.len();
        return Ok((Accessor::Key(key), consumed));
    }

    // Nested reference accessor: [{i}] or [${i}]
    if trimmed.starts_with('{') || trimmed.starts_with("${") {
        let path_start = if trimmed.starts_with("${") { 2 } else { 1 };
        let end = scan_balanced(trimmed, path_start)
            .ok_or_else(|| ResolveError::UnterminatedAccessor(whole.to_string()))?;
        let inner = trimmed[path_start..end - 1].to_string();
        let after_trim = trimmed[end..].trim_start();
        let Some(rest) = after_trim.strip_prefix(']') else {
            return Err(ResolveError::UnterminatedAccessor(whole.to_string()));
        };
        let consumed = body.len() - rest.len();
        return Ok((Accessor::Reference(inner), consumed));
    }

    // Bare accessor up to the closing bracket.
    let close = trimmed
        .find(']')
        .ok_or_else(|| ResolveError::UnterminatedAccessor(whole.to_string()))?;
    let raw = trimmed[..close].trim();
    if raw.is_empty() {
        return Err(ResolveError::EmptyAccessor(whole.to_string()));
    }
    let consumed = lead + close + 1;
    let accessor = match raw.parse::<i64>() {
        Ok(n) => Accessor::Index(n),
        Err(_) => Accessor::Key(raw.to_string()),
    };
    Ok((accessor, consumed))
}

/// Evaluate a parsed path against the variable map.
///
/// Returns `None` when the base variable is missing or any accessor falls
/// off the data (out-of-range index, unknown key, wrong container type).
/// The result is deep-copied so later writes to the variable cannot alias
/// into already-computed expressions.
fn eval_path(path: &Path, vars: &Variables, depth: usize) -> Result<Option<Value>, ResolveError> {
    let Some(mut current) = vars.get(&path.name).cloned() else {
        return Ok(None);
    };

    for accessor in &path.accessors {
        let step = match accessor {
            Accessor::Index(n) => match &current {
                Value::Array(_) => index_into(&current, *n),
                Value::Object(_) => key_into(&current, &n.to_string()),
                _ => None,
            },
            Accessor::Key(k) => key_into(&current, k),
            Accessor::Reference(inner) => {
                if depth == 0 {
                    return Ok(None);
                }
                let Some(inner_path) = parse_path(inner)? else {
                    return Ok(None);
                };
                match eval_path(&inner_path, vars, depth - 1)? {
                    Some(Value::Number(n)) if n.is_i64() => index_into(&current, n.as_i64().unwrap_or(0))
                        .or_else(|| key_into(&current, &n.to_string())),
                    Some(Value::String(s)) => match s.parse::<i64>() {
                        Ok(n) if current.is_array() => index_into(&current, n),
                        _ => key_into(&current, &s),
                    },
                    _ => None,
                }
            }
        };
        match step {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

fn index_into(value: &Value, index: i64) -> Option<Value> {
    let list = value.as_array()?;
    let len = list.len() as i64;
    let effective = if index < 0 { len + index } else { index };
    if (0..len).contains(&effective) {
        Some(list[effective as usize].clone())
    } else {
        None
    }
}

/// Mapping access: the key is tried as given, then (for keys that parse as
/// integers) against the normalized integer spelling.
fn key_into(value: &Value, key: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .cloned()
            .or_else(|| key.parse::<i64>().ok().and_then(|n| map.get(&n.to_string()).cloned())),
        Value::Array(_) => key.parse::<i64>().ok().and_then(|n| index_into(value, n)),
        _ => None,
    }
}
