//! Basic modules - variables, logging, time, waiting

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};
use valuestore::LogLevel;

use crate::context::ExecutionContext;
use crate::executor::config::{required_string, resolved_f64, resolved_i64, resolved_string};
use crate::executor::{ModuleConfig, ModuleExecutor, ModuleResult};

/// Entry marker. The scheduler starts traversal at its successor; running
/// it directly is a no-op.
pub struct StartExecutor;

#[async_trait]
impl ModuleExecutor for StartExecutor {
    fn module_type(&self) -> &'static str {
        "start"
    }

    async fn execute(&self, _config: &ModuleConfig, _ctx: &mut ExecutionContext) -> ModuleResult {
        ModuleResult::ok("start")
    }
}

/// Annotation node, skipped with success.
pub struct GroupExecutor;

#[async_trait]
impl ModuleExecutor for GroupExecutor {
    fn module_type(&self) -> &'static str {
        "group"
    }

    async fn execute(&self, _config: &ModuleConfig, _ctx: &mut ExecutionContext) -> ModuleResult {
        ModuleResult::ok("group annotation (skipped)")
    }
}

/// Set a variable, evaluating simple arithmetic in the value.
pub struct SetVariableExecutor;

#[async_trait]
impl ModuleExecutor for SetVariableExecutor {
    fn module_type(&self) -> &'static str {
        "set_variable"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let name = match required_string(config, ctx, "variableName") {
            Ok(name) => name,
            Err(e) => return e.into(),
        };
        let raw = config.get("variableValue").cloned().unwrap_or(Value::Null);
        let resolved = match ctx.resolve(&raw) {
            Ok(value) => value,
            Err(e) => return e.into(),
        };

        // A whole-string reference keeps its raw type; textual values get a
        // chance at arithmetic before landing as plain strings.
        let value = match resolved {
            Value::String(s) => evaluate_expression(&s),
            other => other,
        };

        ctx.set_variable(&name, value.clone());
        ModuleResult::ok(format!("set {name} = {value}")).with_data(value)
    }
}

/// Evaluate `+ - * /` with parentheses; preserves integers where possible.
/// Non-arithmetic input falls through as number-or-string.
fn evaluate_expression(input: &str) -> Value {
    let trimmed = input.trim();
    let arithmetic = !trimmed.is_empty()
        && trimmed.chars().all(|c| c.is_ascii_digit() || " .+-*/()".contains(c))
        && trimmed.chars().any(|c| "+-*/(".contains(c));
    if arithmetic {
        if let Some(result) = ArithParser::new(trimmed).parse() {
            if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
                return json!(result as i64);
            }
            return json!(result);
        }
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return json!(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        return json!(float);
    }
    json!(input)
}

/// Recursive-descent arithmetic over f64.
struct ArithParser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> ArithParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn parse(mut self) -> Option<f64> {
        let value = self.expr()?;
        self.skip_ws();
        if self.chars.peek().is_some() {
            return None;
        }
        value.is_finite().then_some(value)
    }

    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn expr(&mut self) -> Option<f64> {
        let mut value = self.term()?;
        loop {
            self.skip_ws();
            match self.chars.peek() {
                Some('+') => {
                    self.chars.next();
                    value += self.term()?;
                }
                Some('-') => {
                    self.chars.next();
                    value -= self.term()?;
                }
                _ => return Some(value),
            }
        }
    }

    fn term(&mut self) -> Option<f64> {
        let mut value = self.factor()?;
        loop {
            self.skip_ws();
            match self.chars.peek() {
                Some('*') => {
                    self.chars.next();
                    value *= self.factor()?;
                }
                Some('/') => {
                    self.chars.next();
                    value /= self.factor()?;
                }
                _ => return Some(value),
            }
        }
    }

    fn factor(&mut self) -> Option<f64> {
        self.skip_ws();
        match self.chars.peek()? {
            '-' => {
                self.chars.next();
                Some(-self.factor()?)
            }
            '(' => {
                self.chars.next();
                let value = self.expr()?;
                self.skip_ws();
                if self.chars.next() != Some(')') {
                    return None;
                }
                Some(value)
            }
            _ => {
                let mut number = String::new();
                while self.chars.peek().is_some_and(|c| c.is_ascii_digit() || *c == '.') {
                    number.push(self.chars.next().unwrap());
                }
                number.parse().ok()
            }
        }
    }
}

/// Emit a log message with an operator-chosen level.
pub struct PrintLogExecutor;

#[async_trait]
impl ModuleExecutor for PrintLogExecutor {
    fn module_type(&self) -> &'static str {
        "print_log"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let message = match resolved_string(config, ctx, "logMessage", "(empty log)") {
            Ok(message) => message,
            Err(e) => return e.into(),
        };
        let level = match resolved_string(config, ctx, "logLevel", "info") {
            Ok(level) => LogLevel::parse(&level),
            Err(e) => return e.into(),
        };

        ModuleResult::ok(message.clone())
            .with_data(json!({ "level": level, "message": message }))
            .with_log_level(level)
    }
}

/// Generate a random integer or float into a variable.
pub struct RandomNumberExecutor;

#[async_trait]
impl ModuleExecutor for RandomNumberExecutor {
    fn module_type(&self) -> &'static str {
        "random_number"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let name = match required_string(config, ctx, "variableName") {
            Ok(name) => name,
            Err(e) => return e.into(),
        };
        let random_type = match resolved_string(config, ctx, "randomType", "integer") {
            Ok(t) => t,
            Err(e) => return e.into(),
        };
        let (min, max) = match (
            resolved_f64(config, ctx, "minValue", 0.0),
            resolved_f64(config, ctx, "maxValue", 100.0),
        ) {
            (Ok(min), Ok(max)) => if min <= max { (min, max) } else { (max, min) },
            (Err(e), _) | (_, Err(e)) => return e.into(),
        };

        let value = if random_type == "integer" {
            json!(rand::rng().random_range(min as i64..=max as i64))
        } else {
            let places = match resolved_i64(config, ctx, "decimalPlaces", 2) {
                Ok(places) => places.clamp(0, 12) as u32,
                Err(e) => return e.into(),
            };
            let raw: f64 = rand::rng().random_range(min..=max);
            let scale = 10f64.powi(places as i32);
            json!((raw * scale).round() / scale)
        };

        ctx.set_variable(&name, value.clone());
        ModuleResult::ok(format!("generated random number: {value}")).with_data(json!({ "value": value }))
    }
}

/// Capture the current time into a variable in a chosen format.
pub struct GetTimeExecutor;

#[async_trait]
impl ModuleExecutor for GetTimeExecutor {
    fn module_type(&self) -> &'static str {
        "get_time"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let name = match required_string(config, ctx, "variableName") {
            Ok(name) => name,
            Err(e) => return e.into(),
        };
        let format = match resolved_string(config, ctx, "timeFormat", "datetime") {
            Ok(format) => format,
            Err(e) => return e.into(),
        };

        let now = chrono::Local::now();
        let value = match format.as_str() {
            "date" => json!(now.format("%Y-%m-%d").to_string()),
            "time" => json!(now.format("%H:%M:%S").to_string()),
            "timestamp" => json!(now.timestamp_millis()),
            "custom" => {
                let custom = match resolved_string(config, ctx, "customFormat", "%Y-%m-%d %H:%M:%S") {
                    Ok(custom) => custom,
                    Err(e) => return e.into(),
                };
                json!(now.format(&custom).to_string())
            }
            _ => json!(now.format("%Y-%m-%d %H:%M:%S").to_string()),
        };

        ctx.set_variable(&name, value.clone());
        ModuleResult::ok(format!("captured time: {value}")).with_data(json!({ "value": value }))
    }
}

/// Timed wait. Sleeps in short slices so cancellation is observed promptly.
pub struct WaitExecutor;

#[async_trait]
impl ModuleExecutor for WaitExecutor {
    fn module_type(&self) -> &'static str {
        "wait"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let duration_ms = match resolved_i64(config, ctx, "duration", 1000) {
            Ok(ms) => ms.max(0) as u64,
            Err(e) => return e.into(),
        };

        let mut remaining = Duration::from_millis(duration_ms);
        while !remaining.is_zero() {
            if ctx.check_cancelled().is_err() {
                return ModuleResult::fail("cancelled");
            }
            let slice = remaining.min(Duration::from_millis(100));
            tokio::time::sleep(slice).await;
            remaining -= slice;
        }
        if ctx.check_cancelled().is_err() {
            return ModuleResult::fail("cancelled");
        }
        ModuleResult::ok(format!("waited {duration_ms}ms"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunServices;
    use serde_json::Map;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("test", RunServices::new())
    }

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_set_variable_stores_resolved_value() {
        let mut ctx = ctx();
        let result = SetVariableExecutor
            .execute(&config(json!({"variableName": "k", "variableValue": "7"})), &mut ctx)
            .await;
        assert!(result.success);
        assert_eq!(ctx.get_variable("k"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn test_set_variable_arithmetic() {
        let mut ctx = ctx();
        ctx.set_variable("n", json!(4));
        let result = SetVariableExecutor
            .execute(
                &config(json!({"variableName": "out", "variableValue": "({n} + 2) * 3"})),
                &mut ctx,
            )
            .await;
        assert!(result.success);
        assert_eq!(ctx.get_variable("out"), Some(&json!(18)));
    }

    #[tokio::test]
    async fn test_set_variable_keeps_raw_reference_type() {
        let mut ctx = ctx();
        ctx.set_variable("items", json!([1, 2]));
        SetVariableExecutor
            .execute(
                &config(json!({"variableName": "copy", "variableValue": "{items}"})),
                &mut ctx,
            )
            .await;
        assert_eq!(ctx.get_variable("copy"), Some(&json!([1, 2])));
    }

    #[tokio::test]
    async fn test_set_variable_requires_name() {
        let mut ctx = ctx();
        let result = SetVariableExecutor
            .execute(&config(json!({"variableValue": "x"})), &mut ctx)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("variableName"));
    }

    #[test]
    fn test_expression_evaluation() {
        assert_eq!(evaluate_expression("1 + 2 * 3"), json!(7));
        assert_eq!(evaluate_expression("(1 + 2) * 3"), json!(9));
        assert_eq!(evaluate_expression("10 / 4"), json!(2.5));
        assert_eq!(evaluate_expression("-5 + 2"), json!(-3));
        assert_eq!(evaluate_expression("3.5"), json!(3.5));
        assert_eq!(evaluate_expression("42"), json!(42));
        assert_eq!(evaluate_expression("not math"), json!("not math"));
        // Malformed arithmetic falls back to the literal string.
        assert_eq!(evaluate_expression("1 + "), json!("1 + "));
        assert_eq!(evaluate_expression("1 / 0"), json!("1 / 0"));
    }

    #[tokio::test]
    async fn test_print_log_level_override() {
        let mut ctx = ctx();
        ctx.set_variable("k", json!(7));
        let result = PrintLogExecutor
            .execute(
                &config(json!({"logMessage": "k={k}", "logLevel": "warning"})),
                &mut ctx,
            )
            .await;
        assert!(result.success);
        assert_eq!(result.message, "k=7");
        assert_eq!(result.log_level, Some(LogLevel::Warning));
    }

    #[tokio::test]
    async fn test_print_log_empty_default() {
        let mut ctx = ctx();
        let result = PrintLogExecutor.execute(&config(json!({})), &mut ctx).await;
        assert_eq!(result.message, "(empty log)");
    }

    #[tokio::test]
    async fn test_random_number_integer_range() {
        let mut ctx = ctx();
        let result = RandomNumberExecutor
            .execute(
                &config(json!({"variableName": "r", "minValue": 10, "maxValue": 5})),
                &mut ctx,
            )
            .await;
        assert!(result.success);
        // Inverted bounds are swapped.
        let value = ctx.get_variable("r").unwrap().as_i64().unwrap();
        assert!((5..=10).contains(&value));
    }

    #[tokio::test]
    async fn test_random_number_float_rounding() {
        let mut ctx = ctx();
        RandomNumberExecutor
            .execute(
                &config(json!({
                    "variableName": "r", "randomType": "float",
                    "minValue": 0, "maxValue": 1, "decimalPlaces": 2
                })),
                &mut ctx,
            )
            .await;
        let value = ctx.get_variable("r").unwrap().as_f64().unwrap();
        assert!((0.0..=1.0).contains(&value));
        assert!((value * 100.0).fract().abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_get_time_formats() {
        let mut ctx = ctx();
        GetTimeExecutor
            .execute(
                &config(json!({"variableName": "t", "timeFormat": "date"})),
                &mut ctx,
            )
            .await;
        let date = ctx.get_variable("t").unwrap().as_str().unwrap().to_string();
        assert_eq!(date.len(), 10);

        GetTimeExecutor
            .execute(
                &config(json!({"variableName": "ts", "timeFormat": "timestamp"})),
                &mut ctx,
            )
            .await;
        assert!(ctx.get_variable("ts").unwrap().as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_wait_sleeps_roughly_requested() {
        let mut ctx = ctx();
        let started = std::time::Instant::now();
        let result = WaitExecutor
            .execute(&config(json!({"duration": 50})), &mut ctx)
            .await;
        assert!(result.success);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_wait_observes_cancellation() {
        let mut ctx = ctx();
        ctx.cancel_flag().signal();
        let started = std::time::Instant::now();
        let result = WaitExecutor
            .execute(&config(json!({"duration": 5000})), &mut ctx)
            .await;
        assert!(!result.success);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
