//! Data-row and log-export modules

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::context::ExecutionContext;
use crate::executor::config::{required_string, resolved_string};
use crate::executor::{ModuleConfig, ModuleExecutor, ModuleResult};

/// Append a value to the current data row (repeat columns auto-commit).
pub struct AddDataExecutor;

#[async_trait]
impl ModuleExecutor for AddDataExecutor {
    fn module_type(&self) -> &'static str {
        "add_data"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let column = match required_string(config, ctx, "column") {
            Ok(column) => column,
            Err(e) => return e.into(),
        };
        let value = match ctx.resolve(config.get("value").unwrap_or(&Value::Null)) {
            Ok(value) => value,
            Err(e) => return e.into(),
        };

        ctx.add_data_value(&column, value.clone());
        ModuleResult::ok(format!("added {column} to current row")).with_data(value)
    }
}

/// Commit the working row to the data table.
pub struct CommitRowExecutor;

#[async_trait]
impl ModuleExecutor for CommitRowExecutor {
    fn module_type(&self) -> &'static str {
        "commit_row"
    }

    async fn execute(&self, _config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        ctx.commit_row();
        ModuleResult::ok(format!("committed row ({} total)", ctx.data().rows().len()))
    }
}

/// Write the run's log buffer to a file as JSON or plain text.
pub struct ExportLogsExecutor;

#[async_trait]
impl ModuleExecutor for ExportLogsExecutor {
    fn module_type(&self) -> &'static str {
        "export_logs"
    }

    async fn execute(&self, config: &ModuleConfig, ctx: &mut ExecutionContext) -> ModuleResult {
        let path = match required_string(config, ctx, "filePath") {
            Ok(path) => path,
            Err(e) => return e.into(),
        };
        let format = match resolved_string(config, ctx, "format", "json") {
            Ok(format) => format,
            Err(e) => return e.into(),
        };

        let entries = ctx.logs();
        let content = match format.as_str() {
            "text" => {
                let mut lines = Vec::with_capacity(entries.len());
                for entry in entries {
                    let mut line = format!(
                        "{} [{}] {}",
                        entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                        entry.level,
                        entry.message
                    );
                    if let Some(node_id) = &entry.node_id {
                        line.push_str(&format!(" (node {node_id})"));
                    }
                    if let Some(duration) = entry.duration_ms {
                        line.push_str(&format!(" [{duration}ms]"));
                    }
                    lines.push(line);
                }
                lines.join("\n") + "\n"
            }
            _ => match serde_json::to_string_pretty(entries) {
                Ok(json) => json,
                Err(e) => return ModuleResult::fail(format!("failed to serialize logs: {e}")),
            },
        };

        let count = entries.len();
        if let Err(e) = tokio::fs::write(&path, content).await {
            return ModuleResult::fail(format!("failed to write {path}: {e}"));
        }
        ModuleResult::ok(format!("exported {count} log entries to {path}")).with_data(json!({ "count": count }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunServices;
    use serde_json::Map;
    use tempfile::TempDir;
    use valuestore::LogLevel;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("test", RunServices::new())
    }

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_add_data_resolves_value() {
        let mut ctx = ctx();
        ctx.set_variable("price", json!(19.5));
        let result = AddDataExecutor
            .execute(&config(json!({"column": "price", "value": "{price}"})), &mut ctx)
            .await;
        assert!(result.success);
        assert_eq!(ctx.data().current_row().get("price"), Some(&json!(19.5)));
    }

    #[tokio::test]
    async fn test_repeat_column_starts_new_row() {
        let mut ctx = ctx();
        for value in ["a", "b"] {
            AddDataExecutor
                .execute(&config(json!({"column": "x", "value": value})), &mut ctx)
                .await;
        }
        CommitRowExecutor.execute(&config(json!({})), &mut ctx).await;
        assert_eq!(ctx.data().rows().len(), 2);
    }

    #[tokio::test]
    async fn test_export_logs_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs.json");
        let mut ctx = ctx();
        ctx.add_log(LogLevel::Info, "first step", Some("n1".into()), Some(3));

        let result = ExportLogsExecutor
            .execute(
                &config(json!({"filePath": path.to_str().unwrap()})),
                &mut ctx,
            )
            .await;
        assert!(result.success);

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("first step"));
        let parsed: Vec<Value> = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[tokio::test]
    async fn test_export_logs_text() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs.txt");
        let mut ctx = ctx();
        ctx.add_log(LogLevel::Warning, "watch out", None, None);

        ExportLogsExecutor
            .execute(
                &config(json!({"filePath": path.to_str().unwrap(), "format": "text"})),
                &mut ctx,
            )
            .await;
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("[warning] watch out"));
    }

    #[tokio::test]
    async fn test_export_logs_requires_path() {
        let mut ctx = ctx();
        let result = ExportLogsExecutor.execute(&config(json!({})), &mut ctx).await;
        assert!(!result.success);
    }
}
