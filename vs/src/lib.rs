//! ValueStore - typed values, variable references, and data rows
//!
//! The value model is `serde_json::Value`: a tagged union of
//! Null | Bool | Number | String | Array | Object. Workflows pass these
//! values between nodes through a per-run variable map, and accumulate
//! tabular results through a row/column table.
//!
//! Strings may embed variable references which the [`resolver`] expands:
//!
//! ```text
//! ${name}          canonical form
//! {name}           shorthand (must not be preceded by `$`)
//! {list[0]}        list index (negative indices count from the end)
//! {row["key"]}     mapping key
//! {data[0][field]} chained accessors
//! {list[{i}]}      accessor that is itself a reference
//! ```
//!
//! # Example
//!
//! ```
//! use valuestore::{Variables, resolve_str};
//!
//! let mut vars = Variables::new();
//! vars.set("k", serde_json::json!(7));
//! let v = resolve_str("k={k}", &vars).unwrap();
//! assert_eq!(v, serde_json::json!("k=7"));
//! ```

mod resolver;
mod store;

pub use resolver::{MAX_RESOLVE_DEPTH, ResolveError, contains_reference, resolve_str, resolve_value};
pub use store::{DataTable, LogBuffer, LogEntry, LogLevel, Variables};
