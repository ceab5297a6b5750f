//! CLI command implementations
//!
//! Both commands load the same inputs (schema, query, rules, accountability,
//! configuration) into one request context. `explain` stops after
//! compiling the root level; `run` executes the whole tree against an
//! in-memory row store seeded from a data file.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::ast::AstBuilder;
use crate::compiler::{ExplainPlan, QueryCompiler};
use crate::config::EngineConfig;
use crate::context::RequestContext;
use crate::error::EngineResult;
use crate::executor::RelationalExecutor;
use crate::permissions::{Accountability, PermissionRule};
use crate::query::QuerySpec;
use crate::schema::SchemaLoader;
use crate::store::{MemoryRowStore, Row};

use super::args::{Command, RequestArgs};
use super::errors::{CliError, CliResult};
use super::io::{read_file, read_request, write_response};

/// Dispatch a parsed command
pub fn run_command(command: Command) -> CliResult<()> {
    match command {
        Command::Explain { request } => write_response(explain(&request)?),
        Command::Run { request, data } => write_response(execute(&request, &data)?),
    }
}

/// Loads every input named by `args` into a request context
pub fn prepare(args: &RequestArgs) -> CliResult<(RequestContext, QuerySpec)> {
    let schema = SchemaLoader::load_file(&args.schema)?;
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };

    let rules: Option<Vec<PermissionRule>> = args
        .rules
        .as_deref()
        .map(read_file)
        .transpose()?;
    let accountability = match (&args.accountability, &rules) {
        (Some(path), _) => read_file::<Accountability>(path)?,
        (None, Some(_)) => Accountability::public(),
        (None, None) => Accountability::admin(),
    };

    let query_value = match &args.query {
        Some(path) => read_file::<Value>(path)?,
        None => read_request()?,
    };
    let query = QuerySpec::from_value(&query_value)?;

    let ctx = RequestContext::new(
        accountability,
        Arc::new(schema),
        rules.unwrap_or_default(),
        config,
    );
    Ok((ctx, query))
}

/// Compiles the root level; a rejected query is reported in the plan
pub fn explain(args: &RequestArgs) -> CliResult<Value> {
    let (ctx, query) = prepare(args)?;
    let plan = explain_plan(&ctx, &args.collection, &query)
        .unwrap_or_else(|err| ExplainPlan::from_error(&err));

    Ok(json!({
        "accepted": plan.accepted,
        "sql": plan.sql,
        "bindings": plan.bindings,
        "joins": plan.joins,
        "branches": plan.branches,
        "rejection_code": plan.rejection_code,
        "plan": plan.to_string(),
    }))
}

fn explain_plan(ctx: &RequestContext, collection: &str, query: &QuerySpec) -> EngineResult<ExplainPlan> {
    let ast = AstBuilder::new(ctx).build(collection, query)?;
    let level = QueryCompiler::new(ctx).compile_root(&ast)?;
    let branches = ast
        .children
        .iter()
        .filter(|child| child.is_relational())
        .map(|child| child.field_key().to_string())
        .collect();
    Ok(ExplainPlan::from_level(&level).with_branches(branches))
}

/// Runs the query against the rows in `data`
pub fn execute(args: &RequestArgs, data: &Path) -> CliResult<Value> {
    let (ctx, query) = prepare(args)?;
    let store = load_store(data)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(RelationalExecutor::new(&ctx, &store).query(&args.collection, &query))?;

    Ok(json!({
        "result": result,
        "round_trips": store.round_trips(),
    }))
}

fn load_store(data: &Path) -> CliResult<MemoryRowStore> {
    let tables: Map<String, Value> = read_file(data)?;
    let mut store = MemoryRowStore::new();

    for (collection, rows) in tables {
        let Value::Array(items) = rows else {
            return Err(CliError::input_error(format!(
                "rows of \"{}\" must be an array",
                collection
            )));
        };
        let rows = items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                _ => Err(CliError::input_error(format!(
                    "every row of \"{}\" must be an object",
                    collection
                ))),
            })
            .collect::<CliResult<Vec<Row>>>()?;
        store = store.with_rows(collection, rows);
    }

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SCHEMA: &str = r#"{
        "collections": {
            "articles": {
                "primary": "id",
                "fields": {
                    "id": {"type": "integer"},
                    "title": {"type": "string"},
                    "author": {"type": "integer"}
                }
            },
            "authors": {
                "primary": "id",
                "fields": {"id": {"type": "integer"}, "name": {"type": "string"}}
            }
        },
        "relations": [
            {"collection": "articles", "field": "author", "related_collection": "authors", "meta": null}
        ]
    }"#;

    fn file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn args(schema: &NamedTempFile, query: &NamedTempFile) -> RequestArgs {
        RequestArgs {
            schema: schema.path().to_path_buf(),
            collection: "articles".into(),
            query: Some(query.path().to_path_buf()),
            rules: None,
            accountability: None,
            config: None,
        }
    }

    #[test]
    fn test_execute_against_data_file() {
        let schema = file(SCHEMA);
        let query = file(r#"{"fields": ["title", "author.name"]}"#);
        let data = file(
            r#"{
                "articles": [{"id": 1, "title": "Rust", "author": 7}],
                "authors": [{"id": 7, "name": "Ann"}]
            }"#,
        );

        let out = execute(&args(&schema, &query), data.path()).unwrap();
        assert_eq!(
            out,
            json!({
                "result": [{"title": "Rust", "author": {"name": "Ann"}}],
                "round_trips": 2
            })
        );
    }

    #[test]
    fn test_rules_without_accountability_are_public() {
        let schema = file(SCHEMA);
        let query = file(r#"{"fields": ["title"]}"#);
        let rules = file(r#"[{"collection": "authors", "action": "read", "fields": ["*"]}]"#);
        let data = file(r#"{"articles": [{"id": 1, "title": "Rust"}]}"#);

        let mut request = args(&schema, &query);
        request.rules = Some(rules.path().to_path_buf());

        let out = execute(&request, data.path()).unwrap();
        assert_eq!(out["result"], json!([]));
    }

    #[test]
    fn test_explain_reports_rejection() {
        let schema = file(SCHEMA);
        let query = file(r#"{"fields": ["missing"]}"#);

        let out = explain(&args(&schema, &query)).unwrap();
        assert_eq!(out["accepted"], json!(false));
        assert_eq!(out["rejection_code"], json!("QUERY_SCHEMA_MISMATCH"));
    }

    #[test]
    fn test_explain_lists_branches() {
        let schema = file(SCHEMA);
        let query = file(r#"{"fields": ["title", "author.name"]}"#);

        let out = explain(&args(&schema, &query)).unwrap();
        assert_eq!(out["accepted"], json!(true));
        assert_eq!(out["branches"], json!(["author"]));
        assert!(out["sql"].as_str().unwrap().contains("\"articles\""));
    }

    #[test]
    fn test_data_rows_must_be_objects() {
        let schema = file(SCHEMA);
        let query = file(r#"{"fields": ["title"]}"#);
        let data = file(r#"{"articles": [1, 2]}"#);
        let err = execute(&args(&schema, &query), data.path()).unwrap_err();
        assert_eq!(err.code_str(), "NESTQUERY_CLI_INPUT_ERROR");
    }
}
