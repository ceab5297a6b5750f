//! Relational executor
//!
//! Runs a request tree against a row store, level by level:
//!
//! 1. Compile and fetch the root level (paginated)
//! 2. Stop early when the root is empty
//! 3. For every relational child, collect the distinct parent keys, fetch
//!    the child level in key chunks (unpaginated), and recurse
//! 4. Attach child values to their parents once all siblings are done
//! 5. Shape the tree into the requested output
//!
//! Sibling branches are issued concurrently. The first failure anywhere in
//! the tree fails the whole request; nothing partial is returned.

use futures_util::future::{try_join_all, BoxFuture};
use serde_json::Value;
use tracing::{debug, warn};

use crate::ast::{Ast, AstBuilder, ChildNode};
use crate::compiler::{key_alias, CompiledLevel, LevelRequest, QueryCompiler, JUNCTION_PARENT_KEY};
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::merge::{
    assign_a2o, assign_to_many, assign_to_one, distinct_keys, shape_level, A2OBatch,
    SyntheticFields, Window,
};
use crate::observability::Event;
use crate::query::{Filter, QuerySpec};
use crate::schema::JunctionDescriptor;
use crate::store::{Row, RowStore, Statement};

use super::state::{BranchState, BranchTracker};
use super::transform::{coerce_rows, nest_outputs};

/// One nested level to fetch for a set of parent keys
struct LevelFetch<'l> {
    collection: &'l str,
    query: &'l QuerySpec,
    cases: &'l [Filter],
    children: &'l [ChildNode],
    /// Helper column tying fetched rows back to their parent
    link: Option<&'l str>,
    /// Column constrained to the parent keys
    key_field: &'l str,
    junction: Option<&'l JunctionDescriptor>,
}

/// Executes request trees for one request context
pub struct RelationalExecutor<'a, S: RowStore + ?Sized> {
    ctx: &'a RequestContext,
    store: &'a S,
    synthetic: SyntheticFields,
}

impl<'a, S: RowStore + ?Sized> RelationalExecutor<'a, S> {
    pub fn new(ctx: &'a RequestContext, store: &'a S) -> Self {
        Self {
            ctx,
            store,
            synthetic: SyntheticFields::default(),
        }
    }

    pub fn with_synthetic(mut self, synthetic: SyntheticFields) -> Self {
        self.synthetic = synthetic;
        self
    }

    /// Builds the request tree for `query` and runs it
    pub async fn query(&self, collection: &str, query: &QuerySpec) -> EngineResult<Value> {
        let ast = AstBuilder::new(self.ctx).build(collection, query)?;
        self.run(&ast).await
    }

    /// Runs one request tree.
    ///
    /// Collections come back as arrays, singletons as an object or `null`.
    pub async fn run(&self, ast: &Ast) -> EngineResult<Value> {
        debug!(
            event = Event::RequestBegin.as_str(),
            request_id = %self.ctx.request_id,
            collection = %ast.name,
        );

        match self.run_root(ast).await {
            Ok(value) => {
                debug!(
                    event = Event::RequestComplete.as_str(),
                    request_id = %self.ctx.request_id,
                    collection = %ast.name,
                    elapsed_ms = self.ctx.elapsed_ms(),
                );
                Ok(value)
            }
            Err(err) => {
                warn!(
                    event = Event::RequestFailed.as_str(),
                    request_id = %self.ctx.request_id,
                    collection = %ast.name,
                    code = err.code().code(),
                    error = %err,
                );
                Err(err)
            }
        }
    }

    /// Runs several trees concurrently; the result is keyed by root collection
    pub async fn run_many(&self, asts: &[Ast]) -> EngineResult<Value> {
        let results = try_join_all(asts.iter().map(|ast| self.run(ast))).await?;
        Ok(Value::Object(
            asts.iter().map(|ast| ast.name.clone()).zip(results).collect(),
        ))
    }

    async fn run_root(&self, ast: &Ast) -> EngineResult<Value> {
        let schema = self.ctx.schema();
        ast.validate(schema)?;
        let singleton = schema.collection(&ast.name)?.singleton;

        let compiled = QueryCompiler::new(self.ctx).compile_root(ast)?;

        let mut rows = self.fetch(&compiled).await?;
        if rows.is_empty() {
            debug!(
                event = Event::RootEmpty.as_str(),
                request_id = %self.ctx.request_id,
                collection = %ast.name,
            );
            return Ok(if singleton {
                Value::Null
            } else {
                Value::Array(Vec::new())
            });
        }

        coerce_rows(schema, &ast.name, &compiled.selections, &mut rows);
        self.expand_children(&ast.name, &ast.children, &mut rows)
            .await?;

        let shaped = shape_level(
            &ast.name,
            &ast.query,
            &ast.children,
            rows,
            None,
            &self.synthetic,
        );
        Ok(if singleton {
            shaped.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Array(shaped)
        })
    }

    async fn fetch(&self, level: &CompiledLevel) -> EngineResult<Vec<Row>> {
        let statement = Statement::new(level.clauses.clone());
        let rows = self.store.fetch(&statement).await?;
        Ok(rows
            .into_iter()
            .map(|row| nest_outputs(row, &level.aliases))
            .collect())
    }

    /// Resolves every relational child of `rows` and attaches the results
    fn expand_children<'f>(
        &'f self,
        collection: &'f str,
        children: &'f [ChildNode],
        rows: &'f mut Vec<Row>,
    ) -> BoxFuture<'f, EngineResult<()>> {
        Box::pin(async move {
            let relational: Vec<&ChildNode> =
                children.iter().filter(|c| c.is_relational()).collect();
            if relational.is_empty() || rows.is_empty() {
                return Ok(());
            }

            // Every branch reads the parents as fetched; values land afterwards
            let parents: &[Row] = rows.as_slice();
            let values = try_join_all(
                relational
                    .iter()
                    .map(|child| self.run_branch(collection, child, parents)),
            )
            .await?;

            for (child, branch_values) in relational.iter().zip(values) {
                for (row, value) in rows.iter_mut().zip(branch_values) {
                    row.insert(child.field_key().to_string(), value);
                }
            }
            Ok(())
        })
    }

    fn run_branch<'f>(
        &'f self,
        collection: &'f str,
        child: &'f ChildNode,
        parents: &'f [Row],
    ) -> BoxFuture<'f, EngineResult<Vec<Value>>> {
        Box::pin(async move {
            let mut tracker =
                BranchTracker::new(self.ctx.request_id, collection, child.field_key());
            match self.branch_values(&mut tracker, child, parents).await {
                Ok(values) => {
                    tracker.advance(BranchState::complete)?;
                    debug!(
                        event = Event::BranchMerged.as_str(),
                        request_id = %self.ctx.request_id,
                        collection,
                        field = child.field_key(),
                        parents = parents.len(),
                    );
                    Ok(values)
                }
                Err(err) => {
                    tracker.fail(&err);
                    Err(err)
                }
            }
        })
    }

    async fn branch_values(
        &self,
        tracker: &mut BranchTracker,
        child: &ChildNode,
        parents: &[Row],
    ) -> EngineResult<Vec<Value>> {
        match child {
            ChildNode::Field(_) => Ok(vec![Value::Null; parents.len()]),
            ChildNode::M2O(node) => {
                let parent_key = key_alias(&node.parent_key);
                let keys = distinct_keys(parents, &parent_key);
                let level = LevelFetch {
                    collection: &node.name,
                    query: &node.query,
                    cases: &node.cases,
                    children: &node.children,
                    link: None,
                    key_field: &node.related_key,
                    junction: None,
                };
                let rows = self.fetch_level(tracker, level, keys).await?;
                tracker.advance(BranchState::begin_merge)?;
                Ok(assign_to_one(
                    parents,
                    &parent_key,
                    &rows,
                    &key_alias(&node.related_key),
                ))
            }
            ChildNode::O2M(node) | ChildNode::Translations(node) => {
                let parent_key = key_alias(&node.parent_key);
                let keys = distinct_keys(parents, &parent_key);
                let level = LevelFetch {
                    collection: &node.name,
                    query: &node.query,
                    cases: &node.cases,
                    children: &node.children,
                    link: Some(&node.related_key),
                    key_field: &node.related_key,
                    junction: None,
                };
                let rows = self.fetch_level(tracker, level, keys).await?;
                tracker.advance(BranchState::begin_merge)?;
                Ok(assign_to_many(
                    parents,
                    &parent_key,
                    rows,
                    &key_alias(&node.related_key),
                    Window::from_query(&node.query, self.ctx.config.default_limit),
                ))
            }
            ChildNode::M2M(m2m) => {
                let node = &m2m.node;
                let parent_key = key_alias(&node.parent_key);
                let keys = distinct_keys(parents, &parent_key);
                let level = LevelFetch {
                    collection: &node.name,
                    query: &node.query,
                    cases: &node.cases,
                    children: &node.children,
                    link: None,
                    key_field: &m2m.junction.parent_field,
                    junction: Some(&m2m.junction),
                };
                let rows = self.fetch_level(tracker, level, keys).await?;
                tracker.advance(BranchState::begin_merge)?;
                Ok(assign_to_many(
                    parents,
                    &parent_key,
                    rows,
                    JUNCTION_PARENT_KEY,
                    Window::from_query(&node.query, self.ctx.config.default_limit),
                ))
            }
            ChildNode::A2O(node) => {
                let parent_key = key_alias(&node.parent_key);
                let collection_field = key_alias(&node.collection_field);
                let fetches = node.branches.iter().map(|branch| {
                    let matching = parents.iter().filter(|parent| {
                        parent.get(&collection_field).and_then(Value::as_str)
                            == Some(branch.name.as_str())
                    });
                    let keys = distinct_keys(matching, &parent_key);
                    async move {
                        let mut candidate = BranchTracker::new(
                            self.ctx.request_id,
                            &branch.name,
                            &format!("{}:{}", node.field_key, branch.name),
                        );
                        let level = LevelFetch {
                            collection: &branch.name,
                            query: &branch.query,
                            cases: &branch.cases,
                            children: &branch.children,
                            link: None,
                            key_field: &branch.related_key,
                            junction: None,
                        };
                        match self.fetch_level(&mut candidate, level, keys).await {
                            Ok(rows) => {
                                candidate.advance(BranchState::begin_merge)?;
                                candidate.advance(BranchState::complete)?;
                                Ok::<_, EngineError>(A2OBatch {
                                    collection: branch.name.clone(),
                                    related_key: key_alias(&branch.related_key),
                                    rows,
                                })
                            }
                            Err(err) => {
                                candidate.fail(&err);
                                Err(err)
                            }
                        }
                    }
                });
                let batches = try_join_all(fetches).await?;
                tracker.advance(BranchState::begin_merge)?;
                Ok(assign_a2o(parents, &parent_key, &collection_field, &batches))
            }
        }
    }

    /// Fetches one nested level in key chunks and expands its own children
    async fn fetch_level(
        &self,
        tracker: &mut BranchTracker,
        level: LevelFetch<'_>,
        keys: Vec<Value>,
    ) -> EngineResult<Vec<Row>> {
        if keys.is_empty() {
            debug!(
                event = Event::BranchSkipped.as_str(),
                request_id = %self.ctx.request_id,
                collection = level.collection,
            );
            return Ok(Vec::new());
        }

        tracker.advance(BranchState::begin_compile)?;
        let compiler = QueryCompiler::new(self.ctx);
        let selections =
            compiler.level_selections(level.collection, level.query, level.children, level.link)?;
        let batch_size = self.ctx.config.relational_batch_size.max(1);

        let mut compiled = Vec::with_capacity(keys.len().div_ceil(batch_size));
        for chunk in keys.chunks(batch_size) {
            let mut req = LevelRequest::new(level.collection, level.query, level.cases)
                .with_selections(selections.clone())
                .with_parent_keys(level.key_field, chunk.to_vec())
                .unpaginated();
            if let Some(junction) = level.junction {
                req = req.with_junction(junction);
            }
            compiled.push(compiler.compile_level(req)?);
        }

        tracker.advance(BranchState::begin_query)?;
        debug!(
            event = Event::BranchQuery.as_str(),
            request_id = %self.ctx.request_id,
            collection = level.collection,
            keys = keys.len(),
            batches = compiled.len(),
        );
        let batches = try_join_all(compiled.iter().map(|c| self.fetch(c))).await?;
        let mut rows: Vec<Row> = batches.into_iter().flatten().collect();
        coerce_rows(
            self.ctx.schema(),
            level.collection,
            &selections,
            &mut rows,
        );

        tracker.advance(BranchState::begin_children)?;
        self.expand_children(level.collection, level.children, &mut rows)
            .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::store::MemoryRowStore;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Row> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn store() -> MemoryRowStore {
        MemoryRowStore::new()
            .with_rows(
                "articles",
                rows(json!([
                    {"id": 1, "title": "Rust", "author": 10, "status": "published"},
                    {"id": 2, "title": "Go", "author": null, "status": "draft"}
                ])),
            )
            .with_rows("authors", rows(json!([{"id": 10, "name": "Ann"}])))
            .with_rows(
                "comments",
                rows(json!([
                    {"id": 100, "article": 1, "body": "second", "sort": 2},
                    {"id": 101, "article": 1, "body": "first", "sort": 1}
                ])),
            )
            .with_rows(
                "tags",
                rows(json!([{"id": 1, "name": "lang"}, {"id": 2, "name": "fast"}])),
            )
            .with_rows(
                "articles_tags",
                rows(json!([
                    {"jid": 1, "articles_id": 1, "tags_id": 2, "sort": 2},
                    {"jid": 2, "articles_id": 1, "tags_id": 1, "sort": 1},
                    {"jid": 3, "articles_id": 2, "tags_id": 1, "sort": 1}
                ])),
            )
    }

    fn query(value: Value) -> QuerySpec {
        QuerySpec::from_value(&value).unwrap()
    }

    #[tokio::test]
    async fn test_nested_tree() {
        let ctx = fixtures::admin_ctx();
        let store = store();
        let out = RelationalExecutor::new(&ctx, &store)
            .query(
                "articles",
                &query(json!({"fields": ["id", "title", "author.name", "comments.body"]})),
            )
            .await
            .unwrap();

        assert_eq!(
            out,
            json!([
                {
                    "id": 1,
                    "title": "Rust",
                    "author": {"name": "Ann"},
                    "comments": [{"body": "first"}, {"body": "second"}]
                },
                {"id": 2, "title": "Go", "author": null, "comments": []}
            ])
        );
        assert_eq!(store.round_trips(), 3);
    }

    #[tokio::test]
    async fn test_many_to_many_follows_junction_order() {
        let ctx = fixtures::admin_ctx();
        let store = store();
        let out = RelationalExecutor::new(&ctx, &store)
            .query("articles", &query(json!({"fields": ["id", "tags.name"]})))
            .await
            .unwrap();

        assert_eq!(
            out,
            json!([
                {"id": 1, "tags": [{"name": "lang"}, {"name": "fast"}]},
                {"id": 2, "tags": [{"name": "lang"}]}
            ])
        );
    }

    #[tokio::test]
    async fn test_empty_root_skips_children() {
        let ctx = fixtures::admin_ctx();
        let store = MemoryRowStore::new();
        let out = RelationalExecutor::new(&ctx, &store)
            .query("articles", &query(json!({"fields": ["id", "comments.body"]})))
            .await
            .unwrap();

        assert_eq!(out, json!([]));
        assert_eq!(store.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_null_keys_issue_no_query() {
        let ctx = fixtures::admin_ctx();
        let store = store();
        let out = RelationalExecutor::new(&ctx, &store)
            .query(
                "articles",
                &query(json!({"fields": ["id", "author.name"], "filter": {"id": {"_eq": 2}}})),
            )
            .await
            .unwrap();

        assert_eq!(out, json!([{"id": 2, "author": null}]));
        assert_eq!(store.round_trips(), 1);
    }

    #[tokio::test]
    async fn test_relational_child_on_aggregate_level() {
        let ctx = fixtures::admin_ctx();
        let store = store();
        let err = RelationalExecutor::new(&ctx, &store)
            .query(
                "articles",
                &query(json!({"aggregate": {"count": "*"}, "fields": ["author.name"]})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code().code(), "QUERY_INVALID");
    }

    #[tokio::test]
    async fn test_nested_failure_fails_request() {
        let ctx = fixtures::admin_ctx();
        let store = store().fail_on("comments");
        let err = RelationalExecutor::new(&ctx, &store)
            .query("articles", &query(json!({"fields": ["id", "comments.body"]})))
            .await
            .unwrap_err();
        assert_eq!(err.code().code(), "ROW_STORE_FAILURE");
    }

    #[tokio::test]
    async fn test_run_many_keys_by_collection() {
        let ctx = fixtures::admin_ctx();
        let store = store();
        let builder = AstBuilder::new(&ctx);
        let asts = vec![
            builder
                .build("authors", &query(json!({"fields": ["name"]})))
                .unwrap(),
            builder
                .build("tags", &query(json!({"fields": ["name"], "sort": ["name"]})))
                .unwrap(),
        ];
        let out = RelationalExecutor::new(&ctx, &store)
            .run_many(&asts)
            .await
            .unwrap();
        assert_eq!(
            out,
            json!({
                "authors": [{"name": "Ann"}],
                "tags": [{"name": "fast"}, {"name": "lang"}]
            })
        );
    }
}
