//! Level compiler
//!
//! Turns one level of a request (collection, query parameters, selected
//! fields, permission outcome) into a [`ClauseSet`]. Deterministic: the same
//! inputs under the same schema and permissions always produce the same
//! clause set.

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::ast::{Ast, AstBuilder, ChildNode};
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::observability::Event;
use crate::query::{
    AggregateFunction, FieldFunction, FieldRef, Filter, QuerySpec, SortDirection, SortSpec,
};
use crate::schema::{JunctionDescriptor, RelationInfo};
use crate::search::SearchExpander;

use super::alias::{AliasMap, ClauseBuilder, Scope};
use super::clause::{
    ClauseSet, ColumnRef, Join, JoinKind, Operand, OrderItem, Predicate, SelectExpr, SelectItem,
    SubQuery, TableRef,
};
use super::filter::FilterCompiler;

/// Select alias carrying the junction's parent key on many-to-many levels
pub const JUNCTION_PARENT_KEY: &str = "$junction_parent";

/// Select alias of a stitching key; never shared with a requested field
pub fn key_alias(field: &str) -> String {
    format!("$key_{}", field)
}

/// One entry of a level's select list
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Column the caller asked for
    Field {
        field: String,
        function: Option<FieldFunction>,
        alias: String,
        /// Permission cases under which the value is visible
        when_case: Option<Vec<usize>>,
    },
    /// Key column needed to stitch levels together, selected under
    /// [`key_alias`] and stripped before output
    Helper {
        field: String,
        when_case: Option<Vec<usize>>,
    },
}

impl Selection {
    pub fn field(field: impl Into<String>) -> Self {
        let field = field.into();
        Selection::Field {
            alias: field.clone(),
            field,
            function: None,
            when_case: None,
        }
    }

    pub fn helper(field: impl Into<String>) -> Self {
        Selection::Helper {
            field: field.into(),
            when_case: None,
        }
    }
}

/// Restricts a level to rows matching a parent's keys.
///
/// On many-to-many levels `field` is a junction column.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyConstraint {
    pub field: String,
    pub keys: Vec<Value>,
}

/// Inputs for compiling one level
#[derive(Debug, Clone)]
pub struct LevelRequest<'r> {
    pub collection: &'r str,
    pub query: &'r QuerySpec,
    pub selections: Vec<Selection>,
    /// Permission cases the selections' `when_case` indices point into
    pub cases: &'r [Filter],
    pub parent_keys: Option<KeyConstraint>,
    pub junction: Option<&'r JunctionDescriptor>,
    /// Apply `limit`/`offset`/`page` in the store; nested to-many levels
    /// slice per parent instead
    pub paginate: bool,
}

impl<'r> LevelRequest<'r> {
    pub fn new(collection: &'r str, query: &'r QuerySpec, cases: &'r [Filter]) -> Self {
        Self {
            collection,
            query,
            selections: Vec::new(),
            cases,
            parent_keys: None,
            junction: None,
            paginate: true,
        }
    }

    pub fn with_selections(mut self, selections: Vec<Selection>) -> Self {
        self.selections = selections;
        self
    }

    pub fn with_parent_keys(mut self, field: impl Into<String>, keys: Vec<Value>) -> Self {
        self.parent_keys = Some(KeyConstraint {
            field: field.into(),
            keys,
        });
        self
    }

    pub fn with_junction(mut self, junction: &'r JunctionDescriptor) -> Self {
        self.junction = Some(junction);
        self
    }

    pub fn unpaginated(mut self) -> Self {
        self.paginate = false;
        self
    }
}

/// Clause set plus its alias bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledLevel {
    pub clauses: ClauseSet,
    pub aliases: AliasMap,
    /// Selections the clause set was compiled from
    pub selections: Vec<Selection>,
}

/// Compiles levels for one request
pub struct QueryCompiler<'c> {
    ctx: &'c RequestContext,
}

impl<'c> QueryCompiler<'c> {
    pub fn new(ctx: &'c RequestContext) -> Self {
        Self { ctx }
    }

    /// Compiles the root level of `query` exactly as the executor runs it
    pub fn compile(&self, collection: &str, query: &QuerySpec) -> EngineResult<CompiledLevel> {
        let ast = AstBuilder::new(self.ctx).build(collection, query)?;
        self.compile_root(&ast)
    }

    /// Compiles the root level of an already built request tree
    pub fn compile_root(&self, ast: &Ast) -> EngineResult<CompiledLevel> {
        let selections = self.level_selections(&ast.name, &ast.query, &ast.children, None)?;
        self.compile_level(
            LevelRequest::new(&ast.name, &ast.query, &ast.cases).with_selections(selections),
        )
    }

    /// Columns one level must select for its children to be stitched on.
    ///
    /// `link` is the column tying the level's rows back to their parent.
    pub fn level_selections(
        &self,
        collection: &str,
        query: &QuerySpec,
        children: &[ChildNode],
        link: Option<&str>,
    ) -> EngineResult<Vec<Selection>> {
        let schema = self.ctx.schema();
        let aggregate = query.is_aggregate();

        let mut out = Vec::new();
        if !aggregate {
            out.push(Selection::helper(schema.primary_key(collection)?));
        }
        if let Some(link) = link {
            out.push(Selection::helper(link));
        }

        for child in children {
            match child {
                ChildNode::Field(node) => {
                    let overview = schema.field(collection, &node.name)?;
                    let hidden = node.when_case.as_ref().map_or(false, Vec::is_empty);
                    if overview.is_alias() && hidden {
                        continue;
                    }
                    out.push(Selection::Field {
                        field: node.name.clone(),
                        function: node.function,
                        alias: node.field_key.clone(),
                        when_case: node.when_case.clone(),
                    });
                }
                relational if aggregate => {
                    return Err(EngineError::invalid_query(format!(
                        "relational field \"{}\" cannot be combined with aggregates",
                        relational.field_key()
                    )))
                }
                ChildNode::M2O(node) => out.push(Selection::Helper {
                    field: node.parent_key.clone(),
                    when_case: node.when_case.clone(),
                }),
                ChildNode::A2O(node) => {
                    out.push(Selection::Helper {
                        field: node.parent_key.clone(),
                        when_case: node.when_case.clone(),
                    });
                    out.push(Selection::Helper {
                        field: node.collection_field.clone(),
                        when_case: node.when_case.clone(),
                    });
                }
                // Keyed on this level's primary key, already selected
                ChildNode::O2M(_) | ChildNode::Translations(_) | ChildNode::M2M(_) => {}
            }
        }

        Ok(out)
    }

    /// Compiles one level with explicit selections
    pub fn compile_level(&self, req: LevelRequest<'_>) -> EngineResult<CompiledLevel> {
        let schema = self.ctx.schema();
        let overview = schema.collection(req.collection)?;
        let filters = FilterCompiler::new(self.ctx);

        let mut b = ClauseBuilder::new();
        let scope = Scope::root(req.collection);
        let from = TableRef::new(req.collection, req.collection);
        let mut joins: Vec<Join> = Vec::new();

        // 1. Junction join for many-to-many levels
        let junction_scope = match req.junction {
            Some(junction) => {
                let alias = b.join_alias();
                joins.push(Join {
                    kind: JoinKind::Inner,
                    table: TableRef::new(junction.collection.clone(), alias.clone()),
                    on: Predicate::column_eq(
                        ColumnRef::new(alias.clone(), junction.related_field.clone()),
                        from.column(overview.primary.clone()),
                    ),
                });
                b.aliases
                    .insert_join(junction.collection.clone(), alias.clone());
                Some(Scope {
                    collection: junction.collection.clone(),
                    alias,
                    path: junction.collection.clone(),
                })
            }
            None => None,
        };

        // 2. Select list (and group for aggregates)
        let mut group = Vec::new();
        let mut select = if req.query.is_aggregate() {
            self.aggregate_select(&mut b, &scope, &req, &mut group)?
        } else {
            self.row_select(&mut b, &filters, &scope, &mut joins, &req)?
        };

        if let (Some(junction), Some(js)) = (req.junction, &junction_scope) {
            let parent = ColumnRef::new(js.alias.clone(), junction.parent_field.clone());
            if req.query.is_aggregate() {
                // Nested aggregates never mix rows of different parents
                group.insert(0, Operand::Column(parent.clone()));
            }
            select.push(SelectItem {
                expr: SelectExpr::Column(parent),
                alias: JUNCTION_PARENT_KEY.to_string(),
                when: None,
            });
            b.aliases
                .insert_output(JUNCTION_PARENT_KEY, vec![JUNCTION_PARENT_KEY.to_string()]);
        }

        // 3. Where: permissions, filter, search, parent keys
        let mut conditions = vec![filters.row_permissions(&mut b, &scope, &mut joins)?];

        if let Some(filter) = &req.query.filter {
            conditions.push(filters.compile(&mut b, &scope, &mut joins, filter)?);
        }

        if let Some(term) = req.query.search.as_deref().map(str::trim) {
            if !term.is_empty() {
                conditions.push(SearchExpander::new(self.ctx).expand_in(
                    &mut b,
                    &scope,
                    term,
                    0,
                    self.ctx.config.search_max_depth,
                    &mut joins,
                )?);
            }
        }

        if let Some(constraint) = &req.parent_keys {
            let table = junction_scope
                .as_ref()
                .map(|js| js.alias.clone())
                .unwrap_or_else(|| scope.alias.clone());
            conditions.push(if constraint.keys.is_empty() {
                Predicate::Const(false)
            } else {
                Predicate::In {
                    operand: Operand::Column(ColumnRef::new(table, constraint.field.clone())),
                    values: constraint.keys.iter().map(|k| b.bind(k.clone())).collect(),
                    negated: false,
                }
            });
        }

        if let Some(js) = &junction_scope {
            conditions.push(filters.row_permissions(&mut b, js, &mut joins)?);
        }

        // 4. Order
        let mut order = Vec::new();
        match &req.query.sort {
            Some(sorts) => {
                for sort in sorts {
                    order.push(OrderItem {
                        operand: self.sort_operand(&mut b, &filters, &scope, &mut joins, sort)?,
                        direction: sort.direction,
                    });
                }
            }
            None if !req.query.is_aggregate() => {
                if let (Some(junction), Some(js)) = (req.junction, &junction_scope) {
                    let column = junction.sort_field.as_ref().unwrap_or(&junction.primary);
                    order.push(OrderItem {
                        operand: Operand::Column(ColumnRef::new(js.alias.clone(), column.clone())),
                        direction: SortDirection::Asc,
                    });
                }
            }
            None => {}
        }

        // 5. Pagination
        let (limit, offset) = if req.paginate {
            let default_limit = self.ctx.config.default_limit;
            let limit = if overview.singleton {
                Some(1)
            } else {
                req.query.effective_limit(default_limit)
            };
            (limit, req.query.effective_offset(default_limit))
        } else {
            (None, None)
        };

        let clauses = ClauseSet {
            select,
            from,
            joins,
            where_clause: Predicate::and(conditions),
            order,
            group,
            limit,
            offset,
            bindings: b.bindings,
        };

        debug!(
            event = Event::LevelCompiled.as_str(),
            request_id = %self.ctx.request_id,
            collection = req.collection,
            joins = clauses.joins.len(),
            bindings = clauses.bindings.len(),
        );

        Ok(CompiledLevel {
            clauses,
            aliases: b.aliases,
            selections: req.selections,
        })
    }

    fn row_select(
        &self,
        b: &mut ClauseBuilder,
        filters: &FilterCompiler<'_>,
        scope: &Scope,
        joins: &mut Vec<Join>,
        req: &LevelRequest<'_>,
    ) -> EngineResult<Vec<SelectItem>> {
        let schema = self.ctx.schema();

        let mut seen: HashSet<String> = HashSet::new();
        let mut select = Vec::new();

        for selection in &req.selections {
            match selection {
                Selection::Field {
                    field,
                    function,
                    alias,
                    when_case,
                } => {
                    if !seen.insert(alias.clone()) {
                        continue;
                    }
                    let overview = schema.field(req.collection, field)?;

                    if overview.is_alias() {
                        if *function == Some(FieldFunction::Count) {
                            select.push(self.related_count(b, filters, scope, field, alias)?);
                            b.aliases.insert_output(alias.clone(), vec![alias.clone()]);
                        }
                        // Synthetic and relational aliases have no column here
                        continue;
                    }

                    let column = scope_column(scope, field);
                    let expr = match function {
                        Some(function) => {
                            if !function.supports(overview.field_type) {
                                return Err(EngineError::unsupported_function(
                                    function.as_str(),
                                    field.clone(),
                                    overview.field_type.as_str(),
                                ));
                            }
                            SelectExpr::Function {
                                function: *function,
                                column,
                            }
                        }
                        None => SelectExpr::Column(column),
                    };
                    select.push(self.guarded(b, filters, scope, joins, req, expr, alias, when_case)?);
                    b.aliases.insert_output(alias.clone(), vec![alias.clone()]);
                }
                Selection::Helper { field, when_case } => {
                    let alias = key_alias(field);
                    if !seen.insert(alias.clone()) {
                        continue;
                    }
                    schema.field(req.collection, field)?;
                    let expr = SelectExpr::Column(scope_column(scope, field));
                    select.push(self.guarded(b, filters, scope, joins, req, expr, &alias, when_case)?);
                    b.aliases.insert_output(alias.clone(), vec![alias]);
                }
            }
        }

        Ok(select)
    }

    /// Wraps a select expression in its field-permission guard
    #[allow(clippy::too_many_arguments)]
    fn guarded(
        &self,
        b: &mut ClauseBuilder,
        filters: &FilterCompiler<'_>,
        scope: &Scope,
        joins: &mut Vec<Join>,
        req: &LevelRequest<'_>,
        expr: SelectExpr,
        alias: &str,
        when_case: &Option<Vec<usize>>,
    ) -> EngineResult<SelectItem> {
        let (expr, when) = match when_case {
            None => (expr, None),
            Some(indices) if indices.is_empty() => (SelectExpr::Null, None),
            Some(indices) => {
                let guard = filters.cases_predicate(b, scope, joins, req.cases, indices)?;
                (expr, Some(guard))
            }
        };
        Ok(SelectItem {
            expr,
            alias: alias.to_string(),
            when,
        })
    }

    fn related_count(
        &self,
        b: &mut ClauseBuilder,
        filters: &FilterCompiler<'_>,
        scope: &Scope,
        field: &str,
        alias: &str,
    ) -> EngineResult<SelectItem> {
        let schema = self.ctx.schema();
        let parent_pk = schema.primary_key(&scope.collection)?;

        let subquery = match schema.relation_for(&scope.collection, field) {
            Some(RelationInfo::O2M { relation }) | Some(RelationInfo::Translations { relation }) => {
                let sub_alias = b.sub_alias();
                let child = scope.child(&relation.collection, &sub_alias, &format!("count({})", field));
                let mut sub_joins = Vec::new();
                let permissions = filters.row_permissions(b, &child, &mut sub_joins)?;
                SubQuery {
                    from: TableRef::new(relation.collection.clone(), sub_alias.clone()),
                    joins: sub_joins,
                    where_clause: Predicate::and(vec![
                        Predicate::column_eq(
                            ColumnRef::new(sub_alias, relation.field.clone()),
                            scope_column(scope, parent_pk),
                        ),
                        permissions,
                    ]),
                }
            }
            Some(RelationInfo::M2M {
                junction,
                related_collection,
                ..
            }) => {
                let related_pk = schema.primary_key(&related_collection)?;
                let sub_alias = b.sub_alias();
                let join_alias = b.join_alias();
                let junction_scope =
                    scope.child(&junction.collection, &sub_alias, &format!("count({})", field));
                let related_scope =
                    junction_scope.child(&related_collection, &join_alias, &junction.related_field);

                let mut sub_joins = vec![Join {
                    kind: JoinKind::Inner,
                    table: TableRef::new(related_collection.clone(), join_alias.clone()),
                    on: Predicate::column_eq(
                        ColumnRef::new(join_alias, related_pk),
                        ColumnRef::new(sub_alias.clone(), junction.related_field.clone()),
                    ),
                }];
                let junction_permissions =
                    filters.row_permissions(b, &junction_scope, &mut sub_joins)?;
                let related_permissions =
                    filters.row_permissions(b, &related_scope, &mut sub_joins)?;
                SubQuery {
                    from: TableRef::new(junction.collection.clone(), sub_alias.clone()),
                    joins: sub_joins,
                    where_clause: Predicate::and(vec![
                        Predicate::column_eq(
                            ColumnRef::new(sub_alias, junction.parent_field.clone()),
                            scope_column(scope, parent_pk),
                        ),
                        junction_permissions,
                        related_permissions,
                    ]),
                }
            }
            _ => {
                return Err(EngineError::unsupported_function(
                    FieldFunction::Count.as_str(),
                    field,
                    "alias",
                ))
            }
        };

        Ok(SelectItem {
            expr: SelectExpr::RelatedCount(Box::new(subquery)),
            alias: alias.to_string(),
            when: None,
        })
    }

    fn aggregate_select(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        req: &LevelRequest<'_>,
        group: &mut Vec<Operand>,
    ) -> EngineResult<Vec<SelectItem>> {
        let schema = self.ctx.schema();
        let outcome = self.ctx.read_permissions(req.collection);
        let mut select = Vec::new();
        let mut grouped: Vec<String> = Vec::new();

        // Helper keys (foreign keys of nested levels) group implicitly
        let mut keys: HashSet<String> = HashSet::new();
        for selection in &req.selections {
            if let Selection::Helper { field, .. } = selection {
                let alias = key_alias(field);
                if !keys.insert(alias.clone()) {
                    continue;
                }
                schema.field(req.collection, field)?;
                let column = scope_column(scope, field);
                group.push(Operand::Column(column.clone()));
                select.push(SelectItem {
                    expr: SelectExpr::Column(column),
                    alias: alias.clone(),
                    when: None,
                });
                b.aliases.insert_output(alias.clone(), vec![alias]);
            }
        }

        for raw in req.query.group.iter().flatten() {
            let field_ref = FieldRef::parse(raw)?;
            let output_key = field_ref.output_key();
            if grouped.contains(&output_key) {
                continue;
            }
            let overview = schema.field(req.collection, &field_ref.field)?;
            if overview.is_alias() {
                return Err(EngineError::invalid_query(format!(
                    "cannot group by alias field \"{}\"",
                    field_ref.field
                )));
            }

            let column = scope_column(scope, &field_ref.field);
            let (operand, expr) = match field_ref.function {
                Some(function) => {
                    if !function.supports(overview.field_type) {
                        return Err(EngineError::unsupported_function(
                            function.as_str(),
                            field_ref.field.clone(),
                            overview.field_type.as_str(),
                        ));
                    }
                    (
                        Operand::Function {
                            function,
                            column: column.clone(),
                        },
                        SelectExpr::Function { function, column },
                    )
                }
                None => (Operand::Column(column.clone()), SelectExpr::Column(column)),
            };

            if outcome.allows_field(&field_ref.field) {
                group.push(operand);
                select.push(SelectItem {
                    expr,
                    alias: output_key.clone(),
                    when: None,
                });
            } else {
                select.push(SelectItem {
                    expr: SelectExpr::Null,
                    alias: output_key.clone(),
                    when: None,
                });
            }
            b.aliases
                .insert_output(output_key.clone(), vec![output_key.clone()]);
            grouped.push(output_key);
        }

        // Requested plain fields must be grouped
        for selection in &req.selections {
            if let Selection::Field {
                field, function, ..
            } = selection
            {
                let key = function
                    .map(|f| f.output_key(field))
                    .unwrap_or_else(|| field.clone());
                if !grouped.contains(&key) {
                    return Err(EngineError::invalid_query(format!(
                        "field \"{}\" must be listed in group to be selected with aggregates",
                        key
                    )));
                }
            }
        }

        for spec in &req.query.aggregate {
            for field in &spec.fields {
                let function = spec.function;
                let (alias, path, column) = if function == AggregateFunction::CountAll {
                    ("countAll".to_string(), vec!["countAll".to_string()], None)
                } else if field == "*" {
                    if function != AggregateFunction::Count {
                        return Err(EngineError::invalid_query(format!(
                            "\"{}\" needs a field, \"*\" is only valid for count",
                            function.as_str()
                        )));
                    }
                    ("count".to_string(), vec!["count".to_string()], None)
                } else {
                    let overview = schema.field(req.collection, field)?;
                    if overview.is_alias() {
                        return Err(EngineError::invalid_query(format!(
                            "cannot aggregate alias field \"{}\"",
                            field
                        )));
                    }
                    if function.requires_numeric() && !overview.field_type.is_numeric() {
                        return Err(EngineError::unsupported_function(
                            function.as_str(),
                            field.clone(),
                            overview.field_type.as_str(),
                        ));
                    }
                    (
                        format!("{}->{}", function.as_str(), field),
                        vec![function.as_str().to_string(), field.clone()],
                        Some(scope_column(scope, field)),
                    )
                };

                let visible = column
                    .as_ref()
                    .map(|c| outcome.allows_field(&c.column))
                    .unwrap_or(true);
                select.push(SelectItem {
                    expr: if visible {
                        SelectExpr::Aggregate { function, column }
                    } else {
                        SelectExpr::Null
                    },
                    alias: alias.clone(),
                    when: None,
                });
                b.aliases.insert_output(alias, path);
            }
        }

        Ok(select)
    }

    /// Resolves a sort field, joining through many-to-one paths
    fn sort_operand(
        &self,
        b: &mut ClauseBuilder,
        filters: &FilterCompiler<'_>,
        scope: &Scope,
        joins: &mut Vec<Join>,
        sort: &SortSpec,
    ) -> EngineResult<Operand> {
        let schema = self.ctx.schema();
        let segments: Vec<&str> = sort.field.split('.').collect();
        let (last, path) = segments
            .split_last()
            .ok_or_else(|| EngineError::invalid_query("empty sort field"))?;

        let mut current = scope.clone();
        for segment in path {
            let (field, target) = match segment.split_once(':') {
                Some((field, target)) => (field, Some(target)),
                None => (*segment, None),
            };
            current = match schema.relation_for(&current.collection, field) {
                Some(RelationInfo::M2O {
                    relation,
                    related_collection,
                }) => filters.join_to_one(
                    b,
                    &current,
                    joins,
                    segment,
                    &relation.field,
                    &related_collection,
                    None,
                )?,
                Some(RelationInfo::A2O {
                    relation,
                    allowed,
                    collection_field,
                }) => {
                    let target = target
                        .filter(|t| allowed.iter().any(|a| a.as_str() == *t))
                        .ok_or_else(|| {
                            EngineError::invalid_query(format!(
                                "sorting through any-to-one \"{}\" needs an allowed collection scope",
                                field
                            ))
                        })?;
                    filters.join_to_one(
                        b,
                        &current,
                        joins,
                        segment,
                        &relation.field,
                        target,
                        Some(&collection_field),
                    )?
                }
                Some(info) => {
                    return Err(EngineError::invalid_query(format!(
                        "cannot sort through {} relation \"{}\"",
                        info.kind().as_str(),
                        field
                    )))
                }
                None => {
                    schema.field(&current.collection, field)?;
                    return Err(EngineError::invalid_query(format!(
                        "field \"{}\" on \"{}\" is not relational",
                        field, current.collection
                    )));
                }
            };
        }

        let field_ref = FieldRef::parse(last)?;
        let overview = schema.field(&current.collection, &field_ref.field)?;
        if overview.is_alias() {
            return Err(EngineError::invalid_query(format!(
                "cannot sort by alias field \"{}\"",
                field_ref.field
            )));
        }
        let column = scope_column(&current, &field_ref.field);
        match field_ref.function {
            Some(function) if !function.supports(overview.field_type) => {
                Err(EngineError::unsupported_function(
                    function.as_str(),
                    field_ref.field.clone(),
                    overview.field_type.as_str(),
                ))
            }
            Some(function) => Ok(Operand::Function { function, column }),
            None => Ok(Operand::Column(column)),
        }
    }
}

fn scope_column(scope: &Scope, field: &str) -> ColumnRef {
    ColumnRef::new(scope.alias.clone(), field)
}
