//! Filter and permission predicate compilation
//!
//! Many-to-one paths become `LEFT JOIN`s on the current block, to-many
//! paths become correlated `EXISTS` sub-selects. Permission predicates of
//! every collection a path reaches are AND-ed in next to the user's
//! condition.

use serde_json::{Number, Value};

use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::permissions::PermissionOutcome;
use crate::query::{FieldRef, Filter, FilterOperator, Quantifier};
use crate::schema::{FieldType, RelationInfo};

use super::alias::{ClauseBuilder, Scope};
use super::clause::{
    ColumnRef, CompareOp, Join, JoinKind, Operand, Predicate, SubQuery, TableRef,
};

pub(crate) struct FilterCompiler<'c> {
    ctx: &'c RequestContext,
    /// Off for permission filters themselves
    enforce_permissions: bool,
}

impl<'c> FilterCompiler<'c> {
    pub fn new(ctx: &'c RequestContext) -> Self {
        Self {
            ctx,
            enforce_permissions: true,
        }
    }

    /// Compiler for permission filters; they are never re-checked
    pub fn trusted(ctx: &'c RequestContext) -> Self {
        Self {
            ctx,
            enforce_permissions: false,
        }
    }

    pub fn compile(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        joins: &mut Vec<Join>,
        filter: &Filter,
    ) -> EngineResult<Predicate> {
        match filter {
            Filter::And(items) => {
                let parts = items
                    .iter()
                    .map(|f| self.compile(b, scope, joins, f))
                    .collect::<EngineResult<Vec<_>>>()?;
                Ok(Predicate::and(parts))
            }
            // `_or: []` constrains nothing
            Filter::Or(items) if items.is_empty() => Ok(Predicate::Const(true)),
            Filter::Or(items) => {
                let parts = items
                    .iter()
                    .map(|f| self.compile(b, scope, joins, f))
                    .collect::<EngineResult<Vec<_>>>()?;
                Ok(Predicate::or(parts))
            }
            Filter::Condition {
                field,
                operator,
                value,
            } => self.compile_condition(b, scope, field, *operator, value),
            Filter::Relation {
                field,
                quantifier,
                filter,
            } => self.compile_relation(b, scope, joins, field, *quantifier, filter),
        }
    }

    /// Row predicate of the caller's read rules on `scope.collection`
    pub fn row_permissions(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        joins: &mut Vec<Join>,
    ) -> EngineResult<Predicate> {
        let outcome = self.ctx.read_permissions(&scope.collection);
        match &*outcome {
            PermissionOutcome::Unrestricted => Ok(Predicate::Const(true)),
            PermissionOutcome::DeniedAll => Ok(Predicate::Const(false)),
            PermissionOutcome::Permitted(_) => {
                let cases = outcome.cases();
                let indices: Vec<usize> = (0..cases.len()).collect();
                self.cases_predicate(b, scope, joins, &cases, &indices)
            }
        }
    }

    /// OR of the selected permission cases; no cases is always false
    pub fn cases_predicate(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        joins: &mut Vec<Join>,
        cases: &[Filter],
        indices: &[usize],
    ) -> EngineResult<Predicate> {
        let trusted = FilterCompiler::trusted(self.ctx);
        let mut parts = Vec::with_capacity(indices.len());
        for &index in indices {
            let case = cases.get(index).ok_or_else(|| {
                EngineError::invalid_query(format!(
                    "permission case {} does not exist on \"{}\"",
                    index, scope.collection
                ))
            })?;
            parts.push(trusted.compile(b, scope, joins, case)?);
        }
        Ok(Predicate::or(parts))
    }

    fn field_allowed(&self, collection: &str, field: &str) -> bool {
        !self.enforce_permissions || self.ctx.read_permissions(collection).allows_field(field)
    }

    fn compile_condition(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        raw_field: &str,
        operator: FilterOperator,
        value: &Value,
    ) -> EngineResult<Predicate> {
        let field_ref = FieldRef::parse(raw_field)?;
        let overview = self.ctx.schema().field(&scope.collection, &field_ref.field)?;

        if !self.field_allowed(&scope.collection, &field_ref.field) {
            return Ok(Predicate::Const(false));
        }
        if overview.is_alias() {
            return Err(EngineError::invalid_query(format!(
                "field \"{}\" has no column to filter on",
                field_ref.field
            )));
        }

        let column = ColumnRef::new(scope.alias.clone(), field_ref.field.clone());
        let (operand, value_type) = match field_ref.function {
            Some(function) => {
                if !function.supports(overview.field_type) {
                    return Err(EngineError::unsupported_function(
                        function.as_str(),
                        field_ref.field.clone(),
                        overview.field_type.as_str(),
                    ));
                }
                (Operand::Function { function, column }, FieldType::Integer)
            }
            None => (Operand::Column(column), overview.field_type),
        };

        compile_operator(b, operand, value_type, operator, value, &field_ref.field)
    }

    fn relation(&self, scope: &Scope, field: &str) -> EngineResult<RelationInfo> {
        let schema = self.ctx.schema();
        match schema.relation_for(&scope.collection, field) {
            Some(info) => Ok(info),
            None => {
                schema.field(&scope.collection, field)?;
                Err(EngineError::invalid_query(format!(
                    "field \"{}\" on \"{}\" is not relational",
                    field, scope.collection
                )))
            }
        }
    }

    fn compile_relation(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        joins: &mut Vec<Join>,
        raw_field: &str,
        quantifier: Quantifier,
        filter: &Filter,
    ) -> EngineResult<Predicate> {
        let (field, target) = match raw_field.split_once(':') {
            Some((field, target)) => (field, Some(target)),
            None => (raw_field, None),
        };
        let info = self.relation(scope, field)?;

        if !self.field_allowed(&scope.collection, field) {
            return Ok(Predicate::Const(false));
        }

        match info {
            RelationInfo::M2O {
                relation,
                related_collection,
            } => {
                reject_quantifier(field, quantifier)?;
                let child =
                    self.join_to_one(b, scope, joins, field, &relation.field, &related_collection, None)?;
                self.compile_joined(b, &child, joins, filter)
            }
            RelationInfo::A2O {
                relation,
                allowed,
                collection_field,
            } => {
                reject_quantifier(field, quantifier)?;
                let target = target.ok_or_else(|| {
                    EngineError::invalid_query(format!(
                        "any-to-one field \"{}\" needs a collection scope, e.g. \"{}:{}\"",
                        field,
                        field,
                        allowed.first().map(String::as_str).unwrap_or("collection")
                    ))
                })?;
                if !allowed.iter().any(|c| c == target) {
                    return Err(EngineError::invalid_query(format!(
                        "\"{}\" is not an allowed collection for \"{}\"",
                        target, field
                    )));
                }
                let child = self.join_to_one(
                    b,
                    scope,
                    joins,
                    raw_field,
                    &relation.field,
                    target,
                    Some(&collection_field),
                )?;
                self.compile_joined(b, &child, joins, filter)
            }
            RelationInfo::O2M { relation } | RelationInfo::Translations { relation } => {
                let parent_pk = self.ctx.schema().primary_key(&scope.collection)?;
                let sub_alias = b.sub_alias();
                let child = scope.child(
                    &relation.collection,
                    &sub_alias,
                    &format!("{}[{}]", field, sub_alias),
                );
                b.aliases.insert_join(child.path.clone(), sub_alias.clone());

                let mut sub_joins = Vec::new();
                let correlation = Predicate::column_eq(
                    ColumnRef::new(sub_alias.clone(), relation.field.clone()),
                    ColumnRef::new(scope.alias.clone(), parent_pk),
                );
                let inner = self.compile(b, &child, &mut sub_joins, filter)?;
                let permissions = self.joined_permissions(b, &child, &mut sub_joins)?;

                Ok(Predicate::Exists {
                    subquery: Box::new(SubQuery {
                        from: TableRef::new(relation.collection.clone(), sub_alias),
                        joins: sub_joins,
                        where_clause: Predicate::and(vec![correlation, inner, permissions]),
                    }),
                    negated: quantifier == Quantifier::None,
                })
            }
            RelationInfo::M2M {
                junction,
                related_collection,
                ..
            } => {
                let schema = self.ctx.schema();
                let parent_pk = schema.primary_key(&scope.collection)?;
                let related_pk = schema.primary_key(&related_collection)?;

                let sub_alias = b.sub_alias();
                let junction_scope = scope.child(
                    &junction.collection,
                    &sub_alias,
                    &format!("{}[{}]", field, sub_alias),
                );
                b.aliases
                    .insert_join(junction_scope.path.clone(), sub_alias.clone());

                let join_alias = b.join_alias();
                let related_scope =
                    junction_scope.child(&related_collection, &join_alias, &junction.related_field);
                b.aliases
                    .insert_join(related_scope.path.clone(), join_alias.clone());

                let mut sub_joins = vec![Join {
                    kind: JoinKind::Inner,
                    table: TableRef::new(related_collection.clone(), join_alias.clone()),
                    on: Predicate::column_eq(
                        ColumnRef::new(join_alias, related_pk),
                        ColumnRef::new(sub_alias.clone(), junction.related_field.clone()),
                    ),
                }];
                let correlation = Predicate::column_eq(
                    ColumnRef::new(sub_alias.clone(), junction.parent_field.clone()),
                    ColumnRef::new(scope.alias.clone(), parent_pk),
                );
                let inner = self.compile(b, &related_scope, &mut sub_joins, filter)?;
                let junction_permissions =
                    self.joined_permissions(b, &junction_scope, &mut sub_joins)?;
                let related_permissions =
                    self.joined_permissions(b, &related_scope, &mut sub_joins)?;

                Ok(Predicate::Exists {
                    subquery: Box::new(SubQuery {
                        from: TableRef::new(junction.collection.clone(), sub_alias),
                        joins: sub_joins,
                        where_clause: Predicate::and(vec![
                            correlation,
                            inner,
                            junction_permissions,
                            related_permissions,
                        ]),
                    }),
                    negated: quantifier == Quantifier::None,
                })
            }
        }
    }

    fn compile_joined(
        &self,
        b: &mut ClauseBuilder,
        child: &Scope,
        joins: &mut Vec<Join>,
        filter: &Filter,
    ) -> EngineResult<Predicate> {
        let inner = self.compile(b, child, joins, filter)?;
        let permissions = self.joined_permissions(b, child, joins)?;
        Ok(Predicate::and(vec![inner, permissions]))
    }

    fn joined_permissions(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        joins: &mut Vec<Join>,
    ) -> EngineResult<Predicate> {
        if self.enforce_permissions {
            self.row_permissions(b, scope, joins)
        } else {
            Ok(Predicate::Const(true))
        }
    }

    /// Joins a to-one target once per path and returns its scope
    #[allow(clippy::too_many_arguments)]
    pub fn join_to_one(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        joins: &mut Vec<Join>,
        segment: &str,
        foreign_key: &str,
        related: &str,
        collection_field: Option<&str>,
    ) -> EngineResult<Scope> {
        let path = scope.join_path(segment);
        if let Some(alias) = b.aliases.alias_for_path(&path) {
            return Ok(Scope {
                collection: related.to_string(),
                alias: alias.to_string(),
                path,
            });
        }

        let related_pk = self.ctx.schema().primary_key(related)?;
        let alias = b.join_alias();
        let mut on = vec![Predicate::column_eq(
            ColumnRef::new(alias.clone(), related_pk),
            ColumnRef::new(scope.alias.clone(), foreign_key),
        )];
        if let Some(collection_field) = collection_field {
            let placeholder = b.bind(Value::String(related.to_string()));
            on.push(Predicate::Compare {
                left: Operand::Column(ColumnRef::new(scope.alias.clone(), collection_field)),
                op: CompareOp::Eq,
                right: Operand::Param(placeholder),
            });
        }

        joins.push(Join {
            kind: JoinKind::Left,
            table: TableRef::new(related, alias.clone()),
            on: Predicate::and(on),
        });
        b.aliases.insert_join(path.clone(), alias.clone());

        Ok(Scope {
            collection: related.to_string(),
            alias,
            path,
        })
    }
}

fn reject_quantifier(field: &str, quantifier: Quantifier) -> EngineResult<()> {
    if quantifier == Quantifier::Implicit {
        Ok(())
    } else {
        Err(EngineError::invalid_query(format!(
            "\"_some\"/\"_none\" cannot be used on to-one field \"{}\"",
            field
        )))
    }
}

fn compile_operator(
    b: &mut ClauseBuilder,
    operand: Operand,
    field_type: FieldType,
    operator: FilterOperator,
    value: &Value,
    field: &str,
) -> EngineResult<Predicate> {
    use FilterOperator as Op;

    let needs_text = operator.is_string_op() || matches!(operator, Op::Empty | Op::Nempty);
    if (needs_text && !field_type.supports_string_ops())
        || (operator.is_range_op() && !field_type.is_ordered())
    {
        return Err(EngineError::invalid_query(format!(
            "operator \"{}\" cannot be used on field \"{}\" of type \"{}\"",
            operator.as_str(),
            field,
            field_type.as_str()
        )));
    }

    let compare = |b: &mut ClauseBuilder, operand: Operand, op: CompareOp| Predicate::Compare {
        left: operand,
        op,
        right: Operand::Param(b.bind(coerce_value(value, field_type))),
    };

    let predicate = match operator {
        Op::Eq if value.is_null() => Predicate::IsNull {
            operand,
            negated: false,
        },
        Op::Neq if value.is_null() => Predicate::IsNull {
            operand,
            negated: true,
        },
        Op::Eq => compare(b, operand, CompareOp::Eq),
        Op::Neq => compare(b, operand, CompareOp::Neq),
        Op::Lt => compare(b, operand, CompareOp::Lt),
        Op::Lte => compare(b, operand, CompareOp::Lte),
        Op::Gt => compare(b, operand, CompareOp::Gt),
        Op::Gte => compare(b, operand, CompareOp::Gte),
        Op::In | Op::Nin => {
            let negated = operator == Op::Nin;
            let items = list_value(value);
            if items.is_empty() {
                return Ok(Predicate::Const(negated));
            }
            let values = items
                .iter()
                .map(|v| b.bind(coerce_value(v, field_type)))
                .collect();
            Predicate::In {
                operand,
                values,
                negated,
            }
        }
        Op::Null => Predicate::IsNull {
            operand,
            negated: !truthy(value),
        },
        Op::Nnull => Predicate::IsNull {
            operand,
            negated: truthy(value),
        },
        Op::Between | Op::Nbetween => {
            let items = list_value(value);
            if items.len() != 2 {
                return Err(EngineError::invalid_query(format!(
                    "\"{}\" on \"{}\" expects exactly two values",
                    operator.as_str(),
                    field
                )));
            }
            let low = b.bind(coerce_value(&items[0], field_type));
            let high = b.bind(coerce_value(&items[1], field_type));
            Predicate::Between {
                operand,
                low,
                high,
                negated: operator == Op::Nbetween,
            }
        }
        Op::Empty | Op::Nempty => {
            let want_empty = truthy(value) == (operator == Op::Empty);
            let blank = b.bind(Value::String(String::new()));
            if want_empty {
                Predicate::or(vec![
                    Predicate::IsNull {
                        operand: operand.clone(),
                        negated: false,
                    },
                    Predicate::Compare {
                        left: operand,
                        op: CompareOp::Eq,
                        right: Operand::Param(blank),
                    },
                ])
            } else {
                Predicate::and(vec![
                    Predicate::IsNull {
                        operand: operand.clone(),
                        negated: true,
                    },
                    Predicate::Compare {
                        left: operand,
                        op: CompareOp::Neq,
                        right: Operand::Param(blank),
                    },
                ])
            }
        }
        Op::Contains
        | Op::Ncontains
        | Op::Icontains
        | Op::Nicontains
        | Op::StartsWith
        | Op::NstartsWith
        | Op::IstartsWith
        | Op::NistartsWith
        | Op::EndsWith
        | Op::NendsWith
        | Op::IendsWith
        | Op::NiendsWith => {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => {
                    return Err(EngineError::invalid_query(format!(
                        "\"{}\" on \"{}\" needs a value",
                        operator.as_str(),
                        field
                    )))
                }
                other => other.to_string(),
            };
            let (case_insensitive, negated, pattern) = match operator {
                Op::Contains => (false, false, format!("%{}%", text)),
                Op::Ncontains => (false, true, format!("%{}%", text)),
                Op::Icontains => (true, false, format!("%{}%", text)),
                Op::Nicontains => (true, true, format!("%{}%", text)),
                Op::StartsWith => (false, false, format!("{}%", text)),
                Op::NstartsWith => (false, true, format!("{}%", text)),
                Op::IstartsWith => (true, false, format!("{}%", text)),
                Op::NistartsWith => (true, true, format!("{}%", text)),
                Op::EndsWith => (false, false, format!("%{}", text)),
                Op::NendsWith => (false, true, format!("%{}", text)),
                Op::IendsWith => (true, false, format!("%{}", text)),
                _ => (true, true, format!("%{}", text)),
            };
            let pattern = if case_insensitive {
                pattern.to_lowercase()
            } else {
                pattern
            };
            Predicate::Like {
                operand,
                pattern: b.bind(Value::String(pattern)),
                case_insensitive,
                negated,
            }
        }
    };

    Ok(predicate)
}

/// Brings a filter value to the column's type where the text is unambiguous
pub(crate) fn coerce_value(value: &Value, field_type: FieldType) -> Value {
    match (value, field_type) {
        (Value::String(s), t) if t.is_integer() => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        (Value::String(s), FieldType::Float) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        (Value::String(s), FieldType::Boolean) => match s.as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => value.clone(),
        },
        (Value::Number(n), FieldType::Boolean) => match n.as_i64() {
            Some(1) => Value::Bool(true),
            Some(0) => Value::Bool(false),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}

/// `_in`, `_between`: arrays, CSV strings or a single scalar
fn list_value(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| Value::String(p.to_string()))
            .collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => !matches!(s.as_str(), "false" | "0"),
        Value::Number(n) => n.as_f64() != Some(0.0),
        _ => true,
    }
}
