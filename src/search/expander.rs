//! Free-text search expansion
//!
//! A search term becomes an OR over the collection's searchable columns,
//! plus one `EXISTS` per searchable to-many relation whose inner condition
//! is the same expansion one level down, AND-ed with the related
//! collection's permission predicate.

use serde_json::{Number, Value};
use tracing::debug;
use uuid::Uuid;

use crate::compiler::{
    ClauseBuilder, ColumnRef, CompareOp, FilterCompiler, Join, JoinKind, Operand, Predicate,
    Scope, SubQuery, TableRef,
};
use crate::context::RequestContext;
use crate::error::EngineResult;
use crate::observability::Event;
use crate::schema::{FieldType, RelationInfo};

/// Predicate tree with its own bindings
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPredicate {
    pub predicate: Predicate,
    pub bindings: Vec<Value>,
}

pub struct SearchExpander<'c> {
    ctx: &'c RequestContext,
}

impl<'c> SearchExpander<'c> {
    pub fn new(ctx: &'c RequestContext) -> Self {
        Self { ctx }
    }

    /// Expands `term` over `collection`.
    ///
    /// `max_depth` of `None` follows relations until a collection repeats on
    /// the current path; `Some(0)` searches the collection's own columns only.
    pub fn expand(
        &self,
        collection: &str,
        term: &str,
        depth: u32,
        max_depth: Option<u32>,
    ) -> EngineResult<SearchPredicate> {
        let mut b = ClauseBuilder::new();
        let mut joins = Vec::new();
        let predicate = self.expand_in(
            &mut b,
            &Scope::root(collection),
            term,
            depth,
            max_depth,
            &mut joins,
        )?;
        Ok(SearchPredicate {
            predicate,
            bindings: b.bindings,
        })
    }

    pub(crate) fn expand_in(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        term: &str,
        depth: u32,
        max_depth: Option<u32>,
        joins: &mut Vec<Join>,
    ) -> EngineResult<Predicate> {
        let mut path = Vec::new();
        let predicate = self.expand_level(b, scope, joins, term, depth, max_depth, &mut path)?;

        debug!(
            event = Event::SearchExpanded.as_str(),
            request_id = %self.ctx.request_id,
            collection = %scope.collection,
            max_depth = ?max_depth,
            exists = predicate.exists_count(),
        );

        Ok(predicate)
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_level(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        joins: &mut Vec<Join>,
        term: &str,
        depth: u32,
        max_depth: Option<u32>,
        path: &mut Vec<String>,
    ) -> EngineResult<Predicate> {
        let schema = self.ctx.schema();
        let collection = schema.collection(&scope.collection)?;
        let outcome = self.ctx.read_permissions(&scope.collection);
        let cases = outcome.cases();
        let filters = FilterCompiler::new(self.ctx);

        let mut parts = Vec::new();

        for (name, field) in collection.column_fields() {
            if !field.searchable {
                continue;
            }
            let when_case = outcome.when_case(name);
            if matches!(&when_case, Some(indices) if indices.is_empty()) {
                continue;
            }

            let operand = Operand::Column(ColumnRef::new(scope.alias.clone(), name.clone()));
            let condition = if field.field_type.is_text() {
                Predicate::Like {
                    operand,
                    pattern: b.bind(Value::String(format!("%{}%", term.to_lowercase()))),
                    case_insensitive: true,
                    negated: false,
                }
            } else if field.field_type.is_numeric() {
                match numeric_term(term, field.field_type) {
                    Some(number) => equals(b, operand, number),
                    None => continue,
                }
            } else if field.field_type == FieldType::Uuid && Uuid::parse_str(term).is_ok() {
                equals(b, operand, Value::String(term.to_string()))
            } else {
                continue;
            };

            parts.push(match when_case {
                Some(indices) => Predicate::and(vec![
                    condition,
                    filters.cases_predicate(b, scope, joins, &cases, &indices)?,
                ]),
                None => condition,
            });
        }

        let descend = max_depth.map_or(true, |max| depth < max);
        if descend {
            path.push(scope.collection.clone());
            for (field, info) in schema.to_many_relations(&scope.collection) {
                if !schema.is_relation_searchable(&scope.collection, &field) {
                    continue;
                }
                let Some(target) = info.target_collection() else {
                    continue;
                };
                if max_depth.is_none() && path.iter().any(|c| c == target) {
                    continue;
                }
                parts.push(self.expand_relation(
                    b, scope, &field, &info, term, depth, max_depth, path,
                )?);
            }
            path.pop();
        }

        Ok(Predicate::or(parts))
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_relation(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        field: &str,
        info: &RelationInfo,
        term: &str,
        depth: u32,
        max_depth: Option<u32>,
        path: &mut Vec<String>,
    ) -> EngineResult<Predicate> {
        let schema = self.ctx.schema();
        let parent_pk = schema.primary_key(&scope.collection)?;
        let parent_key = ColumnRef::new(scope.alias.clone(), parent_pk);

        let subquery = match info {
            RelationInfo::O2M { relation } | RelationInfo::Translations { relation } => {
                let sub_alias = b.sub_alias();
                let child = scope.child(
                    &relation.collection,
                    &sub_alias,
                    &format!("{}[{}]", field, sub_alias),
                );
                let mut sub_joins = Vec::new();
                let inner = self.branch_condition(
                    b,
                    &child,
                    &mut sub_joins,
                    term,
                    depth,
                    max_depth,
                    path,
                )?;
                SubQuery {
                    from: TableRef::new(relation.collection.clone(), sub_alias.clone()),
                    joins: sub_joins,
                    where_clause: Predicate::and(vec![
                        Predicate::column_eq(
                            ColumnRef::new(sub_alias, relation.field.clone()),
                            parent_key,
                        ),
                        inner,
                    ]),
                }
            }
            RelationInfo::M2M {
                junction,
                related_collection,
                ..
            } => {
                let related_pk = schema.primary_key(related_collection)?;
                let sub_alias = b.sub_alias();
                let join_alias = b.join_alias();
                let junction_scope = scope.child(
                    &junction.collection,
                    &sub_alias,
                    &format!("{}[{}]", field, sub_alias),
                );
                let related_scope =
                    junction_scope.child(related_collection, &join_alias, &junction.related_field);

                let mut sub_joins = vec![Join {
                    kind: JoinKind::Inner,
                    table: TableRef::new(related_collection.clone(), join_alias.clone()),
                    on: Predicate::column_eq(
                        ColumnRef::new(join_alias, related_pk),
                        ColumnRef::new(sub_alias.clone(), junction.related_field.clone()),
                    ),
                }];
                let inner = self.branch_condition(
                    b,
                    &related_scope,
                    &mut sub_joins,
                    term,
                    depth,
                    max_depth,
                    path,
                )?;
                let junction_permissions = FilterCompiler::new(self.ctx).row_permissions(
                    b,
                    &junction_scope,
                    &mut sub_joins,
                )?;
                SubQuery {
                    from: TableRef::new(junction.collection.clone(), sub_alias.clone()),
                    joins: sub_joins,
                    where_clause: Predicate::and(vec![
                        Predicate::column_eq(
                            ColumnRef::new(sub_alias, junction.parent_field.clone()),
                            parent_key,
                        ),
                        inner,
                        junction_permissions,
                    ]),
                }
            }
            RelationInfo::M2O { .. } | RelationInfo::A2O { .. } => return Ok(Predicate::Const(false)),
        };

        Ok(Predicate::Exists {
            subquery: Box::new(subquery),
            negated: false,
        })
    }

    /// Inner condition of one branch; a denied collection is always false
    #[allow(clippy::too_many_arguments)]
    fn branch_condition(
        &self,
        b: &mut ClauseBuilder,
        scope: &Scope,
        joins: &mut Vec<Join>,
        term: &str,
        depth: u32,
        max_depth: Option<u32>,
        path: &mut Vec<String>,
    ) -> EngineResult<Predicate> {
        if self.ctx.read_permissions(&scope.collection).is_denied() {
            return Ok(Predicate::Const(false));
        }
        let inner = self.expand_level(b, scope, joins, term, depth + 1, max_depth, path)?;
        let permissions = FilterCompiler::new(self.ctx).row_permissions(b, scope, joins)?;
        Ok(Predicate::and(vec![inner, permissions]))
    }
}

fn equals(b: &mut ClauseBuilder, operand: Operand, value: Value) -> Predicate {
    Predicate::Compare {
        left: operand,
        op: CompareOp::Eq,
        right: Operand::Param(b.bind(value)),
    }
}

/// Numeric columns only match terms that survive a round trip
fn numeric_term(term: &str, field_type: FieldType) -> Option<Value> {
    if field_type.is_integer() {
        let n: i64 = term.parse().ok()?;
        return (n.to_string() == term).then(|| Value::from(n));
    }
    let n: f64 = term.parse().ok()?;
    if !n.is_finite() || n.to_string() != term {
        return None;
    }
    Number::from_f64(n).map(Value::Number)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::compiler::Placeholder;
    use crate::config::EngineConfig;
    use crate::permissions::{Accountability, PermissionRule};
    use crate::schema::{CollectionOverview, FieldOverview, Relation, SchemaOverview};
    use serde_json::json;

    fn field(t: FieldType) -> FieldOverview {
        FieldOverview::new(t)
    }

    fn search_schema(o2m_searchable: bool) -> SchemaOverview {
        let o2m = if o2m_searchable {
            field(FieldType::Alias).with_special("o2m")
        } else {
            field(FieldType::Alias).with_special("o2m").not_searchable()
        };
        SchemaOverview::new()
            .with_collection(
                "test",
                CollectionOverview::new("id")
                    .with_field("id", field(FieldType::Integer))
                    .with_field("title", field(FieldType::String))
                    .with_field("o2m_relation", o2m)
                    .with_field(
                        "translations",
                        field(FieldType::Alias).with_special("translations"),
                    )
                    .with_field(
                        "m2m_relation",
                        field(FieldType::Alias).with_special("m2m"),
                    ),
            )
            .with_collection(
                "o2m_related",
                CollectionOverview::new("id")
                    .with_field("id", field(FieldType::Integer))
                    .with_field("name", field(FieldType::String))
                    .with_field("test_id", field(FieldType::Integer))
                    .with_field(
                        "o2m_related_sub",
                        field(FieldType::Alias).with_special("o2m"),
                    ),
            )
            .with_collection(
                "o2m_related_sub",
                CollectionOverview::new("id")
                    .with_field("id", field(FieldType::Integer))
                    .with_field("name", field(FieldType::String))
                    .with_field("o2m_related_id", field(FieldType::Integer)),
            )
            .with_collection(
                "test_translations",
                CollectionOverview::new("id")
                    .with_field("id", field(FieldType::Integer))
                    .with_field("test_id", field(FieldType::Integer))
                    .with_field("text", field(FieldType::Text)),
            )
            .with_collection(
                "m2m_related",
                CollectionOverview::new("id")
                    .with_field("id", field(FieldType::Integer))
                    .with_field("name", field(FieldType::String))
                    .with_field(
                        "m2m_relation_sub",
                        field(FieldType::Alias).with_special("o2m"),
                    ),
            )
            .with_collection(
                "test_m2m_related",
                CollectionOverview::new("id")
                    .with_field("id", field(FieldType::Integer))
                    .with_field("test_id", field(FieldType::Integer))
                    .with_field("m2m_related_id", field(FieldType::Integer)),
            )
            .with_collection(
                "m2m_relation_sub",
                CollectionOverview::new("id")
                    .with_field("id", field(FieldType::Integer))
                    .with_field("name", field(FieldType::String))
                    .with_field("m2m_related_id", field(FieldType::Integer)),
            )
            .with_relation(Relation::m2o("o2m_related", "test_id", "test").with_one_field("o2m_relation"))
            .with_relation(
                Relation::m2o("o2m_related_sub", "o2m_related_id", "o2m_related")
                    .with_one_field("o2m_related_sub"),
            )
            .with_relation(
                Relation::m2o("test_translations", "test_id", "test").with_one_field("translations"),
            )
            .with_relation(
                Relation::m2o("test_m2m_related", "test_id", "test")
                    .with_one_field("m2m_relation")
                    .with_junction_field("m2m_related_id"),
            )
            .with_relation(
                Relation::m2o("test_m2m_related", "m2m_related_id", "m2m_related")
                    .with_junction_field("test_id"),
            )
            .with_relation(
                Relation::m2o("m2m_relation_sub", "m2m_related_id", "m2m_related")
                    .with_one_field("m2m_relation_sub"),
            )
    }

    fn admin(schema: SchemaOverview) -> RequestContext {
        RequestContext::admin(Arc::new(schema))
    }

    fn collections(p: &Predicate, out: &mut BTreeSet<String>) {
        match p {
            Predicate::And(items) | Predicate::Or(items) => {
                items.iter().for_each(|i| collections(i, out))
            }
            Predicate::Not(inner) => collections(inner, out),
            Predicate::Exists { subquery, .. } => {
                out.insert(subquery.from.collection.clone());
                for join in &subquery.joins {
                    out.insert(join.table.collection.clone());
                }
                collections(&subquery.where_clause, out);
            }
            _ => {}
        }
    }

    fn reached(p: &Predicate) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        collections(p, &mut out);
        out
    }

    #[test]
    fn test_depth_zero_is_own_columns_only() {
        let ctx = admin(search_schema(true));
        let result = SearchExpander::new(&ctx)
            .expand("test", "foo", 0, Some(0))
            .unwrap();
        assert_eq!(
            result.predicate,
            Predicate::Like {
                operand: Operand::Column(ColumnRef::new("test", "title")),
                pattern: Placeholder(0),
                case_insensitive: true,
                negated: false,
            }
        );
        assert_eq!(result.bindings, vec![json!("%foo%")]);
    }

    #[test]
    fn test_deeper_expansion_is_a_superset() {
        let ctx = admin(search_schema(true));
        let expander = SearchExpander::new(&ctx);
        let one = expander.expand("test", "foo", 0, Some(1)).unwrap();
        let two = expander.expand("test", "foo", 0, Some(2)).unwrap();

        assert_eq!(one.predicate.exists_count(), 3);
        assert_eq!(two.predicate.exists_count(), 5);

        let reached_one = reached(&one.predicate);
        let reached_two = reached(&two.predicate);
        assert!(reached_one.is_subset(&reached_two));
        assert!(!reached_one.contains("o2m_related_sub"));
        assert!(reached_two.contains("o2m_related_sub"));
    }

    #[test]
    fn test_unbounded_reaches_every_searchable_branch() {
        let ctx = admin(search_schema(true));
        let result = SearchExpander::new(&ctx)
            .expand("test", "foo", 0, None)
            .unwrap();
        let reached = reached(&result.predicate);
        for collection in [
            "o2m_related",
            "o2m_related_sub",
            "test_translations",
            "test_m2m_related",
            "m2m_related",
            "m2m_relation_sub",
        ] {
            assert!(reached.contains(collection), "missing {}", collection);
        }
    }

    #[test]
    fn test_unsearchable_relation_is_skipped() {
        let ctx = admin(search_schema(false));
        let result = SearchExpander::new(&ctx)
            .expand("test", "foo", 0, None)
            .unwrap();
        let reached = reached(&result.predicate);
        assert!(!reached.contains("o2m_related"));
        assert!(reached.contains("m2m_related"));
    }

    #[test]
    fn test_numeric_term_matches_keys() {
        let ctx = admin(search_schema(true));
        let result = SearchExpander::new(&ctx)
            .expand("test", "42", 0, Some(0))
            .unwrap();
        assert!(matches!(result.predicate, Predicate::Or(ref items) if items.len() == 2));
        assert_eq!(result.bindings, vec![json!(42), json!("%42%")]);

        assert_eq!(numeric_term("042", FieldType::Integer), None);
        assert_eq!(numeric_term("1.5", FieldType::Float), Some(json!(1.5)));
    }

    #[test]
    fn test_denied_branches_stay_false() {
        let ctx = RequestContext::new(
            Accountability::user("u1", "editor"),
            Arc::new(search_schema(true)),
            vec![PermissionRule::read_all("test")],
            EngineConfig::default(),
        );
        let result = SearchExpander::new(&ctx)
            .expand("test", "foo", 0, None)
            .unwrap();

        // Own column plus three branches, none of them descended into
        assert_eq!(result.predicate.exists_count(), 3);
        match &result.predicate {
            Predicate::Or(items) => {
                assert_eq!(items.len(), 4);
                for item in &items[1..] {
                    match item {
                        Predicate::Exists { subquery, .. } => {
                            assert!(matches!(
                                &subquery.where_clause,
                                Predicate::And(parts) if parts.contains(&Predicate::Const(false))
                            ));
                        }
                        other => panic!("expected EXISTS, got {:?}", other),
                    }
                }
            }
            other => panic!("expected OR, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_guard_only_when_unbounded() {
        let schema = SchemaOverview::new()
            .with_collection(
                "nodes",
                CollectionOverview::new("id")
                    .with_field("id", field(FieldType::Integer))
                    .with_field("name", field(FieldType::String))
                    .with_field("parent", field(FieldType::Integer))
                    .with_field("children", field(FieldType::Alias).with_special("o2m")),
            )
            .with_relation(Relation::m2o("nodes", "parent", "nodes").with_one_field("children"));
        let ctx = admin(schema);
        let expander = SearchExpander::new(&ctx);

        assert_eq!(
            expander
                .expand("nodes", "x", 0, None)
                .unwrap()
                .predicate
                .exists_count(),
            0
        );
        assert_eq!(
            expander
                .expand("nodes", "x", 0, Some(2))
                .unwrap()
                .predicate
                .exists_count(),
            2
        );
    }
}
