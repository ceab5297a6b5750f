//! Request tree construction from a field list
//!
//! Dotted paths are grouped under their first segment, `*` expands to the
//! readable columns of a level, `field:collection` scopes select any-to-one
//! branches, and `deep` entries supply the query of each nested level.

use std::collections::HashSet;

use crate::compiler::JUNCTION_PARENT_KEY;
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::permissions::PermissionOutcome;
use crate::query::{FieldRef, QuerySpec, SortSpec};
use crate::schema::RelationInfo;

use super::node::{A2OBranch, A2ONode, Ast, ChildNode, FieldNode, M2MNode, NestedNode};

/// Deepest relational nesting accepted in one request
pub const MAX_DEPTH: usize = 10;

/// One requested entry before resolution
enum Entry {
    Plain {
        key: String,
        target: String,
    },
    Nested {
        key: String,
        field: String,
        /// `(collection scope, remaining path)` per requested sub-field
        paths: Vec<(Option<String>, String)>,
    },
}

pub struct AstBuilder<'c> {
    ctx: &'c RequestContext,
}

impl<'c> AstBuilder<'c> {
    pub fn new(ctx: &'c RequestContext) -> Self {
        Self { ctx }
    }

    pub fn build(&self, collection: &str, query: &QuerySpec) -> EngineResult<Ast> {
        let outcome = self.ctx.read_permissions(collection);
        let children = self.children(collection, query, 0)?;
        Ok(Ast {
            name: collection.to_string(),
            query: query.clone(),
            children,
            cases: outcome.cases(),
        })
    }

    fn children(
        &self,
        collection: &str,
        query: &QuerySpec,
        depth: usize,
    ) -> EngineResult<Vec<ChildNode>> {
        if depth > MAX_DEPTH {
            return Err(EngineError::invalid_query(format!(
                "relational nesting deeper than {} levels",
                MAX_DEPTH
            )));
        }

        let schema = self.ctx.schema();
        let overview = schema.collection(collection)?;
        let outcome = self.ctx.read_permissions(collection);

        let requested = match &query.fields {
            Some(fields) => fields.clone(),
            None if query.is_aggregate() => Vec::new(),
            None => vec!["*".to_string()],
        };

        let entries = group_entries(&requested, query);
        let nested_keys: HashSet<&str> = entries
            .iter()
            .filter_map(|e| match e {
                Entry::Nested { key, .. } => Some(key.as_str()),
                Entry::Plain { .. } => None,
            })
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut children = Vec::new();

        for entry in &entries {
            match entry {
                Entry::Plain { target, .. } if target == "*" => {
                    for (name, _) in overview.column_fields() {
                        if nested_keys.contains(name.as_str()) || !outcome.allows_field(name) {
                            continue;
                        }
                        if seen.insert(name.clone()) {
                            children.push(ChildNode::Field(FieldNode {
                                name: name.clone(),
                                field_key: name.clone(),
                                function: None,
                                when_case: outcome.when_case(name),
                            }));
                        }
                    }
                }
                Entry::Plain { key, target } => {
                    if nested_keys.contains(key.as_str()) {
                        continue;
                    }
                    let field_ref = FieldRef::parse(target)?;
                    schema.field(collection, &field_ref.field)?;
                    let field_key = if key != target {
                        key.clone()
                    } else {
                        field_ref.output_key()
                    };
                    if !seen.insert(field_key.clone()) {
                        continue;
                    }

                    let to_many = schema
                        .relation_for(collection, &field_ref.field)
                        .filter(|info| info.kind().is_to_many());
                    match to_many {
                        Some(info)
                            if field_ref.function.is_none()
                                && outcome.allows_field(&field_ref.field) =>
                        {
                            // A bare to-many field reads as the related rows
                            children.push(self.nested(
                                collection,
                                &outcome,
                                query,
                                &field_key,
                                &field_ref.field,
                                info,
                                vec![(None, "*".to_string())],
                                depth,
                            )?);
                        }
                        _ => children.push(ChildNode::Field(FieldNode {
                            when_case: outcome.when_case(&field_ref.field),
                            name: field_ref.field,
                            field_key,
                            function: field_ref.function,
                        })),
                    }
                }
                Entry::Nested { key, field, paths } => {
                    if !seen.insert(key.clone()) {
                        continue;
                    }
                    schema.field(collection, field)?;
                    let Some(info) = schema.relation_for(collection, field) else {
                        return Err(EngineError::invalid_query(format!(
                            "field \"{}\" on \"{}\" is not relational",
                            field, collection
                        )));
                    };
                    if !outcome.allows_field(field) {
                        children.push(ChildNode::Field(FieldNode {
                            name: field.clone(),
                            field_key: key.clone(),
                            function: None,
                            when_case: Some(Vec::new()),
                        }));
                        continue;
                    }
                    children.push(self.nested(
                        collection,
                        &outcome,
                        query,
                        key,
                        field,
                        info,
                        paths.clone(),
                        depth,
                    )?);
                }
            }
        }

        Ok(children)
    }

    #[allow(clippy::too_many_arguments)]
    fn nested(
        &self,
        collection: &str,
        outcome: &PermissionOutcome,
        query: &QuerySpec,
        key: &str,
        field: &str,
        info: RelationInfo,
        paths: Vec<(Option<String>, String)>,
        depth: usize,
    ) -> EngineResult<ChildNode> {
        let schema = self.ctx.schema();

        if let RelationInfo::A2O {
            relation,
            allowed,
            collection_field,
        } = info
        {
            let mut per_collection: Vec<(String, Vec<String>)> = Vec::new();
            for (scope, rest) in paths {
                let Some(target) = scope else {
                    return Err(EngineError::invalid_query(format!(
                        "any-to-one field \"{}\" needs a \"{}:<collection>\" scope",
                        field, field
                    )));
                };
                if !allowed.contains(&target) {
                    return Err(EngineError::invalid_query(format!(
                        "\"{}\" is not an allowed collection of \"{}\"",
                        target, field
                    )));
                }
                match per_collection.iter_mut().find(|(c, _)| *c == target) {
                    Some((_, fields)) => fields.push(rest),
                    None => per_collection.push((target, vec![rest])),
                }
            }

            let mut branches = Vec::new();
            for (target, fields) in per_collection {
                let branch_outcome = self.ctx.read_permissions(&target);
                if branch_outcome.is_denied() {
                    continue;
                }
                let mut branch_query = query
                    .deep
                    .get(&format!("{}:{}", key, target))
                    .cloned()
                    .unwrap_or_default();
                branch_query.fields = Some(fields);
                let children = self.children(&target, &branch_query, depth + 1)?;
                branches.push(A2OBranch {
                    related_key: schema.primary_key(&target)?.to_string(),
                    name: target,
                    query: branch_query,
                    children,
                    cases: branch_outcome.cases(),
                });
            }

            return Ok(ChildNode::A2O(A2ONode {
                field_key: key.to_string(),
                parent_key: relation.field.clone(),
                relation,
                collection_field,
                branches,
                when_case: outcome.when_case(field),
            }));
        }

        if paths.iter().any(|(scope, _)| scope.is_some()) {
            return Err(EngineError::invalid_query(format!(
                "only any-to-one fields take a collection scope, \"{}\" does not",
                field
            )));
        }

        let target = info
            .target_collection()
            .map(str::to_string)
            .ok_or_else(|| EngineError::invalid_query(format!("\"{}\" has no target", field)))?;
        let mut sub_query = query
            .deep
            .get(key)
            .or_else(|| query.deep.get(field))
            .cloned()
            .unwrap_or_default();
        sub_query.fields = Some(paths.into_iter().map(|(_, rest)| rest).collect());

        let child_outcome = self.ctx.read_permissions(&target);
        let parent_pk = schema.primary_key(collection)?.to_string();
        let related_pk = schema.primary_key(&target)?.to_string();
        let translations = matches!(info, RelationInfo::Translations { .. });

        let node = match info {
            RelationInfo::M2O { relation, .. } => {
                let children = self.children(&target, &sub_query, depth + 1)?;
                ChildNode::M2O(NestedNode {
                    name: target,
                    field_key: key.to_string(),
                    parent_key: relation.field.clone(),
                    related_key: related_pk,
                    relation,
                    query: sub_query,
                    children,
                    cases: child_outcome.cases(),
                    when_case: outcome.when_case(field),
                })
            }
            RelationInfo::O2M { relation } | RelationInfo::Translations { relation } => {
                if sub_query.sort.is_none() && !sub_query.is_aggregate() {
                    let sort = relation.sort_field().unwrap_or(&related_pk).to_string();
                    sub_query.sort = Some(vec![SortSpec::asc(sort)]);
                }
                let children = self.children(&target, &sub_query, depth + 1)?;
                let nested = NestedNode {
                    name: target,
                    field_key: key.to_string(),
                    parent_key: parent_pk,
                    related_key: relation.field.clone(),
                    relation,
                    query: sub_query,
                    children,
                    cases: child_outcome.cases(),
                    when_case: None,
                };
                if translations {
                    ChildNode::Translations(nested)
                } else {
                    ChildNode::O2M(nested)
                }
            }
            RelationInfo::M2M {
                relation, junction, ..
            } => {
                let children = self.children(&target, &sub_query, depth + 1)?;
                ChildNode::M2M(M2MNode {
                    node: NestedNode {
                        name: target,
                        field_key: key.to_string(),
                        parent_key: parent_pk,
                        related_key: JUNCTION_PARENT_KEY.to_string(),
                        relation,
                        query: sub_query,
                        children,
                        cases: child_outcome.cases(),
                        when_case: None,
                    },
                    junction,
                })
            }
            RelationInfo::A2O { .. } => {
                return Err(EngineError::invalid_query(format!(
                    "\"{}\" cannot be nested without a collection scope",
                    field
                )))
            }
        };

        Ok(node)
    }
}

/// Groups dotted paths under their first segment, keeping request order
fn group_entries(requested: &[String], query: &QuerySpec) -> Vec<Entry> {
    let mut entries: Vec<Entry> = Vec::new();

    for raw in requested {
        match raw.split_once('.') {
            Some((head, rest)) => {
                let (key, scope) = match head.split_once(':') {
                    Some((field, collection)) => (field, Some(collection.to_string())),
                    None => (head, None),
                };
                let existing = entries.iter_mut().find_map(|e| match e {
                    Entry::Nested { key: k, paths, .. } if k == key => Some(paths),
                    _ => None,
                });
                match existing {
                    Some(paths) => paths.push((scope, rest.to_string())),
                    None => entries.push(Entry::Nested {
                        key: key.to_string(),
                        field: query
                            .alias
                            .get(key)
                            .cloned()
                            .unwrap_or_else(|| key.to_string()),
                        paths: vec![(scope, rest.to_string())],
                    }),
                }
            }
            None => entries.push(Entry::Plain {
                key: raw.clone(),
                target: query.alias.get(raw).cloned().unwrap_or_else(|| raw.clone()),
            }),
        }
    }

    entries
}
