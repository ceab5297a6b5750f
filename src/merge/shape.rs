//! Final output shaping
//!
//! Walks the request tree once merging is complete and rebuilds every row
//! with exactly the requested keys, in request order. Helper columns that
//! were only selected to stitch levels together disappear here.

use serde_json::Value;

use crate::ast::ChildNode;
use crate::compiler::key_alias;
use crate::query::QuerySpec;
use crate::store::Row;

use super::synthetic::SyntheticFields;

/// Shapes the rows of one level.
///
/// `link_key` is the helper column that tied the level to its parent.
pub fn shape_level(
    collection: &str,
    query: &QuerySpec,
    children: &[ChildNode],
    rows: Vec<Row>,
    link_key: Option<&str>,
    synthetic: &SyntheticFields,
) -> Vec<Value> {
    rows.into_iter()
        .map(|row| {
            Value::Object(if query.is_aggregate() {
                shape_aggregate(row, link_key)
            } else {
                shape_row(collection, children, row, synthetic)
            })
        })
        .collect()
}

/// Rebuilds one row from its request children
pub fn shape_row(
    collection: &str,
    children: &[ChildNode],
    row: Row,
    synthetic: &SyntheticFields,
) -> Row {
    let mut out = Row::new();

    for child in children {
        let key = child.field_key();
        let value = match child {
            ChildNode::Field(node) => synthetic
                .compute(collection, &node.name, &row)
                .or_else(|| row.get(key).cloned())
                .unwrap_or(Value::Null),
            ChildNode::M2O(node) => match row.get(key) {
                Some(Value::Object(related)) => Value::Object(shape_row(
                    &node.name,
                    &node.children,
                    related.clone(),
                    synthetic,
                )),
                _ => Value::Null,
            },
            ChildNode::O2M(node) | ChildNode::Translations(node) => {
                shape_many(row.get(key), |rows| {
                    shape_level(
                        &node.name,
                        &node.query,
                        &node.children,
                        rows,
                        Some(&key_alias(&node.related_key)),
                        synthetic,
                    )
                })
            }
            ChildNode::M2M(m2m) => shape_many(row.get(key), |rows| {
                shape_level(
                    &m2m.node.name,
                    &m2m.node.query,
                    &m2m.node.children,
                    rows,
                    Some(&m2m.node.related_key),
                    synthetic,
                )
            }),
            ChildNode::A2O(node) => {
                let discriminator = row
                    .get(&key_alias(&node.collection_field))
                    .and_then(Value::as_str);
                let branch = discriminator
                    .and_then(|name| node.branches.iter().find(|b| b.name == name));
                match (row.get(key), branch) {
                    (Some(Value::Object(related)), Some(branch)) => Value::Object(shape_row(
                        &branch.name,
                        &branch.children,
                        related.clone(),
                        synthetic,
                    )),
                    _ => Value::Null,
                }
            }
        };
        out.insert(key.to_string(), value);
    }

    out
}

fn shape_many<F>(value: Option<&Value>, shape: F) -> Value
where
    F: FnOnce(Vec<Row>) -> Vec<Value>,
{
    match value {
        Some(Value::Array(items)) => {
            let rows = items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect();
            Value::Array(shape(rows))
        }
        _ => Value::Null,
    }
}

/// Aggregate rows keep their group keys and nested aggregate objects.
///
/// A requested group on the link column is selected under its own alias,
/// so the link itself always goes.
fn shape_aggregate(row: Row, link_key: Option<&str>) -> Row {
    match link_key {
        Some(link) => row.into_iter().filter(|(key, _)| key != link).collect(),
        None => row,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;
    use crate::fixtures;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    #[test]
    fn test_strips_helpers_and_restores_order() {
        let ctx = fixtures::admin_ctx();
        let query = QuerySpec::from_value(&json!({"fields": ["title", "author.name"]})).unwrap();
        let ast = AstBuilder::new(&ctx).build("articles", &query).unwrap();

        let merged = row(json!({
            "$key_id": 1,
            "$key_author": 10,
            "author": {"$key_id": 10, "name": "Ann"},
            "title": "Rust"
        }));
        let out = shape_row("articles", &ast.children, merged, &SyntheticFields::new());

        let keys: Vec<&String> = out.keys().collect();
        assert_eq!(keys, vec!["title", "author"]);
        assert_eq!(Value::Object(out), json!({"title": "Rust", "author": {"name": "Ann"}}));
    }

    #[test]
    fn test_synthetic_fields() {
        let ctx = fixtures::admin_ctx();
        let query = QuerySpec::from_value(&json!({"fields": ["id", "thumbnail"]})).unwrap();
        let ast = AstBuilder::new(&ctx).build("articles", &query).unwrap();

        let plain = shape_row(
            "articles",
            &ast.children,
            row(json!({"id": 1})),
            &SyntheticFields::new(),
        );
        assert_eq!(Value::Object(plain), json!({"id": 1, "thumbnail": null}));

        let synthetic =
            SyntheticFields::new().register("articles", "thumbnail", |_| json!("thumb.png"));
        let computed = shape_row("articles", &ast.children, row(json!({"id": 1})), &synthetic);
        assert_eq!(computed["thumbnail"], json!("thumb.png"));
    }

    #[test]
    fn test_aggregate_link_key_removed() {
        let query = QuerySpec::from_value(&json!({"aggregate": {"count": "*"}})).unwrap();
        let rows = vec![row(json!({"$key_article": 1, "article": 1, "count": 3}))];
        let out = shape_level(
            "comments",
            &query,
            &[],
            rows,
            Some("$key_article"),
            &SyntheticFields::new(),
        );
        assert_eq!(out, vec![json!({"article": 1, "count": 3})]);
    }
}
