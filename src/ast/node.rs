//! Request tree node types

use crate::error::{EngineError, EngineResult};
use crate::query::{FieldFunction, Filter, QuerySpec};
use crate::schema::{JunctionDescriptor, Relation, SchemaOverview};

/// Root of a request: one collection and everything nested below it
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    /// Root collection
    pub name: String,
    pub query: QuerySpec,
    pub children: Vec<ChildNode>,
    /// Permission cases of the root collection; `when_case` indices point here
    pub cases: Vec<Filter>,
}

/// Closed set of node kinds below a level
#[derive(Debug, Clone, PartialEq)]
pub enum ChildNode {
    Field(FieldNode),
    M2O(NestedNode),
    O2M(NestedNode),
    Translations(NestedNode),
    M2M(M2MNode),
    A2O(A2ONode),
}

impl ChildNode {
    /// Key this node occupies in its parent's output row
    pub fn field_key(&self) -> &str {
        match self {
            ChildNode::Field(node) => &node.field_key,
            ChildNode::M2O(node) | ChildNode::O2M(node) | ChildNode::Translations(node) => {
                &node.field_key
            }
            ChildNode::M2M(node) => &node.node.field_key,
            ChildNode::A2O(node) => &node.field_key,
        }
    }

    pub fn is_relational(&self) -> bool {
        !matches!(self, ChildNode::Field(_))
    }
}

/// Plain column (or synthetic field)
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub name: String,
    pub field_key: String,
    pub function: Option<FieldFunction>,
    /// `None`: always visible. Empty: never visible.
    pub when_case: Option<Vec<usize>>,
}

/// Many-to-one, one-to-many or translations branch
#[derive(Debug, Clone, PartialEq)]
pub struct NestedNode {
    /// Related collection
    pub name: String,
    pub field_key: String,
    pub relation: Relation,
    /// Column on the parent rows matched against `related_key`
    pub parent_key: String,
    /// Column on the related rows matched against `parent_key`
    pub related_key: String,
    pub query: QuerySpec,
    pub children: Vec<ChildNode>,
    pub cases: Vec<Filter>,
    /// Visibility of the parent's key column
    pub when_case: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct M2MNode {
    /// Level over the related collection, keyed by the junction's parent column
    pub node: NestedNode,
    pub junction: JunctionDescriptor,
}

/// Any-to-one branch: one sub-level per candidate collection
#[derive(Debug, Clone, PartialEq)]
pub struct A2ONode {
    pub field_key: String,
    pub relation: Relation,
    /// Column on the parent rows holding the related key
    pub parent_key: String,
    /// Column on the parent rows naming the related collection
    pub collection_field: String,
    pub branches: Vec<A2OBranch>,
    pub when_case: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct A2OBranch {
    /// Candidate collection
    pub name: String,
    /// Primary key of `name`
    pub related_key: String,
    pub query: QuerySpec,
    pub children: Vec<ChildNode>,
    pub cases: Vec<Filter>,
}

impl Ast {
    /// Checks that every relational node refers to a relation of the schema
    pub fn validate(&self, schema: &SchemaOverview) -> EngineResult<()> {
        schema.collection(&self.name)?;
        validate_children(schema, &self.children)
    }
}

fn validate_children(schema: &SchemaOverview, children: &[ChildNode]) -> EngineResult<()> {
    for child in children {
        match child {
            ChildNode::Field(_) => {}
            ChildNode::M2O(node) | ChildNode::O2M(node) | ChildNode::Translations(node) => {
                validate_nested(schema, node)?;
            }
            ChildNode::M2M(node) => {
                validate_nested(schema, &node.node)?;
                schema.collection(&node.junction.collection)?;
            }
            ChildNode::A2O(node) => {
                ensure_relation(schema, &node.relation)?;
                let allowed = node
                    .relation
                    .meta
                    .as_ref()
                    .and_then(|m| m.one_allowed_collections.as_ref());
                for branch in &node.branches {
                    if !allowed.map_or(false, |a| a.contains(&branch.name)) {
                        return Err(EngineError::invalid_query(format!(
                            "\"{}\" is not an allowed collection of {}.{}",
                            branch.name, node.relation.collection, node.relation.field
                        )));
                    }
                    schema.collection(&branch.name)?;
                    validate_children(schema, &branch.children)?;
                }
            }
        }
    }
    Ok(())
}

fn validate_nested(schema: &SchemaOverview, node: &NestedNode) -> EngineResult<()> {
    ensure_relation(schema, &node.relation)?;
    schema.collection(&node.name)?;
    validate_children(schema, &node.children)
}

fn ensure_relation(schema: &SchemaOverview, relation: &Relation) -> EngineResult<()> {
    if schema.relations.iter().any(|r| r == relation) {
        Ok(())
    } else {
        Err(EngineError::SchemaMismatch(format!(
            "relation {}.{} is not part of the schema",
            relation.collection, relation.field
        )))
    }
}
