//! # Statement AST
//!
//! Abstract syntax tree consumed by the knowledge base: constants, variables,
//! applications, connectives and quantifiers. Nodes are immutable and carry a
//! type reference plus a metadata map; equality and hashing are structural.
//!
//! ## Builders
//!
//! For programmatic construction of AST nodes, see the [`builders`] module,
//! which provides fluent constructors like `AtomBuilder`.

pub mod builders;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A handle naming a type known to the external `TypeSystem` collaborator.
///
/// SKIC never validates or constructs types; it only carries this reference
/// around so the type system and unification engine can consult it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    pub name: String,
}

impl TypeRef {
    pub fn new(name: impl Into<String>) -> Self {
        TypeRef { name: name.into() }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Logical connective kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectiveKind {
    And,
    Or,
    Not,
    Implies,
    Iff,
}

impl fmt::Display for ConnectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectiveKind::And => "AND",
            ConnectiveKind::Or => "OR",
            ConnectiveKind::Not => "NOT",
            ConnectiveKind::Implies => "IMPLIES",
            ConnectiveKind::Iff => "IFF",
        };
        write!(f, "{s}")
    }
}

/// Quantifier kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuantifierKind {
    ForAll,
    Exists,
}

impl fmt::Display for QuantifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuantifierKind::ForAll => "FORALL",
            QuantifierKind::Exists => "EXISTS",
        };
        write!(f, "{s}")
    }
}

/// Metadata attached to an AST node. A `BTreeMap` keeps key order
/// deterministic so structural hashing/equality and `with_metadata` merges
/// are stable across runs.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A statement AST node.
///
/// All variants carry a [`TypeRef`] and [`Metadata`]. Nodes are immutable:
/// every mutator (`with_metadata`) returns a new node rather than mutating in
/// place, since nodes are shared (reference-counted) across contexts and
/// indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AstNode {
    Constant {
        name: String,
        type_ref: TypeRef,
        metadata: Metadata,
    },
    Variable {
        name: String,
        id: u64,
        type_ref: TypeRef,
        metadata: Metadata,
    },
    Application {
        operator: Box<AstNode>,
        arguments: Vec<AstNode>,
        type_ref: TypeRef,
        metadata: Metadata,
    },
    Connective {
        kind: ConnectiveKind,
        operands: Vec<AstNode>,
        type_ref: TypeRef,
        metadata: Metadata,
    },
    Quantifier {
        kind: QuantifierKind,
        bound_vars: Vec<AstNode>,
        body: Box<AstNode>,
        type_ref: TypeRef,
        metadata: Metadata,
    },
}

impl AstNode {
    /// The node's own type reference.
    pub fn type_ref(&self) -> &TypeRef {
        match self {
            AstNode::Constant { type_ref, .. }
            | AstNode::Variable { type_ref, .. }
            | AstNode::Application { type_ref, .. }
            | AstNode::Connective { type_ref, .. }
            | AstNode::Quantifier { type_ref, .. } => type_ref,
        }
    }

    /// The node's metadata map.
    pub fn metadata(&self) -> &Metadata {
        match self {
            AstNode::Constant { metadata, .. }
            | AstNode::Variable { metadata, .. }
            | AstNode::Application { metadata, .. }
            | AstNode::Connective { metadata, .. }
            | AstNode::Quantifier { metadata, .. } => metadata,
        }
    }

    /// Returns a new node with `extra` merged into the existing metadata.
    /// Keys in `extra` overwrite existing keys; the original node is
    /// untouched.
    #[must_use]
    pub fn with_metadata(&self, extra: Metadata) -> Self {
        let mut clone = self.clone();
        let merged = clone.metadata_mut();
        for (k, v) in extra {
            merged.insert(k, v);
        }
        clone
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            AstNode::Constant { metadata, .. }
            | AstNode::Variable { metadata, .. }
            | AstNode::Application { metadata, .. }
            | AstNode::Connective { metadata, .. }
            | AstNode::Quantifier { metadata, .. } => metadata,
        }
    }

    /// True if this node is an `Application` whose operator is a `Constant`
    /// (i.e. a predicate application in the sense used by §4.1's candidate
    /// selection rule).
    pub fn as_predicate_application(&self) -> Option<(&str, &[AstNode])> {
        match self {
            AstNode::Application { operator, arguments, .. } => match operator.as_ref() {
                AstNode::Constant { name, .. } => Some((name.as_str(), arguments.as_slice())),
                _ => None,
            },
            _ => None,
        }
    }

    /// Every `Constant` appearing as a direct argument of an `Application`
    /// rooted at this node (used to populate the constant index).
    pub fn constant_arguments(&self) -> Vec<&str> {
        match self {
            AstNode::Application { arguments, .. } => arguments
                .iter()
                .filter_map(|arg| match arg {
                    AstNode::Constant { name, .. } => Some(name.as_str()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Every variable id appearing anywhere in this subtree.
    pub fn variable_ids(&self) -> Vec<u64> {
        let mut out = Vec::new();
        self.collect_variable_ids(&mut out);
        out
    }

    fn collect_variable_ids(&self, out: &mut Vec<u64>) {
        match self {
            AstNode::Variable { id, .. } => out.push(*id),
            AstNode::Application { operator, arguments, .. } => {
                operator.collect_variable_ids(out);
                for a in arguments {
                    a.collect_variable_ids(out);
                }
            }
            AstNode::Connective { operands, .. } => {
                for o in operands {
                    o.collect_variable_ids(out);
                }
            }
            AstNode::Quantifier { bound_vars, body, .. } => {
                for v in bound_vars {
                    v.collect_variable_ids(out);
                }
                body.collect_variable_ids(out);
            }
            AstNode::Constant { .. } => {}
        }
    }

    /// Structural complexity used by the optimiser's default cost estimate
    /// (§4.3): `Variable=10`, `Constant=1`, `Application=op+Σargs`,
    /// `Connective=Σoperands`, default 5 for quantifiers.
    pub fn complexity(&self) -> f64 {
        match self {
            AstNode::Variable { .. } => 10.0,
            AstNode::Constant { .. } => 1.0,
            AstNode::Application { operator, arguments, .. } => {
                operator.complexity() + arguments.iter().map(AstNode::complexity).sum::<f64>()
            }
            AstNode::Connective { operands, .. } => {
                operands.iter().map(AstNode::complexity).sum()
            }
            AstNode::Quantifier { .. } => 5.0,
        }
    }

    /// Deterministic structural string form, used as the "stable string
    /// form" for memoisation fingerprints and as a human-readable display.
    pub fn structural_string(&self) -> String {
        match self {
            AstNode::Constant { name, type_ref, .. } => format!("{name}:{type_ref}"),
            AstNode::Variable { name, id, type_ref, .. } => {
                format!("?{name}#{id}:{type_ref}")
            }
            AstNode::Application { operator, arguments, .. } => {
                let args: Vec<String> = arguments.iter().map(AstNode::structural_string).collect();
                format!("{}({})", operator.structural_string(), args.join(","))
            }
            AstNode::Connective { kind, operands, .. } => {
                let ops: Vec<String> = operands.iter().map(AstNode::structural_string).collect();
                format!("{kind}[{}]", ops.join(","))
            }
            AstNode::Quantifier { kind, bound_vars, body, .. } => {
                let vars: Vec<String> = bound_vars.iter().map(AstNode::structural_string).collect();
                format!("{kind}({}).{}", vars.join(","), body.structural_string())
            }
        }
    }
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.structural_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> TypeRef {
        TypeRef::new("Entity")
    }

    #[test]
    fn with_metadata_does_not_mutate_original() {
        let node = AstNode::Constant {
            name: "John".into(),
            type_ref: entity(),
            metadata: Metadata::new(),
        };
        let mut extra = Metadata::new();
        extra.insert("source".into(), serde_json::json!("test"));
        let updated = node.with_metadata(extra);
        assert!(node.metadata().is_empty());
        assert_eq!(updated.metadata().len(), 1);
        assert_ne!(node, updated);
    }

    #[test]
    fn structural_equality_ignores_nothing_but_matches_shape() {
        let a = AstNode::Constant {
            name: "John".into(),
            type_ref: entity(),
            metadata: Metadata::new(),
        };
        let b = AstNode::Constant {
            name: "John".into(),
            type_ref: entity(),
            metadata: Metadata::new(),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn predicate_application_detection() {
        let pred = AstNode::Constant {
            name: "Person".into(),
            type_ref: TypeRef::new("Relation"),
            metadata: Metadata::new(),
        };
        let john = AstNode::Constant {
            name: "John".into(),
            type_ref: entity(),
            metadata: Metadata::new(),
        };
        let app = AstNode::Application {
            operator: Box::new(pred),
            arguments: vec![john],
            type_ref: TypeRef::new("Bool"),
            metadata: Metadata::new(),
        };
        let (name, args) = app.as_predicate_application().unwrap();
        assert_eq!(name, "Person");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn complexity_matches_spec_formula() {
        let v = AstNode::Variable {
            name: "X".into(),
            id: 1,
            type_ref: entity(),
            metadata: Metadata::new(),
        };
        assert_eq!(v.complexity(), 10.0);
        let c = AstNode::Constant {
            name: "John".into(),
            type_ref: entity(),
            metadata: Metadata::new(),
        };
        assert_eq!(c.complexity(), 1.0);
    }
}
