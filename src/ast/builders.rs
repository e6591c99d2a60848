//! Fluent constructors for AST nodes, for use in tests and by callers that
//! build statements programmatically rather than receiving pre-built ASTs.

use super::{AstNode, Metadata, TypeRef};

/// Builds a `Constant` node.
pub struct ConstantBuilder {
    name: String,
    type_ref: TypeRef,
    metadata: Metadata,
}

impl ConstantBuilder {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        ConstantBuilder {
            name: name.into(),
            type_ref: TypeRef::new(type_name),
            metadata: Metadata::new(),
        }
    }

    pub fn build(self) -> AstNode {
        AstNode::Constant {
            name: self.name,
            type_ref: self.type_ref,
            metadata: self.metadata,
        }
    }
}

/// Builds a `Variable` node.
pub struct VariableBuilder {
    name: String,
    id: u64,
    type_ref: TypeRef,
    metadata: Metadata,
}

impl VariableBuilder {
    pub fn new(name: impl Into<String>, id: u64, type_name: impl Into<String>) -> Self {
        VariableBuilder {
            name: name.into(),
            id,
            type_ref: TypeRef::new(type_name),
            metadata: Metadata::new(),
        }
    }

    pub fn build(self) -> AstNode {
        AstNode::Variable {
            name: self.name,
            id: self.id,
            type_ref: self.type_ref,
            metadata: self.metadata,
        }
    }
}

/// Builds an `Application` node, e.g. `is_a(John, Person)`.
pub struct ApplicationBuilder {
    operator: AstNode,
    arguments: Vec<AstNode>,
    type_name: String,
}

impl ApplicationBuilder {
    pub fn new(predicate_name: impl Into<String>, predicate_type: impl Into<String>) -> Self {
        ApplicationBuilder {
            operator: ConstantBuilder::new(predicate_name, predicate_type).build(),
            arguments: Vec::new(),
            type_name: "Bool".to_string(),
        }
    }

    #[must_use]
    pub fn arg(mut self, node: AstNode) -> Self {
        self.arguments.push(node);
        self
    }

    #[must_use]
    pub fn result_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn build(self) -> AstNode {
        AstNode::Application {
            operator: Box::new(self.operator),
            arguments: self.arguments,
            type_ref: TypeRef::new(self.type_name),
            metadata: Metadata::new(),
        }
    }
}

/// Convenience: `is_a(John, Person)`-shaped binary application with a named
/// predicate.
pub fn binary_application(
    predicate: &str,
    predicate_type: &str,
    left: AstNode,
    right: AstNode,
) -> AstNode {
    ApplicationBuilder::new(predicate, predicate_type)
        .arg(left)
        .arg(right)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_is_a_application() {
        let john = ConstantBuilder::new("John", "Entity").build();
        let stmt = binary_application(
            "is_a",
            "Relation",
            john,
            ConstantBuilder::new("Person", "Entity").build(),
        );
        assert!(stmt.as_predicate_application().is_some());
    }
}
