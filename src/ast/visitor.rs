//! Visitor pattern for expression tree traversal
//!
//! Used by the statistics module to discover which parameter references and
//! synthetic `Name!Suffix` sub-parameters a COMPUTED definition implies, and
//! by diagnostics to list dependencies without evaluating.

use super::expression::{BinaryOperator, ExpressionNode, UnaryOperator};

/// Trait for visiting expression nodes
pub trait Visitor: Sized {
    /// Visit any node; default dispatches to the typed callbacks below
    fn visit_expression(&mut self, expr: &ExpressionNode) {
        walk_expression(self, expr)
    }

    /// Visit a string literal
    fn visit_string_literal(&mut self, _value: &str) {}

    /// Visit a numeric literal
    fn visit_number(&mut self, _value: u32) {}

    /// Visit an identifier reference
    fn visit_identifier(&mut self, _name: &str) {}

    /// Visit a function call; return false to skip walking the arguments
    fn visit_call(&mut self, _name: &str, _args: &[ExpressionNode]) -> bool {
        true
    }

    /// Visit a binary operation (children are walked afterwards)
    fn visit_binary(
        &mut self,
        _op: BinaryOperator,
        _left: &ExpressionNode,
        _right: &ExpressionNode,
    ) {
    }

    /// Visit a unary operation (operand is walked afterwards)
    fn visit_unary(&mut self, _op: UnaryOperator, _operand: &ExpressionNode) {}

    /// Visit a guard; return false to skip walking the guarded body
    fn visit_guard(&mut self, _condition: &ExpressionNode, _body: &ExpressionNode) -> bool {
        true
    }
}

/// Walk a node's children, dispatching to the visitor's callbacks
pub fn walk_expression<V: Visitor>(visitor: &mut V, expr: &ExpressionNode) {
    match expr {
        ExpressionNode::StringLiteral(value) => visitor.visit_string_literal(value),
        ExpressionNode::Number(value) => visitor.visit_number(*value),
        ExpressionNode::Identifier(name) => visitor.visit_identifier(name),
        ExpressionNode::Unary { op, operand } => {
            visitor.visit_unary(*op, operand);
            visitor.visit_expression(operand);
        }
        ExpressionNode::Binary { op, left, right } => {
            visitor.visit_binary(*op, left, right);
            visitor.visit_expression(left);
            visitor.visit_expression(right);
        }
        ExpressionNode::Guard { condition, body } => {
            let descend = visitor.visit_guard(condition, body);
            visitor.visit_expression(condition);
            if descend {
                visitor.visit_expression(body);
            }
        }
        ExpressionNode::Call { name, args } => {
            if visitor.visit_call(name, args) {
                for arg in args {
                    visitor.visit_expression(arg);
                }
            }
        }
        ExpressionNode::List(items) => {
            for item in items {
                visitor.visit_expression(item);
            }
        }
    }
}

/// Collect every identifier referenced by an expression, in visit order
pub fn collect_identifiers(expr: &ExpressionNode) -> Vec<String> {
    struct Collect(Vec<String>);
    impl Visitor for Collect {
        fn visit_identifier(&mut self, name: &str) {
            if !self.0.iter().any(|n| n == name) {
                self.0.push(name.to_string());
            }
        }
    }
    let mut collector = Collect(Vec::new());
    collector.visit_expression(expr);
    collector.0
}
