//! Abstract syntax tree for COMPUTED parameter expressions
//!
//! These are the node types produced by the expression parser and consumed by
//! the evaluator and the change-detection walk. A definition string parses
//! into one owned tree that the engine caches and shares.

mod expression;
mod visitor;

pub use expression::*;
pub use visitor::*;
