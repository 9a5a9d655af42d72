//! COMPUTED-expression parser
//!
//! Converts a parameter `definition` string into an [`ExpressionNode`] tree.
//! The tokenizer groups maximal runs of identifier characters and of operator
//! characters; the Pratt parser applies the precedence ladder
//! List → Guard → Cons → Concat → Or → And → Comparison → Sum → Product.
//!
//! A parse that leaves unconsumed tokens rejects the whole expression; the
//! loader converts that into an evaluation failure.

pub mod error;
pub mod pratt;
pub mod tokenizer;

pub use error::{ParseError, ParseResult};
pub use pratt::parse_expression;
pub use tokenizer::{Token, TokenStream, Tokenizer};

use crate::ast::ExpressionNode;

/// Parse a COMPUTED definition string into an expression tree
pub fn parse(input: &str) -> ParseResult<ExpressionNode> {
    parse_expression(input)
}
