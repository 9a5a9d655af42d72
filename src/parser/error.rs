//! Parse error types

use thiserror::Error;

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors produced while tokenizing or parsing an expression
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A token that no grammar rule accepts at this position
    #[error("unexpected token `{found}` at offset {position}")]
    UnexpectedToken {
        /// Byte offset into the source
        position: usize,
        /// The offending token text
        found: String,
    },

    /// Input ended in the middle of an expression
    #[error("unexpected end of expression")]
    UnexpectedEof,

    /// A `(` without its matching `)`
    #[error("unbalanced parenthesis at offset {position}")]
    UnbalancedParen {
        /// Byte offset of the opening parenthesis
        position: usize,
    },

    /// A quoted string missing its closing quote
    #[error("unterminated string starting at offset {position}")]
    UnterminatedString {
        /// Byte offset of the opening quote
        position: usize,
    },

    /// A numeric literal that does not fit the value range
    #[error("invalid number `{text}` at offset {position}")]
    InvalidNumber {
        /// Byte offset of the literal
        position: usize,
        /// The literal text
        text: String,
    },

    /// Tokens left over after a complete expression was parsed
    #[error("trailing tokens at offset {position}")]
    TrailingTokens {
        /// Byte offset of the first unconsumed token
        position: usize,
    },
}
