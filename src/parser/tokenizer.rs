//! Tokenizer for COMPUTED parameter expressions
//!
//! Zero-copy where possible: identifier and operator tokens borrow from the
//! input; only string literals are owned (escape sequences are resolved while
//! scanning). Tokenization rules:
//!
//! - whitespace is skipped
//! - maximal runs of alphanumerics, `.` and `_` form one `Word` token
//!   (identifier or number, classified by the parser)
//! - maximal runs of characters from the operator set ``!%*+-/:<=>?^|~``
//!   form one `Operator` token, so `++`, `<=`, `!=` arrive as single tokens
//! - `'…'` and `"…"` literals support backslash escaping
//! - `(`, `)` and `,` are structural singletons

use super::error::{ParseError, ParseResult};

/// Characters that aggregate into operator tokens
const OPERATOR_SET: &[u8] = b"!%*+-/:<=>?^|~";

/// A single token with its byte offset in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'input> {
    /// Identifier or number run (alnum, `.`, `_`)
    Word(&'input str),
    /// Maximal operator-character run
    Operator(&'input str),
    /// Quoted string literal, escapes resolved
    StringLit(String),
    /// Left parenthesis
    LeftParen,
    /// Right parenthesis
    RightParen,
    /// Argument/list separator
    Comma,
}

impl<'input> Token<'input> {
    /// Source text of the token, for error reporting
    pub fn text(&self) -> String {
        match self {
            Token::Word(s) => (*s).to_string(),
            Token::Operator(s) => (*s).to_string(),
            Token::StringLit(s) => format!("\"{s}\""),
            Token::LeftParen => "(".to_string(),
            Token::RightParen => ")".to_string(),
            Token::Comma => ",".to_string(),
        }
    }
}

#[inline]
fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'_'
}

#[inline]
fn is_operator_byte(b: u8) -> bool {
    OPERATOR_SET.contains(&b)
}

/// Scans an expression string into a token vector
pub struct Tokenizer<'input> {
    input: &'input str,
    bytes: &'input [u8],
    position: usize,
}

impl<'input> Tokenizer<'input> {
    /// Create a tokenizer over the given source
    pub fn new(input: &'input str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            position: 0,
        }
    }

    /// Tokenize the whole input
    pub fn tokenize(mut self) -> ParseResult<Vec<(Token<'input>, usize)>> {
        let mut tokens = Vec::new();
        while let Some(entry) = self.next_token()? {
            tokens.push(entry);
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> ParseResult<Option<(Token<'input>, usize)>> {
        while self.position < self.bytes.len() && self.bytes[self.position].is_ascii_whitespace() {
            self.position += 1;
        }
        if self.position >= self.bytes.len() {
            return Ok(None);
        }
        let start = self.position;
        let b = self.bytes[start];
        let token = match b {
            b'(' => {
                self.position += 1;
                Token::LeftParen
            }
            b')' => {
                self.position += 1;
                Token::RightParen
            }
            b',' => {
                self.position += 1;
                Token::Comma
            }
            b'\'' | b'"' => Token::StringLit(self.scan_string(b)?),
            _ if is_word_byte(b) => {
                while self.position < self.bytes.len() && is_word_byte(self.bytes[self.position]) {
                    self.position += 1;
                }
                Token::Word(&self.input[start..self.position])
            }
            _ if is_operator_byte(b) => {
                while self.position < self.bytes.len()
                    && is_operator_byte(self.bytes[self.position])
                {
                    self.position += 1;
                }
                Token::Operator(&self.input[start..self.position])
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    position: start,
                    found: (other as char).to_string(),
                });
            }
        };
        Ok(Some((token, start)))
    }

    fn scan_string(&mut self, quote: u8) -> ParseResult<String> {
        let start = self.position;
        self.position += 1;
        let mut out = String::new();
        while self.position < self.bytes.len() {
            let b = self.bytes[self.position];
            if b == b'\\' {
                if self.position + 1 >= self.bytes.len() {
                    return Err(ParseError::UnterminatedString { position: start });
                }
                out.push(self.bytes[self.position + 1] as char);
                self.position += 2;
            } else if b == quote {
                self.position += 1;
                return Ok(out);
            } else {
                // multi-byte UTF-8 sequences are copied through unchanged
                let ch_start = self.position;
                let ch = self.input[ch_start..].chars().next().unwrap_or('\u{FFFD}');
                out.push(ch);
                self.position += ch.len_utf8();
            }
        }
        Err(ParseError::UnterminatedString { position: start })
    }
}

/// Token stream with single-token lookahead, consumed by the parser
#[derive(Debug)]
pub struct TokenStream<'input> {
    tokens: Vec<(Token<'input>, usize)>,
    position: usize,
    input_len: usize,
}

impl<'input> TokenStream<'input> {
    /// Tokenize the source into a stream
    pub fn new(input: &'input str) -> ParseResult<Self> {
        Ok(Self {
            tokens: Tokenizer::new(input).tokenize()?,
            position: 0,
            input_len: input.len(),
        })
    }

    /// Peek at the current token without consuming
    pub fn peek(&self) -> Option<&Token<'input>> {
        self.tokens.get(self.position).map(|(t, _)| t)
    }

    /// Byte offset of the current token, or end of input
    pub fn offset(&self) -> usize {
        self.tokens
            .get(self.position)
            .map(|(_, off)| *off)
            .unwrap_or(self.input_len)
    }

    /// Consume and return the current token
    pub fn next(&mut self) -> Option<Token<'input>> {
        let token = self.tokens.get(self.position).map(|(t, _)| t.clone());
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    /// Consume the current token if it equals `expected`
    pub fn consume_if_eq(&mut self, expected: &Token<'input>) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    /// Consume the current operator token if its text equals `symbol`
    pub fn consume_operator(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Operator(s)) if *s == symbol) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    /// True when every token has been consumed
    pub fn is_eof(&self) -> bool {
        self.position >= self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words(input: &str) -> Vec<Token<'_>> {
        TokenStream::new(input)
            .unwrap()
            .tokens
            .into_iter()
            .map(|(t, _)| t)
            .collect()
    }

    #[test]
    fn groups_word_runs_with_dots() {
        assert_eq!(
            words("Device.LAN.IPAddress"),
            vec![Token::Word("Device.LAN.IPAddress")]
        );
    }

    #[test]
    fn groups_operator_runs() {
        assert_eq!(
            words("a++b<=2"),
            vec![
                Token::Word("a"),
                Token::Operator("++"),
                Token::Word("b"),
                Token::Operator("<="),
                Token::Word("2"),
            ]
        );
    }

    #[test]
    fn scans_escaped_strings() {
        assert_eq!(
            words(r#""he\"llo" 'x'"#),
            vec![
                Token::StringLit("he\"llo".to_string()),
                Token::StringLit("x".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(matches!(
            TokenStream::new("\"abc"),
            Err(ParseError::UnterminatedString { position: 0 })
        ));
    }

    #[test]
    fn structural_tokens() {
        assert_eq!(
            words("Class(x, 1)"),
            vec![
                Token::Word("Class"),
                Token::LeftParen,
                Token::Word("x"),
                Token::Comma,
                Token::Word("1"),
                Token::RightParen,
            ]
        );
    }
}
