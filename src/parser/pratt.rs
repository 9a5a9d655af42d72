//! Pratt parser for COMPUTED parameter expressions
//!
//! Precedence climbing over the token stream. All operator precedence lives in
//! one table, so the grammar reads off [`precedence_of`] directly:
//! List(`,`) → Guard(`?`) → Cons(`:`) → Concat(`++`) → Or(`|`) → And(`&`) →
//! Comparison → Sum → Product, with List/Guard/Cons right associative.

use super::error::{ParseError, ParseResult};
use super::tokenizer::{Token, TokenStream};
use crate::ast::{BinaryOperator, ExpressionNode, UnaryOperator};

/// Operator precedence levels (higher = tighter binding)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    /// Comma list, right associative
    List = 1,
    /// Guarded expression `cond ? body`, right associative
    Guard = 2,
    /// Cons chains `a:b:c`, right associative
    Cons = 3,
    /// String concatenation `++`
    Concat = 4,
    /// Logical OR `|`
    Or = 5,
    /// Logical AND `&`
    And = 6,
    /// Comparisons `< <= > >= == !=`
    Comparison = 7,
    /// Additive `+ -`
    Sum = 8,
    /// Multiplicative `* /`
    Product = 9,
    /// Sentinel above every infix operator; never produced by
    /// [`precedence_of`], so a right operand parsed at this level cannot
    /// consume another operator
    Primary = 10,
}

impl Precedence {
    #[inline]
    const fn as_u8(self) -> u8 {
        self as u8
    }

    /// List, Guard and Cons chain to the right; everything else to the left
    #[inline]
    const fn is_right_associative(self) -> bool {
        matches!(self, Precedence::List | Precedence::Guard | Precedence::Cons)
    }

    /// The next tighter level, for left-associative operators
    #[inline]
    const fn next_level(self) -> Self {
        match self {
            Precedence::List => Precedence::Guard,
            Precedence::Guard => Precedence::Cons,
            Precedence::Cons => Precedence::Concat,
            Precedence::Concat => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Comparison,
            Precedence::Comparison => Precedence::Sum,
            Precedence::Sum => Precedence::Product,
            Precedence::Product | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// What a binary-position token means
#[derive(Clone, Copy)]
enum InfixOp {
    Binary(BinaryOperator),
    Guard,
    List,
}

/// Precedence and meaning of the token in binary-operator position
fn precedence_of(token: &Token<'_>) -> Option<(Precedence, InfixOp)> {
    match token {
        Token::Comma => Some((Precedence::List, InfixOp::List)),
        Token::Operator(sym) => match *sym {
            "?" => Some((Precedence::Guard, InfixOp::Guard)),
            ":" => Some((Precedence::Cons, InfixOp::Binary(BinaryOperator::Cons))),
            "++" => Some((Precedence::Concat, InfixOp::Binary(BinaryOperator::Concat))),
            "|" => Some((Precedence::Or, InfixOp::Binary(BinaryOperator::Or))),
            "&" => Some((Precedence::And, InfixOp::Binary(BinaryOperator::And))),
            "<" => Some((
                Precedence::Comparison,
                InfixOp::Binary(BinaryOperator::LessThan),
            )),
            "<=" => Some((
                Precedence::Comparison,
                InfixOp::Binary(BinaryOperator::LessThanOrEqual),
            )),
            ">" => Some((
                Precedence::Comparison,
                InfixOp::Binary(BinaryOperator::GreaterThan),
            )),
            ">=" => Some((
                Precedence::Comparison,
                InfixOp::Binary(BinaryOperator::GreaterThanOrEqual),
            )),
            "==" => Some((Precedence::Comparison, InfixOp::Binary(BinaryOperator::Equal))),
            "!=" => Some((
                Precedence::Comparison,
                InfixOp::Binary(BinaryOperator::NotEqual),
            )),
            "+" => Some((Precedence::Sum, InfixOp::Binary(BinaryOperator::Add))),
            "-" => Some((Precedence::Sum, InfixOp::Binary(BinaryOperator::Subtract))),
            "*" => Some((Precedence::Product, InfixOp::Binary(BinaryOperator::Multiply))),
            "/" => Some((Precedence::Product, InfixOp::Binary(BinaryOperator::Divide))),
            _ => None,
        },
        _ => None,
    }
}

/// Parse a complete expression; trailing unconsumed tokens reject the parse
pub fn parse_expression(input: &str) -> ParseResult<ExpressionNode> {
    let mut stream = TokenStream::new(input)?;
    let expr = parse_binary(&mut stream, Precedence::List)?;
    if !stream.is_eof() {
        return Err(ParseError::TrailingTokens {
            position: stream.offset(),
        });
    }
    Ok(expr)
}

fn parse_binary<'input>(
    stream: &mut TokenStream<'input>,
    min_precedence: Precedence,
) -> ParseResult<ExpressionNode> {
    let mut left = parse_primary(stream)?;

    loop {
        let Some((precedence, op)) = stream.peek().and_then(precedence_of) else {
            break;
        };
        if precedence.as_u8() < min_precedence.as_u8() {
            break;
        }
        stream.next();

        let right_min = if precedence.is_right_associative() {
            precedence
        } else {
            precedence.next_level()
        };
        let right = parse_binary(stream, right_min)?;

        left = match op {
            InfixOp::Binary(binary) => ExpressionNode::Binary {
                op: binary,
                left: Box::new(left),
                right: Box::new(right),
            },
            InfixOp::Guard => ExpressionNode::Guard {
                condition: Box::new(left),
                body: Box::new(right),
            },
            InfixOp::List => {
                let mut items = match left {
                    ExpressionNode::List(items) => items,
                    other => vec![other],
                };
                match right {
                    ExpressionNode::List(tail) => items.extend(tail),
                    other => items.push(other),
                }
                ExpressionNode::List(items)
            }
        };
    }

    Ok(left)
}

fn parse_primary<'input>(stream: &mut TokenStream<'input>) -> ParseResult<ExpressionNode> {
    let offset = stream.offset();
    let Some(token) = stream.next() else {
        return Err(ParseError::UnexpectedEof);
    };
    match token {
        Token::LeftParen => {
            let inner = parse_binary(stream, Precedence::List)?;
            if !stream.consume_if_eq(&Token::RightParen) {
                return Err(ParseError::UnbalancedParen { position: offset });
            }
            Ok(inner)
        }
        Token::Operator("!") => Ok(ExpressionNode::Unary {
            op: UnaryOperator::Not,
            operand: Box::new(parse_primary(stream)?),
        }),
        Token::Operator("+") => Ok(ExpressionNode::Unary {
            op: UnaryOperator::Plus,
            operand: Box::new(parse_primary(stream)?),
        }),
        Token::Operator("-") => Ok(ExpressionNode::Unary {
            op: UnaryOperator::Minus,
            operand: Box::new(parse_primary(stream)?),
        }),
        Token::StringLit(value) => Ok(ExpressionNode::StringLiteral(value)),
        Token::Word(word) => {
            if word.bytes().all(|b| b.is_ascii_digit()) {
                let value = word
                    .parse::<u32>()
                    .map_err(|_| ParseError::InvalidNumber {
                        position: offset,
                        text: word.to_string(),
                    })?;
                Ok(ExpressionNode::Number(value))
            } else if stream.consume_if_eq(&Token::LeftParen) {
                let args = if stream.consume_if_eq(&Token::RightParen) {
                    Vec::new()
                } else {
                    let inner = parse_binary(stream, Precedence::Guard)?;
                    let mut args = match inner {
                        ExpressionNode::List(items) => items,
                        other => vec![other],
                    };
                    // arguments separated by commas parse one at a time when
                    // the first argument bound tighter than List
                    while stream.consume_if_eq(&Token::Comma) {
                        args.push(parse_binary(stream, Precedence::Guard)?);
                    }
                    if !stream.consume_if_eq(&Token::RightParen) {
                        return Err(ParseError::UnbalancedParen { position: offset });
                    }
                    args
                };
                Ok(ExpressionNode::Call {
                    name: word.to_string(),
                    args,
                })
            } else {
                Ok(ExpressionNode::Identifier(word.to_string()))
            }
        }
        other => Err(ParseError::UnexpectedToken {
            position: offset,
            found: other.text(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> ExpressionNode {
        parse_expression(input).unwrap()
    }

    #[test]
    fn product_binds_tighter_than_sum() {
        let expr = parse("2+3*4");
        let ExpressionNode::Binary { op, right, .. } = &expr else {
            panic!("expected binary, got {expr:?}");
        };
        assert_eq!(*op, BinaryOperator::Add);
        assert!(matches!(
            right.as_ref(),
            ExpressionNode::Binary {
                op: BinaryOperator::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn product_chains_to_the_left() {
        // 100/5/2 must parse as (100/5)/2
        let expr = parse("100/5/2");
        let ExpressionNode::Binary { op, left, right } = &expr else {
            panic!("expected binary, got {expr:?}");
        };
        assert_eq!(*op, BinaryOperator::Divide);
        assert!(matches!(right.as_ref(), ExpressionNode::Number(2)));
        assert!(matches!(
            left.as_ref(),
            ExpressionNode::Binary {
                op: BinaryOperator::Divide,
                ..
            }
        ));
    }

    #[test]
    fn cons_is_right_associative() {
        let expr = parse("1:2:3");
        let ExpressionNode::Binary { op, left, right } = &expr else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOperator::Cons);
        assert!(matches!(left.as_ref(), ExpressionNode::Number(1)));
        assert!(matches!(
            right.as_ref(),
            ExpressionNode::Binary {
                op: BinaryOperator::Cons,
                ..
            }
        ));
    }

    #[test]
    fn guard_wraps_cons_body() {
        let expr = parse("X ? 1:2");
        assert!(matches!(expr, ExpressionNode::Guard { .. }));
    }

    #[test]
    fn call_arguments_split_on_commas() {
        let expr = parse("Class(.Rtt, 10, 100, 1000)");
        let ExpressionNode::Call { name, args } = &expr else {
            panic!("expected call");
        };
        assert_eq!(name, "Class");
        assert_eq!(args.len(), 4);
        assert_eq!(args[0], ExpressionNode::Identifier(".Rtt".to_string()));
    }

    #[test]
    fn dotted_call_name_is_preserved() {
        let expr = parse("PacketsLost.Average()");
        assert!(matches!(
            expr,
            ExpressionNode::Call { ref name, ref args } if name == "PacketsLost.Average" && args.is_empty()
        ));
    }

    #[test]
    fn trailing_tokens_reject_the_parse() {
        assert!(matches!(
            parse_expression("1+2 3"),
            Err(ParseError::TrailingTokens { .. })
        ));
    }

    #[test]
    fn unbalanced_parens_reject_the_parse() {
        assert!(matches!(
            parse_expression("(1+2"),
            Err(ParseError::UnbalancedParen { .. })
        ));
        assert!(matches!(
            parse_expression("1+2)"),
            Err(ParseError::TrailingTokens { .. })
        ));
    }

    #[test]
    fn display_round_trips_structurally() {
        for source in [
            "2+3*4",
            "1:2:3",
            "\"a\"++\"b\"",
            "X ? Y",
            "Class(.Rtt, 10, 100)",
            "!(A & B) | C",
            "A.B.C <= 42",
        ] {
            let first = parse(source);
            let second = parse(&first.to_string());
            assert_eq!(first, second, "round-trip failed for {source}");
        }
    }
}
