//! Expression node types

use std::fmt;

/// Binary operators, lowest to highest precedence tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// Cons operator (`:`), right associative, joins values into `a:b:c` chains
    Cons,
    /// String concatenation (`++`), left associative
    Concat,
    /// Logical OR (`|`)
    Or,
    /// Logical AND (`&`)
    And,
    /// Less than (`<`)
    LessThan,
    /// Less than or equal (`<=`)
    LessThanOrEqual,
    /// Greater than (`>`)
    GreaterThan,
    /// Greater than or equal (`>=`)
    GreaterThanOrEqual,
    /// Equality (`==`)
    Equal,
    /// Inequality (`!=`)
    NotEqual,
    /// Addition (`+`)
    Add,
    /// Subtraction (`-`)
    Subtract,
    /// Multiplication (`*`)
    Multiply,
    /// Division (`/`), truncating
    Divide,
}

impl BinaryOperator {
    /// Source form of the operator
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Cons => ":",
            BinaryOperator::Concat => "++",
            BinaryOperator::Or => "|",
            BinaryOperator::And => "&",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// Logical negation (`!`)
    Not,
    /// Unary plus (`+`), identity on numbers
    Plus,
    /// Unary minus (`-`), wrapping negation
    Minus,
}

impl UnaryOperator {
    /// Source form of the operator
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOperator::Not => "!",
            UnaryOperator::Plus => "+",
            UnaryOperator::Minus => "-",
        }
    }
}

/// A parsed expression tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionNode {
    /// Quoted string literal
    StringLiteral(String),
    /// Unsigned numeric literal
    Number(u32),
    /// Parameter reference; may be absolute, relative (leading dots), or a
    /// synthetic `Name!Suffix` sub-parameter
    Identifier(String),
    /// Unary operation
    Unary {
        /// The operator
        op: UnaryOperator,
        /// Operand subtree
        operand: Box<ExpressionNode>,
    },
    /// Binary operation
    Binary {
        /// The operator
        op: BinaryOperator,
        /// Left subtree
        left: Box<ExpressionNode>,
        /// Right subtree
        right: Box<ExpressionNode>,
    },
    /// Guarded expression `condition ? body`: body is evaluated only when the
    /// condition holds, and is not considered changed otherwise
    Guard {
        /// Boolean guard condition
        condition: Box<ExpressionNode>,
        /// Guarded subtree
        body: Box<ExpressionNode>,
    },
    /// Function call: `Class`, `DiffTime`, or a synthetic `ident.suffix` call
    Call {
        /// Function name as written (dots preserved)
        name: String,
        /// Argument subtrees
        args: Vec<ExpressionNode>,
    },
    /// Comma list, right associative (flattened)
    List(Vec<ExpressionNode>),
}

impl ExpressionNode {
    /// True when this node is a plain identifier reference
    pub fn is_identifier(&self) -> bool {
        matches!(self, ExpressionNode::Identifier(_))
    }

    /// Identifier text, if this node is one
    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            ExpressionNode::Identifier(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ExpressionNode {
    /// Structural re-serialization: parsing the output yields an equivalent
    /// tree (parentheses are emitted around every compound subtree)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionNode::StringLiteral(s) => {
                write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
            }
            ExpressionNode::Number(n) => write!(f, "{n}"),
            ExpressionNode::Identifier(name) => write!(f, "{name}"),
            ExpressionNode::Unary { op, operand } => write!(f, "{}({operand})", op.symbol()),
            ExpressionNode::Binary { op, left, right } => {
                write!(f, "({left}){}({right})", op.symbol())
            }
            ExpressionNode::Guard { condition, body } => write!(f, "({condition})?({body})"),
            ExpressionNode::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            ExpressionNode::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "({item})")?;
                }
                Ok(())
            }
        }
    }
}
