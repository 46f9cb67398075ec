//! FHIRPath abstract syntax tree
//!
//! The AST is a flat tagged union: every node carries its tag, operator, and
//! children directly. There is no trait hierarchy of expression types.

use rust_decimal::Decimal;

/// Binary operators, in source notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// `.` path navigation / invocation
    Dot,
    /// `|` collection union
    Union,
    And,
    Or,
    Xor,
    Implies,
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `~`
    Equivalent,
    /// `!~`
    NotEquivalent,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `div`
    IntegerDivide,
    /// `mod`
    Modulo,
    /// `&` string concatenation
    Concatenate,
    /// `in` membership
    In,
    /// `contains` membership (reversed `in`)
    Contains,
    /// `is` type test
    Is,
    /// `as` type cast
    As,
}

/// Unary (prefix) operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Plus,
    Minus,
}

/// A FHIRPath AST node
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    /// `{}` - the empty collection literal
    EmptySet,
    BooleanLiteral(bool),
    IntegerLiteral(i64),
    DecimalLiteral(Decimal),
    StringLiteral(String),
    /// Normalized date, datetime, or time literal
    TemporalLiteral(String),

    /// Identifier: a path segment, resource type, or type name
    Symbol(String),
    /// `%name` external constant
    ExternalConstant(String),
    /// `$this`, `$index`, `$total`
    Variable(String),

    Unary {
        op: UnaryOperator,
        operand: Box<Ast>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Ast>,
        right: Box<Ast>,
    },
    /// Function invocation; as the right side of `.` the function applies to
    /// the left collection, otherwise to the evaluation input.
    Function {
        name: String,
        args: Vec<Ast>,
    },
    /// `target[index]`
    Index {
        target: Box<Ast>,
        index: Box<Ast>,
    },
}

impl Ast {
    /// Render a dotted type specifier (`FHIR.Patient`, `Patient`) back to a
    /// plain name. Used by `is` / `as` evaluation.
    pub fn type_specifier(&self) -> Option<String> {
        match self {
            Ast::Symbol(name) => Some(name.clone()),
            Ast::Binary {
                op: BinaryOperator::Dot,
                left,
                right,
            } => {
                let ns = left.type_specifier()?;
                let name = right.type_specifier()?;
                Some(format!("{}.{}", ns, name))
            }
            _ => None,
        }
    }
}
