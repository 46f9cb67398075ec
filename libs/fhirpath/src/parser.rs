//! FHIRPath parser - converts token streams to AST
//!
//! Top-down operator-precedence (Pratt) parser with two parselet tables,
//! prefix and infix, registered once on first use. Symbol and keyword tokens
//! dispatch by value; literal tokens dispatch by kind. A left-associative
//! infix operator with precedence `p` recurses with `p` as its ceiling.
//!
//! Precedence (lowest to highest):
//! 1. implies
//! 2. or/xor
//! 3. and
//! 4. membership (in, contains)
//! 5. equality (=, ~, !=, !~)
//! 6. inequality (<=, <, >, >=)
//! 7. union (|)
//! 8. additive (+, -, &)
//! 9. multiplicative (*, /, div, mod)
//! 10. polarity (+, -)
//! 11. type (is, as)
//! 12. indexer ([ ])
//! 13. invocation (.)

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use rust_decimal::Decimal;

use crate::ast::{Ast, BinaryOperator, UnaryOperator};
use crate::error::{Error, Result};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

const MAX_RECURSION_DEPTH: usize = 200;

const PRECEDENCE_IMPLIES: u8 = 1;
const PRECEDENCE_OR: u8 = 2;
const PRECEDENCE_AND: u8 = 3;
const PRECEDENCE_MEMBERSHIP: u8 = 4;
const PRECEDENCE_EQUALITY: u8 = 5;
const PRECEDENCE_INEQUALITY: u8 = 6;
const PRECEDENCE_UNION: u8 = 7;
const PRECEDENCE_ADDITIVE: u8 = 8;
const PRECEDENCE_MULTIPLICATIVE: u8 = 9;
const PRECEDENCE_POLARITY: u8 = 10;
const PRECEDENCE_TYPE: u8 = 11;
const PRECEDENCE_INDEXER: u8 = 12;
const PRECEDENCE_INVOCATION: u8 = 13;

/// Prefix parselets, dispatched by token value
#[derive(Debug, Clone, Copy)]
enum PrefixParselet {
    /// `(` expression `)`
    Parenthesized,
    /// `{` `}` empty collection
    EmptySet,
    /// Unary `+` / `-`
    Polarity(UnaryOperator),
    /// `%` external constant
    ExternalConstant,
}

/// Infix parselets, dispatched by token value
#[derive(Debug, Clone, Copy)]
struct InfixParselet {
    precedence: u8,
    kind: InfixKind,
}

#[derive(Debug, Clone, Copy)]
enum InfixKind {
    Binary(BinaryOperator),
    /// `.` - right side must be an invocation
    Invocation,
    /// `[` index `]`
    Indexer,
    /// `is` / `as` - right side is a type specifier
    TypeTest(BinaryOperator),
}

/// The two parselet tables, built once
struct ParserDefinition {
    prefix: HashMap<&'static str, PrefixParselet>,
    infix: HashMap<&'static str, InfixParselet>,
}

impl ParserDefinition {
    fn build() -> Self {
        let mut def = Self {
            prefix: HashMap::new(),
            infix: HashMap::new(),
        };

        def.register_prefix("(", PrefixParselet::Parenthesized);
        def.register_prefix("{", PrefixParselet::EmptySet);
        def.register_prefix("+", PrefixParselet::Polarity(UnaryOperator::Plus));
        def.register_prefix("-", PrefixParselet::Polarity(UnaryOperator::Minus));
        def.register_prefix("%", PrefixParselet::ExternalConstant);

        def.register_infix("implies", PRECEDENCE_IMPLIES, BinaryOperator::Implies);
        def.register_infix("or", PRECEDENCE_OR, BinaryOperator::Or);
        def.register_infix("xor", PRECEDENCE_OR, BinaryOperator::Xor);
        def.register_infix("and", PRECEDENCE_AND, BinaryOperator::And);
        def.register_infix("in", PRECEDENCE_MEMBERSHIP, BinaryOperator::In);
        def.register_infix("contains", PRECEDENCE_MEMBERSHIP, BinaryOperator::Contains);
        def.register_infix("=", PRECEDENCE_EQUALITY, BinaryOperator::Equal);
        def.register_infix("!=", PRECEDENCE_EQUALITY, BinaryOperator::NotEqual);
        def.register_infix("~", PRECEDENCE_EQUALITY, BinaryOperator::Equivalent);
        def.register_infix("!~", PRECEDENCE_EQUALITY, BinaryOperator::NotEquivalent);
        def.register_infix("<", PRECEDENCE_INEQUALITY, BinaryOperator::LessThan);
        def.register_infix("<=", PRECEDENCE_INEQUALITY, BinaryOperator::LessThanOrEqual);
        def.register_infix(">", PRECEDENCE_INEQUALITY, BinaryOperator::GreaterThan);
        def.register_infix(
            ">=",
            PRECEDENCE_INEQUALITY,
            BinaryOperator::GreaterThanOrEqual,
        );
        def.register_infix("|", PRECEDENCE_UNION, BinaryOperator::Union);
        def.register_infix("+", PRECEDENCE_ADDITIVE, BinaryOperator::Add);
        def.register_infix("-", PRECEDENCE_ADDITIVE, BinaryOperator::Subtract);
        def.register_infix("&", PRECEDENCE_ADDITIVE, BinaryOperator::Concatenate);
        def.register_infix("*", PRECEDENCE_MULTIPLICATIVE, BinaryOperator::Multiply);
        def.register_infix("/", PRECEDENCE_MULTIPLICATIVE, BinaryOperator::Divide);
        def.register_infix("div", PRECEDENCE_MULTIPLICATIVE, BinaryOperator::IntegerDivide);
        def.register_infix("mod", PRECEDENCE_MULTIPLICATIVE, BinaryOperator::Modulo);

        def.infix.insert(
            "is",
            InfixParselet {
                precedence: PRECEDENCE_TYPE,
                kind: InfixKind::TypeTest(BinaryOperator::Is),
            },
        );
        def.infix.insert(
            "as",
            InfixParselet {
                precedence: PRECEDENCE_TYPE,
                kind: InfixKind::TypeTest(BinaryOperator::As),
            },
        );
        def.infix.insert(
            "[",
            InfixParselet {
                precedence: PRECEDENCE_INDEXER,
                kind: InfixKind::Indexer,
            },
        );
        def.infix.insert(
            ".",
            InfixParselet {
                precedence: PRECEDENCE_INVOCATION,
                kind: InfixKind::Invocation,
            },
        );

        def
    }

    fn register_prefix(&mut self, key: &'static str, parselet: PrefixParselet) {
        self.prefix.insert(key, parselet);
    }

    fn register_infix(&mut self, key: &'static str, precedence: u8, op: BinaryOperator) {
        self.infix.insert(
            key,
            InfixParselet {
                precedence,
                kind: InfixKind::Binary(op),
            },
        );
    }
}

fn definition() -> &'static ParserDefinition {
    static DEFINITION: OnceLock<ParserDefinition> = OnceLock::new();
    DEFINITION.get_or_init(ParserDefinition::build)
}

/// Parse a FHIRPath expression string into an AST.
pub fn parse_expression(input: &str) -> Result<Ast> {
    let tokens = Lexer::tokenize(input)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        recursion_depth: 0,
    };
    let expr = parser.parse(0)?;

    let token = parser.current();
    if token.kind != TokenKind::Eof {
        return Err(Error::ParseError(format!(
            "Unexpected token '{}' at line {}, column {}",
            token.value, token.line, token.column
        )));
    }

    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    recursion_depth: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn current_is_symbol(&self, value: &str) -> bool {
        let token = self.current();
        token.kind == TokenKind::Symbol && token.value == value
    }

    fn expect_symbol(&mut self, value: &str) -> Result<Token> {
        let token = self.current();
        if token.kind == TokenKind::Symbol && token.value == value {
            Ok(self.advance())
        } else {
            Err(Error::ParseError(format!(
                "Expected '{}', got '{}' at line {}, column {}",
                value, token.value, token.line, token.column
            )))
        }
    }

    /// Parse an expression with the given precedence ceiling.
    fn parse(&mut self, precedence: u8) -> Result<Ast> {
        self.recursion_depth += 1;
        if self.recursion_depth > MAX_RECURSION_DEPTH {
            return Err(Error::ParseError(format!(
                "Expression too deeply nested (max depth: {})",
                MAX_RECURSION_DEPTH
            )));
        }

        let mut left = self.parse_prefix()?;

        loop {
            let token = self.current();
            let key = match token.kind {
                TokenKind::Symbol | TokenKind::Identifier => token.lookup_value(),
                _ => break,
            };
            let Some(parselet) = definition().infix.get(key).copied() else {
                break;
            };
            if parselet.precedence <= precedence {
                break;
            }
            left = self.parse_infix(left, parselet)?;
        }

        self.recursion_depth -= 1;
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Ast> {
        let token = self.current().clone();

        match token.kind {
            TokenKind::Number => {
                self.advance();
                parse_number_literal(&token)
            }
            TokenKind::String => {
                self.advance();
                Ok(Ast::StringLiteral(token.value))
            }
            TokenKind::DateTime => {
                self.advance();
                Ok(Ast::TemporalLiteral(token.value))
            }
            TokenKind::Identifier => self.parse_identifier_term(),
            TokenKind::Symbol => {
                let Some(parselet) = definition().prefix.get(token.value.as_str()).copied() else {
                    return Err(Error::ParseError(format!(
                        "Unexpected token '{}' at line {}, column {}",
                        token.value, token.line, token.column
                    )));
                };
                self.advance();
                match parselet {
                    PrefixParselet::Parenthesized => {
                        let inner = self.parse(0)?;
                        self.expect_symbol(")")?;
                        Ok(inner)
                    }
                    PrefixParselet::EmptySet => {
                        self.expect_symbol("}")?;
                        Ok(Ast::EmptySet)
                    }
                    PrefixParselet::Polarity(op) => {
                        let operand = self.parse(PRECEDENCE_POLARITY)?;
                        Ok(Ast::Unary {
                            op,
                            operand: Box::new(operand),
                        })
                    }
                    PrefixParselet::ExternalConstant => {
                        let name = self.current().clone();
                        match name.kind {
                            TokenKind::Identifier | TokenKind::String => {
                                self.advance();
                                Ok(Ast::ExternalConstant(name.value))
                            }
                            _ => Err(Error::ParseError(format!(
                                "Expected constant name after '%' at line {}, column {}",
                                name.line, name.column
                            ))),
                        }
                    }
                }
            }
            TokenKind::Comment | TokenKind::Eof => Err(Error::ParseError(format!(
                "Unexpected end of expression at line {}, column {}",
                token.line, token.column
            ))),
        }
    }

    /// Identifier in term position: literal keyword, variable, function call,
    /// or plain path segment.
    fn parse_identifier_term(&mut self) -> Result<Ast> {
        let token = self.advance();

        match token.value.as_str() {
            "true" => return Ok(Ast::BooleanLiteral(true)),
            "false" => return Ok(Ast::BooleanLiteral(false)),
            _ => {}
        }

        if token.value.starts_with('$') {
            return Ok(Ast::Variable(token.value));
        }

        if self.current_is_symbol("(") {
            return self.parse_function_call(token.value);
        }

        Ok(Ast::Symbol(token.value))
    }

    fn parse_function_call(&mut self, name: String) -> Result<Ast> {
        self.expect_symbol("(")?;

        let mut args = Vec::new();
        if !self.current_is_symbol(")") {
            loop {
                args.push(self.parse(0)?);
                if self.current_is_symbol(",") {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_symbol(")")?;

        Ok(Ast::Function { name, args })
    }

    fn parse_infix(&mut self, left: Ast, parselet: InfixParselet) -> Result<Ast> {
        let token = self.advance();

        match parselet.kind {
            InfixKind::Binary(op) => {
                let right = self.parse(parselet.precedence)?;
                Ok(Ast::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            InfixKind::Invocation => {
                let name = self.current().clone();
                if name.kind != TokenKind::Identifier {
                    return Err(Error::ParseError(format!(
                        "Expected invocation after '.', got '{}' at line {}, column {}",
                        name.value, name.line, name.column
                    )));
                }
                let right = self.parse_identifier_term()?;
                Ok(Ast::Binary {
                    op: BinaryOperator::Dot,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            InfixKind::Indexer => {
                let index = self.parse(0)?;
                self.expect_symbol("]")?;
                Ok(Ast::Index {
                    target: Box::new(left),
                    index: Box::new(index),
                })
            }
            InfixKind::TypeTest(op) => {
                let type_name = self.parse(parselet.precedence)?;
                if type_name.type_specifier().is_none() {
                    return Err(Error::ParseError(format!(
                        "Expected type specifier after '{}' at line {}, column {}",
                        token.value, token.line, token.column
                    )));
                }
                Ok(Ast::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(type_name),
                })
            }
        }
    }
}

fn parse_number_literal(token: &Token) -> Result<Ast> {
    if !token.value.contains('.') {
        if let Ok(value) = token.value.parse::<i64>() {
            return Ok(Ast::IntegerLiteral(value));
        }
    }
    Decimal::from_str(&token.value)
        .map(Ast::DecimalLiteral)
        .map_err(|_| {
            Error::ParseError(format!(
                "Invalid number literal '{}' at line {}, column {}",
                token.value, token.line, token.column
            ))
        })
}
