//! FHIRPath engine - tokenizer, Pratt parser, parse cache, and evaluator
//!
//! This crate provides the FHIRPath evaluation pipeline used by the server
//! for search-value extraction and invariant checking:
//!
//! ```text
//! Expression String
//!      |
//!   Lexer -> Token stream
//!      |
//!   Parser (operator precedence) -> AST
//!      |
//!   Evaluator -> Vec<TypedValue>
//! ```
//!
//! Parsed expressions are cached in a process-wide LRU cache behind
//! [`parse`]; the cache can be swapped at boot via [`set_parse_cache`].

pub mod ast;
pub mod cache;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod token;

// Re-export main types
pub use ast::{Ast, BinaryOperator, UnaryOperator};
pub use cache::{parse, set_parse_cache, with_parse_cache, ParseCache};
pub use error::{Error, Result};
pub use eval::{eval, eval_to_values, TypedValue};
pub use lexer::Lexer;
pub use parser::parse_expression;
pub use token::{Token, TokenKind};
