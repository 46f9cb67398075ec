//! Unit tests for the FHIRPath parser module

use cuprum_fhirpath::ast::{Ast, BinaryOperator, UnaryOperator};
use cuprum_fhirpath::parser::parse_expression;

fn parse(input: &str) -> Ast {
    parse_expression(input).unwrap()
}

#[test]
fn test_parse_path_navigation() {
    let ast = parse("Patient.name.family");
    // Left-associative: (Patient.name).family
    let Ast::Binary { op, left, right } = ast else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Dot);
    assert_eq!(*right, Ast::Symbol("family".to_string()));
    let Ast::Binary { op, left, right } = *left else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Dot);
    assert_eq!(*left, Ast::Symbol("Patient".to_string()));
    assert_eq!(*right, Ast::Symbol("name".to_string()));
}

#[test]
fn test_parse_function_invocation() {
    let ast = parse("name.where(use = 'official')");
    let Ast::Binary { op, right, .. } = ast else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Dot);
    let Ast::Function { name, args } = *right else {
        panic!("expected function node");
    };
    assert_eq!(name, "where");
    assert_eq!(args.len(), 1);
}

#[test]
fn test_precedence_multiplicative_over_additive() {
    let ast = parse("1 + 2 * 3");
    let Ast::Binary { op, left, right } = ast else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Add);
    assert_eq!(*left, Ast::IntegerLiteral(1));
    let Ast::Binary { op, .. } = *right else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Multiply);
}

#[test]
fn test_precedence_and_over_or() {
    let ast = parse("a or b and c");
    let Ast::Binary { op, right, .. } = ast else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Or);
    let Ast::Binary { op, .. } = *right else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::And);
}

#[test]
fn test_left_associativity() {
    let ast = parse("1 - 2 - 3");
    // (1 - 2) - 3
    let Ast::Binary { op, left, right } = ast else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Subtract);
    assert_eq!(*right, Ast::IntegerLiteral(3));
    let Ast::Binary { op, .. } = *left else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Subtract);
}

#[test]
fn test_parenthesized_expression() {
    let ast = parse("(1 + 2) * 3");
    let Ast::Binary { op, left, .. } = ast else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Multiply);
    let Ast::Binary { op, .. } = *left else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Add);
}

#[test]
fn test_unary_polarity() {
    let ast = parse("-5");
    let Ast::Unary { op, operand } = ast else {
        panic!("expected unary node");
    };
    assert_eq!(op, UnaryOperator::Minus);
    assert_eq!(*operand, Ast::IntegerLiteral(5));
}

#[test]
fn test_union_operator() {
    let ast = parse("Patient.name | Person.name");
    let Ast::Binary { op, .. } = ast else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Union);
}

#[test]
fn test_indexer() {
    let ast = parse("name[0]");
    let Ast::Index { target, index } = ast else {
        panic!("expected index node");
    };
    assert_eq!(*target, Ast::Symbol("name".to_string()));
    assert_eq!(*index, Ast::IntegerLiteral(0));
}

#[test]
fn test_type_test() {
    let ast = parse("value is Quantity");
    let Ast::Binary { op, right, .. } = ast else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Is);
    assert_eq!(right.type_specifier().as_deref(), Some("Quantity"));

    let ast = parse("value as FHIR.Quantity");
    let Ast::Binary { op, right, .. } = ast else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::As);
    assert_eq!(right.type_specifier().as_deref(), Some("FHIR.Quantity"));
}

#[test]
fn test_empty_set_literal() {
    assert_eq!(parse("{}"), Ast::EmptySet);
}

#[test]
fn test_external_constant() {
    assert_eq!(
        parse("%resource"),
        Ast::ExternalConstant("resource".to_string())
    );
}

#[test]
fn test_contains_as_path_segment_after_dot() {
    // `contains` is an infix keyword but remains usable as an invocation name
    let ast = parse("expansion.contains");
    let Ast::Binary { op, right, .. } = ast else {
        panic!("expected binary node");
    };
    assert_eq!(op, BinaryOperator::Dot);
    assert_eq!(*right, Ast::Symbol("contains".to_string()));
}

#[test]
fn test_parse_errors() {
    assert!(parse_expression("").is_err());
    assert!(parse_expression("1 +").is_err());
    assert!(parse_expression("(1 + 2").is_err());
    assert!(parse_expression("name.").is_err());
    assert!(parse_expression("name..family").is_err());
}

#[test]
fn test_trailing_tokens_rejected() {
    assert!(parse_expression("name family").is_err());
}
