//! Unit tests for the FHIRPath lexer module

use cuprum_fhirpath::lexer::Lexer;
use cuprum_fhirpath::token::{Token, TokenKind};

/// Helper function to tokenize input and collect all tokens
fn tokenize(input: &str) -> Vec<Token> {
    Lexer::tokenize(input).unwrap()
}

#[test]
fn test_number_literals() {
    let tokens = tokenize("42");
    assert_eq!(tokens.len(), 2); // Number + EOF
    assert_eq!(tokens[0].kind, TokenKind::Number);
    assert_eq!(tokens[0].value, "42");

    let tokens = tokenize("3.14");
    assert_eq!(tokens[0].kind, TokenKind::Number);
    assert_eq!(tokens[0].value, "3.14");

    // Leading minus lexes as a symbol
    let tokens = tokenize("-42");
    assert_eq!(tokens[0].kind, TokenKind::Symbol);
    assert_eq!(tokens[0].value, "-");
    assert_eq!(tokens[1].kind, TokenKind::Number);
    assert_eq!(tokens[1].value, "42");
}

#[test]
fn test_string_literals() {
    let tokens = tokenize("'hello'");
    assert_eq!(tokens[0].kind, TokenKind::String);
    assert_eq!(tokens[0].value, "hello");

    let tokens = tokenize("''");
    assert_eq!(tokens[0].value, "");

    // Escaped quote
    let tokens = tokenize("'don\\'t'");
    assert_eq!(tokens[0].value, "don't");

    // Unicode escape
    let tokens = tokenize("'\\u0041'");
    assert_eq!(tokens[0].value, "A");
}

#[test]
fn test_identifiers_and_paths() {
    let tokens = tokenize("Patient.name.family");
    let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Identifier,
            TokenKind::Symbol,
            TokenKind::Identifier,
            TokenKind::Symbol,
            TokenKind::Identifier,
            TokenKind::Eof,
        ]
    );
    assert_eq!(tokens[0].value, "Patient");
    assert_eq!(tokens[2].value, "name");
    assert_eq!(tokens[4].value, "family");
}

#[test]
fn test_delimited_identifier() {
    let tokens = tokenize("`value quantity`");
    assert_eq!(tokens[0].kind, TokenKind::Identifier);
    assert_eq!(tokens[0].value, "value quantity");
}

#[test]
fn test_dollar_variables() {
    let tokens = tokenize("$this");
    assert_eq!(tokens[0].kind, TokenKind::Identifier);
    assert_eq!(tokens[0].value, "$this");

    let tokens = tokenize("$index");
    assert_eq!(tokens[0].value, "$index");
}

#[test]
fn test_two_character_operators() {
    for (input, expected) in [("<=", "<="), (">=", ">="), ("!=", "!="), ("!~", "!~")] {
        let tokens = tokenize(input);
        assert_eq!(tokens[0].kind, TokenKind::Symbol);
        assert_eq!(tokens[0].value, expected);
    }
}

#[test]
fn test_keyword_operators_lex_as_identifiers() {
    let tokens = tokenize("a and b");
    assert_eq!(tokens[1].kind, TokenKind::Identifier);
    assert_eq!(tokens[1].value, "and");
}

#[test]
fn test_comments_are_dropped() {
    let tokens = tokenize("name // trailing comment");
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].value, "name");

    let tokens = tokenize("a /* block */ . b");
    let values: Vec<&str> = tokens.iter().map(|t| t.value.as_str()).collect();
    assert_eq!(values, vec!["a", ".", "b", ""]);
}

#[test]
fn test_date_literal_passthrough() {
    let tokens = tokenize("@2020-03-15");
    assert_eq!(tokens[0].kind, TokenKind::DateTime);
    assert_eq!(tokens[0].value, "2020-03-15");
}

#[test]
fn test_time_literal_padding() {
    let tokens = tokenize("@T12");
    assert_eq!(tokens[0].value, "T12:00:00");

    let tokens = tokenize("@T12:30");
    assert_eq!(tokens[0].value, "T12:30:00");
}

#[test]
fn test_datetime_literal_utc_coercion() {
    let tokens = tokenize("@2020-03-15T10:00:00+02:00");
    assert_eq!(tokens[0].value, "2020-03-15T08:00:00.000Z");
}

#[test]
fn test_line_and_column_positions() {
    let tokens = tokenize("name.family");
    assert_eq!(tokens[0].line, 1);
    assert_eq!(tokens[0].column, 1);
    assert_eq!(tokens[1].column, 5);
    assert_eq!(tokens[2].column, 6);
}

#[test]
fn test_unterminated_string_errors() {
    assert!(Lexer::tokenize("'oops").is_err());
    assert!(Lexer::tokenize("/* oops").is_err());
}
