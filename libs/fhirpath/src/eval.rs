//! FHIRPath evaluator
//!
//! Walks the AST over tree-shaped JSON input and returns collections of
//! typed values. Implements the subset the server relies on: path
//! navigation with array flattening, existence and filtering functions,
//! equality and ordering comparisons, boolean logic, unions, type tests,
//! and indexing. References are never chased; `resolve()` only surfaces
//! the type named inside a reference string.

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::ast::{Ast, BinaryOperator, UnaryOperator};
use crate::error::{Error, Result};

/// A value paired with its FHIR type tag
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    pub fhir_type: String,
    pub value: Value,
}

impl TypedValue {
    pub fn new(fhir_type: impl Into<String>, value: Value) -> Self {
        Self {
            fhir_type: fhir_type.into(),
            value,
        }
    }

    /// Tag a raw JSON value by its shape.
    pub fn from_value(value: Value) -> Self {
        let fhir_type = match &value {
            Value::Bool(_) => "boolean".to_string(),
            Value::Number(n) if n.is_i64() || n.is_u64() => "integer".to_string(),
            Value::Number(_) => "decimal".to_string(),
            Value::String(_) => "string".to_string(),
            Value::Object(obj) => obj
                .get("resourceType")
                .and_then(|v| v.as_str())
                .unwrap_or("BackboneElement")
                .to_string(),
            Value::Array(_) | Value::Null => "empty".to_string(),
        };
        Self { fhir_type, value }
    }
}

/// Evaluation context: variables visible to the expression
struct EvalContext {
    variables: HashMap<String, Vec<TypedValue>>,
}

/// Evaluate an expression against a single JSON input.
pub fn eval(ast: &Ast, input: &Value) -> Result<Vec<TypedValue>> {
    let root = TypedValue::from_value(input.clone());
    let mut ctx = EvalContext {
        variables: HashMap::new(),
    };
    ctx.variables
        .insert("resource".to_string(), vec![root.clone()]);
    ctx.variables
        .insert("context".to_string(), vec![root.clone()]);
    eval_node(&mut ctx, ast, &[root])
}

/// Evaluate and return the raw JSON values.
pub fn eval_to_values(ast: &Ast, input: &Value) -> Result<Vec<Value>> {
    Ok(eval(ast, input)?.into_iter().map(|tv| tv.value).collect())
}

fn eval_node(ctx: &mut EvalContext, node: &Ast, input: &[TypedValue]) -> Result<Vec<TypedValue>> {
    match node {
        Ast::EmptySet => Ok(Vec::new()),
        Ast::BooleanLiteral(b) => Ok(vec![TypedValue::new("boolean", json!(b))]),
        Ast::IntegerLiteral(i) => Ok(vec![TypedValue::new("integer", json!(i))]),
        Ast::DecimalLiteral(d) => Ok(vec![TypedValue::new(
            "decimal",
            serde_json::from_str(&d.to_string()).unwrap_or(Value::Null),
        )]),
        Ast::StringLiteral(s) => Ok(vec![TypedValue::new("string", json!(s))]),
        Ast::TemporalLiteral(s) => Ok(vec![TypedValue::new("dateTime", json!(s))]),

        Ast::Symbol(name) => eval_symbol(name, input),
        Ast::Variable(name) => {
            let key = name.trim_start_matches('$');
            if key == "this" {
                return Ok(input.to_vec());
            }
            Ok(ctx.variables.get(key).cloned().unwrap_or_default())
        }
        Ast::ExternalConstant(name) => Ok(ctx.variables.get(name).cloned().unwrap_or_default()),

        Ast::Unary { op, operand } => {
            let values = eval_node(ctx, operand, input)?;
            eval_unary(*op, values)
        }
        Ast::Binary { op, left, right } => eval_binary(ctx, *op, left, right, input),
        Ast::Function { name, args } => eval_function(ctx, name, args, input),
        Ast::Index { target, index } => {
            let collection = eval_node(ctx, target, input)?;
            let index_values = eval_node(ctx, index, input)?;
            let Some(idx) = singleton_integer(&index_values) else {
                return Ok(Vec::new());
            };
            if idx < 0 {
                return Ok(Vec::new());
            }
            Ok(collection.into_iter().nth(idx as usize).into_iter().collect())
        }
    }
}

/// A bare identifier: resource-type passthrough at the root, property
/// navigation otherwise.
fn eval_symbol(name: &str, input: &[TypedValue]) -> Result<Vec<TypedValue>> {
    let mut output = Vec::new();
    for item in input {
        if name
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false)
            && item
                .value
                .get("resourceType")
                .and_then(|v| v.as_str())
                .map(|rt| rt == name)
                .unwrap_or(false)
        {
            output.push(item.clone());
            continue;
        }
        get_property(item, name, &mut output);
    }
    Ok(output)
}

/// Property access with array flattening and `value[x]` choice probing.
fn get_property(item: &TypedValue, name: &str, output: &mut Vec<TypedValue>) {
    let Some(obj) = item.value.as_object() else {
        return;
    };

    if let Some(value) = obj.get(name) {
        push_flattened(value, None, output);
        return;
    }

    // Choice-type element: `value` matches `valueQuantity`, `valueString`, ...
    for (key, value) in obj {
        if let Some(suffix) = key.strip_prefix(name) {
            if suffix
                .chars()
                .next()
                .map(|c| c.is_ascii_uppercase())
                .unwrap_or(false)
            {
                push_flattened(value, Some(choice_type_tag(suffix)), output);
                return;
            }
        }
    }
}

fn push_flattened(value: &Value, type_tag: Option<String>, output: &mut Vec<TypedValue>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                push_flattened(item, type_tag.clone(), output);
            }
        }
        other => {
            let mut tv = TypedValue::from_value(other.clone());
            if let Some(tag) = type_tag {
                tv.fhir_type = tag;
            }
            output.push(tv);
        }
    }
}

/// `valueString` -> `string`, `valueQuantity` -> `Quantity`
fn choice_type_tag(suffix: &str) -> String {
    const PRIMITIVES: &[&str] = &[
        "Boolean", "Integer", "Decimal", "String", "Date", "DateTime", "Time", "Instant", "Code",
        "Uri", "Url", "Canonical", "Oid", "Id", "Markdown", "Base64Binary", "UnsignedInt",
        "PositiveInt",
    ];
    if PRIMITIVES.contains(&suffix) {
        let mut chars = suffix.chars();
        let first = chars.next().unwrap().to_ascii_lowercase();
        format!("{}{}", first, chars.as_str())
    } else {
        suffix.to_string()
    }
}

fn eval_unary(op: UnaryOperator, values: Vec<TypedValue>) -> Result<Vec<TypedValue>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let Some(number) = singleton_decimal(&values) else {
        return Err(Error::InvalidOperation(
            "Unary +/- requires a single numeric operand".into(),
        ));
    };
    let result = match op {
        UnaryOperator::Plus => number,
        UnaryOperator::Minus => -number,
    };
    Ok(vec![decimal_value(result)])
}

fn eval_binary(
    ctx: &mut EvalContext,
    op: BinaryOperator,
    left: &Ast,
    right: &Ast,
    input: &[TypedValue],
) -> Result<Vec<TypedValue>> {
    match op {
        BinaryOperator::Dot => {
            let lhs = eval_node(ctx, left, input)?;
            match right {
                Ast::Function { name, args } => eval_function(ctx, name, args, &lhs),
                _ => eval_node(ctx, right, &lhs),
            }
        }
        BinaryOperator::Union => {
            let mut lhs = eval_node(ctx, left, input)?;
            let rhs = eval_node(ctx, right, input)?;
            for item in rhs {
                if !lhs.iter().any(|existing| existing.value == item.value) {
                    lhs.push(item);
                }
            }
            Ok(lhs)
        }
        BinaryOperator::And
        | BinaryOperator::Or
        | BinaryOperator::Xor
        | BinaryOperator::Implies => {
            let lhs = to_boolean(&eval_node(ctx, left, input)?);
            let rhs = to_boolean(&eval_node(ctx, right, input)?);
            Ok(boolean_result(eval_logic(op, lhs, rhs)))
        }
        BinaryOperator::Equal | BinaryOperator::NotEqual => {
            let lhs = eval_node(ctx, left, input)?;
            let rhs = eval_node(ctx, right, input)?;
            if lhs.is_empty() || rhs.is_empty() {
                return Ok(Vec::new());
            }
            let equal = collections_equal(&lhs, &rhs);
            let result = if op == BinaryOperator::Equal {
                equal
            } else {
                !equal
            };
            Ok(boolean_result(Some(result)))
        }
        BinaryOperator::Equivalent | BinaryOperator::NotEquivalent => {
            let lhs = eval_node(ctx, left, input)?;
            let rhs = eval_node(ctx, right, input)?;
            let equivalent = collections_equivalent(&lhs, &rhs);
            let result = if op == BinaryOperator::Equivalent {
                equivalent
            } else {
                !equivalent
            };
            Ok(boolean_result(Some(result)))
        }
        BinaryOperator::LessThan
        | BinaryOperator::LessThanOrEqual
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterThanOrEqual => {
            let lhs = eval_node(ctx, left, input)?;
            let rhs = eval_node(ctx, right, input)?;
            if lhs.is_empty() || rhs.is_empty() {
                return Ok(Vec::new());
            }
            let ordering = compare_singletons(&lhs, &rhs)?;
            let result = match op {
                BinaryOperator::LessThan => ordering.is_lt(),
                BinaryOperator::LessThanOrEqual => ordering.is_le(),
                BinaryOperator::GreaterThan => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(boolean_result(Some(result)))
        }
        BinaryOperator::Add
        | BinaryOperator::Subtract
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::IntegerDivide
        | BinaryOperator::Modulo => {
            let lhs = eval_node(ctx, left, input)?;
            let rhs = eval_node(ctx, right, input)?;
            eval_arithmetic(op, &lhs, &rhs)
        }
        BinaryOperator::Concatenate => {
            let lhs = eval_node(ctx, left, input)?;
            let rhs = eval_node(ctx, right, input)?;
            let left_str = singleton_string(&lhs).unwrap_or_default();
            let right_str = singleton_string(&rhs).unwrap_or_default();
            Ok(vec![TypedValue::new(
                "string",
                json!(format!("{}{}", left_str, right_str)),
            )])
        }
        BinaryOperator::In => {
            let lhs = eval_node(ctx, left, input)?;
            let rhs = eval_node(ctx, right, input)?;
            if lhs.is_empty() {
                return Ok(Vec::new());
            }
            let member = lhs
                .iter()
                .all(|item| rhs.iter().any(|r| r.value == item.value));
            Ok(boolean_result(Some(member)))
        }
        BinaryOperator::Contains => {
            let lhs = eval_node(ctx, left, input)?;
            let rhs = eval_node(ctx, right, input)?;
            if rhs.is_empty() {
                return Ok(Vec::new());
            }
            let member = rhs
                .iter()
                .all(|item| lhs.iter().any(|l| l.value == item.value));
            Ok(boolean_result(Some(member)))
        }
        BinaryOperator::Is => {
            let lhs = eval_node(ctx, left, input)?;
            let type_name = right
                .type_specifier()
                .ok_or_else(|| Error::InvalidOperation("'is' requires a type name".into()))?;
            if lhs.is_empty() {
                return Ok(Vec::new());
            }
            Ok(boolean_result(Some(
                lhs.len() == 1 && matches_type(&lhs[0], &type_name),
            )))
        }
        BinaryOperator::As => {
            let lhs = eval_node(ctx, left, input)?;
            let type_name = right
                .type_specifier()
                .ok_or_else(|| Error::InvalidOperation("'as' requires a type name".into()))?;
            Ok(lhs
                .into_iter()
                .filter(|tv| matches_type(tv, &type_name))
                .collect())
        }
    }
}

fn eval_logic(op: BinaryOperator, lhs: Option<bool>, rhs: Option<bool>) -> Option<bool> {
    match op {
        BinaryOperator::And => match (lhs, rhs) {
            (Some(true), Some(true)) => Some(true),
            (Some(false), _) | (_, Some(false)) => Some(false),
            _ => None,
        },
        BinaryOperator::Or => match (lhs, rhs) {
            (Some(false), Some(false)) => Some(false),
            (Some(true), _) | (_, Some(true)) => Some(true),
            _ => None,
        },
        BinaryOperator::Xor => match (lhs, rhs) {
            (Some(a), Some(b)) => Some(a != b),
            _ => None,
        },
        BinaryOperator::Implies => match (lhs, rhs) {
            (Some(false), _) => Some(true),
            (_, Some(true)) => Some(true),
            (Some(true), Some(false)) => Some(false),
            _ => None,
        },
        _ => unreachable!("not a logic operator"),
    }
}

fn eval_arithmetic(
    op: BinaryOperator,
    lhs: &[TypedValue],
    rhs: &[TypedValue],
) -> Result<Vec<TypedValue>> {
    if lhs.is_empty() || rhs.is_empty() {
        return Ok(Vec::new());
    }

    // String + is concatenation
    if op == BinaryOperator::Add {
        if let (Some(a), Some(b)) = (singleton_string(lhs), singleton_string(rhs)) {
            return Ok(vec![TypedValue::new("string", json!(format!("{}{}", a, b)))]);
        }
    }

    let (Some(a), Some(b)) = (singleton_decimal(lhs), singleton_decimal(rhs)) else {
        return Err(Error::InvalidOperation(format!(
            "Arithmetic {:?} requires singleton numeric operands",
            op
        )));
    };

    let result = match op {
        BinaryOperator::Add => a + b,
        BinaryOperator::Subtract => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::Divide => {
            if b.is_zero() {
                return Ok(Vec::new());
            }
            a / b
        }
        BinaryOperator::IntegerDivide => {
            if b.is_zero() {
                return Ok(Vec::new());
            }
            (a / b).trunc()
        }
        BinaryOperator::Modulo => {
            if b.is_zero() {
                return Ok(Vec::new());
            }
            a % b
        }
        _ => unreachable!("not an arithmetic operator"),
    };

    Ok(vec![decimal_value(result)])
}

fn eval_function(
    ctx: &mut EvalContext,
    name: &str,
    args: &[Ast],
    input: &[TypedValue],
) -> Result<Vec<TypedValue>> {
    match name {
        "empty" => Ok(boolean_result(Some(input.is_empty()))),
        "exists" => {
            if let Some(criteria) = args.first() {
                let filtered = filter_collection(ctx, criteria, input)?;
                Ok(boolean_result(Some(!filtered.is_empty())))
            } else {
                Ok(boolean_result(Some(!input.is_empty())))
            }
        }
        "all" => {
            let Some(criteria) = args.first() else {
                return Err(Error::EvaluationError("all() requires a criteria".into()));
            };
            for item in input {
                let result = eval_node(ctx, criteria, std::slice::from_ref(item))?;
                if to_boolean(&result) != Some(true) {
                    return Ok(boolean_result(Some(false)));
                }
            }
            Ok(boolean_result(Some(true)))
        }
        "not" => {
            let value = to_boolean(input);
            Ok(boolean_result(value.map(|b| !b)))
        }
        "count" => Ok(vec![TypedValue::new("integer", json!(input.len()))]),
        "first" => Ok(input.first().cloned().into_iter().collect()),
        "last" => Ok(input.last().cloned().into_iter().collect()),
        "distinct" => {
            let mut output: Vec<TypedValue> = Vec::new();
            for item in input {
                if !output.iter().any(|existing| existing.value == item.value) {
                    output.push(item.clone());
                }
            }
            Ok(output)
        }
        "where" => {
            let Some(criteria) = args.first() else {
                return Err(Error::EvaluationError("where() requires a criteria".into()));
            };
            filter_collection(ctx, criteria, input)
        }
        "select" => {
            let Some(projection) = args.first() else {
                return Err(Error::EvaluationError(
                    "select() requires a projection".into(),
                ));
            };
            let mut output = Vec::new();
            for item in input {
                output.extend(eval_node(ctx, projection, std::slice::from_ref(item))?);
            }
            Ok(output)
        }
        "ofType" | "as" => {
            let type_name = args
                .first()
                .and_then(|a| a.type_specifier())
                .ok_or_else(|| {
                    Error::EvaluationError(format!("{}() requires a type name", name))
                })?;
            Ok(input
                .iter()
                .filter(|tv| matches_type(tv, &type_name))
                .cloned()
                .collect())
        }
        "is" => {
            let type_name = args
                .first()
                .and_then(|a| a.type_specifier())
                .ok_or_else(|| Error::EvaluationError("is() requires a type name".into()))?;
            if input.is_empty() {
                return Ok(Vec::new());
            }
            Ok(boolean_result(Some(
                input.len() == 1 && matches_type(&input[0], &type_name),
            )))
        }
        "iif" => {
            let condition = args
                .first()
                .ok_or_else(|| Error::EvaluationError("iif() requires a condition".into()))?;
            let condition_value = to_boolean(&eval_node(ctx, condition, input)?);
            if condition_value == Some(true) {
                match args.get(1) {
                    Some(then_branch) => eval_node(ctx, then_branch, input),
                    None => Ok(Vec::new()),
                }
            } else {
                match args.get(2) {
                    Some(else_branch) => eval_node(ctx, else_branch, input),
                    None => Ok(Vec::new()),
                }
            }
        }
        // References are not chased; surface the target type named in the
        // reference string so `resolve() is Patient` filters work.
        "resolve" => {
            let mut output = Vec::new();
            for item in input {
                let Some(reference) = item.value.get("reference").and_then(|v| v.as_str()) else {
                    continue;
                };
                if reference.starts_with('#') || reference.starts_with("urn:") {
                    continue;
                }
                let segments: Vec<&str> = reference.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() >= 2 {
                    let target_type = segments[segments.len() - 2];
                    output.push(TypedValue::new(
                        target_type,
                        json!({ "resourceType": target_type, "id": segments[segments.len() - 1] }),
                    ));
                }
            }
            Ok(output)
        }
        other => Err(Error::EvaluationError(format!(
            "Unknown function: {}()",
            other
        ))),
    }
}

fn filter_collection(
    ctx: &mut EvalContext,
    criteria: &Ast,
    input: &[TypedValue],
) -> Result<Vec<TypedValue>> {
    let mut output = Vec::new();
    for item in input {
        let result = eval_node(ctx, criteria, std::slice::from_ref(item))?;
        if to_boolean(&result) == Some(true) {
            output.push(item.clone());
        }
    }
    Ok(output)
}

/// Boolean conversion of a collection: empty is unknown, a singleton boolean
/// is itself, any other non-empty collection is true.
fn to_boolean(collection: &[TypedValue]) -> Option<bool> {
    match collection {
        [] => None,
        [single] => match &single.value {
            Value::Bool(b) => Some(*b),
            _ => Some(true),
        },
        _ => Some(true),
    }
}

fn boolean_result(value: Option<bool>) -> Vec<TypedValue> {
    match value {
        Some(b) => vec![TypedValue::new("boolean", json!(b))],
        None => Vec::new(),
    }
}

fn collections_equal(lhs: &[TypedValue], rhs: &[TypedValue]) -> bool {
    lhs.len() == rhs.len()
        && lhs
            .iter()
            .zip(rhs.iter())
            .all(|(a, b)| values_equal(&a.value, &b.value))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (value_as_decimal(a), value_as_decimal(b)) {
        return x == y;
    }
    a == b
}

fn collections_equivalent(lhs: &[TypedValue], rhs: &[TypedValue]) -> bool {
    if lhs.is_empty() && rhs.is_empty() {
        return true;
    }
    if lhs.len() != rhs.len() {
        return false;
    }
    lhs.iter().all(|a| {
        rhs.iter()
            .any(|b| values_equivalent(&a.value, &b.value))
    })
}

fn values_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.eq_ignore_ascii_case(y),
        _ => values_equal(a, b),
    }
}

fn compare_singletons(lhs: &[TypedValue], rhs: &[TypedValue]) -> Result<std::cmp::Ordering> {
    let (Some(a), Some(b)) = (lhs.first(), rhs.first()) else {
        return Err(Error::InvalidOperation(
            "Comparison requires singleton operands".into(),
        ));
    };
    if lhs.len() != 1 || rhs.len() != 1 {
        return Err(Error::InvalidOperation(
            "Comparison requires singleton operands".into(),
        ));
    }

    if let (Some(x), Some(y)) = (value_as_decimal(&a.value), value_as_decimal(&b.value)) {
        return Ok(x.cmp(&y));
    }

    // Strings and normalized temporals order lexicographically.
    if let (Value::String(x), Value::String(y)) = (&a.value, &b.value) {
        return Ok(x.cmp(y));
    }

    Err(Error::InvalidOperation(format!(
        "Cannot compare {} with {}",
        a.fhir_type, b.fhir_type
    )))
}

fn value_as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn singleton_decimal(collection: &[TypedValue]) -> Option<Decimal> {
    match collection {
        [single] => value_as_decimal(&single.value),
        _ => None,
    }
}

fn singleton_integer(collection: &[TypedValue]) -> Option<i64> {
    match collection {
        [single] => single.value.as_i64(),
        _ => None,
    }
}

fn singleton_string(collection: &[TypedValue]) -> Option<String> {
    match collection {
        [single] => single.value.as_str().map(|s| s.to_string()),
        _ => None,
    }
}

fn decimal_value(value: Decimal) -> TypedValue {
    if value.scale() == 0 {
        if let Some(int) = value.to_i64() {
            return TypedValue::new("integer", json!(int));
        }
    }
    TypedValue::new(
        "decimal",
        serde_json::from_str(&value.to_string()).unwrap_or(Value::Null),
    )
}

/// Match a typed value against a type specifier (`Patient`, `FHIR.Patient`,
/// `System.String`, `Quantity`, `boolean`).
fn matches_type(tv: &TypedValue, type_name: &str) -> bool {
    let name = type_name
        .rsplit('.')
        .next()
        .unwrap_or(type_name);

    if tv.fhir_type.eq_ignore_ascii_case(name) {
        return true;
    }

    // System primitives map onto FHIR primitives
    match name {
        "String" => matches!(
            tv.fhir_type.as_str(),
            "string" | "code" | "uri" | "url" | "canonical" | "id" | "markdown"
        ),
        "Boolean" => tv.fhir_type == "boolean",
        "Integer" => tv.fhir_type == "integer",
        "Decimal" => matches!(tv.fhir_type.as_str(), "decimal" | "integer"),
        "DateTime" => matches!(tv.fhir_type.as_str(), "dateTime" | "instant"),
        _ => false,
    }
}
