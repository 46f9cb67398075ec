//! Per-type WHERE clause builders
//!
//! Each builder compiles one parameter occurrence into a SQL condition,
//! pushing every literal as a bind parameter. OR alternatives within one
//! occurrence join with OR; the caller ANDs occurrences together.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

use cuprum_registry::{ColumnType, LookupTable, SearchParamType, SearchParameterImpl};

use crate::services::indexing::extract::parse_fhir_datetime;
use crate::services::indexing::text::normalize_string;
use crate::{Error, Result};

use super::super::params::{ParsedParam, SearchModifier, SearchPrefix, SearchValue};
use super::{escape_like, push, BindValue};

fn join_or(mut parts: Vec<String>) -> Result<String> {
    match parts.len() {
        0 => Err(Error::Search("Search parameter has no usable value".into())),
        1 => Ok(parts.remove(0)),
        _ => Ok(format!("({})", parts.join(" OR "))),
    }
}

/// The `:missing` value must be exactly `true` or `false`.
fn missing_wanted(param: &ParsedParam) -> Result<bool> {
    match param.values.first().map(|v| v.value.as_str()) {
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        _ => Err(Error::Search(format!(
            ":missing on '{}' requires a true/false value",
            param.code
        ))),
    }
}

/// `:missing=true` matches rows without a value; `false` the inverse.
pub(super) fn build_missing_clause(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
) -> Result<String> {
    if missing_wanted(param)? {
        Ok(format!("\"{}\" IS NULL", impl_.column_name))
    } else {
        Ok(format!("\"{}\" IS NOT NULL", impl_.column_name))
    }
}

/// `:missing` for lookup-strategy parameters: the resource has no rows in
/// the global table at all (or at least one, for `false`).
pub(super) fn build_lookup_missing_clause(
    resource_type: &str,
    table: LookupTable,
    param: &ParsedParam,
) -> Result<String> {
    let exists = format!(
        "EXISTS (SELECT 1 FROM \"{}\" l WHERE l.\"resourceId\" = \"{}\".\"id\" \
         AND l.\"resourceType\" = '{}')",
        table.table_name(),
        resource_type,
        resource_type
    );

    if missing_wanted(param)? {
        Ok(format!("NOT {}", exists))
    } else {
        Ok(exists)
    }
}

/// `:missing` for references-table parameters: no reference row with this
/// parameter's code (or at least one, for `false`).
pub(super) fn build_join_reference_missing_clause(
    resource_type: &str,
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    let code_idx = push(bind_params, BindValue::Text(impl_.code.clone()));
    let exists = format!(
        "EXISTS (SELECT 1 FROM \"{}_References\" r WHERE r.\"resourceId\" = \"{}\".\"id\" \
         AND r.\"code\" = ${})",
        resource_type, resource_type, code_idx
    );

    if missing_wanted(param)? {
        Ok(format!("NOT {}", exists))
    } else {
        Ok(exists)
    }
}

/// Dispatch a column-strategy parameter by its search type.
pub(super) fn build_column_clause(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    match impl_.param_type {
        SearchParamType::Token => build_token_clause(impl_, param, bind_params),
        SearchParamType::String => build_string_clause(impl_, param, bind_params),
        SearchParamType::Date => build_date_clause(impl_, param, bind_params),
        SearchParamType::Number => build_number_clause(impl_, param, bind_params),
        SearchParamType::Quantity => build_quantity_clause(impl_, param, bind_params),
        SearchParamType::Uri => build_uri_clause(impl_, param, bind_params),
        SearchParamType::Reference => build_reference_clause(impl_, param, bind_params),
        SearchParamType::Composite | SearchParamType::Special => Err(Error::Search(format!(
            "Search parameter '{}' is not supported",
            param.code
        ))),
    }
}

/// Token columns hold `code` and `system|code` forms in a TEXT[] column.
fn build_token_clause(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    match &param.modifier {
        None | Some(SearchModifier::Not) => {}
        Some(other) => {
            return Err(Error::Search(format!(
                "Modifier {:?} is not supported for token parameter '{}'",
                other, param.code
            )))
        }
    }

    let column = &impl_.column_name;
    let mut parts = Vec::new();
    for value in &param.values {
        let raw = value.value.as_str();
        match raw.split_once('|') {
            // `system|` - any code in that system
            Some((system, "")) => {
                let pattern = format!("{}|%", escape_like(system));
                let idx = push(bind_params, BindValue::Text(pattern));
                parts.push(format!(
                    "EXISTS (SELECT 1 FROM unnest(\"{}\") AS t(v) WHERE t.v LIKE ${} ESCAPE E'\\\\')",
                    column, idx
                ));
            }
            // `system|code` and `|code` match their stored form directly
            Some(_) => {
                let idx = push(bind_params, BindValue::Text(raw.to_string()));
                parts.push(format!("${} = ANY(\"{}\")", idx, column));
            }
            None => {
                let idx = push(bind_params, BindValue::Text(raw.to_string()));
                parts.push(format!("${} = ANY(\"{}\")", idx, column));
            }
        }
    }

    let clause = join_or(parts)?;
    if param.modifier == Some(SearchModifier::Not) {
        // :not also matches rows without any value
        Ok(format!("(\"{}\" IS NULL OR NOT {})", column, clause))
    } else {
        Ok(clause)
    }
}

/// Strings: starts-with by default, `:exact` equality, `:contains`
/// substring; all case-insensitive via ILIKE except `:exact`.
fn build_string_clause(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    let column = &impl_.column_name;
    let mut parts = Vec::new();

    for value in &param.values {
        let condition = match &param.modifier {
            Some(SearchModifier::Exact) => {
                let idx = push(bind_params, BindValue::Text(value.value.clone()));
                if impl_.array {
                    format!("${} = ANY(\"{}\")", idx, column)
                } else {
                    format!("\"{}\" = ${}", column, idx)
                }
            }
            Some(SearchModifier::Contains) => {
                let pattern = format!("%{}%", escape_like(&value.value));
                let idx = push(bind_params, BindValue::Text(pattern));
                ilike(column, idx, impl_.array)
            }
            None => {
                let pattern = format!("{}%", escape_like(&value.value));
                let idx = push(bind_params, BindValue::Text(pattern));
                ilike(column, idx, impl_.array)
            }
            Some(other) => {
                return Err(Error::Search(format!(
                    "Modifier {:?} is not supported for string parameter '{}'",
                    other, param.code
                )))
            }
        };
        parts.push(condition);
    }

    join_or(parts)
}

fn ilike(column: &str, idx: usize, array: bool) -> String {
    if array {
        format!(
            "EXISTS (SELECT 1 FROM unnest(\"{}\") AS t(v) WHERE t.v ILIKE ${} ESCAPE E'\\\\')",
            column, idx
        )
    } else {
        format!("\"{}\" ILIKE ${} ESCAPE E'\\\\'", column, idx)
    }
}

fn build_date_clause(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    let column = &impl_.column_name;
    let mut parts = Vec::new();

    for value in &param.values {
        let op = value.prefix.unwrap_or(SearchPrefix::Eq).sql_op();
        let idx = if impl_.column_type == ColumnType::Date {
            let prefix = value.value.get(..10).unwrap_or(&value.value);
            let date = NaiveDate::parse_from_str(prefix, "%Y-%m-%d").map_err(|_| {
                Error::Search(format!("Invalid date value: {}", value.value))
            })?;
            push(bind_params, BindValue::Date(date))
        } else {
            let instant = parse_fhir_datetime(&value.value)
                .ok_or_else(|| Error::Search(format!("Invalid date value: {}", value.value)))?;
            push(bind_params, BindValue::Timestamp(instant))
        };
        parts.push(format!("\"{}\" {} ${}", column, op, idx));
    }

    join_or(parts)
}

fn build_number_clause(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    let column = &impl_.column_name;
    let mut parts = Vec::new();

    for value in &param.values {
        let op = value.prefix.unwrap_or(SearchPrefix::Eq).sql_op();
        let number = Decimal::from_str(&value.value)
            .map_err(|_| Error::Search(format!("Invalid number value: {}", value.value)))?;
        let idx = push(bind_params, BindValue::Numeric(number));
        parts.push(format!("\"{}\" {} ${}", column, op, idx));
    }

    join_or(parts)
}

/// Quantity values may carry `number|system|code`; only the number part
/// compares against the column.
fn build_quantity_clause(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    let column = &impl_.column_name;
    let mut parts = Vec::new();

    for value in &param.values {
        let op = value.prefix.unwrap_or(SearchPrefix::Eq).sql_op();
        let number_part = value.value.split('|').next().unwrap_or_default();
        let number: f64 = number_part
            .parse()
            .map_err(|_| Error::Search(format!("Invalid quantity value: {}", value.value)))?;
        let idx = push(bind_params, BindValue::Double(number));
        parts.push(format!("\"{}\" {} ${}", column, op, idx));
    }

    join_or(parts)
}

fn build_uri_clause(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    let column = &impl_.column_name;
    let mut parts = Vec::new();

    for value in &param.values {
        let condition = match &param.modifier {
            Some(SearchModifier::Below) => {
                let pattern = format!("{}%", escape_like(&value.value));
                let idx = push(bind_params, BindValue::Text(pattern));
                format!("\"{}\" LIKE ${} ESCAPE E'\\\\'", column, idx)
            }
            None => {
                let idx = push(bind_params, BindValue::Text(value.value.clone()));
                if impl_.array {
                    format!("${} = ANY(\"{}\")", idx, column)
                } else {
                    format!("\"{}\" = ${}", column, idx)
                }
            }
            Some(other) => {
                return Err(Error::Search(format!(
                    "Modifier {:?} is not supported for uri parameter '{}'",
                    other, param.code
                )))
            }
        };
        parts.push(condition);
    }

    join_or(parts)
}

/// References compare by the stored `Type/id` form. Bare ids expand across
/// the parameter's target types (or the `:Type` modifier).
fn build_reference_clause(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    let column = &impl_.column_name;
    let mut parts = Vec::new();

    for value in &param.values {
        for candidate in reference_candidates(impl_, param, value) {
            let idx = push(bind_params, BindValue::Text(candidate));
            if impl_.array {
                parts.push(format!("${} = ANY(\"{}\")", idx, column));
            } else {
                parts.push(format!("\"{}\" = ${}", column, idx));
            }
        }
    }

    join_or(parts)
}

/// Expand one reference search value into the stored `Type/id` candidates.
fn reference_candidates(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    value: &SearchValue,
) -> Vec<String> {
    let raw = value.value.as_str();

    if raw.contains('/') {
        // Absolute URLs reduce to their Type/id tail
        let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() >= 2 {
            return vec![format!(
                "{}/{}",
                segments[segments.len() - 2],
                segments[segments.len() - 1]
            )];
        }
        return vec![raw.to_string()];
    }

    if let Some(SearchModifier::Type(target)) = &param.modifier {
        return vec![format!("{}/{}", target, raw)];
    }

    if impl_.target_types.is_empty() {
        // No declared targets; a bare id cannot be typed
        return vec![raw.to_string()];
    }

    impl_
        .target_types
        .iter()
        .map(|target| format!("{}/{}", target, raw))
        .collect()
}

/// `_lastUpdated` compares against the fixed timestamp column.
pub(super) fn build_last_updated_clause(
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    let mut parts = Vec::new();
    for value in &param.values {
        let op = value.prefix.unwrap_or(SearchPrefix::Eq).sql_op();
        let instant = parse_fhir_datetime(&value.value)
            .ok_or_else(|| Error::Search(format!("Invalid _lastUpdated value: {}", value.value)))?;
        let idx = push(bind_params, BindValue::Timestamp(instant));
        parts.push(format!("\"lastUpdated\" {} ${}", op, idx));
    }
    join_or(parts)
}

/// Lookup-strategy parameters compile to an EXISTS subquery against the
/// global table. The resource type literal is registry-validated, never
/// client data.
pub(super) fn build_lookup_clause(
    resource_type: &str,
    table: LookupTable,
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    let mut parts = Vec::new();
    for value in &param.values {
        let condition = match table {
            LookupTable::HumanName => {
                human_name_condition(impl_, param, &value.value, bind_params)?
            }
            LookupTable::Address => address_condition(impl_, param, &value.value, bind_params)?,
            LookupTable::ContactPoint => {
                contact_point_condition(impl_, &value.value, bind_params)
            }
            LookupTable::Identifier => identifier_condition(&value.value, bind_params),
        };
        parts.push(format!(
            "EXISTS (SELECT 1 FROM \"{}\" l WHERE l.\"resourceId\" = \"{}\".\"id\" \
             AND l.\"resourceType\" = '{}' AND {})",
            table.table_name(),
            resource_type,
            resource_type,
            condition
        ));
    }
    join_or(parts)
}

fn string_match(
    column: &str,
    modifier: &Option<SearchModifier>,
    value: &str,
    bind_params: &mut Vec<BindValue>,
) -> String {
    match modifier {
        Some(SearchModifier::Exact) => {
            let idx = push(bind_params, BindValue::Text(value.to_string()));
            format!("l.\"{}\" = ${}", column, idx)
        }
        Some(SearchModifier::Contains) => {
            let pattern = format!("%{}%", escape_like(value));
            let idx = push(bind_params, BindValue::Text(pattern));
            format!("l.\"{}\" ILIKE ${} ESCAPE E'\\\\'", column, idx)
        }
        _ => {
            let pattern = format!("{}%", escape_like(value));
            let idx = push(bind_params, BindValue::Text(pattern));
            format!("l.\"{}\" ILIKE ${} ESCAPE E'\\\\'", column, idx)
        }
    }
}

fn human_name_condition(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    value: &str,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    Ok(match impl_.code.as_str() {
        "given" => string_match("given", &param.modifier, value, bind_params),
        "family" => string_match("family", &param.modifier, value, bind_params),
        // `name` and `phonetic` match the normalized aggregate
        _ => string_match(
            "name",
            &param.modifier,
            &normalize_string(value),
            bind_params,
        ),
    })
}

fn address_condition(
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    value: &str,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    Ok(match impl_.code.as_str() {
        "address-city" => string_match("city", &param.modifier, value, bind_params),
        "address-country" => string_match("country", &param.modifier, value, bind_params),
        "address-postalcode" => string_match("postalCode", &param.modifier, value, bind_params),
        "address-state" => string_match("state", &param.modifier, value, bind_params),
        "address-use" => {
            let idx = push(bind_params, BindValue::Text(value.to_string()));
            format!("l.\"use\" = ${}", idx)
        }
        _ => string_match(
            "address",
            &param.modifier,
            &normalize_string(value),
            bind_params,
        ),
    })
}

fn contact_point_condition(
    impl_: &SearchParameterImpl,
    value: &str,
    bind_params: &mut Vec<BindValue>,
) -> String {
    let value_idx = push(bind_params, BindValue::Text(value.to_string()));
    match impl_.code.as_str() {
        // `phone` and `email` constrain the system
        code @ ("phone" | "email") => {
            let system_idx = push(bind_params, BindValue::Text(code.to_string()));
            format!(
                "l.\"system\" = ${} AND l.\"value\" = ${}",
                system_idx, value_idx
            )
        }
        _ => format!("l.\"value\" = ${}", value_idx),
    }
}

/// Identifier searches carry token semantics: `system|value`, `|value`,
/// `system|`, or a bare value.
fn identifier_condition(value: &str, bind_params: &mut Vec<BindValue>) -> String {
    match value.split_once('|') {
        Some((system, "")) => {
            let idx = push(bind_params, BindValue::Text(system.to_string()));
            format!("l.\"system\" = ${}", idx)
        }
        Some(("", code)) => {
            let idx = push(bind_params, BindValue::Text(code.to_string()));
            format!("l.\"system\" IS NULL AND l.\"value\" = ${}", idx)
        }
        Some((system, code)) => {
            let system_idx = push(bind_params, BindValue::Text(system.to_string()));
            let code_idx = push(bind_params, BindValue::Text(code.to_string()));
            format!(
                "l.\"system\" = ${} AND l.\"value\" = ${}",
                system_idx, code_idx
            )
        }
        None => {
            let idx = push(bind_params, BindValue::Text(value.to_string()));
            format!("l.\"value\" = ${}", idx)
        }
    }
}

/// Resolve a reference parameter through the per-type references table.
pub(super) fn build_join_reference_clause(
    resource_type: &str,
    impl_: &SearchParameterImpl,
    param: &ParsedParam,
    bind_params: &mut Vec<BindValue>,
) -> Result<String> {
    let mut parts = Vec::new();
    for value in &param.values {
        // The references table stores bare target ids
        let target_id = value
            .value
            .rsplit('/')
            .next()
            .unwrap_or(&value.value)
            .to_string();
        let code_idx = push(bind_params, BindValue::Text(impl_.code.clone()));
        let target_idx = push(bind_params, BindValue::Text(target_id));
        parts.push(format!(
            "EXISTS (SELECT 1 FROM \"{}_References\" r WHERE r.\"resourceId\" = \"{}\".\"id\" \
             AND r.\"code\" = ${} AND r.\"targetId\" = ${})",
            resource_type, resource_type, code_idx, target_idx
        ));
    }
    join_or(parts)
}
