//! Search value extraction
//!
//! Walks resource JSON along the property path of a search parameter impl
//! (or evaluates the FHIRPath expression when the path is not a plain
//! dotted one) and coerces the extracted values to the column SQL type.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use cuprum_registry::{ColumnType, SearchParamType, SearchParameterImpl};

use crate::{Error, Result};

use super::references::parse_reference;
use super::ColumnValue;

/// Extract and coerce the value(s) for one column-strategy impl.
pub fn extract_column_value(
    resource: &Value,
    impl_: &SearchParameterImpl,
) -> Result<Option<ColumnValue>> {
    let raw_values = extract_raw_values(resource, &impl_.expression)?;
    if raw_values.is_empty() {
        return Ok(None);
    }

    if impl_.param_type == SearchParamType::Token {
        let mut forms = Vec::new();
        for value in &raw_values {
            token_forms(value, &mut forms);
        }
        forms.dedup();
        if forms.is_empty() {
            return Ok(None);
        }
        return Ok(Some(ColumnValue::TextArray(forms)));
    }

    match impl_.column_type {
        ColumnType::Text => {
            let mut texts = Vec::new();
            for value in &raw_values {
                if let Some(text) = coerce_text(value, impl_.param_type) {
                    texts.push(text);
                }
            }
            texts.dedup();
            if texts.is_empty() {
                Ok(None)
            } else if impl_.array {
                Ok(Some(ColumnValue::TextArray(texts)))
            } else {
                Ok(Some(ColumnValue::Text(texts.remove(0))))
            }
        }
        ColumnType::Timestamptz => Ok(raw_values
            .iter()
            .find_map(coerce_datetime)
            .map(ColumnValue::Timestamp)),
        ColumnType::Date => Ok(raw_values
            .iter()
            .find_map(coerce_date)
            .map(ColumnValue::Date)),
        ColumnType::Numeric => Ok(raw_values
            .iter()
            .find_map(coerce_decimal)
            .map(ColumnValue::Numeric)),
        ColumnType::DoublePrecision => Ok(raw_values
            .iter()
            .find_map(coerce_quantity)
            .map(ColumnValue::Double)),
        ColumnType::Boolean => Ok(raw_values
            .iter()
            .find_map(coerce_boolean)
            .map(ColumnValue::Boolean)),
        ColumnType::Uuid => Ok(None),
    }
}

/// Extract the raw JSON values addressed by an extraction expression.
///
/// Plain dotted paths walk the tree directly; anything else goes through
/// the FHIRPath engine.
pub fn extract_raw_values(resource: &Value, expression: &str) -> Result<Vec<Value>> {
    if let Some(segments) = trivial_path_segments(expression) {
        let mut output = Vec::new();
        walk_path(resource, &segments, &mut output);
        return Ok(output);
    }

    let ast = cuprum_fhirpath::parse(expression)
        .map_err(|e| Error::FhirPath(format!("{}: {}", expression, e)))?;
    cuprum_fhirpath::eval_to_values(&ast, resource)
        .map_err(|e| Error::FhirPath(format!("{}: {}", expression, e)))
}

/// A trivial path is `Type.seg1.seg2...` with purely alphanumeric segments.
/// Returns the segments after the resource-type prefix.
fn trivial_path_segments(expression: &str) -> Option<Vec<String>> {
    let mut segments: Vec<String> = Vec::new();
    for (i, segment) in expression.split('.').enumerate() {
        if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        if i == 0 {
            // Resource-type prefix is stripped, not navigated
            if !segment.chars().next().unwrap().is_ascii_uppercase() {
                return None;
            }
            continue;
        }
        segments.push(segment.to_string());
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

/// Walk the JSON tree, expanding across arrays and probing choice-type
/// suffixes (`value` matches `valueQuantity`, `valueString`, ...).
fn walk_path(value: &Value, segments: &[String], output: &mut Vec<Value>) {
    let Some((segment, rest)) = segments.split_first() else {
        flatten_into(value, output);
        return;
    };

    match value {
        Value::Array(items) => {
            for item in items {
                walk_path(item, segments, output);
            }
        }
        Value::Object(obj) => {
            if let Some(next) = obj.get(segment.as_str()) {
                walk_path(next, rest, output);
                return;
            }
            for (key, next) in obj {
                if let Some(suffix) = key.strip_prefix(segment.as_str()) {
                    if suffix
                        .chars()
                        .next()
                        .map(|c| c.is_ascii_uppercase())
                        .unwrap_or(false)
                    {
                        walk_path(next, rest, output);
                        return;
                    }
                }
            }
        }
        _ => {}
    }
}

fn flatten_into(value: &Value, output: &mut Vec<Value>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                flatten_into(item, output);
            }
        }
        other => output.push(other.clone()),
    }
}

/// The stored token forms of a value: `code` plus `system|code`
/// (or `|code` when the system is absent).
fn token_forms(value: &Value, forms: &mut Vec<String>) {
    match value {
        Value::Object(obj) => {
            if let Some(codings) = obj.get("coding") {
                token_forms(codings, forms);
                return;
            }
            let system = obj.get("system").and_then(|v| v.as_str());
            let code = obj
                .get("code")
                .and_then(|v| v.as_str())
                .or_else(|| obj.get("value").and_then(|v| v.as_str()));
            if let Some(code) = code {
                push_form(forms, code.to_string());
                match system {
                    Some(system) => push_form(forms, format!("{}|{}", system, code)),
                    None => push_form(forms, format!("|{}", code)),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                token_forms(item, forms);
            }
        }
        Value::String(s) => push_form(forms, s.clone()),
        Value::Bool(b) => push_form(forms, b.to_string()),
        Value::Number(n) => push_form(forms, n.to_string()),
        _ => {}
    }
}

fn push_form(forms: &mut Vec<String>, form: String) {
    if !forms.contains(&form) {
        forms.push(form);
    }
}

fn coerce_text(value: &Value, param_type: SearchParamType) -> Option<String> {
    if param_type == SearchParamType::Reference {
        let reference = match value {
            Value::Object(obj) => obj.get("reference")?.as_str()?,
            Value::String(s) => s.as_str(),
            _ => return None,
        };
        let parsed = parse_reference(reference)?;
        return Some(format!("{}/{}", parsed.target_type, parsed.target_id));
    }

    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(obj) => obj
            .get("text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

/// Parse the FHIR date/dateTime/instant/Period shapes into an instant.
pub fn coerce_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_fhir_datetime(s),
        Value::Object(obj) => obj
            .get("start")
            .or_else(|| obj.get("end"))
            .and_then(coerce_datetime),
        _ => None,
    }
}

fn coerce_date(value: &Value) -> Option<NaiveDate> {
    let text = match value {
        Value::String(s) => s.as_str(),
        Value::Object(obj) => obj.get("start").and_then(|v| v.as_str())?,
        _ => return None,
    };
    let prefix = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

fn coerce_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

fn coerce_quantity(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(obj) => obj.get("value").and_then(|v| v.as_f64()),
        _ => None,
    }
}

fn coerce_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn parse_fhir_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    // Common non-timezoned forms (treat as UTC).
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    // Date-only and partial dates (start of period, UTC).
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
    }
    if value.len() == 7 {
        if let Ok(d) = NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d") {
            return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
        }
    }
    if value.len() == 4 {
        if let Ok(d) = NaiveDate::parse_from_str(&format!("{}-01-01", value), "%Y-%m-%d") {
            return Some(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0)?));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn impl_for(code: &str, type_: &str, expression: &str, base: &str) -> SearchParameterImpl {
        let mut registry = cuprum_registry::SearchParameterRegistry::default();
        registry
            .index(&json!({
                "code": code,
                "type": type_,
                "expression": expression,
                "base": [base],
            }))
            .unwrap();
        registry.get(base, code).unwrap().clone()
    }

    #[test]
    fn token_column_stores_code_and_system_code_forms() {
        let impl_ = impl_for("code", "token", "Observation.code", "Observation");
        let observation = json!({
            "resourceType": "Observation",
            "code": { "coding": [{ "system": "http://loinc.org", "code": "1234-5" }] }
        });

        let value = extract_column_value(&observation, &impl_).unwrap().unwrap();
        assert_eq!(
            value,
            ColumnValue::TextArray(vec![
                "1234-5".to_string(),
                "http://loinc.org|1234-5".to_string()
            ])
        );
    }

    #[test]
    fn plain_token_stores_bare_value() {
        let impl_ = impl_for("gender", "token", "Patient.gender", "Patient");
        let patient = json!({ "resourceType": "Patient", "gender": "male" });

        let value = extract_column_value(&patient, &impl_).unwrap().unwrap();
        assert_eq!(value, ColumnValue::TextArray(vec!["male".to_string()]));
    }

    #[test]
    fn missing_value_is_none() {
        let impl_ = impl_for("gender", "token", "Patient.gender", "Patient");
        let patient = json!({ "resourceType": "Patient" });
        assert!(extract_column_value(&patient, &impl_).unwrap().is_none());
    }

    #[test]
    fn choice_type_probing() {
        let impl_ = impl_for(
            "value-quantity",
            "quantity",
            "Observation.value",
            "Observation",
        );
        let observation = json!({
            "resourceType": "Observation",
            "valueQuantity": { "value": 7.2, "unit": "mmol/L" }
        });

        let value = extract_column_value(&observation, &impl_).unwrap().unwrap();
        assert_eq!(value, ColumnValue::Double(7.2));
    }

    #[test]
    fn date_column_truncates_to_date() {
        let impl_ = impl_for("birthdate", "date", "Patient.birthDate", "Patient");
        let patient = json!({ "resourceType": "Patient", "birthDate": "1980-06-15" });

        let value = extract_column_value(&patient, &impl_).unwrap().unwrap();
        assert_eq!(
            value,
            ColumnValue::Date(NaiveDate::from_ymd_opt(1980, 6, 15).unwrap())
        );
    }

    #[test]
    fn reference_column_normalizes_to_type_and_id() {
        let impl_ = impl_for("subject", "reference", "Observation.subject", "Observation");
        let observation = json!({
            "resourceType": "Observation",
            "subject": { "reference": "Patient/123" }
        });

        let value = extract_column_value(&observation, &impl_).unwrap().unwrap();
        assert_eq!(value, ColumnValue::Text("Patient/123".to_string()));
    }

    #[test]
    fn array_extraction_over_repeating_elements() {
        let impl_ = impl_for("given", "string", "Practitioner.name.given", "Practitioner");
        let practitioner = json!({
            "resourceType": "Practitioner",
            "name": [
                { "given": ["Ann", "B"] },
                { "given": ["Cee"] }
            ]
        });

        let raw = extract_raw_values(&practitioner, &impl_.expression).unwrap();
        assert_eq!(raw, vec![json!("Ann"), json!("B"), json!("Cee")]);
    }

    #[test]
    fn union_expression_goes_through_fhirpath() {
        let patient = json!({
            "resourceType": "Patient",
            "deceasedDateTime": "2020-01-01T00:00:00Z"
        });
        let raw =
            extract_raw_values(&patient, "Patient.deceased.exists() and Patient.deceased != false")
                .unwrap();
        assert_eq!(raw, vec![json!(true)]);
    }

    #[test]
    fn partial_dates_parse_to_period_start() {
        assert_eq!(
            parse_fhir_datetime("2020").unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_fhir_datetime("2020-03").unwrap(),
            Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap()
        );
    }
}
