//! Search parameter resolution
//!
//! Resolves FHIR SearchParameter definitions into storage-strategy records.
//! Token parameters over `Identifier` and string parameters over
//! `HumanName` / `Address` / `ContactPoint` decompose into the global lookup
//! tables; everything else becomes a typed column on the main table.

use std::collections::HashMap;

use serde_json::Value;

use crate::{Error, Result};

/// FHIR search parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchParamType {
    Number,
    Date,
    String,
    Token,
    Reference,
    Composite,
    Quantity,
    Uri,
    Special,
}

impl SearchParamType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "number" => Some(Self::Number),
            "date" => Some(Self::Date),
            "string" => Some(Self::String),
            "token" => Some(Self::Token),
            "reference" => Some(Self::Reference),
            "composite" => Some(Self::Composite),
            "quantity" => Some(Self::Quantity),
            "uri" => Some(Self::Uri),
            "special" => Some(Self::Special),
            _ => None,
        }
    }
}

/// The four global lookup tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTable {
    HumanName,
    Address,
    ContactPoint,
    Identifier,
}

impl LookupTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::HumanName => "HumanName",
            Self::Address => "Address",
            Self::ContactPoint => "ContactPoint",
            Self::Identifier => "Identifier",
        }
    }
}

/// Storage strategy for one search parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Plain typed column on the main table
    Column,
    /// Token column holding `code` and `system|code` forms
    TokenColumn,
    /// Join against one of the global lookup tables
    LookupTable(LookupTable),
    /// Resolved through the per-type references table
    JoinReference,
}

/// SQL column types used by column-strategy parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Timestamptz,
    Date,
    Numeric,
    DoublePrecision,
    Boolean,
    Uuid,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Timestamptz => "TIMESTAMPTZ",
            Self::Date => "DATE",
            Self::Numeric => "NUMERIC",
            Self::DoublePrecision => "DOUBLE PRECISION",
            Self::Boolean => "BOOLEAN",
            Self::Uuid => "UUID",
        }
    }
}

/// Resolved implementation of a SearchParameter for one resource type
#[derive(Debug, Clone)]
pub struct SearchParameterImpl {
    pub code: String,
    pub param_type: SearchParamType,
    pub strategy: Strategy,
    /// Column name (lowerCamelCase of the code); meaningful for column
    /// strategies only
    pub column_name: String,
    pub column_type: ColumnType,
    pub array: bool,
    /// Extraction expression scoped to this resource type
    pub expression: String,
    /// All base resource types of the defining SearchParameter
    pub resource_types: Vec<String>,
    /// Allowed reference target types (reference parameters)
    pub target_types: Vec<String>,
}

/// Search parameter impls indexed by `(resource type, code)`
#[derive(Debug, Default)]
pub struct SearchParameterRegistry {
    by_key: HashMap<(String, String), SearchParameterImpl>,
    codes_by_type: HashMap<String, Vec<String>>,
}

impl SearchParameterRegistry {
    /// Index one SearchParameter definition.
    pub fn index(&mut self, definition: &Value) -> Result<()> {
        let code = definition
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidDefinition("SearchParameter.code is required".into()))?
            .to_string();

        let param_type = definition
            .get("type")
            .and_then(|v| v.as_str())
            .and_then(SearchParamType::parse)
            .ok_or_else(|| {
                Error::InvalidDefinition(format!(
                    "SearchParameter.type missing or invalid for '{}'",
                    code
                ))
            })?;

        let expression = definition
            .get("expression")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let bases: Vec<String> = definition
            .get("base")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let targets: Vec<String> = definition
            .get("target")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        for base in &bases {
            let scoped = scope_expression(&expression, base);
            let impl_ = resolve_impl(
                base,
                &code,
                param_type,
                scoped,
                bases.clone(),
                targets.clone(),
            );
            let codes = self.codes_by_type.entry(base.clone()).or_default();
            // Re-indexing a (type, code) pair replaces the impl; latest wins
            if !codes.contains(&code) {
                codes.push(code.clone());
            }
            self.by_key.insert((base.clone(), code.clone()), impl_);
        }

        Ok(())
    }

    /// O(1) lookup of one impl.
    pub fn get(&self, resource_type: &str, code: &str) -> Option<&SearchParameterImpl> {
        self.by_key
            .get(&(resource_type.to_string(), code.to_string()))
    }

    /// All impls applying to a resource type, in indexing order.
    pub fn for_type(&self, resource_type: &str) -> Vec<&SearchParameterImpl> {
        self.codes_by_type
            .get(resource_type)
            .map(|codes| {
                codes
                    .iter()
                    .filter_map(|code| {
                        self.by_key.get(&(resource_type.to_string(), code.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Pick the expression alternative scoped to one base type from a
/// multi-base expression such as
/// `AllergyIntolerance.code | Condition.code | Observation.code`.
fn scope_expression(expression: &str, base: &str) -> String {
    let prefix = format!("{}.", base);
    let alternatives: Vec<&str> = expression.split('|').map(|s| s.trim()).collect();
    let scoped: Vec<&str> = alternatives
        .iter()
        .copied()
        .filter(|alt| alt.starts_with(&prefix) || alt.starts_with(&format!("({}", prefix)))
        .collect();
    if scoped.is_empty() {
        expression.trim().to_string()
    } else {
        scoped.join(" | ")
    }
}

/// Parameter codes stored in the `HumanName` lookup table, per resource type.
const HUMAN_NAME_CODES: &[&str] = &["name", "given", "family", "phonetic"];
const HUMAN_NAME_RESOURCE_TYPES: &[&str] = &["Patient", "Practitioner", "Person", "RelatedPerson"];

/// Parameter codes stored in the `Address` lookup table.
const ADDRESS_CODES: &[&str] = &[
    "address",
    "address-city",
    "address-country",
    "address-postalcode",
    "address-state",
    "address-use",
];

/// Parameter codes stored in the `ContactPoint` lookup table.
const CONTACT_POINT_CODES: &[&str] = &["telecom", "phone", "email"];

/// Elements that repeat in practice; extraction over them yields array
/// columns. HumanName elements are absent: their repetition lives in the
/// lookup tables, and remaining `name` columns (Organization, Location)
/// are scalar.
const REPEATING_ELEMENTS: &[&str] = &[
    "address",
    "telecom",
    "identifier",
    "category",
    "tag",
    "profile",
    "alias",
    "communication",
    "generalPractitioner",
    "performer",
    "author",
    "target",
    "basedOn",
    "partOf",
];

fn resolve_impl(
    resource_type: &str,
    code: &str,
    param_type: SearchParamType,
    expression: String,
    resource_types: Vec<String>,
    target_types: Vec<String>,
) -> SearchParameterImpl {
    let strategy = resolve_strategy(resource_type, code, param_type, &expression);
    let column_type = resolve_column_type(param_type, &expression);
    // Token columns always hold both the `code` and `system|code` forms
    let array = strategy == Strategy::TokenColumn || is_array_extraction(&expression);

    SearchParameterImpl {
        code: code.to_string(),
        param_type,
        strategy,
        column_name: column_name(code),
        column_type,
        array,
        expression,
        resource_types,
        target_types,
    }
}

fn resolve_strategy(
    resource_type: &str,
    code: &str,
    param_type: SearchParamType,
    expression: &str,
) -> Strategy {
    match param_type {
        SearchParamType::Token if reads_identifier(code, expression) => {
            Strategy::LookupTable(LookupTable::Identifier)
        }
        SearchParamType::Token if CONTACT_POINT_CODES.contains(&code) => {
            Strategy::LookupTable(LookupTable::ContactPoint)
        }
        SearchParamType::Token => Strategy::TokenColumn,
        SearchParamType::String
            if HUMAN_NAME_CODES.contains(&code)
                && HUMAN_NAME_RESOURCE_TYPES.contains(&resource_type) =>
        {
            Strategy::LookupTable(LookupTable::HumanName)
        }
        SearchParamType::String if ADDRESS_CODES.contains(&code) => {
            Strategy::LookupTable(LookupTable::Address)
        }
        _ => Strategy::Column,
    }
}

fn reads_identifier(code: &str, expression: &str) -> bool {
    code == "identifier" || expression.ends_with(".identifier")
}

fn resolve_column_type(param_type: SearchParamType, expression: &str) -> ColumnType {
    match param_type {
        SearchParamType::String | SearchParamType::Uri | SearchParamType::Reference => {
            ColumnType::Text
        }
        SearchParamType::Token => ColumnType::Text,
        SearchParamType::Date => {
            // Plain date elements stay DATE; everything else carries a zone.
            if expression.ends_with(".birthDate") {
                ColumnType::Date
            } else {
                ColumnType::Timestamptz
            }
        }
        SearchParamType::Number => ColumnType::Numeric,
        SearchParamType::Quantity => ColumnType::DoublePrecision,
        SearchParamType::Composite | SearchParamType::Special => ColumnType::Text,
    }
}

/// Whether extraction runs over a repeating element.
fn is_array_extraction(expression: &str) -> bool {
    if expression.contains('|') {
        return true;
    }
    let tail = expression
        .rsplit('.')
        .next()
        .unwrap_or(expression)
        .trim_end_matches(|c| c == ')' || c == ' ');
    REPEATING_ELEMENTS.contains(&tail)
        || expression
            .split('.')
            .any(|segment| REPEATING_ELEMENTS.contains(&segment.trim()))
}

/// `address-city` -> `addressCity`, `general-practitioner` ->
/// `generalPractitioner`, `_id` -> `id`.
pub fn column_name(code: &str) -> String {
    let code = code.trim_start_matches('_');
    let mut out = String::with_capacity(code.len());
    let mut upper_next = false;
    for c in code.chars() {
        if c == '-' || c == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn param(code: &str, type_: &str, expression: &str, bases: &[&str]) -> Value {
        json!({
            "resourceType": "SearchParameter",
            "code": code,
            "type": type_,
            "expression": expression,
            "base": bases,
        })
    }

    #[test]
    fn token_over_identifier_uses_lookup_table() {
        let mut registry = SearchParameterRegistry::default();
        registry
            .index(&param(
                "identifier",
                "token",
                "Patient.identifier",
                &["Patient"],
            ))
            .unwrap();

        let impl_ = registry.get("Patient", "identifier").unwrap();
        assert_eq!(impl_.strategy, Strategy::LookupTable(LookupTable::Identifier));
    }

    #[test]
    fn human_name_string_uses_lookup_table() {
        let mut registry = SearchParameterRegistry::default();
        registry
            .index(&param("name", "string", "Patient.name", &["Patient"]))
            .unwrap();

        let impl_ = registry.get("Patient", "name").unwrap();
        assert_eq!(impl_.strategy, Strategy::LookupTable(LookupTable::HumanName));
    }

    #[test]
    fn plain_string_name_stays_a_column() {
        let mut registry = SearchParameterRegistry::default();
        registry
            .index(&param("name", "string", "Organization.name", &["Organization"]))
            .unwrap();

        let impl_ = registry.get("Organization", "name").unwrap();
        assert_eq!(impl_.strategy, Strategy::Column);
        assert_eq!(impl_.column_type, ColumnType::Text);
    }

    #[test]
    fn token_gets_token_column() {
        let mut registry = SearchParameterRegistry::default();
        registry
            .index(&param("gender", "token", "Patient.gender", &["Patient"]))
            .unwrap();

        let impl_ = registry.get("Patient", "gender").unwrap();
        assert_eq!(impl_.strategy, Strategy::TokenColumn);
        assert!(impl_.array, "token columns store code and system|code forms");
    }

    #[test]
    fn multi_base_expression_is_scoped_per_type() {
        let mut registry = SearchParameterRegistry::default();
        registry
            .index(&param(
                "code",
                "token",
                "Condition.code | Observation.code",
                &["Condition", "Observation"],
            ))
            .unwrap();

        assert_eq!(
            registry.get("Condition", "code").unwrap().expression,
            "Condition.code"
        );
        assert_eq!(
            registry.get("Observation", "code").unwrap().expression,
            "Observation.code"
        );
        assert!(registry.get("Observation", "code").unwrap().array);
    }

    #[test]
    fn date_types() {
        let mut registry = SearchParameterRegistry::default();
        registry
            .index(&param(
                "birthdate",
                "date",
                "Patient.birthDate",
                &["Patient"],
            ))
            .unwrap();
        registry
            .index(&param(
                "date",
                "date",
                "Observation.effective",
                &["Observation"],
            ))
            .unwrap();

        assert_eq!(
            registry.get("Patient", "birthdate").unwrap().column_type,
            ColumnType::Date
        );
        assert_eq!(
            registry.get("Observation", "date").unwrap().column_type,
            ColumnType::Timestamptz
        );
    }

    #[test]
    fn column_names_are_lower_camel_case() {
        assert_eq!(column_name("birthdate"), "birthdate");
        assert_eq!(column_name("general-practitioner"), "generalPractitioner");
        assert_eq!(column_name("address-city"), "addressCity");
    }

    #[test]
    fn reference_params_keep_targets() {
        let mut registry = SearchParameterRegistry::default();
        registry
            .index(&json!({
                "code": "subject",
                "type": "reference",
                "expression": "Observation.subject",
                "base": ["Observation"],
                "target": ["Patient", "Group"],
            }))
            .unwrap();

        let impl_ = registry.get("Observation", "subject").unwrap();
        assert_eq!(impl_.strategy, Strategy::Column);
        assert_eq!(impl_.target_types, vec!["Patient", "Group"]);
    }
}
