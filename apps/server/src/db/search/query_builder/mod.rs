//! SQL query builder for FHIR searches
//!
//! Compiles a typed search request into a parameterized SELECT against the
//! generated schema. Literal values always travel as `$n` placeholders;
//! only schema identifiers (validated against the registry) appear in the
//! SQL text.

mod clauses;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use cuprum_registry::{Registry, Strategy};

use crate::models::OperationContext;
use crate::{Error, Result};

use super::params::{ParsedParam, SearchModifier, SearchRequest};

/// Bind values for `sqlx` queries
#[derive(Debug, Clone)]
pub enum BindValue {
    Text(String),
    TextArray(Vec<String>),
    Int(i64),
    Double(f64),
    Numeric(Decimal),
    Uuid(Uuid),
    UuidArray(Vec<Uuid>),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
}

/// Push a bind value and return its `$n` position.
pub(crate) fn push(bind_params: &mut Vec<BindValue>, value: BindValue) -> usize {
    bind_params.push(value);
    bind_params.len()
}

/// Escape LIKE pattern metacharacters; patterns carry `ESCAPE E'\\'`.
pub(crate) fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Query builder for one search request
pub struct QueryBuilder<'a> {
    registry: &'a Registry,
    request: &'a SearchRequest,
    context: &'a OperationContext,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(
        registry: &'a Registry,
        request: &'a SearchRequest,
        context: &'a OperationContext,
    ) -> Self {
        Self {
            registry,
            request,
            context,
        }
    }

    /// The full paginated SELECT.
    pub fn build_sql(&self) -> Result<(String, Vec<BindValue>)> {
        let mut bind_params = Vec::new();
        let conditions = self.build_where(&mut bind_params)?;

        let mut sql = format!(
            "SELECT \"id\", \"content\", \"lastUpdated\", \"deleted\" FROM \"{}\" WHERE {}",
            self.request.resource_type,
            conditions.join(" AND ")
        );

        sql.push_str(" ORDER BY ");
        sql.push_str(&self.build_order_by());

        let limit_idx = push(
            &mut bind_params,
            BindValue::Int(self.request.count as i64),
        );
        sql.push_str(&format!(" LIMIT ${}", limit_idx));

        if self.request.offset > 0 {
            let offset_idx = push(
                &mut bind_params,
                BindValue::Int(self.request.offset as i64),
            );
            sql.push_str(&format!(" OFFSET ${}", offset_idx));
        }

        Ok((sql, bind_params))
    }

    /// `SELECT COUNT(*)` with the same WHERE.
    pub fn build_count_sql(&self) -> Result<(String, Vec<BindValue>)> {
        let mut bind_params = Vec::new();
        let conditions = self.build_where(&mut bind_params)?;

        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE {}",
            self.request.resource_type,
            conditions.join(" AND ")
        );
        Ok((sql, bind_params))
    }

    /// Whether the request filters beyond liveness and scoping. Planner
    /// estimates are only meaningful for unfiltered searches.
    pub fn is_unfiltered(&self) -> bool {
        self.request.params.is_empty() && self.request.compartment.is_none()
    }

    fn build_where(&self, bind_params: &mut Vec<BindValue>) -> Result<Vec<String>> {
        let mut conditions = vec!["\"deleted\" = false".to_string()];

        if let Some(project) = self.context.project {
            if !self.context.super_admin {
                let idx = push(bind_params, BindValue::Uuid(project));
                conditions.push(format!("\"projectId\" = ${}", idx));
            }
        }

        if let Some(compartment) = self.request.compartment {
            let idx = push(bind_params, BindValue::UuidArray(vec![compartment]));
            conditions.push(format!("\"compartments\" @> ${}", idx));
        }

        for param in &self.request.params {
            conditions.push(self.build_param_condition(param, bind_params)?);
        }

        Ok(conditions)
    }

    fn build_param_condition(
        &self,
        param: &ParsedParam,
        bind_params: &mut Vec<BindValue>,
    ) -> Result<String> {
        match param.code.as_str() {
            "_id" => {
                let ids: Vec<Uuid> = param
                    .values
                    .iter()
                    .filter_map(|v| Uuid::parse_str(&v.value).ok())
                    .collect();
                let idx = push(bind_params, BindValue::UuidArray(ids));
                Ok(format!("\"id\" = ANY(${})", idx))
            }
            "_lastUpdated" => clauses::build_last_updated_clause(param, bind_params),
            _ => {
                let impl_ = self
                    .registry
                    .search_params
                    .get(&self.request.resource_type, &param.code)
                    .ok_or_else(|| {
                        Error::Search(format!(
                            "Unknown search parameter '{}' for {}",
                            param.code, self.request.resource_type
                        ))
                    })?;

                // :missing is existence, never value matching; every
                // strategy resolves it before the value compilers run
                if param.modifier == Some(SearchModifier::Missing) {
                    return match impl_.strategy {
                        Strategy::Column | Strategy::TokenColumn => {
                            clauses::build_missing_clause(impl_, param)
                        }
                        Strategy::LookupTable(table) => clauses::build_lookup_missing_clause(
                            &self.request.resource_type,
                            table,
                            param,
                        ),
                        Strategy::JoinReference => {
                            clauses::build_join_reference_missing_clause(
                                &self.request.resource_type,
                                impl_,
                                param,
                                bind_params,
                            )
                        }
                    };
                }

                match impl_.strategy {
                    Strategy::Column | Strategy::TokenColumn => {
                        clauses::build_column_clause(impl_, param, bind_params)
                    }
                    Strategy::LookupTable(table) => clauses::build_lookup_clause(
                        &self.request.resource_type,
                        table,
                        impl_,
                        param,
                        bind_params,
                    ),
                    Strategy::JoinReference => clauses::build_join_reference_clause(
                        &self.request.resource_type,
                        impl_,
                        param,
                        bind_params,
                    ),
                }
            }
        }
    }

    /// Sort resolution: `_id` and `_lastUpdated` map to fixed columns,
    /// column-strategy parameters to their search columns; unknown codes
    /// are dropped. Default ordering is `lastUpdated DESC`.
    fn build_order_by(&self) -> String {
        let mut parts = Vec::new();
        for sort in &self.request.sort {
            let column = match sort.code.as_str() {
                "_id" => Some("id".to_string()),
                "_lastUpdated" => Some("lastUpdated".to_string()),
                code => self
                    .registry
                    .search_params
                    .get(&self.request.resource_type, code)
                    .filter(|impl_| {
                        matches!(impl_.strategy, Strategy::Column | Strategy::TokenColumn)
                    })
                    .map(|impl_| impl_.column_name.clone()),
            };
            if let Some(column) = column {
                let direction = if sort.descending { " DESC" } else { " ASC" };
                parts.push(format!("\"{}\"{}", column, direction));
            }
        }

        if parts.is_empty() {
            "\"lastUpdated\" DESC".to_string()
        } else {
            parts.join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .index_profile(&json!({ "type": "Patient", "kind": "resource", "abstract": false }))
            .unwrap();
        registry
            .index_profile(&json!({ "type": "Observation", "kind": "resource", "abstract": false }))
            .unwrap();
        for param in [
            json!({ "code": "gender", "type": "token", "expression": "Patient.gender", "base": ["Patient"] }),
            json!({ "code": "birthdate", "type": "date", "expression": "Patient.birthDate", "base": ["Patient"] }),
            json!({ "code": "name", "type": "string", "expression": "Patient.name", "base": ["Patient"] }),
            json!({ "code": "subject", "type": "reference", "expression": "Observation.subject", "base": ["Observation"], "target": ["Patient"] }),
        ] {
            registry.index_search_parameter(&param).unwrap();
        }
        registry
    }

    fn build(resource_type: &str, query: &str) -> (String, Vec<BindValue>) {
        let registry = test_registry();
        let request = SearchRequest::parse(resource_type, query).unwrap();
        let context = OperationContext::default();
        QueryBuilder::new(&registry, &request, &context)
            .build_sql()
            .unwrap()
    }

    #[test]
    fn no_params_filters_on_deleted_only() {
        let (sql, binds) = build("Patient", "");
        assert_eq!(
            sql,
            "SELECT \"id\", \"content\", \"lastUpdated\", \"deleted\" FROM \"Patient\" \
             WHERE \"deleted\" = false ORDER BY \"lastUpdated\" DESC LIMIT $1"
        );
        assert_eq!(binds.len(), 1);
    }

    #[test]
    fn token_search_uses_any() {
        let (sql, binds) = build("Patient", "gender=male");
        assert!(sql.contains("$1 = ANY(\"gender\")"));
        assert!(matches!(&binds[0], BindValue::Text(v) if v == "male"));
    }

    #[test]
    fn no_client_literals_in_sql() {
        let (sql, _) = build("Patient", "gender=male&name=O'Brien&birthdate=ge1980-01-01");
        assert!(!sql.contains("male"));
        assert!(!sql.contains("Brien"));
        assert!(!sql.contains("1980"));
    }

    #[test]
    fn missing_modifier_on_columns() {
        let (sql, _) = build("Patient", "gender:missing=true");
        assert!(sql.contains("\"gender\" IS NULL"));

        let (sql, _) = build("Patient", "gender:missing=false");
        assert!(sql.contains("\"gender\" IS NOT NULL"));
    }

    #[test]
    fn missing_modifier_on_lookup_params_tests_row_existence() {
        // Patient name lives in the HumanName lookup table; :missing must
        // test row existence, never match the literal value "true"
        let (sql, binds) = build("Patient", "name:missing=true");
        assert!(sql.contains(
            "NOT EXISTS (SELECT 1 FROM \"HumanName\" l WHERE l.\"resourceId\" = \"Patient\".\"id\" \
             AND l.\"resourceType\" = 'Patient')"
        ));
        assert!(!sql.contains("ILIKE"));
        assert_eq!(binds.len(), 1, "only the LIMIT parameter is bound");

        let (sql, _) = build("Patient", "name:missing=false");
        assert!(sql.contains("EXISTS (SELECT 1 FROM \"HumanName\" l"));
        assert!(!sql.contains("NOT EXISTS"));
    }

    #[test]
    fn missing_modifier_on_join_reference_tests_row_existence() {
        use cuprum_registry::{ColumnType, SearchParamType, SearchParameterImpl};

        let impl_ = SearchParameterImpl {
            code: "subject".to_string(),
            param_type: SearchParamType::Reference,
            strategy: Strategy::JoinReference,
            column_name: "subject".to_string(),
            column_type: ColumnType::Text,
            array: false,
            expression: "Observation.subject".to_string(),
            resource_types: vec!["Observation".to_string()],
            target_types: vec!["Patient".to_string()],
        };
        let param = ParsedParam {
            code: "subject".to_string(),
            modifier: Some(SearchModifier::Missing),
            values: vec![super::super::params::SearchValue {
                prefix: None,
                value: "true".to_string(),
            }],
        };

        let mut binds = Vec::new();
        let clause =
            clauses::build_join_reference_missing_clause("Observation", &impl_, &param, &mut binds)
                .unwrap();
        assert_eq!(
            clause,
            "NOT EXISTS (SELECT 1 FROM \"Observation_References\" r \
             WHERE r.\"resourceId\" = \"Observation\".\"id\" AND r.\"code\" = $1)"
        );
        assert!(matches!(&binds[0], BindValue::Text(v) if v == "subject"));
    }

    #[test]
    fn missing_modifier_rejects_non_boolean_values() {
        let registry = test_registry();
        let context = OperationContext::default();
        for query in ["gender:missing=banana", "name:missing=1"] {
            let request = SearchRequest::parse("Patient", query).unwrap();
            assert!(
                QueryBuilder::new(&registry, &request, &context)
                    .build_sql()
                    .is_err(),
                "{} should be rejected",
                query
            );
        }
    }

    #[test]
    fn date_prefix_becomes_comparison() {
        let (sql, binds) = build("Patient", "birthdate=ge1980-01-01");
        assert!(sql.contains("\"birthdate\" >= $1"));
        assert!(matches!(&binds[0], BindValue::Date(_)));
    }

    #[test]
    fn reference_bare_id_expands_to_targets() {
        let (sql, binds) = build("Observation", "subject=0be88176-57e3-48d6-8d58-24bb1ee48bfc");
        assert!(sql.contains("\"subject\" = $1"));
        assert!(
            matches!(&binds[0], BindValue::Text(v) if v == "Patient/0be88176-57e3-48d6-8d58-24bb1ee48bfc")
        );
    }

    #[test]
    fn lookup_param_compiles_to_exists() {
        let (sql, _) = build("Patient", "name=smith");
        assert!(sql.contains("EXISTS (SELECT 1 FROM \"HumanName\" l"));
        assert!(sql.contains("l.\"resourceId\" = \"Patient\".\"id\""));
        assert!(sql.contains("l.\"resourceType\" = 'Patient'"));
    }

    #[test]
    fn sort_resolution_drops_unknown_codes() {
        let (sql, _) = build("Patient", "_sort=-birthdate,bogus");
        assert!(sql.contains("ORDER BY \"birthdate\" DESC LIMIT"));
    }

    #[test]
    fn offset_pagination() {
        let (sql, binds) = build("Patient", "_count=10&_offset=30");
        assert!(sql.ends_with("LIMIT $1 OFFSET $2"));
        assert!(matches!(binds[0], BindValue::Int(10)));
        assert!(matches!(binds[1], BindValue::Int(30)));
    }

    #[test]
    fn id_param_binds_uuid_array() {
        let (sql, binds) = build("Patient", "_id=0be88176-57e3-48d6-8d58-24bb1ee48bfc");
        assert!(sql.contains("\"id\" = ANY($1)"));
        assert!(matches!(&binds[0], BindValue::UuidArray(ids) if ids.len() == 1));
    }

    #[test]
    fn unknown_parameter_is_an_error() {
        let registry = test_registry();
        let request = SearchRequest::parse("Patient", "bogus=1").unwrap();
        let context = OperationContext::default();
        assert!(QueryBuilder::new(&registry, &request, &context)
            .build_sql()
            .is_err());
    }

    #[test]
    fn project_scope_is_filtered() {
        let registry = test_registry();
        let request = SearchRequest::parse("Patient", "").unwrap();
        let context = OperationContext {
            project: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let (sql, _) = QueryBuilder::new(&registry, &request, &context)
            .build_sql()
            .unwrap();
        assert!(sql.contains("\"projectId\" = $1"));
    }
}
