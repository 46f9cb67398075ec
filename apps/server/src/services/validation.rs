//! Write-time validation hook
//!
//! The repository accepts an injected validator invoked before any
//! database write. Issues with `severity = error` abort the write. The
//! FHIRPath invariant validator degrades engine failures to warnings so a
//! broken invariant expression never blocks a write.

use serde_json::Value as JsonValue;

/// One validation issue, OperationOutcome-shaped
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: String,
    pub code: String,
    pub diagnostics: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationOutcome {
    /// The write proceeds only when no error-severity issue is present.
    pub fn valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == "error")
    }

    pub fn error_diagnostics(&self) -> String {
        self.issues
            .iter()
            .filter(|i| i.severity == "error")
            .map(|i| i.diagnostics.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Injected validator contract
pub trait ResourceValidator: Send + Sync {
    fn validate(&self, resource: &JsonValue) -> ValidationOutcome;
}

/// Minimal structural validator: a resource must be a JSON object with a
/// `resourceType`.
#[derive(Debug, Default)]
pub struct StructuralValidator;

impl ResourceValidator for StructuralValidator {
    fn validate(&self, resource: &JsonValue) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        if !resource.is_object() {
            outcome.issues.push(ValidationIssue {
                severity: "error".into(),
                code: "invalid".into(),
                diagnostics: "Resource must be a JSON object".into(),
            });
            return outcome;
        }
        if resource
            .get("resourceType")
            .and_then(|v| v.as_str())
            .map(|s| s.is_empty())
            .unwrap_or(true)
        {
            outcome.issues.push(ValidationIssue {
                severity: "error".into(),
                code: "invalid".into(),
                diagnostics: "Resource is missing resourceType".into(),
            });
        }

        outcome
    }
}

/// A FHIRPath constraint checked on write
#[derive(Debug, Clone)]
pub struct Invariant {
    pub key: String,
    pub severity: String,
    pub human: String,
    pub expression: String,
}

/// Evaluates FHIRPath invariants on top of the structural checks.
#[derive(Debug, Default)]
pub struct InvariantValidator {
    structural: StructuralValidator,
    invariants: Vec<Invariant>,
}

impl InvariantValidator {
    pub fn new(invariants: Vec<Invariant>) -> Self {
        Self {
            structural: StructuralValidator,
            invariants,
        }
    }
}

impl ResourceValidator for InvariantValidator {
    fn validate(&self, resource: &JsonValue) -> ValidationOutcome {
        let mut outcome = self.structural.validate(resource);
        if !outcome.valid() {
            return outcome;
        }

        for invariant in &self.invariants {
            let ast = match cuprum_fhirpath::parse(&invariant.expression) {
                Ok(ast) => ast,
                Err(e) => {
                    // Engine failures degrade to warnings and never block
                    outcome.issues.push(ValidationIssue {
                        severity: "warning".into(),
                        code: "informational".into(),
                        diagnostics: format!(
                            "Invariant {} could not be parsed: {}",
                            invariant.key, e
                        ),
                    });
                    continue;
                }
            };

            match cuprum_fhirpath::eval(&ast, resource) {
                Ok(result) => {
                    let holds = match result.as_slice() {
                        [] => true,
                        [single] => single.value.as_bool().unwrap_or(true),
                        _ => true,
                    };
                    if !holds {
                        outcome.issues.push(ValidationIssue {
                            severity: invariant.severity.clone(),
                            code: "invariant".into(),
                            diagnostics: format!("{}: {}", invariant.key, invariant.human),
                        });
                    }
                }
                Err(e) => {
                    outcome.issues.push(ValidationIssue {
                        severity: "warning".into(),
                        code: "informational".into(),
                        diagnostics: format!(
                            "Invariant {} could not be evaluated: {}",
                            invariant.key, e
                        ),
                    });
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structural_validator_requires_resource_type() {
        let validator = StructuralValidator;
        assert!(!validator.validate(&json!({})).valid());
        assert!(!validator.validate(&json!("string")).valid());
        assert!(validator
            .validate(&json!({ "resourceType": "Patient" }))
            .valid());
    }

    #[test]
    fn failed_invariant_with_error_severity_blocks() {
        let validator = InvariantValidator::new(vec![Invariant {
            key: "pat-1".into(),
            severity: "error".into(),
            human: "name must exist".into(),
            expression: "Patient.name.exists()".into(),
        }]);

        assert!(!validator
            .validate(&json!({ "resourceType": "Patient" }))
            .valid());
        assert!(validator
            .validate(&json!({ "resourceType": "Patient", "name": [{ "family": "X" }] }))
            .valid());
    }

    #[test]
    fn broken_expression_degrades_to_warning() {
        let validator = InvariantValidator::new(vec![Invariant {
            key: "bad-1".into(),
            severity: "error".into(),
            human: "unparseable".into(),
            expression: "((((".into(),
        }]);

        let outcome = validator.validate(&json!({ "resourceType": "Patient" }));
        assert!(outcome.valid(), "engine failure must not block the write");
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].severity, "warning");
    }
}
