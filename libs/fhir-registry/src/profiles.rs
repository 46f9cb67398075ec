//! Canonical profile index
//!
//! Holds the three StructureDefinition fields schema generation depends on.
//! Main/history/references tables are generated for concrete resource
//! profiles only.

use std::collections::HashMap;

use serde_json::Value;

use crate::{Error, Result};

/// StructureDefinition kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    Resource,
    ComplexType,
    PrimitiveType,
    Logical,
}

impl ProfileKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "resource" => Some(Self::Resource),
            "complex-type" => Some(Self::ComplexType),
            "primitive-type" => Some(Self::PrimitiveType),
            "logical" => Some(Self::Logical),
            _ => None,
        }
    }
}

/// The normalized structural definition of a resource type
#[derive(Debug, Clone)]
pub struct CanonicalProfile {
    pub type_name: String,
    pub kind: ProfileKind,
    pub abstract_: bool,
}

impl CanonicalProfile {
    /// A profile produces a table set when it is a concrete resource.
    pub fn is_table_resource(&self) -> bool {
        self.kind == ProfileKind::Resource && !self.abstract_
    }
}

/// Profiles indexed by type name; latest indexing wins for duplicates.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    by_type: HashMap<String, CanonicalProfile>,
}

impl ProfileRegistry {
    pub fn index(&mut self, definition: &Value) -> Result<()> {
        let type_name = definition
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidDefinition("StructureDefinition.type is required".into()))?
            .to_string();

        let kind = definition
            .get("kind")
            .and_then(|v| v.as_str())
            .and_then(ProfileKind::parse)
            .ok_or_else(|| {
                Error::InvalidDefinition(format!(
                    "StructureDefinition.kind missing or invalid for '{}'",
                    type_name
                ))
            })?;

        let abstract_ = definition
            .get("abstract")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        self.by_type.insert(
            type_name.clone(),
            CanonicalProfile {
                type_name,
                kind,
                abstract_,
            },
        );
        Ok(())
    }

    pub fn get(&self, type_name: &str) -> Option<&CanonicalProfile> {
        self.by_type.get(type_name)
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Sorted type names of concrete resources.
    pub fn table_resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .by_type
            .values()
            .filter(|p| p.is_table_resource())
            .map(|p| p.type_name.clone())
            .collect();
        types.sort();
        types
    }
}
