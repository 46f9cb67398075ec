//! StructureDefinition and SearchParameter registries
//!
//! In-memory indexes built once at boot and immutable afterwards:
//! canonical profiles by resource type, and resolved search parameter
//! implementations by `(resource type, code)`. The schema builder and the
//! search engine both read these indexes; neither ever mutates them.

pub mod params;
pub mod profiles;

use thiserror::Error;

pub use params::{
    ColumnType, LookupTable, SearchParamType, SearchParameterImpl, SearchParameterRegistry,
    Strategy,
};
pub use profiles::{CanonicalProfile, ProfileKind, ProfileRegistry};

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),
}

/// The combined boot-time registry
#[derive(Debug, Default)]
pub struct Registry {
    pub profiles: ProfileRegistry,
    pub search_params: SearchParameterRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a StructureDefinition JSON document.
    pub fn index_profile(&mut self, definition: &serde_json::Value) -> Result<()> {
        self.profiles.index(definition)
    }

    /// Index a SearchParameter JSON document, resolving one impl per base
    /// resource type.
    pub fn index_search_parameter(&mut self, definition: &serde_json::Value) -> Result<()> {
        self.search_params.index(definition)
    }

    /// Sorted concrete resource types that receive a table set.
    pub fn table_resource_types(&self) -> Vec<String> {
        self.profiles.table_resource_types()
    }
}
