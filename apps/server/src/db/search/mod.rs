//! Search - request parsing, SQL compilation, and execution

pub mod engine;
pub mod params;
pub mod query_builder;

pub use engine::SearchEngine;
pub use params::{
    IncludeParam, ParsedParam, SearchModifier, SearchPrefix, SearchRequest, SearchValue, SortParam,
    TotalMode,
};
pub use query_builder::{BindValue, QueryBuilder};
