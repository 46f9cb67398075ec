//! Search request parsing
//!
//! Parses a FHIR search query into a typed request. FHIR semantics:
//! repeating the same parameter key is AND; comma-separated values inside
//! one occurrence are OR; a leading prefix (`eq`, `ge`, ...) applies to
//! number, date, and quantity values.

use uuid::Uuid;

use crate::{Error, Result};

/// Default `_count` when the request does not specify one
pub const DEFAULT_COUNT: usize = 20;
/// Hard cap on `_count`
pub const MAX_COUNT: usize = 1000;

/// A typed search request
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub resource_type: String,
    /// AND conjunctions in request order
    pub params: Vec<ParsedParam>,
    pub sort: Vec<SortParam>,
    /// Page size, clamped to [1, 1000]
    pub count: usize,
    pub offset: usize,
    pub total: TotalMode,
    pub include: Vec<IncludeParam>,
    pub revinclude: Vec<IncludeParam>,
    pub elements: Vec<String>,
    pub summary_count: bool,
    /// Patient-compartment restriction
    pub compartment: Option<Uuid>,
    /// The original query string, used to derive Bundle links
    pub query_string: String,
}

/// One search parameter occurrence
#[derive(Debug, Clone)]
pub struct ParsedParam {
    pub code: String,
    pub modifier: Option<SearchModifier>,
    /// OR alternatives
    pub values: Vec<SearchValue>,
}

/// One atomic search value with its optional prefix
#[derive(Debug, Clone, PartialEq)]
pub struct SearchValue {
    pub prefix: Option<SearchPrefix>,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPrefix {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Sa,
    Eb,
    Ap,
}

impl SearchPrefix {
    /// Split a leading prefix off a value. Prefixes only apply when the
    /// remainder starts with a digit (numbers, dates, quantities).
    pub fn parse_prefix(value: &str) -> (Option<Self>, &str) {
        let candidates = [
            ("eq", Self::Eq),
            ("ne", Self::Ne),
            ("gt", Self::Gt),
            ("lt", Self::Lt),
            ("ge", Self::Ge),
            ("le", Self::Le),
            ("sa", Self::Sa),
            ("eb", Self::Eb),
            ("ap", Self::Ap),
        ];
        for (s, p) in candidates {
            if let Some(rest) = value.strip_prefix(s) {
                if rest.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    return (Some(p), rest);
                }
            }
        }
        (None, value)
    }

    /// The SQL comparison operator for this prefix.
    pub fn sql_op(&self) -> &'static str {
        match self {
            Self::Eq | Self::Ap => "=",
            Self::Ne => "<>",
            Self::Gt | Self::Sa => ">",
            Self::Lt | Self::Eb => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchModifier {
    Exact,
    Contains,
    Missing,
    Not,
    In,
    Below,
    Above,
    Identifier,
    Text,
    OfType,
    /// Chained-target typing for reference parameters (e.g. `subject:Patient`)
    Type(String),
}

impl SearchModifier {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "contains" => Some(Self::Contains),
            "missing" => Some(Self::Missing),
            "not" => Some(Self::Not),
            "in" => Some(Self::In),
            "below" => Some(Self::Below),
            "above" => Some(Self::Above),
            "identifier" => Some(Self::Identifier),
            "text" => Some(Self::Text),
            "of-type" => Some(Self::OfType),
            _ => {
                // An uppercase-led modifier names a chained target type
                if s.chars().next().map(|c| c.is_ascii_uppercase()).unwrap_or(false)
                    && s.chars().all(|c| c.is_ascii_alphanumeric())
                {
                    Some(Self::Type(s.to_string()))
                } else {
                    None
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortParam {
    pub code: String,
    pub descending: bool,
}

/// `_include` / `_revinclude` specification
#[derive(Debug, Clone)]
pub struct IncludeParam {
    pub source_type: String,
    pub param: String,
    pub target_type: Option<String>,
    pub iterate: bool,
    /// `_include=*`
    pub wildcard: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalMode {
    None,
    Estimate,
    Accurate,
}

impl SearchRequest {
    /// Parse a search request from a raw query string.
    pub fn parse(resource_type: &str, query_string: &str) -> Result<Self> {
        let items = parse_query_string(query_string);
        Self::from_items(resource_type, &items, query_string)
    }

    /// Parse from ordered (key, value) items.
    pub fn from_items(
        resource_type: &str,
        items: &[(String, String)],
        query_string: &str,
    ) -> Result<Self> {
        let mut request = Self {
            resource_type: resource_type.to_string(),
            params: Vec::new(),
            sort: Vec::new(),
            count: DEFAULT_COUNT,
            offset: 0,
            total: TotalMode::None,
            include: Vec::new(),
            revinclude: Vec::new(),
            elements: Vec::new(),
            summary_count: false,
            compartment: None,
            query_string: query_string.to_string(),
        };

        for (key, value) in items {
            let (name, modifier_str) = match key.split_once(':') {
                Some((name, modifier)) => (name, Some(modifier)),
                None => (key.as_str(), None),
            };

            match name {
                "_count" => {
                    let parsed: usize = value.parse().map_err(|_| {
                        Error::Search(format!("Invalid _count value: {}", value))
                    })?;
                    request.count = parsed.clamp(1, MAX_COUNT);
                }
                "_offset" => {
                    request.offset = value.parse().map_err(|_| {
                        Error::Search(format!("Invalid _offset value: {}", value))
                    })?;
                }
                "_sort" => {
                    for part in value.split(',').filter(|s| !s.is_empty()) {
                        let (code, descending) = match part.strip_prefix('-') {
                            Some(code) => (code, true),
                            None => (part, false),
                        };
                        request.sort.push(SortParam {
                            code: code.to_string(),
                            descending,
                        });
                    }
                }
                "_total" => {
                    request.total = match value.as_str() {
                        "none" => TotalMode::None,
                        "estimate" => TotalMode::Estimate,
                        "accurate" => TotalMode::Accurate,
                        other => {
                            return Err(Error::Search(format!(
                                "Invalid _total value: {}",
                                other
                            )))
                        }
                    };
                }
                "_include" => {
                    request
                        .include
                        .push(parse_include(value, modifier_str == Some("iterate"))?);
                }
                "_revinclude" => {
                    request
                        .revinclude
                        .push(parse_include(value, modifier_str == Some("iterate"))?);
                }
                "_elements" => {
                    request.elements = value
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_string())
                        .collect();
                }
                "_summary" => {
                    request.summary_count = value == "count";
                }
                _ => {
                    let modifier = match modifier_str {
                        Some(m) => Some(SearchModifier::parse(m).ok_or_else(|| {
                            Error::Search(format!("Unknown search modifier: {}", m))
                        })?),
                        None => None,
                    };

                    let values = value
                        .split(',')
                        .filter(|s| !s.is_empty())
                        .map(|atom| {
                            let (prefix, rest) = SearchPrefix::parse_prefix(atom);
                            SearchValue {
                                prefix,
                                value: rest.to_string(),
                            }
                        })
                        .collect();

                    request.params.push(ParsedParam {
                        code: name.to_string(),
                        modifier,
                        values,
                    });
                }
            }
        }

        Ok(request)
    }
}

/// `Source:param[:TargetType]`, or the wildcard `*`.
fn parse_include(value: &str, iterate: bool) -> Result<IncludeParam> {
    if value == "*" {
        return Ok(IncludeParam {
            source_type: String::new(),
            param: String::new(),
            target_type: None,
            iterate,
            wildcard: true,
        });
    }

    let parts: Vec<&str> = value.split(':').collect();
    match parts.as_slice() {
        [source, param] => Ok(IncludeParam {
            source_type: source.to_string(),
            param: param.to_string(),
            target_type: None,
            iterate,
            wildcard: false,
        }),
        [source, param, target] => Ok(IncludeParam {
            source_type: source.to_string(),
            param: param.to_string(),
            target_type: Some(target.to_string()),
            iterate,
            wildcard: false,
        }),
        _ => Err(Error::Search(format!(
            "Invalid include specification: {}",
            value
        ))),
    }
}

/// Decode a raw query string into ordered (key, value) items.
pub fn parse_query_string(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = urlencoding::decode(key).ok()?.into_owned();
            let value = urlencoding::decode(value).ok()?.into_owned();
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_valid() {
        let request = SearchRequest::parse("Patient", "").unwrap();
        assert!(request.params.is_empty());
        assert_eq!(request.count, DEFAULT_COUNT);
        assert_eq!(request.offset, 0);
        assert_eq!(request.total, TotalMode::None);
    }

    #[test]
    fn count_is_clamped() {
        let request = SearchRequest::parse("Patient", "_count=5000").unwrap();
        assert_eq!(request.count, MAX_COUNT);

        let request = SearchRequest::parse("Patient", "_count=0").unwrap();
        assert_eq!(request.count, 1);

        assert!(SearchRequest::parse("Patient", "_count=abc").is_err());
    }

    #[test]
    fn commas_are_or_and_repeats_are_and() {
        let request =
            SearchRequest::parse("Patient", "name=John,Jane&name=Smith").unwrap();
        assert_eq!(request.params.len(), 2);
        assert_eq!(request.params[0].values.len(), 2);
        assert_eq!(request.params[1].values.len(), 1);
    }

    #[test]
    fn prefixes_apply_to_digit_led_values() {
        let request = SearchRequest::parse("Patient", "birthdate=ge1980-01-01").unwrap();
        assert_eq!(
            request.params[0].values[0],
            SearchValue {
                prefix: Some(SearchPrefix::Ge),
                value: "1980-01-01".to_string()
            }
        );

        // "level" starts with "le" but is not a prefix usage
        let request = SearchRequest::parse("Observation", "code=level").unwrap();
        assert_eq!(request.params[0].values[0].prefix, None);
        assert_eq!(request.params[0].values[0].value, "level");
    }

    #[test]
    fn modifiers_parse() {
        let request = SearchRequest::parse("Patient", "name:exact=Smith").unwrap();
        assert_eq!(request.params[0].modifier, Some(SearchModifier::Exact));

        let request = SearchRequest::parse("Patient", "gender:missing=true").unwrap();
        assert_eq!(request.params[0].modifier, Some(SearchModifier::Missing));

        let request = SearchRequest::parse("Observation", "subject:Patient=abc").unwrap();
        assert_eq!(
            request.params[0].modifier,
            Some(SearchModifier::Type("Patient".to_string()))
        );

        assert!(SearchRequest::parse("Patient", "name:bogus=x").is_err());
    }

    #[test]
    fn include_specifications() {
        let request = SearchRequest::parse(
            "Observation",
            "_include=Observation:subject&_revinclude:iterate=Provenance:target&_include=*",
        )
        .unwrap();

        assert_eq!(request.include.len(), 2);
        assert_eq!(request.include[0].source_type, "Observation");
        assert_eq!(request.include[0].param, "subject");
        assert!(!request.include[0].iterate);
        assert!(request.include[1].wildcard);

        assert_eq!(request.revinclude.len(), 1);
        assert!(request.revinclude[0].iterate);
        assert_eq!(request.revinclude[0].source_type, "Provenance");
    }

    #[test]
    fn sort_directions() {
        let request = SearchRequest::parse("Patient", "_sort=-_lastUpdated,name").unwrap();
        assert_eq!(request.sort.len(), 2);
        assert!(request.sort[0].descending);
        assert_eq!(request.sort[0].code, "_lastUpdated");
        assert!(!request.sort[1].descending);
    }

    #[test]
    fn url_decoding() {
        let request = SearchRequest::parse("Patient", "name=Jos%C3%A9").unwrap();
        assert_eq!(request.params[0].values[0].value, "José");
    }
}
