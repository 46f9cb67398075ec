//! Text normalization for string search
//!
//! Human names and addresses match case- and accent-insensitively. The
//! normalized form (NFKD, combining marks stripped, lowercased) is stored
//! in the lookup tables' aggregate text columns and applied to query
//! values at search time.

use unicode_normalization::UnicodeNormalization;

/// Fold case and accents for broad string matching.
pub fn normalize_string(value: &str) -> String {
    value
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(|c| c.to_lowercase())
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036F}' | '\u{1AB0}'..='\u{1AFF}' | '\u{20D0}'..='\u{20FF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_and_accents() {
        assert_eq!(normalize_string("MÜLLER"), "muller");
        assert_eq!(normalize_string("  José "), "jose");
        assert_eq!(normalize_string("plain"), "plain");
    }
}
