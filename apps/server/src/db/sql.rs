//! SQL statement builders
//!
//! Pure string builders for the repository's statements. Identifiers are
//! always double-quoted and every value is a positional parameter; user
//! data never appears in the SQL text.

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

/// `INSERT ... ON CONFLICT ("id") DO UPDATE` over the given columns, in
/// input order. Every column except `id` is overwritten from EXCLUDED.
pub fn build_upsert(table: &str, columns: &[String]) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != "id")
        .map(|c| format!("{} = EXCLUDED.{}", quote(c), quote(c)))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT (\"id\") DO UPDATE SET {}",
        quote(table),
        quoted.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

/// Plain insert (history rows, lookup rows).
pub fn build_insert(table: &str, columns: &[String]) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        quoted.join(", "),
        placeholders.join(", ")
    )
}

/// Latest live-state columns of one resource.
pub fn build_select_by_id(table: &str) -> String {
    format!(
        "SELECT \"content\", \"deleted\", \"projectId\" FROM {} WHERE \"id\" = $1",
        quote(table)
    )
}

/// One specific version from the history table.
pub fn build_version_select(history_table: &str) -> String {
    format!(
        "SELECT \"content\" FROM {} WHERE \"id\" = $1 AND \"versionId\" = $2",
        quote(history_table)
    )
}

/// History options; each set field consumes the next positional parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryQueryShape {
    /// Instance-level history (adds an `"id" = $n` filter)
    pub by_id: bool,
    /// Lower-inclusive `_since` bound on `lastUpdated`
    pub since: bool,
    /// Upper-exclusive pagination cursor on `lastUpdated`
    pub cursor: bool,
    /// LIMIT
    pub count: bool,
}

/// Instance- or type-level history select, newest first.
pub fn build_history_select(history_table: &str, shape: HistoryQueryShape) -> String {
    let mut sql = format!(
        "SELECT \"id\", \"versionId\", \"lastUpdated\", \"content\" FROM {}",
        quote(history_table)
    );

    let mut conditions = Vec::new();
    let mut param = 0;
    let mut next = || {
        param += 1;
        param
    };

    if shape.by_id {
        conditions.push(format!("\"id\" = ${}", next()));
    }
    if shape.since {
        conditions.push(format!("\"lastUpdated\" >= ${}", next()));
    }
    if shape.cursor {
        conditions.push(format!("\"lastUpdated\" < ${}", next()));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(" ORDER BY \"lastUpdated\" DESC");

    if shape.count {
        sql.push_str(&format!(" LIMIT ${}", next()));
    }

    sql
}

/// Delete all reference rows of one resource.
pub fn build_delete_references(references_table: &str) -> String {
    format!(
        "DELETE FROM {} WHERE \"resourceId\" = $1",
        quote(references_table)
    )
}

/// Delete all lookup rows of one resource from one global table.
pub fn build_delete_lookup_rows(lookup_table: &str) -> String {
    format!(
        "DELETE FROM {} WHERE \"resourceId\" = $1 AND \"resourceType\" = $2",
        quote(lookup_table)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_preserves_column_order_and_skips_id_in_update() {
        let columns = vec!["id".to_string(), "content".to_string(), "deleted".to_string()];
        let sql = build_upsert("Patient", &columns);
        assert_eq!(
            sql,
            "INSERT INTO \"Patient\" (\"id\", \"content\", \"deleted\") VALUES ($1, $2, $3) \
             ON CONFLICT (\"id\") DO UPDATE SET \"content\" = EXCLUDED.\"content\", \
             \"deleted\" = EXCLUDED.\"deleted\""
        );
    }

    #[test]
    fn insert_has_no_conflict_clause() {
        let columns = vec!["id".to_string(), "versionId".to_string()];
        let sql = build_insert("Patient_History", &columns);
        assert_eq!(
            sql,
            "INSERT INTO \"Patient_History\" (\"id\", \"versionId\") VALUES ($1, $2)"
        );
    }

    #[test]
    fn select_by_id_shape() {
        assert_eq!(
            build_select_by_id("Patient"),
            "SELECT \"content\", \"deleted\", \"projectId\" FROM \"Patient\" WHERE \"id\" = $1"
        );
    }

    #[test]
    fn version_select_shape() {
        assert_eq!(
            build_version_select("Patient_History"),
            "SELECT \"content\" FROM \"Patient_History\" WHERE \"id\" = $1 AND \"versionId\" = $2"
        );
    }

    #[test]
    fn history_select_numbering_is_sequential() {
        let sql = build_history_select(
            "Patient_History",
            HistoryQueryShape {
                by_id: true,
                since: true,
                cursor: true,
                count: true,
            },
        );
        assert_eq!(
            sql,
            "SELECT \"id\", \"versionId\", \"lastUpdated\", \"content\" FROM \"Patient_History\" \
             WHERE \"id\" = $1 AND \"lastUpdated\" >= $2 AND \"lastUpdated\" < $3 \
             ORDER BY \"lastUpdated\" DESC LIMIT $4"
        );
    }

    #[test]
    fn type_history_has_no_id_filter() {
        let sql = build_history_select(
            "Patient_History",
            HistoryQueryShape {
                count: true,
                ..Default::default()
            },
        );
        assert_eq!(
            sql,
            "SELECT \"id\", \"versionId\", \"lastUpdated\", \"content\" FROM \"Patient_History\" \
             ORDER BY \"lastUpdated\" DESC LIMIT $1"
        );
    }
}
