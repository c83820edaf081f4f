use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::{from_json_text, to_json_text};
use crate::db::DatabaseError;
use crate::models::*;

/// Append a guideline row. `guideline.id` is ignored; returns the assigned row id.
pub fn insert_guideline(conn: &Connection, guideline: &Guideline) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO guidelines (code, snippet, severity_rule, citations, accessed_at,
         version_tag, bundle_version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            guideline.code,
            guideline.snippet,
            to_json_text("severity_rule", &guideline.severity_rule)?,
            to_json_text("citations", &guideline.citations)?,
            guideline.accessed_at.to_string(),
            guideline.version_tag,
            guideline.bundle_version,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The current guideline for a code: the most recently appended row.
pub fn get_current_guideline(conn: &Connection, code: &str) -> Result<Option<Guideline>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, code, snippet, severity_rule, citations, accessed_at, version_tag,
             bundle_version
             FROM guidelines WHERE code = ?1 ORDER BY id DESC LIMIT 1",
            params![code],
            guideline_row_from_rusqlite,
        )
        .optional()?;

    row.map(guideline_from_row).transpose()
}

pub fn count_guidelines(conn: &Connection) -> Result<i64, DatabaseError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM guidelines", [], |row| row.get(0))?)
}

// Internal row type for Guideline mapping
struct GuidelineRow {
    id: i64,
    code: String,
    snippet: String,
    severity_rule: String,
    citations: String,
    accessed_at: String,
    version_tag: String,
    bundle_version: String,
}

fn guideline_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<GuidelineRow, rusqlite::Error> {
    Ok(GuidelineRow {
        id: row.get(0)?,
        code: row.get(1)?,
        snippet: row.get(2)?,
        severity_rule: row.get(3)?,
        citations: row.get(4)?,
        accessed_at: row.get(5)?,
        version_tag: row.get(6)?,
        bundle_version: row.get(7)?,
    })
}

fn guideline_from_row(row: GuidelineRow) -> Result<Guideline, DatabaseError> {
    Ok(Guideline {
        id: row.id,
        code: row.code,
        snippet: row.snippet,
        severity_rule: from_json_text("severity_rule", &row.severity_rule)?,
        citations: from_json_text("citations", &row.citations)?,
        accessed_at: NaiveDate::parse_from_str(&row.accessed_at, "%Y-%m-%d")
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        version_tag: row.version_tag,
        bundle_version: row.bundle_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn guideline(snippet: &str, version: &str) -> Guideline {
        Guideline {
            id: 0,
            code: "2160-0".into(),
            snippet: snippet.into(),
            severity_rule: serde_json::json!({ "default": "moderate" }),
            citations: vec!["KDIGO 2024".into()],
            accessed_at: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            version_tag: "v1".into(),
            bundle_version: version.into(),
        }
    }

    #[test]
    fn newest_row_is_current() {
        let conn = open_memory_database().unwrap();
        insert_guideline(&conn, &guideline("old text", "v1")).unwrap();
        insert_guideline(&conn, &guideline("new text", "v2")).unwrap();

        let current = get_current_guideline(&conn, "2160-0").unwrap().unwrap();
        assert_eq!(current.snippet, "new text");
        assert_eq!(current.bundle_version, "v2");
        assert_eq!(count_guidelines(&conn).unwrap(), 2);
    }

    #[test]
    fn severity_rule_round_trips() {
        let conn = open_memory_database().unwrap();
        insert_guideline(&conn, &guideline("text", "v1")).unwrap();
        let current = get_current_guideline(&conn, "2160-0").unwrap().unwrap();
        assert_eq!(current.severity_rule["default"], "moderate");
        assert_eq!(current.citations, vec!["KDIGO 2024".to_string()]);
    }

    #[test]
    fn missing_code_is_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_current_guideline(&conn, "2160-0").unwrap().is_none());
    }
}
