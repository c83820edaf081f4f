use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::*;

/// Append a new range row. `range.id` is ignored; returns the assigned row id.
pub fn insert_reference_range(conn: &Connection, range: &ReferenceRange) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO reference_ranges (code, sex, age_min, age_max, pregnant, low, high,
         method, notes, tenant_id, effective_from, effective_to, bundle_version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            range.code,
            range.sex.as_str(),
            range.age_min,
            range.age_max,
            range.pregnant,
            range.low,
            range.high,
            range.method,
            range.notes,
            range.tenant_id,
            range.effective_from,
            range.effective_to,
            range.bundle_version,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Every range row for a code, global rows and all tenants, in insertion order.
pub fn get_reference_ranges(conn: &Connection, code: &str) -> Result<Vec<ReferenceRange>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, code, sex, age_min, age_max, pregnant, low, high, method, notes,
         tenant_id, effective_from, effective_to, bundle_version
         FROM reference_ranges WHERE code = ?1 ORDER BY id ASC",
    )?;

    let rows = stmt.query_map(params![code], range_row_from_rusqlite)?;

    let mut ranges = Vec::new();
    for row in rows {
        ranges.push(range_from_row(row?)?);
    }
    Ok(ranges)
}

pub fn count_reference_ranges(conn: &Connection) -> Result<i64, DatabaseError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM reference_ranges", [], |row| row.get(0))?)
}

// Internal row type for ReferenceRange mapping
struct RangeRow {
    id: i64,
    code: String,
    sex: String,
    age_min: Option<f64>,
    age_max: Option<f64>,
    pregnant: Option<bool>,
    low: Option<f64>,
    high: Option<f64>,
    method: Option<String>,
    notes: Option<String>,
    tenant_id: Option<String>,
    effective_from: DateTime<Utc>,
    effective_to: Option<DateTime<Utc>>,
    bundle_version: String,
}

fn range_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<RangeRow, rusqlite::Error> {
    Ok(RangeRow {
        id: row.get(0)?,
        code: row.get(1)?,
        sex: row.get(2)?,
        age_min: row.get(3)?,
        age_max: row.get(4)?,
        pregnant: row.get(5)?,
        low: row.get(6)?,
        high: row.get(7)?,
        method: row.get(8)?,
        notes: row.get(9)?,
        tenant_id: row.get(10)?,
        effective_from: row.get(11)?,
        effective_to: row.get(12)?,
        bundle_version: row.get(13)?,
    })
}

fn range_from_row(row: RangeRow) -> Result<ReferenceRange, DatabaseError> {
    Ok(ReferenceRange {
        id: row.id,
        code: row.code,
        sex: Sex::from_str(&row.sex)?,
        age_min: row.age_min,
        age_max: row.age_max,
        pregnant: row.pregnant,
        low: row.low,
        high: row.high,
        method: row.method,
        notes: row.notes,
        tenant_id: row.tenant_id,
        effective_from: row.effective_from,
        effective_to: row.effective_to,
        bundle_version: row.bundle_version,
    })
}
