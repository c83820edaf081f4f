use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::*;

pub fn insert_lab_result(conn: &Connection, lab: &LabResult) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO lab_results (id, patient_id, code, name, value, unit, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            lab.id.to_string(),
            lab.patient_id,
            lab.code,
            lab.name,
            lab.value,
            lab.unit,
            lab.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_lab_result(conn: &Connection, id: &Uuid) -> Result<Option<LabResult>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, patient_id, code, name, value, unit, created_at
             FROM lab_results WHERE id = ?1",
            params![id.to_string()],
            lab_row_from_rusqlite,
        )
        .optional()?;

    row.map(lab_from_row).transpose()
}

/// A patient's results, newest first.
pub fn get_lab_results_for_patient(
    conn: &Connection,
    patient_id: &str,
) -> Result<Vec<LabResult>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, patient_id, code, name, value, unit, created_at
         FROM lab_results WHERE patient_id = ?1 ORDER BY created_at DESC",
    )?;

    let rows = stmt.query_map(params![patient_id], lab_row_from_rusqlite)?;

    let mut labs = Vec::new();
    for row in rows {
        labs.push(lab_from_row(row?)?);
    }
    Ok(labs)
}

// Internal row type for LabResult mapping
struct LabRow {
    id: String,
    patient_id: String,
    code: String,
    name: String,
    value: f64,
    unit: String,
    created_at: DateTime<Utc>,
}

fn lab_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<LabRow, rusqlite::Error> {
    Ok(LabRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        code: row.get(2)?,
        name: row.get(3)?,
        value: row.get(4)?,
        unit: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn lab_from_row(row: LabRow) -> Result<LabResult, DatabaseError> {
    Ok(LabResult {
        id: Uuid::parse_str(&row.id).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        patient_id: row.patient_id,
        code: row.code,
        name: row.name,
        value: row.value,
        unit: row.unit,
        created_at: row.created_at,
    })
}
