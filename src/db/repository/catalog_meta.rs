use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::*;

/// Record an installed bundle version. Re-installing a version refreshes its row.
pub fn upsert_catalog_meta(conn: &Connection, meta: &CatalogMeta) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO catalog_meta (bundle_version, source, content_hash, released_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(bundle_version) DO UPDATE SET
             source = excluded.source,
             content_hash = excluded.content_hash,
             released_at = excluded.released_at",
        params![meta.bundle_version, meta.source, meta.content_hash, meta.released_at],
    )?;
    Ok(())
}

pub fn get_catalog_meta(conn: &Connection, bundle_version: &str) -> Result<Option<CatalogMeta>, DatabaseError> {
    let meta = conn
        .query_row(
            "SELECT bundle_version, source, content_hash, released_at
             FROM catalog_meta WHERE bundle_version = ?1",
            params![bundle_version],
            meta_from_rusqlite,
        )
        .optional()?;
    Ok(meta)
}

/// The most recently released bundle, if any was ever installed.
pub fn get_latest_catalog_meta(conn: &Connection) -> Result<Option<CatalogMeta>, DatabaseError> {
    let meta = conn
        .query_row(
            "SELECT bundle_version, source, content_hash, released_at
             FROM catalog_meta ORDER BY released_at DESC, rowid DESC LIMIT 1",
            [],
            meta_from_rusqlite,
        )
        .optional()?;
    Ok(meta)
}

pub fn list_catalog_meta(conn: &Connection) -> Result<Vec<CatalogMeta>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT bundle_version, source, content_hash, released_at
         FROM catalog_meta ORDER BY released_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map([], meta_from_rusqlite)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn meta_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<CatalogMeta, rusqlite::Error> {
    Ok(CatalogMeta {
        bundle_version: row.get(0)?,
        source: row.get(1)?,
        content_hash: row.get(2)?,
        released_at: row.get(3)?,
    })
}
