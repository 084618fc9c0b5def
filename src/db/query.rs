use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::store::StoreError;

pub type Document = Map<String, Value>;

fn parse_doc(raw: &str) -> Result<Document, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

/// All documents in insertion order.
pub fn list_documents(conn: &Connection) -> Result<Vec<(String, Document)>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, doc FROM profiles ORDER BY seq")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    let mut out = Vec::new();
    for row in rows {
        let (id, raw) = row?;
        out.push((id, parse_doc(&raw)?));
    }
    Ok(out)
}

pub fn get_document(conn: &Connection, id: &str) -> Result<Option<Document>, StoreError> {
    let raw: Option<String> = conn
        .query_row("SELECT doc FROM profiles WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    raw.as_deref().map(parse_doc).transpose()
}

pub fn count_profiles(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM profiles", [], |r| r.get(0))?)
}
