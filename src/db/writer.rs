use rusqlite::{params, Connection, OptionalExtension};

use super::query::Document;
use crate::store::StoreError;

pub fn insert_document(conn: &Connection, id: &str, doc: &Document) -> Result<(), StoreError> {
    let now = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO profiles (id, doc, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, serde_json::to_string(doc)?, now, now],
    )?;
    Ok(())
}

/// Overwrite the keys present in `patch`, leaving the rest of the document
/// alone. The `id` key is never written into a document.
pub fn merge_document(conn: &Connection, id: &str, patch: &Document) -> Result<bool, StoreError> {
    let tx = conn.unchecked_transaction()?;
    let raw: Option<String> = tx
        .query_row("SELECT doc FROM profiles WHERE id = ?1", params![id], |r| r.get(0))
        .optional()?;
    let Some(raw) = raw else {
        return Ok(false);
    };
    let mut doc: Document = serde_json::from_str(&raw)?;
    for (k, v) in patch {
        if k != "id" {
            doc.insert(k.clone(), v.clone());
        }
    }
    let now = chrono::Utc::now().timestamp();
    tx.execute(
        "UPDATE profiles SET doc = ?1, updated_at = ?2 WHERE id = ?3",
        params![serde_json::to_string(&doc)?, now, id],
    )?;
    tx.commit()?;
    Ok(true)
}

pub fn delete_document(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    let deleted = conn.execute("DELETE FROM profiles WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}
