pub mod schema;
pub mod writer;
pub mod query;

use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::models::Profile;
use crate::store::{ProfileStore, StoreError};

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn open_or_create<P: AsRef<Path>>(db_path: P) -> Result<Connection, StoreError> {
    let conn = Connection::open(db_path)?;
    schema::apply_pragmas(&conn)?;
    schema::apply_schema(&conn)?;
    Ok(conn)
}

pub fn create_pool<P: AsRef<Path>>(db_path: P, size: u32) -> Result<DbPool, StoreError> {
    if let Some(parent) = db_path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Create the schema once up front so pooled connections only need pragmas.
    drop(open_or_create(&db_path)?);
    let manager = SqliteConnectionManager::file(db_path.as_ref()).with_init(|c| schema::apply_pragmas(c));
    Ok(Pool::builder().max_size(size).build(manager)?)
}

/// Profile documents in a single SQLite table. Ids are random UUIDs; listing
/// follows insertion order.
pub struct SqliteProfileStore {
    pool: DbPool,
}

impl SqliteProfileStore {
    pub fn open<P: AsRef<Path>>(db_path: P, pool_size: u32) -> Result<Self, StoreError> {
        Ok(Self { pool: create_pool(db_path, pool_size)? })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        query::count_profiles(&conn)
    }
}

impl ProfileStore for SqliteProfileStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn insert(&self, doc: &Map<String, Value>) -> Result<String, StoreError> {
        let conn = self.pool.get()?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut doc = doc.clone();
        doc.remove("id");
        writer::insert_document(&conn, &id, &doc)?;
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<Option<Profile>, StoreError> {
        let conn = self.pool.get()?;
        Ok(query::get_document(&conn, id)?.map(|doc| Profile::from_document(id.to_string(), doc)))
    }

    fn list(&self) -> Result<Vec<Profile>, StoreError> {
        let conn = self.pool.get()?;
        Ok(query::list_documents(&conn)?
            .into_iter()
            .map(|(id, doc)| Profile::from_document(id, doc))
            .collect())
    }

    fn update(&self, id: &str, patch: &Map<String, Value>) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        writer::merge_document(&conn, id, patch)
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.pool.get()?;
        writer::delete_document(&conn, id)
    }
}
