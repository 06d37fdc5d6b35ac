//! SQLite storage backend.
//!
//! Zone snapshots and table entries live in two tables; the connection is
//! shared behind an async mutex since rusqlite is synchronous.

use std::collections::HashMap;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use super::Storage;
use crate::errors::DnsError;

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn open(path: &str) -> Result<Self, DnsError> {
        let conn = Connection::open(path)
            .map_err(|e| DnsError::StorageFailure(format!("open database: {e}")))?;
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, useful for tests.
    pub fn in_memory() -> Result<Self, DnsError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DnsError::StorageFailure(format!("open in-memory database: {e}")))?;
        Self::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn create_tables(conn: &Connection) -> Result<(), DnsError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS zones (
                name TEXT PRIMARY KEY,
                data BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| DnsError::StorageFailure(format!("create zones table: {e}")))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS named_tables (
                tbl  TEXT NOT NULL,
                key  TEXT NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (tbl, key)
            )",
            [],
        )
        .map_err(|e| DnsError::StorageFailure(format!("create named_tables table: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_zone(&self, name: &str, data: &[u8]) -> Result<(), DnsError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO zones (name, data) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET data = excluded.data",
            params![name, data],
        )
        .map_err(|e| DnsError::StorageFailure(format!("save zone {name}: {e}")))?;
        Ok(())
    }

    async fn load_zone(&self, name: &str) -> Result<Vec<u8>, DnsError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT data FROM zones WHERE name = ?1",
            params![name],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| DnsError::StorageFailure(format!("load zone {name}: {e}")))?
        .ok_or_else(|| DnsError::NotFound(format!("zone {name}")))
    }

    async fn delete_zone(&self, name: &str) -> Result<(), DnsError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM zones WHERE name = ?1", params![name])
            .map_err(|e| DnsError::StorageFailure(format!("delete zone {name}: {e}")))?;
        Ok(())
    }

    async fn list_zones(&self) -> Result<Vec<String>, DnsError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT name FROM zones")
            .map_err(|e| DnsError::StorageFailure(format!("list zones: {e}")))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| DnsError::StorageFailure(format!("list zones: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DnsError::StorageFailure(format!("list zones: {e}")))?;
        Ok(names)
    }

    async fn load_all_zones(&self) -> Result<HashMap<String, Vec<u8>>, DnsError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT name, data FROM zones")
            .map_err(|e| DnsError::StorageFailure(format!("load all zones: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(|e| DnsError::StorageFailure(format!("load all zones: {e}")))?
            .collect::<Result<HashMap<_, _>, _>>()
            .map_err(|e| DnsError::StorageFailure(format!("load all zones: {e}")))?;
        Ok(rows)
    }

    async fn save_table(&self, table: &str, key: &str, data: &[u8]) -> Result<(), DnsError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO named_tables (tbl, key, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(tbl, key) DO UPDATE SET data = excluded.data",
            params![table, key, data],
        )
        .map_err(|e| DnsError::StorageFailure(format!("save {table}/{key}: {e}")))?;
        Ok(())
    }

    async fn load_table(&self, table: &str) -> Result<HashMap<String, Vec<u8>>, DnsError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT key, data FROM named_tables WHERE tbl = ?1")
            .map_err(|e| DnsError::StorageFailure(format!("load table {table}: {e}")))?;
        let rows = stmt
            .query_map(params![table], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(|e| DnsError::StorageFailure(format!("load table {table}: {e}")))?
            .collect::<Result<HashMap<_, _>, _>>()
            .map_err(|e| DnsError::StorageFailure(format!("load table {table}: {e}")))?;
        Ok(rows)
    }

    async fn delete_from_table(&self, table: &str, key: &str) -> Result<(), DnsError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM named_tables WHERE tbl = ?1 AND key = ?2",
            params![table, key],
        )
        .map_err(|e| DnsError::StorageFailure(format!("delete {table}/{key}: {e}")))?;
        Ok(())
    }
}
