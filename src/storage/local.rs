use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};

use super::{HostKeyStore, StorageError};

/// Known hosts kept in a single SQLite file next to the rest of the per-user state.
pub struct SqliteHostKeys {
    connection: Mutex<Connection>,
}

impl SqliteHostKeys {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Ok(SqliteHostKeys {
            connection: Mutex::new(Connection::open(path)?),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(SqliteHostKeys {
            connection: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.connection.lock().map_err(|_| StorageError::Poisoned)
    }
}

#[async_trait]
impl HostKeyStore for SqliteHostKeys {
    async fn lookup(&self, host: &str) -> Result<Option<String>, StorageError> {
        let conn = self.lock()?;
        let fingerprint = conn
            .query_row(
                "select fingerprint from known_hosts where host = ?1",
                [host],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fingerprint)
    }

    async fn trust(&self, host: &str, fingerprint: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        tracing::info!(target: "tunnel", "trusting {fingerprint} for {host} from now on");
        conn.execute(
            "insert into known_hosts (host, fingerprint, first_seen) values (?1, ?2, ?3)
             on conflict(host) do update set fingerprint = excluded.fingerprint",
            params![host, fingerprint, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    async fn ensure(&self) -> Result<(), StorageError> {
        self.lock()?.execute(
            "create table if not exists known_hosts (
                host text primary key,
                fingerprint text not null,
                first_seen text not null
            )",
            (),
        )?;
        Ok(())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        let str_value = value.to_string();
        StorageError::LocalSqlite(value, str_value)
    }
}
