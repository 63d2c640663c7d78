// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # SQLite journal provider.
//!
//! Events are rows of a single table shared by every stream:
//!
//! | column      | content                                         |
//! |-------------|-------------------------------------------------|
//! | `partition` | stream id                                       |
//! | `row`       | event id as 16 upper-case hex digits            |
//! | `payload`   | raw event payload                               |
//!
//! `(partition, row)` is the primary key, so appending an existing id is rejected by
//! SQLite itself and surfaces as `Error::DuplicateEvent`. Because the row key is
//! zero-padded, ordering by `row` orders events by id.
//!
//! The provider is configured with two parameters:
//!
//! - `Table`: name of the table, created on initialization if missing.
//! - `ConnectionStringSetting`: name of the setting holding the database file path.
//!

use journal::{
    event_key, parse_event_key, EnvSettings, Error, Event, EventStream,
    Journal, JournalProvider, Parameters, ProviderRegistry, Settings,
};

use async_trait::async_trait;
use futures::stream;
use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use tracing::{debug, error, info};

use std::{
    collections::VecDeque,
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

/// Rows fetched per read query.
const PAGE_SIZE: usize = 100;

/// Rows deleted per clear transaction.
const CLEAR_BATCH_SIZE: usize = 100;

/// Journal provider backed by a SQLite table.
pub struct SqliteJournalProvider {
    /// Lookup of the connection string setting.
    settings: Arc<dyn Settings>,
    /// Connection and table, once initialized.
    table: Option<(Arc<Mutex<Connection>>, String)>,
}

impl SqliteJournalProvider {
    /// Provider type identifier.
    pub const TYPE_NAME: &'static str = "Sqlite";

    /// Parameter naming the events table.
    pub const TABLE: &'static str = "Table";

    /// Parameter naming the setting that holds the database path.
    pub const CONNECTION_STRING_SETTING: &'static str =
        "ConnectionStringSetting";

    /// Creates a provider that reads its connection string from the environment.
    pub fn new() -> Self {
        Self::with_settings(Arc::new(EnvSettings))
    }

    /// Creates a provider that reads its connection string from `settings`.
    pub fn with_settings(settings: Arc<dyn Settings>) -> Self {
        Self {
            settings,
            table: None,
        }
    }

    /// Registers the provider type.
    pub fn register(
        registry: &ProviderRegistry,
        settings: Arc<dyn Settings>,
    ) -> Result<(), Error> {
        registry.register(Self::TYPE_NAME, move || {
            Box::new(Self::with_settings(settings.clone()))
        })
    }
}

impl Default for SqliteJournalProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JournalProvider for SqliteJournalProvider {
    async fn initialize(&mut self, parameters: &Parameters) -> Result<(), Error> {
        if self.table.is_some() {
            return Err(Error::ProviderInitialization(
                "Instance already initialized.".to_owned(),
            ));
        }

        let table = parameters.require(Self::TABLE)?.to_owned();
        if !is_identifier(&table) {
            error!("Invalid SQLite journal table name {}", table);
            return Err(Error::ProviderInitialization(format!(
                "invalid table name {}",
                table
            )));
        }
        let setting = parameters.require(Self::CONNECTION_STRING_SETTING)?;
        let path = self
            .settings
            .setting(setting)
            .filter(|path| !path.trim().is_empty())
            .ok_or_else(|| {
                error!("Connection string setting {} not found", setting);
                Error::ProviderInitialization(format!(
                    "connection string setting {} not found",
                    setting
                ))
            })?;

        info!("Opening SQLite journal {} in {}", table, path);
        let stmt = format!(
            "CREATE TABLE IF NOT EXISTS {} (partition TEXT NOT NULL, row TEXT NOT NULL, \
            payload BLOB NOT NULL, PRIMARY KEY (partition, row))",
            table
        );
        let conn = tokio::task::spawn_blocking(move || {
            let conn = open(&path)?;
            conn.execute(stmt.as_str(), ()).map_err(|e| {
                Error::ProviderInitialization(format!(
                    "fail SQLite create table: {}",
                    e
                ))
            })?;
            Ok::<_, Error>(conn)
        })
        .await
        .map_err(|e| {
            Error::ProviderInitialization(format!("SQLite task failed: {}", e))
        })??;

        self.table = Some((Arc::new(Mutex::new(conn)), table));
        Ok(())
    }

    fn create(&self, stream_id: &str) -> Result<Box<dyn Journal>, Error> {
        let (conn, table) = self.table.as_ref().ok_or_else(|| {
            Error::ProviderNotInitialized(Self::TYPE_NAME.to_owned())
        })?;
        Ok(Box::new(SqliteJournal {
            conn: conn.clone(),
            table: table.clone(),
            stream_id: stream_id.to_owned(),
        }))
    }
}

/// Journal of one stream, stored in a SQLite table.
pub struct SqliteJournal {
    /// Shared SQLite connection.
    conn: Arc<Mutex<Connection>>,
    /// Events table.
    table: String,
    /// Partition of this stream.
    stream_id: String,
}

#[async_trait]
impl Journal for SqliteJournal {
    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    async fn append(&self, payload: Vec<u8>, id: u64) -> Result<Event, Error> {
        let stmt = format!(
            "INSERT INTO {} (partition, row, payload) VALUES (?1, ?2, ?3)",
            self.table
        );
        let stream_id = self.stream_id.clone();
        blocking(&self.conn, move |conn| {
            let result =
                conn.execute(&stmt, params![stream_id, event_key(id), payload]);
            match result {
                Ok(_) => Ok(Event::new(id, payload)),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(Error::DuplicateEvent {
                        stream: stream_id,
                        id,
                    })
                }
                Err(e) => {
                    Err(Error::Backend(format!("sqlite insert error: {}", e)))
                }
            }
        })
        .await
    }

    fn read_from(&self, id: u64) -> EventStream<'_> {
        let page = Page {
            conn: self.conn.clone(),
            query: format!(
                "SELECT row, payload FROM {} WHERE partition = ?1 AND row > ?2 \
                ORDER BY row LIMIT ?3",
                self.table
            ),
            stream_id: self.stream_id.clone(),
            cursor: event_key(id),
            buffer: VecDeque::new(),
            exhausted: false,
        };
        Box::pin(stream::unfold(Some(page), |page| async move {
            let Some(mut page) = page else {
                return None;
            };
            loop {
                if let Some(event) = page.buffer.pop_front() {
                    return Some((Ok(event), Some(page)));
                }
                if page.exhausted {
                    return None;
                }
                if let Err(e) = page.fetch().await {
                    error!("Can't read stream {}: {}", page.stream_id, e);
                    return Some((Err(e), None));
                }
            }
        }))
    }

    async fn clear(&self, id: u64) -> Result<(), Error> {
        let stmt = format!(
            "DELETE FROM {table} WHERE partition = ?1 AND row IN \
            (SELECT row FROM {table} WHERE partition = ?1 AND row <= ?2 \
            ORDER BY row LIMIT ?3)",
            table = self.table
        );
        let up_to = event_key(id);
        let mut cleared = 0;
        loop {
            let stmt = stmt.clone();
            let stream_id = self.stream_id.clone();
            let up_to = up_to.clone();
            let deleted = blocking(&self.conn, move |conn| {
                let tx = conn.transaction().map_err(|e| {
                    Error::Backend(format!("sqlite transaction error: {}", e))
                })?;
                let limit = CLEAR_BATCH_SIZE as i64;
                let deleted = tx
                    .execute(&stmt, params![stream_id, up_to, limit])
                    .map_err(|e| {
                        Error::Backend(format!("sqlite delete error: {}", e))
                    })?;
                tx.commit().map_err(|e| {
                    Error::Backend(format!("sqlite commit error: {}", e))
                })?;
                Ok(deleted)
            })
            .await?;
            cleared += deleted;
            if deleted < CLEAR_BATCH_SIZE {
                break;
            }
        }
        debug!(
            "Cleared {} events up to {} in stream {}",
            cleared, id, self.stream_id
        );
        Ok(())
    }
}

/// Read cursor over the rows of a stream.
struct Page {
    conn: Arc<Mutex<Connection>>,
    query: String,
    stream_id: String,
    cursor: String,
    buffer: VecDeque<Event>,
    exhausted: bool,
}

impl Page {
    /// Loads the next rows after the cursor.
    async fn fetch(&mut self) -> Result<(), Error> {
        let query = self.query.clone();
        let stream_id = self.stream_id.clone();
        let cursor = self.cursor.clone();
        let rows = blocking(&self.conn, move |conn| {
            let mut stmt = conn.prepare(&query).map_err(|e| {
                Error::Backend(format!("sqlite prepare error: {}", e))
            })?;
            let limit = PAGE_SIZE as i64;
            let mut rows = stmt
                .query(params![stream_id, cursor, limit])
                .map_err(|e| {
                    Error::Backend(format!("sqlite query error: {}", e))
                })?;
            let mut events = Vec::new();
            while let Some(row) = rows
                .next()
                .map_err(|e| Error::Backend(format!("sqlite row error: {}", e)))?
            {
                let key: String = row.get(0).map_err(|e| {
                    Error::Backend(format!("sqlite row error: {}", e))
                })?;
                let payload: Vec<u8> = row.get(1).map_err(|e| {
                    Error::Backend(format!("sqlite row error: {}", e))
                })?;
                events.push((key, payload));
            }
            Ok(events)
        })
        .await?;

        self.exhausted = rows.len() < PAGE_SIZE;
        for (key, payload) in rows {
            let id = parse_event_key(&key)?;
            self.cursor = key;
            self.buffer.push_back(Event::new(id, payload));
        }
        Ok(())
    }
}

/// Runs a SQLite operation on the blocking thread pool.
async fn blocking<T, F>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, Error> + Send + 'static,
{
    let conn = conn.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = conn.lock().map_err(|e| {
            Error::Backend(format!("sqlite open connection: {}", e))
        })?;
        f(&mut conn)
    })
    .await
    .map_err(|e| Error::Backend(format!("SQLite task failed: {}", e)))?
}

/// Returns `true` if `name` can be used as a table name without quoting.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Open a SQLite database connection, creating the file and its directory if needed.
fn open<P: AsRef<Path>>(path: P) -> Result<Connection, Error> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            info!("Path does not exist, creating it");
            fs::create_dir_all(dir).map_err(|e| {
                Error::ProviderInitialization(format!(
                    "fail SQLite create directory: {}",
                    e
                ))
            })?;
        }
    }

    let flags =
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let conn = Connection::open_with_flags(path, flags).map_err(|e| {
        Error::ProviderInitialization(format!(
            "SQLite failed to open connection: {}",
            e
        ))
    })?;

    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA busy_timeout=5000;
        ",
    )
    .map_err(|e| {
        Error::ProviderInitialization(format!(
            "SQLite failed to execute batch: {}",
            e
        ))
    })?;

    Ok(conn)
}
