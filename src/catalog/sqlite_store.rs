//! SQLite implementation of MediaCatalog

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::catalog::{ArtifactDescriptor, MediaCatalog, MediaRecord, RecordId};
use crate::config::CatalogConfig;
use crate::error::{MediaError, MediaResult};
use crate::media::MediaKind;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    path TEXT NOT NULL UNIQUE,
    folder TEXT NOT NULL,
    file_name TEXT NOT NULL,
    original_name TEXT NOT NULL,
    kind TEXT NOT NULL,
    size INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    is_private INTEGER NOT NULL DEFAULT 0,
    category TEXT,
    downloads INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
)";

const RECORD_COLUMNS: &str = "id, title, url, path, folder, file_name, original_name, kind, size, \
     checksum, is_private, category, downloads, created_at";

/// SQLite implementation of MediaCatalog
pub struct SQLiteMediaCatalog {
    conn: Mutex<Connection>,
}

impl SQLiteMediaCatalog {
    /// Open (and create if needed) the catalog database described by `config`
    pub fn open(config: &CatalogConfig) -> MediaResult<Self> {
        if let Some(parent) = Path::new(&config.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MediaError::catalog(format!("failed to create catalog directory: {}", e)))?;
            }
        }
        let conn = Connection::open(&config.db_path)?;
        if config.wal_mode {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!("Catalog journal mode: {}", mode);
        }
        info!("Opened SQLite catalog at {} (wal_mode: {})", config.db_path, config.wal_mode);
        Self::with_connection(conn)
    }

    /// In-memory catalog, used by tests
    pub fn open_in_memory() -> MediaResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> MediaResult<Self> {
        conn.execute(SCHEMA, [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MediaRecord> {
    let kind: String = row.get(7)?;
    let size: i64 = row.get(8)?;
    let downloads: i64 = row.get(12)?;
    let created_at: String = row.get(13)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(13, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(MediaRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        path: row.get(3)?,
        folder: row.get(4)?,
        file_name: row.get(5)?,
        original_name: row.get(6)?,
        kind: kind.parse().unwrap_or(MediaKind::Image),
        size: size.max(0) as u64,
        checksum: row.get(9)?,
        is_private: row.get(10)?,
        category: row.get(11)?,
        downloads: downloads.max(0) as u64,
        created_at,
    })
}

impl MediaCatalog for SQLiteMediaCatalog {
    fn insert_artifact_record(&self, descriptor: &ArtifactDescriptor) -> MediaResult<RecordId> {
        let size = i64::try_from(descriptor.size)
            .map_err(|_| MediaError::InvalidParameter(format!("size {} too large", descriptor.size)))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO media (title, url, path, folder, file_name, original_name, kind, size,
                                checksum, is_private, category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(path) DO NOTHING",
            params![
                descriptor.title,
                descriptor.url,
                descriptor.path,
                descriptor.folder,
                descriptor.file_name,
                descriptor.original_name,
                descriptor.kind.as_str(),
                size,
                descriptor.checksum,
                descriptor.is_private,
                descriptor.category,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = conn.query_row(
            "SELECT id FROM media WHERE path = ?1",
            params![descriptor.path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn get_record(&self, id: RecordId) -> MediaResult<Option<MediaRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                &format!("SELECT {} FROM media WHERE id = ?1", RECORD_COLUMNS),
                params![id],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn list_records(&self, folder: Option<&str>) -> MediaResult<Vec<MediaRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM media WHERE (?1 IS NULL OR folder = ?1) ORDER BY id DESC",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map(params![folder], record_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn increment_downloads(&self, id: RecordId) -> MediaResult<u64> {
        let conn = self.conn.lock().unwrap();
        let downloads: Option<i64> = conn
            .query_row(
                "UPDATE media SET downloads = downloads + 1 WHERE id = ?1 RETURNING downloads",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        downloads
            .map(|count| count.max(0) as u64)
            .ok_or(MediaError::RecordNotFound(id))
    }
}
