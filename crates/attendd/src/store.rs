//! SQLite persistence for users and their reference face embeddings.

use attend_core::{decode_embedding, encode_embedding, ByteOrder, Embedding, GalleryEntry};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS users (
        id          INTEGER PRIMARY KEY,
        name        TEXT NOT NULL,
        created_at  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS face_encodings (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        encoding    BLOB NOT NULL,
        image_path  TEXT,
        created_at  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_face_encodings_user ON face_encodings(user_id);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Who a gallery entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: i64,
    pub name: String,
}

/// A face to be stored.
#[derive(Debug, Clone)]
pub struct NewFace {
    pub user_id: i64,
    pub name: String,
    pub embedding: Embedding,
    pub image_path: Option<String>,
}

/// Stored face metadata, without the embedding payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaceRecord {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub image_path: Option<String>,
    pub created_at: String,
}

/// Async handle to the face database.
#[derive(Clone)]
pub struct FaceStore {
    conn: tokio_rusqlite::Connection,
    byte_order: ByteOrder,
}

impl FaceStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: &Path, byte_order: ByteOrder) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        conn.call(|conn| {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            Ok(())
        })
        .await?;
        Self::init(conn, byte_order).await
    }

    pub async fn open_in_memory(byte_order: ByteOrder) -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn, byte_order).await
    }

    async fn init(conn: tokio_rusqlite::Connection, byte_order: ByteOrder) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn, byte_order })
    }

    /// Run a trivial query to confirm the database is reachable.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Store a face, creating the user or refreshing its display name.
    pub async fn insert_face(&self, face: NewFace) -> Result<FaceRecord, StoreError> {
        let blob = encode_embedding(&face.embedding, self.byte_order);
        let created_at = Utc::now().to_rfc3339();

        let record = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                    params![face.user_id, face.name, created_at],
                )?;
                tx.execute(
                    "INSERT INTO face_encodings (user_id, encoding, image_path, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![face.user_id, blob, face.image_path, created_at],
                )?;
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(FaceRecord {
                    id,
                    user_id: face.user_id,
                    name: face.name,
                    image_path: face.image_path,
                    created_at,
                })
            })
            .await?;

        tracing::info!(face_id = record.id, user_id = record.user_id, "face stored");
        Ok(record)
    }

    /// Load every stored embedding in registration order.
    ///
    /// Rows whose blob does not decode are skipped with a warning.
    pub async fn load_gallery(&self) -> Result<Vec<GalleryEntry<Identity>>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT f.id, f.user_id, u.name, f.encoding
                     FROM face_encodings f JOIN users u ON u.id = f.user_id
                     ORDER BY f.id ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Vec<u8>>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut gallery = Vec::with_capacity(rows.len());
        for (face_id, user_id, name, blob) in rows {
            match decode_embedding(&blob, self.byte_order) {
                Ok(embedding) => gallery.push(GalleryEntry::new(Identity { user_id, name }, embedding)),
                Err(err) => {
                    tracing::warn!(face_id, user_id, error = %err, "skipping undecodable face encoding");
                }
            }
        }

        tracing::debug!(entries = gallery.len(), "gallery loaded");
        Ok(gallery)
    }

    /// List stored faces, optionally for one user.
    pub async fn list_faces(&self, user_id: Option<i64>) -> Result<Vec<FaceRecord>, StoreError> {
        let faces = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT f.id, f.user_id, u.name, f.image_path, f.created_at
                     FROM face_encodings f JOIN users u ON u.id = f.user_id
                     WHERE ?1 IS NULL OR f.user_id = ?1
                     ORDER BY f.id ASC",
                )?;
                let faces = stmt
                    .query_map(params![user_id], |row| {
                        Ok(FaceRecord {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            name: row.get(2)?,
                            image_path: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(faces)
            })
            .await?;
        Ok(faces)
    }

    /// Remove a stored face. Returns false if no such face exists.
    pub async fn remove_face(&self, face_id: i64) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .call(move |conn| {
                let existing: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM face_encodings WHERE id = ?1",
                        params![face_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if existing.is_none() {
                    return Ok(false);
                }
                conn.execute("DELETE FROM face_encodings WHERE id = ?1", params![face_id])?;
                Ok(true)
            })
            .await?;

        if removed {
            tracing::info!(face_id, "face removed");
        }
        Ok(removed)
    }

    #[cfg(test)]
    async fn insert_raw(&self, user_id: i64, name: &str, blob: Vec<u8>) -> Result<(), StoreError> {
        let name = name.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO users (id, name, created_at) VALUES (?1, ?2, '')",
                    params![user_id, name],
                )?;
                conn.execute(
                    "INSERT INTO face_encodings (user_id, encoding, created_at) VALUES (?1, ?2, '')",
                    params![user_id, blob],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
