//! SQLite-backed [`SimilarityIndex`] implementation.
//!
//! One `fragments` table holds identity, text, metadata JSON, the
//! embedding vector as a little-endian f32 BLOB, and a monotonically
//! increasing insertion position (the tie-break for equal distances).
//! Nearest-neighbor queries load all vectors and score cosine distance
//! in process; fine for the corpus sizes a research session indexes.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::FragmentId;

use super::{IndexEntry, Neighbor, SimilarityIndex};

/// Similarity index persisted in a SQLite database.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    /// Open (or create) the database at `path` and ensure the schema
    /// exists. Safe to call against a database that was never initialized.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fragments (
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                text TEXT NOT NULL,
                metadata_json TEXT NOT NULL,
                vector BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(SqliteIndex { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn parse_metadata(json: &str) -> BTreeMap<String, String> {
    serde_json::from_str(json).unwrap_or_default()
}

#[async_trait]
impl SimilarityIndex for SqliteIndex {
    async fn insert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let metadata_json = serde_json::to_string(&entry.metadata)?;
            // INSERT OR IGNORE gives insert-if-absent on the identity key;
            // the position subselect sees rows inserted earlier in this tx.
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO fragments (id, position, text, metadata_json, vector)
                VALUES (?, (SELECT COALESCE(MAX(position), 0) + 1 FROM fragments), ?, ?, ?)
                "#,
            )
            .bind(entry.id.as_str())
            .bind(&entry.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn contains(&self, id: &FragmentId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM fragments WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn query_nearest(&self, vector: &[f32], n: usize) -> Result<Vec<Neighbor>> {
        let rows = sqlx::query("SELECT id, position, text, metadata_json, vector FROM fragments")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(f32, i64, Neighbor)> = rows
            .iter()
            .map(|row| {
                let stored_vec = blob_to_vec(row.get::<Vec<u8>, _>("vector").as_slice());
                let distance = 1.0 - cosine_similarity(vector, &stored_vec);
                let position: i64 = row.get("position");
                (
                    distance,
                    position,
                    Neighbor {
                        id: FragmentId::from(row.get::<String, _>("id")),
                        text: row.get("text"),
                        metadata: parse_metadata(&row.get::<String, _>("metadata_json")),
                        distance,
                    },
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        Ok(scored.into_iter().take(n).map(|(_, _, nb)| nb).collect())
    }

    async fn delete_matching(&self, key: &str, value: &str) -> Result<usize> {
        let path = format!("$.{}", key);
        let result = sqlx::query("DELETE FROM fragments WHERE json_extract(metadata_json, ?) = ?")
            .bind(&path)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM fragments")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fragments")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn all_metadata(&self) -> Result<Vec<BTreeMap<String, String>>> {
        let rows = sqlx::query("SELECT metadata_json FROM fragments")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| parse_metadata(&row.get::<String, _>("metadata_json")))
            .collect())
    }
}
