//! Classification store: content-addressed deduplication of dimension
//! vectors and document → classification links.
//!
//! Identity is a SHA-256 over the canonical encoding of the dedup-key
//! dimensions of the rounded vector, NULL pattern included. The UNIQUE
//! constraint on that hash plus `INSERT ... ON CONFLICT DO NOTHING` followed
//! by a fetch makes `get_or_create` race-safe: concurrent callers submitting
//! the same vector all receive the one surviving record's id.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::DimensionsConfig;
use crate::error::CoreError;
use crate::models::{ClassificationRecord, DimensionVector};

/// Canonical content hash of a (rounded) vector over the dedup-key
/// dimensions. Absent dimensions hash as a distinct `null` marker, so two
/// vectors agree only when their NULL patterns agree.
pub fn vector_hash(vector: &DimensionVector, dedup_key: &[String], decimals: u32) -> String {
    let mut hasher = Sha256::new();
    for name in dedup_key {
        hasher.update(name.as_bytes());
        hasher.update([0x1f]);
        match vector.get(name) {
            Some(score) => {
                hasher.update(format!("{:.*}", decimals as usize, score).as_bytes());
            }
            None => hasher.update(b"null"),
        }
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

/// Look up or create the classification record for `vector`, returning its id.
///
/// At most one record ever exists per vector value. The insert is guarded by
/// the `vector_hash` unique constraint; losing the race simply means the
/// follow-up fetch returns the winner's id.
pub async fn get_or_create(
    pool: &SqlitePool,
    dims: &DimensionsConfig,
    vector: &DimensionVector,
) -> Result<String> {
    if vector.is_empty() {
        anyhow::bail!("classification vector has no dimensions");
    }
    for name in vector.dimensions() {
        if !dims.names.iter().any(|n| n == name) {
            anyhow::bail!("unknown dimension '{}' in classification vector", name);
        }
    }

    let rounded = vector.rounded(dims.round_decimals);
    let hash = vector_hash(&rounded, dims.dedup_dimensions(), dims.round_decimals);
    let scores_json = serde_json::to_string(&rounded)?;
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO classifications (id, vector_hash, scores_json, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(vector_hash) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&hash)
    .bind(&scores_json)
    .bind(now)
    .execute(pool)
    .await?;

    let id: String = sqlx::query_scalar("SELECT id FROM classifications WHERE vector_hash = ?")
        .bind(&hash)
        .fetch_one(pool)
        .await
        .context("classification record missing after insert-or-fetch")?;

    Ok(id)
}

/// Create the DocumentClassification link for a document.
///
/// Without `overwrite` an existing link fails with
/// [`CoreError::AlreadyClassified`]; with it, the link is replaced.
pub async fn link(
    pool: &SqlitePool,
    document_id: &str,
    classification_id: &str,
    overwrite: bool,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    if overwrite {
        sqlx::query(
            r#"
            INSERT INTO document_classifications (document_id, classification_id, classified_at)
            VALUES (?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                classification_id = excluded.classification_id,
                classified_at = excluded.classified_at
            "#,
        )
        .bind(document_id)
        .bind(classification_id)
        .bind(now)
        .execute(pool)
        .await?;
        return Ok(());
    }

    let result = sqlx::query(
        r#"
        INSERT INTO document_classifications (document_id, classification_id, classified_at)
        VALUES (?, ?, ?)
        ON CONFLICT(document_id) DO NOTHING
        "#,
    )
    .bind(document_id)
    .bind(classification_id)
    .bind(now)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(CoreError::AlreadyClassified(document_id.to_string()).into());
    }

    Ok(())
}

/// The classification id linked to a document, if any.
pub async fn classification_for_document(
    pool: &SqlitePool,
    document_id: &str,
) -> Result<Option<String>> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT classification_id FROM document_classifications WHERE document_id = ?",
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

/// Fetch a full classification record by id.
pub async fn get_record(
    pool: &SqlitePool,
    classification_id: &str,
) -> Result<Option<ClassificationRecord>> {
    use sqlx::Row;

    let row = sqlx::query(
        "SELECT id, vector_hash, scores_json, created_at FROM classifications WHERE id = ?",
    )
    .bind(classification_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let scores_json: String = row.get("scores_json");
            let scores: DimensionVector = serde_json::from_str(&scores_json)
                .context("malformed scores_json in classifications row")?;
            Ok(Some(ClassificationRecord {
                id: row.get("id"),
                vector_hash: row.get("vector_hash"),
                scores,
                created_at: row.get("created_at"),
            }))
        }
        None => Ok(None),
    }
}
