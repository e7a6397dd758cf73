//! Token propagation: stamping every word occurrence of a classified
//! document with the document's classification id.
//!
//! Propagation is what makes vocabulary-level queries ("average certainty
//! for the word `imminent`") answerable without re-deriving document
//! context. Tokens are written once per document inside a transaction;
//! re-propagation either fails fast or atomically replaces the prior set,
//! so duplicate positions can never exist.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::models::DimensionVector;

/// One tokenizer output item: `(word, position, temporal flag)`.
#[derive(Debug, Clone)]
pub struct Token {
    pub text: String,
    pub position: i64,
    pub is_temporal_marker: bool,
}

/// What to do when a document already has tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationMode {
    /// Fail with `AlreadyPropagated`.
    Reject,
    /// Delete the prior token set in the same transaction, then insert.
    /// After reclassification this stamps tokens with the *current*
    /// classification id.
    Replace,
}

/// Write one WordToken row per input token, all referencing the document's
/// current classification. Returns the number of tokens written.
pub async fn propagate(
    pool: &SqlitePool,
    document_id: &str,
    tokens: &[Token],
    mode: PropagationMode,
) -> Result<u64> {
    let classification_id = crate::store::classification_for_document(pool, document_id)
        .await?
        .ok_or_else(|| CoreError::NotClassified(document_id.to_string()))?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM word_tokens WHERE document_id = ?")
        .bind(document_id)
        .fetch_one(pool)
        .await?;

    if existing > 0 && mode == PropagationMode::Reject {
        return Err(CoreError::AlreadyPropagated(document_id.to_string()).into());
    }

    let mut tx = pool.begin().await?;

    if existing > 0 {
        sqlx::query("DELETE FROM word_tokens WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
    }

    for token in tokens {
        sqlx::query(
            r#"
            INSERT INTO word_tokens
                (document_id, position, word_text, word_lower, is_temporal, classification_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(document_id)
        .bind(token.position)
        .bind(&token.text)
        .bind(token.text.to_lowercase())
        .bind(token.is_temporal_marker)
        .bind(&classification_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(tokens.len() as u64)
}

/// One stored occurrence of a word.
#[derive(Debug, Clone)]
pub struct WordOccurrence {
    pub document_id: String,
    pub position: i64,
    pub word_text: String,
    pub is_temporal: bool,
    pub classification_id: String,
}

/// All occurrences of a word (case-insensitive), ordered by document then
/// position.
pub async fn tokens_for_word(pool: &SqlitePool, word: &str) -> Result<Vec<WordOccurrence>> {
    let rows = sqlx::query(
        r#"
        SELECT document_id, position, word_text, is_temporal, classification_id
        FROM word_tokens
        WHERE word_lower = ?
        ORDER BY document_id, position
        "#,
    )
    .bind(word.to_lowercase())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| WordOccurrence {
            document_id: row.get("document_id"),
            position: row.get("position"),
            word_text: row.get("word_text"),
            is_temporal: row.get::<i64, _>("is_temporal") != 0,
            classification_id: row.get("classification_id"),
        })
        .collect())
}

/// Per-dimension occurrence count and mean for a word.
#[derive(Debug, Clone, PartialEq)]
pub struct WordDimensionStat {
    pub count: u64,
    pub mean: f64,
}

/// Per-dimension averages over every stored occurrence of a word.
///
/// Dedup keeps this cheap: occurrences are grouped by classification id
/// first, so the score JSON is parsed once per distinct record rather than
/// once per token.
pub async fn word_dimension_profile(
    pool: &SqlitePool,
    word: &str,
) -> Result<BTreeMap<String, WordDimensionStat>> {
    let rows = sqlx::query(
        r#"
        SELECT w.classification_id, COUNT(*) AS occurrences, c.scores_json
        FROM word_tokens w
        JOIN classifications c ON c.id = w.classification_id
        WHERE w.word_lower = ?
        GROUP BY w.classification_id
        "#,
    )
    .bind(word.to_lowercase())
    .fetch_all(pool)
    .await?;

    let mut profile: BTreeMap<String, (u64, f64)> = BTreeMap::new();

    for row in &rows {
        let occurrences: i64 = row.get("occurrences");
        let scores_json: String = row.get("scores_json");
        let scores: DimensionVector = serde_json::from_str(&scores_json)
            .context("malformed scores_json in classifications row")?;

        for (dimension, score) in scores.iter() {
            let entry = profile.entry(dimension.to_string()).or_insert((0, 0.0));
            let n = occurrences as u64;
            // Weighted incremental mean; stable for large occurrence counts.
            entry.0 += n;
            entry.1 += (score - entry.1) * (n as f64 / entry.0 as f64);
        }
    }

    Ok(profile
        .into_iter()
        .map(|(dimension, (count, mean))| (dimension, WordDimensionStat { count, mean }))
        .collect())
}
