//! Ingestion commands: registering collector output and classifier output.
//!
//! `load` upserts documents from JSONL produced by external collectors.
//! `classify` attaches score vectors from the external classifier to those
//! documents (dedup via the classification store) and can propagate word
//! tokens inline. `propagate` tokenizes already-classified documents on
//! demand. Classification is expected to lag ingestion; nothing here
//! requires the corpus to be fully classified.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::error::CoreError;
use crate::models::{DimensionVector, DocumentItem};
use crate::propagate::{propagate, PropagationMode};
use crate::store;
use crate::tokenize::tokenize;

/// One collector line: a document to register.
#[derive(Debug, Deserialize)]
struct DocumentLine {
    source: String,
    source_id: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

/// One classifier line: a score vector for a stored document.
#[derive(Debug, Deserialize)]
struct ScoreLine {
    document_id: String,
    scores: BTreeMap<String, f64>,
}

/// Insert or update a document row, keyed by `(source, source_id)`.
/// Returns the document's id.
pub async fn upsert_document(pool: &SqlitePool, item: &DocumentItem) -> Result<String> {
    let existing_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE source = ? AND source_id = ?")
            .bind(&item.source)
            .bind(&item.source_id)
            .fetch_optional(pool)
            .await?;

    let doc_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO documents (id, source, source_id, title, author, topic, created_at, collected_at, body)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source, source_id) DO UPDATE SET
            title = excluded.title,
            author = excluded.author,
            topic = excluded.topic,
            created_at = excluded.created_at,
            body = excluded.body
        "#,
    )
    .bind(&doc_id)
    .bind(&item.source)
    .bind(&item.source_id)
    .bind(&item.title)
    .bind(&item.author)
    .bind(&item.topic)
    .bind(item.created_at.timestamp())
    .bind(now)
    .bind(&item.body)
    .execute(pool)
    .await?;

    Ok(doc_id)
}

fn read_lines(path: &Path) -> Result<impl Iterator<Item = std::io::Result<String>>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;
    Ok(std::io::BufReader::new(file).lines())
}

/// `lxs load`: register collector documents from JSONL.
///
/// Lines are upserted as they are parsed; the file is never held in memory,
/// so dumps of any size stream through at flat cost.
pub async fn run_load(
    config: &Config,
    path: &Path,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let pool = if dry_run {
        None
    } else {
        Some(db::connect(config).await?)
    };

    let mut seen = 0usize;
    for (lineno, line) in read_lines(path)?.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Some(lim) = limit {
            if seen >= lim {
                break;
            }
        }
        seen += 1;

        let parsed: DocumentLine = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid document line", path.display(), lineno + 1))?;
        let item = DocumentItem {
            source: parsed.source,
            source_id: parsed.source_id,
            title: parsed.title,
            author: parsed.author,
            topic: parsed.topic,
            created_at: parsed.created_at,
            body: parsed.body,
        };

        if let Some(pool) = &pool {
            upsert_document(pool, &item).await?;
        }
    }

    if dry_run {
        println!("load {} (dry-run)", path.display());
        println!("  documents found: {}", seen);
        return Ok(());
    }

    println!("load {}", path.display());
    println!("  documents upserted: {}", seen);
    println!("ok");

    if let Some(pool) = pool {
        pool.close().await;
    }
    Ok(())
}

/// `lxs classify`: attach classifier score vectors to documents.
pub async fn run_classify(
    config: &Config,
    path: &Path,
    overwrite: bool,
    with_tokens: bool,
    limit: Option<usize>,
) -> Result<()> {
    let pool = db::connect(config).await?;

    let mut classified = 0u64;
    let mut skipped_already = 0u64;
    let mut missing_documents = 0u64;
    let mut tokens_written = 0u64;
    let mut seen = 0usize;

    for (lineno, line) in read_lines(path)?.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Some(lim) = limit {
            if seen >= lim {
                break;
            }
        }
        seen += 1;

        let parsed: ScoreLine = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid score line", path.display(), lineno + 1))?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM documents WHERE id = ?")
            .bind(&parsed.document_id)
            .fetch_optional(&pool)
            .await?;
        if exists.is_none() {
            missing_documents += 1;
            continue;
        }

        let vector: DimensionVector = parsed.scores.into_iter().collect();
        let classification_id = store::get_or_create(&pool, &config.dimensions, &vector).await?;

        match store::link(&pool, &parsed.document_id, &classification_id, overwrite).await {
            Ok(()) => classified += 1,
            Err(err) => {
                if matches!(
                    err.downcast_ref::<CoreError>(),
                    Some(CoreError::AlreadyClassified(_))
                ) {
                    skipped_already += 1;
                    continue;
                }
                return Err(err);
            }
        }

        if with_tokens {
            tokens_written +=
                propagate_document_body(&pool, &parsed.document_id, overwrite).await?;
        }
    }

    let distinct_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classifications")
        .fetch_one(&pool)
        .await?;

    println!("classify {}", path.display());
    println!("  documents classified: {}", classified);
    if skipped_already > 0 {
        println!("  skipped (already classified): {}", skipped_already);
    }
    if missing_documents > 0 {
        println!("  skipped (unknown document): {}", missing_documents);
    }
    if with_tokens {
        println!("  word tokens written: {}", tokens_written);
    }
    println!("  distinct classification records: {}", distinct_records);
    println!("ok");

    pool.close().await;
    Ok(())
}

async fn propagate_document_body(
    pool: &SqlitePool,
    document_id: &str,
    replace: bool,
) -> Result<u64> {
    let body: Option<Option<String>> =
        sqlx::query_scalar("SELECT body FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(pool)
            .await?;

    let Some(Some(body)) = body else {
        return Ok(0);
    };

    let tokens = tokenize(&body);
    if tokens.is_empty() {
        return Ok(0);
    }

    let mode = if replace {
        PropagationMode::Replace
    } else {
        PropagationMode::Reject
    };

    match propagate(pool, document_id, &tokens, mode).await {
        Ok(written) => Ok(written),
        Err(err) => {
            if matches!(
                err.downcast_ref::<CoreError>(),
                Some(CoreError::AlreadyPropagated(_))
            ) {
                Ok(0)
            } else {
                Err(err)
            }
        }
    }
}

/// `lxs propagate`: tokenize stored document bodies into word tokens.
///
/// Either a single document id, or `--all-pending` for every classified
/// document with a body and no tokens yet.
pub async fn run_propagate(
    config: &Config,
    document_id: Option<String>,
    all_pending: bool,
    replace: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;

    let ids: Vec<String> = if let Some(id) = document_id {
        vec![id]
    } else if all_pending {
        sqlx::query_scalar(
            r#"
            SELECT dc.document_id
            FROM document_classifications dc
            JOIN documents d ON d.id = dc.document_id
            WHERE d.body IS NOT NULL
              AND NOT EXISTS (SELECT 1 FROM word_tokens w WHERE w.document_id = dc.document_id)
            ORDER BY dc.document_id
            "#,
        )
        .fetch_all(&pool)
        .await?
    } else {
        anyhow::bail!("pass a document id or --all-pending");
    };

    let mut documents = 0u64;
    let mut tokens_written = 0u64;
    for id in &ids {
        let written = propagate_document_body(&pool, id, replace).await?;
        if written > 0 {
            documents += 1;
            tokens_written += written;
        }
    }

    println!("propagate");
    println!("  documents propagated: {}", documents);
    println!("  word tokens written: {}", tokens_written);
    println!("ok");

    pool.close().await;
    Ok(())
}
