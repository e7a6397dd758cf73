use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Documents table. Rows are owned by external collectors; this core only
    // attaches classification links to them.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            title TEXT,
            author TEXT,
            topic TEXT,
            created_at INTEGER NOT NULL,
            collected_at INTEGER NOT NULL,
            body TEXT,
            UNIQUE(source, source_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Deduplicated classification records. vector_hash is the canonical
    // content hash of the dedup-key dimensions (NULL pattern included); the
    // unique constraint is what makes insert-or-fetch race-safe.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classifications (
            id TEXT PRIMARY KEY,
            vector_hash TEXT NOT NULL UNIQUE,
            scores_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // One-to-one link from a document to its classification record.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_classifications (
            document_id TEXT PRIMARY KEY,
            classification_id TEXT NOT NULL,
            classified_at INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id),
            FOREIGN KEY (classification_id) REFERENCES classifications(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Word tokens inherit the owning document's classification id at
    // propagation time. UNIQUE(document_id, position) keeps re-propagation
    // from ever producing duplicate positions.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS word_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            word_text TEXT NOT NULL,
            word_lower TEXT NOT NULL,
            is_temporal INTEGER NOT NULL DEFAULT 0,
            classification_id TEXT NOT NULL,
            UNIQUE(document_id, position),
            FOREIGN KEY (document_id) REFERENCES documents(id),
            FOREIGN KEY (classification_id) REFERENCES classifications(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_topic ON documents(topic)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_word_tokens_word_lower ON word_tokens(word_lower)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_word_tokens_classification ON word_tokens(classification_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_doc_class_classification ON document_classifications(classification_id)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
