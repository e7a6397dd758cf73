//! Corpus statistics and health overview.
//!
//! Provides a quick summary of what's stored: document counts, classification
//! coverage, dedup ratio of the classification store, and per-topic
//! breakdowns. Used by `lxs stats` to give confidence that ingestion and
//! classification runs are keeping up.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-topic breakdown of document and classification counts.
struct TopicStats {
    topic: String,
    doc_count: i64,
    classified_count: i64,
    last_collected_ts: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;

    let total_classified: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_classifications")
        .fetch_one(&pool)
        .await?;

    let distinct_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classifications")
        .fetch_one(&pool)
        .await?;

    let total_tokens: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM word_tokens")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Lexsignal — Corpus Stats");
    println!("========================");
    println!();
    println!("  Database:        {}", config.db.path.display());
    println!("  Size:            {}", format_bytes(db_size));
    println!();
    println!("  Documents:       {}", total_docs);
    println!(
        "  Classified:      {} / {} ({}%)",
        total_classified,
        total_docs,
        if total_docs > 0 {
            (total_classified * 100) / total_docs
        } else {
            0
        }
    );
    println!(
        "  Score records:   {} distinct (dedup {}x)",
        distinct_records,
        if distinct_records > 0 {
            total_classified / distinct_records
        } else {
            0
        }
    );
    println!("  Word tokens:     {}", total_tokens);

    // Per-topic breakdown
    let topic_rows = sqlx::query(
        r#"
        SELECT
            COALESCE(d.topic, '(none)') AS topic,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(DISTINCT dc.document_id) AS classified_count,
            MAX(d.collected_at) AS last_collected
        FROM documents d
        LEFT JOIN document_classifications dc ON dc.document_id = d.id
        GROUP BY COALESCE(d.topic, '(none)')
        ORDER BY doc_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let mut topic_stats: Vec<TopicStats> = Vec::new();
    for row in &topic_rows {
        topic_stats.push(TopicStats {
            topic: row.get("topic"),
            doc_count: row.get("doc_count"),
            classified_count: row.get("classified_count"),
            last_collected_ts: row.get("last_collected"),
        });
    }

    if !topic_stats.is_empty() {
        println!();
        println!("  By topic:");
        println!(
            "  {:<24} {:>6} {:>10}   {}",
            "TOPIC", "DOCS", "CLASSIFIED", "LAST COLLECTED"
        );
        println!("  {}", "-".repeat(64));

        for t in &topic_stats {
            let collected_display = match t.last_collected_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>6} {:>10}   {}",
                t.topic, t.doc_count, t.classified_count, collected_display
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
