//! Aggregation service: per-period rollups of dimension scores.
//!
//! Only documents with a completed classification link participate; anything
//! still pending classification is silently excluded, since classification
//! is expected to lag ingestion. Scans are keyset-batched so a full-year
//! aggregation never loads the corpus into memory at once.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};

use crate::models::{DimensionVector, PeriodRange};
use crate::stats::{percentile, Welford};

const BATCH: i64 = 5000;

/// Grouping axis for an aggregation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    /// One group covering the whole period, keyed `"all"`.
    None,
    /// One group per calendar day, keyed `YYYY-MM-DD`.
    Day,
    /// One group per document topic, keyed by topic (`"(none)"` for untagged).
    Topic,
    /// One group per lowercased word, aggregated over token occurrences.
    Word,
}

/// Optional predicate narrowing which documents (or tokens) participate.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub topic: Option<String>,
    pub source: Option<String>,
    /// Restrict to occurrences of one word; forces the token scan path.
    pub word: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    /// Groups under this sample floor are flagged, never dropped.
    pub min_samples: u64,
    /// Collect per-group values to report medians. Costs memory proportional
    /// to the period's sample count; off by default.
    pub include_median: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            min_samples: 200,
            include_median: false,
        }
    }
}

/// Per-dimension summary inside one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionAggregate {
    pub count: u64,
    pub mean: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
}

/// Summary for one group key. A dimension with zero samples is absent from
/// `dimensions`, not present with a zero mean.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodAggregate {
    pub count: u64,
    pub dimensions: BTreeMap<String, DimensionAggregate>,
    pub low_confidence: bool,
}

#[derive(Default)]
struct GroupAcc {
    count: u64,
    dims: BTreeMap<String, Welford>,
    values: BTreeMap<String, Vec<f64>>,
}

/// Aggregate classified documents over `period`, grouped by `group_by`.
///
/// An empty result map is the normal "no data" outcome for a period with no
/// classified documents; it is not an error.
pub async fn aggregate(
    pool: &SqlitePool,
    period: PeriodRange,
    group_by: GroupBy,
    filter: &DocumentFilter,
    opts: &AggregateOptions,
) -> Result<BTreeMap<String, PeriodAggregate>> {
    let mut groups: HashMap<String, GroupAcc> = HashMap::new();

    let token_path = group_by == GroupBy::Word || filter.word.is_some();
    if token_path {
        scan_tokens(pool, period, group_by, filter, opts, &mut groups).await?;
    } else {
        scan_documents(pool, period, group_by, filter, opts, &mut groups).await?;
    }

    let mut result = BTreeMap::new();
    for (key, acc) in groups {
        let mut dimensions = BTreeMap::new();
        for (dimension, welford) in acc.dims {
            let Some(mean) = welford.mean() else {
                continue;
            };
            let median = acc.values.get(&dimension).map(|values| {
                let mut sorted = values.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                percentile(&sorted, 50.0).unwrap_or(mean)
            });
            dimensions.insert(
                dimension,
                DimensionAggregate {
                    count: welford.count(),
                    mean,
                    median,
                },
            );
        }
        result.insert(
            key,
            PeriodAggregate {
                count: acc.count,
                dimensions,
                low_confidence: acc.count < opts.min_samples,
            },
        );
    }

    Ok(result)
}

async fn scan_documents(
    pool: &SqlitePool,
    period: PeriodRange,
    group_by: GroupBy,
    filter: &DocumentFilter,
    opts: &AggregateOptions,
    groups: &mut HashMap<String, GroupAcc>,
) -> Result<()> {
    let mut last_id = String::new();

    loop {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.created_at, d.topic, c.scores_json
            FROM documents d
            JOIN document_classifications dc ON dc.document_id = d.id
            JOIN classifications c ON c.id = dc.classification_id
            WHERE d.created_at >= ? AND d.created_at < ?
              AND (? IS NULL OR d.topic = ?)
              AND (? IS NULL OR d.source = ?)
              AND d.id > ?
            ORDER BY d.id
            LIMIT ?
            "#,
        )
        .bind(period.start_ts())
        .bind(period.end_ts_exclusive())
        .bind(&filter.topic)
        .bind(&filter.topic)
        .bind(&filter.source)
        .bind(&filter.source)
        .bind(&last_id)
        .bind(BATCH)
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            break;
        }

        for row in &rows {
            let created_at: i64 = row.get("created_at");
            let topic: Option<String> = row.get("topic");
            let key = match group_by {
                GroupBy::None => "all".to_string(),
                GroupBy::Day => day_key(created_at),
                GroupBy::Topic => topic.unwrap_or_else(|| "(none)".to_string()),
                GroupBy::Word => unreachable!("word grouping uses the token scan"),
            };
            let scores_json: String = row.get("scores_json");
            accumulate(groups, key, &scores_json, opts.include_median)?;
        }

        last_id = rows
            .last()
            .map(|row| row.get::<String, _>("id"))
            .unwrap_or_default();
        if rows.len() < BATCH as usize {
            break;
        }
    }

    Ok(())
}

async fn scan_tokens(
    pool: &SqlitePool,
    period: PeriodRange,
    group_by: GroupBy,
    filter: &DocumentFilter,
    opts: &AggregateOptions,
    groups: &mut HashMap<String, GroupAcc>,
) -> Result<()> {
    let word_lower = filter.word.as_ref().map(|w| w.to_lowercase());
    let mut last_id: i64 = 0;

    loop {
        let rows = sqlx::query(
            r#"
            SELECT w.id, w.word_lower, d.created_at, d.topic, c.scores_json
            FROM word_tokens w
            JOIN documents d ON d.id = w.document_id
            JOIN classifications c ON c.id = w.classification_id
            WHERE d.created_at >= ? AND d.created_at < ?
              AND (? IS NULL OR w.word_lower = ?)
              AND (? IS NULL OR d.topic = ?)
              AND (? IS NULL OR d.source = ?)
              AND w.id > ?
            ORDER BY w.id
            LIMIT ?
            "#,
        )
        .bind(period.start_ts())
        .bind(period.end_ts_exclusive())
        .bind(&word_lower)
        .bind(&word_lower)
        .bind(&filter.topic)
        .bind(&filter.topic)
        .bind(&filter.source)
        .bind(&filter.source)
        .bind(last_id)
        .bind(BATCH)
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            break;
        }

        for row in &rows {
            let created_at: i64 = row.get("created_at");
            let topic: Option<String> = row.get("topic");
            let key = match group_by {
                GroupBy::None => "all".to_string(),
                GroupBy::Day => day_key(created_at),
                GroupBy::Topic => topic.unwrap_or_else(|| "(none)".to_string()),
                GroupBy::Word => row.get("word_lower"),
            };
            let scores_json: String = row.get("scores_json");
            accumulate(groups, key, &scores_json, opts.include_median)?;
        }

        last_id = rows.last().map(|row| row.get::<i64, _>("id")).unwrap_or(0);
        if rows.len() < BATCH as usize {
            break;
        }
    }

    Ok(())
}

fn accumulate(
    groups: &mut HashMap<String, GroupAcc>,
    key: String,
    scores_json: &str,
    keep_values: bool,
) -> Result<()> {
    let scores: DimensionVector =
        serde_json::from_str(scores_json).context("malformed scores_json in classifications row")?;

    let acc = groups.entry(key).or_default();
    acc.count += 1;
    for (dimension, score) in scores.iter() {
        acc.dims.entry(dimension.to_string()).or_default().push(score);
        if keep_values {
            acc.values
                .entry(dimension.to_string())
                .or_default()
                .push(score);
        }
    }
    Ok(())
}

fn day_key(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive().to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// One day of a per-dimension series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DayStat {
    pub date: NaiveDate,
    pub mean: f64,
    pub count: u64,
}

/// Per-day mean and document count for one dimension, ordered by date. Days
/// with no samples for the dimension are absent.
pub async fn daily_series(
    pool: &SqlitePool,
    dimension: &str,
    period: PeriodRange,
    filter: &DocumentFilter,
) -> Result<Vec<DayStat>> {
    let opts = AggregateOptions {
        min_samples: 1,
        include_median: false,
    };
    let groups = aggregate(pool, period, GroupBy::Day, filter, &opts).await?;

    let mut series = Vec::with_capacity(groups.len());
    for (key, agg) in groups {
        let Some(dim) = agg.dimensions.get(dimension) else {
            continue;
        };
        let date = NaiveDate::parse_from_str(&key, "%Y-%m-%d")
            .with_context(|| format!("unparseable day key '{}'", key))?;
        series.push(DayStat {
            date,
            mean: dim.mean,
            count: dim.count,
        });
    }
    // BTreeMap iteration over zero-padded dates is already chronological;
    // keep the explicit sort as the ordering contract.
    series.sort_by_key(|s| s.date);
    Ok(series)
}

/// Every per-document score for one dimension within `period`, in document-id
/// order (deterministic across identical reads).
pub async fn dimension_scores(
    pool: &SqlitePool,
    dimension: &str,
    period: PeriodRange,
    filter: &DocumentFilter,
) -> Result<Vec<f64>> {
    let mut scores = Vec::new();
    let mut last_id = String::new();

    loop {
        let rows = sqlx::query(
            r#"
            SELECT d.id, c.scores_json
            FROM documents d
            JOIN document_classifications dc ON dc.document_id = d.id
            JOIN classifications c ON c.id = dc.classification_id
            WHERE d.created_at >= ? AND d.created_at < ?
              AND (? IS NULL OR d.topic = ?)
              AND (? IS NULL OR d.source = ?)
              AND d.id > ?
            ORDER BY d.id
            LIMIT ?
            "#,
        )
        .bind(period.start_ts())
        .bind(period.end_ts_exclusive())
        .bind(&filter.topic)
        .bind(&filter.topic)
        .bind(&filter.source)
        .bind(&filter.source)
        .bind(&last_id)
        .bind(BATCH)
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            break;
        }

        for row in &rows {
            let scores_json: String = row.get("scores_json");
            let vector: DimensionVector = serde_json::from_str(&scores_json)
                .context("malformed scores_json in classifications row")?;
            if let Some(score) = vector.get(dimension) {
                scores.push(score);
            }
        }

        last_id = rows
            .last()
            .map(|row| row.get::<String, _>("id"))
            .unwrap_or_default();
        if rows.len() < BATCH as usize {
            break;
        }
    }

    Ok(scores)
}
