//! Baseline engine: long-run reference distributions per dimension.
//!
//! A baseline is the percentile ladder (p50/p75/p90/p95/p99) of a
//! dimension's per-day mean series over a reference period, tagged with that
//! exact period and day count. Thresholds are meaningless detached from
//! their reference period, so the period travels with them and detection
//! refuses windows that overlap it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::aggregate::{daily_series, DocumentFilter};
use crate::models::PeriodRange;
use crate::stats::{percentile, Welford};

/// Percentile thresholds for one dimension over one reference period.
///
/// Fully derived state: rebuilding from the durable tables with no writes in
/// between reproduces it bit-identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineDistribution {
    pub dimension: String,
    /// The reference period the thresholds were computed from.
    pub period: PeriodRange,
    /// Number of days with data inside the reference period.
    pub n_periods: u64,
    /// Period-average: mean of the per-day means.
    pub mean: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl BaselineDistribution {
    pub fn overlaps(&self, window: &PeriodRange) -> bool {
        self.period.overlaps(window)
    }

    /// The ladder in ascending percentile order.
    pub fn thresholds(&self) -> [(u8, f64); 5] {
        [
            (50, self.p50),
            (75, self.p75),
            (90, self.p90),
            (95, self.p95),
            (99, self.p99),
        ]
    }
}

/// Build the reference distribution for `dimension` over `reference`.
///
/// Percentiles use linear interpolation between order statistics (see
/// [`percentile`]). Returns `Ok(None)` when the period holds no classified
/// data for the dimension; absence of data is a normal condition, not an
/// error.
pub async fn build_baseline(
    pool: &SqlitePool,
    dimension: &str,
    reference: PeriodRange,
    filter: &DocumentFilter,
) -> Result<Option<BaselineDistribution>> {
    let series = daily_series(pool, dimension, reference, filter).await?;
    if series.is_empty() {
        return Ok(None);
    }

    let mut acc = Welford::new();
    let mut daily_means: Vec<f64> = Vec::with_capacity(series.len());
    for day in &series {
        acc.push(day.mean);
        daily_means.push(day.mean);
    }
    daily_means.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let Some(mean) = acc.mean() else {
        return Ok(None);
    };
    let threshold = |p: f64| percentile(&daily_means, p).unwrap_or(mean);

    Ok(Some(BaselineDistribution {
        dimension: dimension.to_string(),
        period: reference,
        n_periods: series.len() as u64,
        mean,
        p50: threshold(50.0),
        p75: threshold(75.0),
        p90: threshold(90.0),
        p95: threshold(95.0),
        p99: threshold(99.0),
    }))
}
