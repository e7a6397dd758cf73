//! Event detector: is a candidate window anomalous for a dimension?
//!
//! A window is compared three ways, and `anomalous` requires all three:
//! the Welch p-value must clear the significance level, the window mean must
//! exceed the baseline's 95th-percentile threshold, and the window mean must
//! exceed the mean of *every* control window. Any single trigger alone is a
//! generically busy period, not an event.

use anyhow::Result;
use rand::Rng;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::aggregate::{dimension_scores, DocumentFilter};
use crate::baseline::BaselineDistribution;
use crate::error::CoreError;
use crate::models::PeriodRange;
use crate::stats::{cohens_d, mean, welch_t_test};

#[derive(Debug, Clone)]
pub struct DetectionOptions {
    /// Two-sided significance level for the Welch test.
    pub significance_level: f64,
    /// Document floor below which results are flagged low-confidence.
    pub min_samples: u64,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            significance_level: 0.0001,
            min_samples: 200,
        }
    }
}

/// Verdict for one window against one baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventResult {
    pub dimension: String,
    pub window: PeriodRange,
    /// Reference period of the baseline the window was judged against.
    pub reference: PeriodRange,
    pub window_mean: f64,
    pub baseline_mean: f64,
    /// `(window_mean - baseline_mean) / baseline_mean`.
    pub pct_change: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    /// Cohen's d. A significant p with negligible effect size is reported
    /// as exactly that, never promoted to a detection.
    pub effect_size: f64,
    pub exceeds_p95: bool,
    pub exceeds_all_controls: bool,
    pub significant: bool,
    /// True only when significant AND exceeds_p95 AND exceeds_all_controls.
    pub anomalous: bool,
    /// Window or control sample counts fell below the floor; treat the
    /// anomaly flag as provisional.
    pub low_confidence: bool,
    pub window_docs: u64,
    pub control_means: Vec<f64>,
}

/// Sample `count` windows of `window_days` days from `space`, pairwise
/// non-overlapping and avoiding `exclude`. May return fewer than `count`
/// when the space is too tight to place them all.
pub fn sample_control_windows(
    rng: &mut impl Rng,
    space: PeriodRange,
    window_days: i64,
    count: usize,
    exclude: &PeriodRange,
) -> Vec<PeriodRange> {
    let span = space.days();
    if window_days <= 0 || span < window_days {
        return Vec::new();
    }

    let max_offset = span - window_days;
    let mut chosen: Vec<PeriodRange> = Vec::with_capacity(count);
    let mut attempts = 0usize;

    while chosen.len() < count && attempts < count * 50 {
        attempts += 1;
        let offset = rng.gen_range(0..=max_offset);
        let start = space.start + chrono::Days::new(offset as u64);
        let end = start + chrono::Days::new((window_days - 1) as u64);
        let candidate = PeriodRange { start, end };

        if candidate.overlaps(exclude) || chosen.iter().any(|c| c.overlaps(&candidate)) {
            continue;
        }
        chosen.push(candidate);
    }

    chosen.sort_by_key(|c| c.start);
    chosen
}

/// Evaluate `window` against `baseline` and `controls` for the baseline's
/// dimension.
///
/// Fails with [`CoreError::OverlappingReference`] when the window overlaps
/// the baseline's own reference period (circular validation). Returns
/// `Ok(None)` when the window holds no classified data.
pub async fn evaluate(
    pool: &SqlitePool,
    window: PeriodRange,
    baseline: &BaselineDistribution,
    controls: &[PeriodRange],
    filter: &DocumentFilter,
    opts: &DetectionOptions,
) -> Result<Option<EventResult>> {
    if baseline.overlaps(&window) {
        return Err(CoreError::OverlappingReference {
            window: window.to_string(),
            reference: baseline.period.to_string(),
        }
        .into());
    }

    let dimension = baseline.dimension.as_str();

    let window_scores = dimension_scores(pool, dimension, window, filter).await?;
    let Some(window_mean) = mean(&window_scores) else {
        return Ok(None);
    };
    let window_docs = window_scores.len() as u64;

    let baseline_scores = dimension_scores(pool, dimension, baseline.period, filter).await?;

    let pct_change = if baseline.mean != 0.0 {
        (window_mean - baseline.mean) / baseline.mean
    } else {
        0.0
    };

    let (t_statistic, p_value) = match welch_t_test(&window_scores, &baseline_scores) {
        Some(test) => (test.t, test.p_value),
        None => (0.0, 1.0),
    };
    let effect_size = cohens_d(&window_scores, &baseline_scores);

    let mut control_means = Vec::with_capacity(controls.len());
    let mut empty_controls = 0usize;
    let mut low_confidence = window_docs < opts.min_samples;
    for control in controls {
        let scores = dimension_scores(pool, dimension, *control, filter).await?;
        if (scores.len() as u64) < opts.min_samples {
            low_confidence = true;
        }
        match mean(&scores) {
            Some(control_mean) => control_means.push(control_mean),
            None => empty_controls += 1,
        }
    }

    // Every requested control must hold data and be exceeded. A data-free
    // control fails the criterion outright instead of silently thinning the
    // comparison to fewer controls than the caller asked for.
    let exceeds_all_controls = !controls.is_empty()
        && empty_controls == 0
        && control_means.iter().all(|&m| window_mean > m);
    let exceeds_p95 = window_mean > baseline.p95;
    let significant = p_value < opts.significance_level;
    let anomalous = significant && exceeds_p95 && exceeds_all_controls;

    Ok(Some(EventResult {
        dimension: dimension.to_string(),
        window,
        reference: baseline.period,
        window_mean,
        baseline_mean: baseline.mean,
        pct_change,
        t_statistic,
        p_value,
        effect_size,
        exceeds_p95,
        exceeds_all_controls,
        significant,
        anomalous,
        low_confidence,
        window_docs,
        control_means,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn control_windows_are_disjoint_and_avoid_exclusion() {
        let mut rng = StdRng::seed_from_u64(42);
        let space = PeriodRange::new(d("2024-01-01"), d("2024-06-30")).unwrap();
        let exclude = PeriodRange::new(d("2024-03-10"), d("2024-03-12")).unwrap();

        let controls = sample_control_windows(&mut rng, space, 3, 5, &exclude);
        assert_eq!(controls.len(), 5);
        for (i, c) in controls.iter().enumerate() {
            assert_eq!(c.days(), 3);
            assert!(c.start >= space.start && c.end <= space.end);
            assert!(!c.overlaps(&exclude));
            for other in &controls[i + 1..] {
                assert!(!c.overlaps(other));
            }
        }
    }

    #[test]
    fn control_sampling_is_seed_reproducible() {
        let space = PeriodRange::new(d("2024-01-01"), d("2024-12-31")).unwrap();
        let exclude = PeriodRange::new(d("2024-06-09"), d("2024-06-15")).unwrap();
        let a = sample_control_windows(&mut StdRng::seed_from_u64(7), space, 7, 5, &exclude);
        let b = sample_control_windows(&mut StdRng::seed_from_u64(7), space, 7, 5, &exclude);
        assert_eq!(a, b);
    }

    #[test]
    fn oversized_window_yields_no_controls() {
        let mut rng = StdRng::seed_from_u64(1);
        let space = PeriodRange::new(d("2024-01-01"), d("2024-01-05")).unwrap();
        let exclude = PeriodRange::new(d("2024-02-01"), d("2024-02-03")).unwrap();
        assert!(sample_control_windows(&mut rng, space, 10, 3, &exclude).is_empty());
    }
}
