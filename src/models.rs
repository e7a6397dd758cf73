//! Core data models.
//!
//! Durable rows (documents, classification records, word tokens) mirror the
//! SQLite schema; `DimensionVector` and `PeriodRange` are the two value types
//! the rest of the crate speaks in.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw document produced by an external collector, before storage.
#[derive(Debug, Clone)]
pub struct DocumentItem {
    pub source: String,
    pub source_id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub topic: Option<String>,
    pub created_at: DateTime<Utc>,
    pub body: Option<String>,
}

/// Document row as stored in SQLite.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub source_id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub topic: Option<String>,
    pub created_at: i64,
    pub collected_at: i64,
    pub body: Option<String>,
}

/// An ordered dimension-name → score mapping. Absent dimensions are the NULL
/// pattern: two vectors are equal only if they agree on scores *and* on which
/// dimensions are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionVector(BTreeMap<String, f64>);

impl DimensionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, dimension: impl Into<String>, score: f64) -> &mut Self {
        self.0.insert(dimension.into(), score);
        self
    }

    pub fn get(&self, dimension: &str) -> Option<f64> {
        self.0.get(dimension).copied()
    }

    /// Dimension names present in this vector, in sorted order.
    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A copy with every score rounded to `decimals` places. Negative zero
    /// normalizes to positive zero so equal rounded vectors share one
    /// canonical encoding.
    pub fn rounded(&self, decimals: u32) -> Self {
        let factor = 10f64.powi(decimals as i32);
        Self(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), (v * factor).round() / factor + 0.0))
                .collect(),
        )
    }
}

impl FromIterator<(String, f64)> for DimensionVector {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Deduplicated classification record.
#[derive(Debug, Clone)]
pub struct ClassificationRecord {
    pub id: String,
    pub vector_hash: String,
    pub scores: DimensionVector,
    pub created_at: i64,
}

/// One word occurrence inside a document, carrying the inherited
/// classification id.
#[derive(Debug, Clone)]
pub struct WordToken {
    pub document_id: String,
    pub position: i64,
    pub word_text: String,
    pub word_lower: String,
    pub is_temporal: bool,
    pub classification_id: String,
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> anyhow::Result<Self> {
        if end < start {
            anyhow::bail!("period end {} is before start {}", end, start);
        }
        Ok(Self { start, end })
    }

    /// Number of days in the range (inclusive).
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn overlaps(&self, other: &PeriodRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Unix timestamp of the first instant in the range.
    pub fn start_ts(&self) -> i64 {
        self.start.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp()
    }

    /// Unix timestamp of the first instant *after* the range (exclusive bound).
    pub fn end_ts_exclusive(&self) -> i64 {
        (self.end + chrono::Days::new(1))
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp()
    }
}

impl fmt::Display for PeriodRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn period_days_are_inclusive() {
        let p = PeriodRange::new(d("2024-06-09"), d("2024-06-11")).unwrap();
        assert_eq!(p.days(), 3);
        assert!(p.contains(d("2024-06-09")));
        assert!(p.contains(d("2024-06-11")));
        assert!(!p.contains(d("2024-06-12")));
    }

    #[test]
    fn period_overlap_is_symmetric() {
        let a = PeriodRange::new(d("2024-01-01"), d("2024-01-10")).unwrap();
        let b = PeriodRange::new(d("2024-01-10"), d("2024-01-20")).unwrap();
        let c = PeriodRange::new(d("2024-01-11"), d("2024-01-20")).unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn reversed_period_is_rejected() {
        assert!(PeriodRange::new(d("2024-02-01"), d("2024-01-01")).is_err());
    }

    #[test]
    fn vector_rounding() {
        let mut v = DimensionVector::new();
        v.set("certainty", 0.123456);
        assert_eq!(v.rounded(3).get("certainty"), Some(0.123));
    }

    #[test]
    fn rounding_normalizes_negative_zero() {
        let mut v = DimensionVector::new();
        v.set("certainty", -0.0004);
        let rounded = v.rounded(3).get("certainty").unwrap();
        assert_eq!(rounded.to_bits(), 0.0f64.to_bits());
    }

    #[test]
    fn vector_json_is_key_sorted() {
        let mut v = DimensionVector::new();
        v.set("zeta", 1.0).set("alpha", 2.0);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"alpha":2.0,"zeta":1.0}"#);
    }
}
