//! Statistical primitives shared by aggregation, baselines, and detection.
//!
//! Everything here is pure and deterministic: streaming mean/variance
//! (Welford), percentile interpolation over order statistics, Welch's
//! unequal-variance t-test, and Cohen's d. The Student's t CDF comes from
//! `statrs`.

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Streaming mean/variance accumulator (Welford's algorithm).
///
/// Numerically stable at corpus scale, unlike naive sum-then-divide.
#[derive(Debug, Clone, Copy, Default)]
pub struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean, or `None` for an empty accumulator (absent, not zero).
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Unbiased sample variance (n - 1 denominator).
    pub fn sample_variance(&self) -> Option<f64> {
        (self.count > 1).then(|| self.m2 / (self.count - 1) as f64)
    }

    /// Population variance (n denominator).
    pub fn population_variance(&self) -> Option<f64> {
        (self.count > 0).then(|| self.m2 / self.count as f64)
    }
}

/// Mean of a slice, `None` when empty.
pub fn mean(values: &[f64]) -> Option<f64> {
    let mut acc = Welford::new();
    for &v in values {
        acc.push(v);
    }
    acc.mean()
}

/// Percentile of an ascending-sorted slice, by linear interpolation between
/// order statistics at rank `p/100 * (n-1)`.
///
/// This is the interpolation rule the reference distributions were defined
/// with; changing it silently changes every threshold.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Result of a two-sided Welch test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    pub t: f64,
    pub df: f64,
    pub p_value: f64,
}

/// Welch's t-test (unequal variances), two-sided.
///
/// Returns `None` when either sample has fewer than two observations.
/// Degenerate zero-variance samples yield p = 1 for equal means and p = 0
/// otherwise.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Option<WelchTest> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }

    let mut wa = Welford::new();
    let mut wb = Welford::new();
    for &v in a {
        wa.push(v);
    }
    for &v in b {
        wb.push(v);
    }

    let (ma, mb) = (wa.mean()?, wb.mean()?);
    let (va, vb) = (wa.sample_variance()?, wb.sample_variance()?);
    let (na, nb) = (a.len() as f64, b.len() as f64);

    let sa = va / na;
    let sb = vb / nb;
    let se2 = sa + sb;

    if se2 <= 0.0 {
        let equal = ma == mb;
        return Some(WelchTest {
            t: if equal { 0.0 } else { f64::INFINITY * (ma - mb).signum() },
            df: na + nb - 2.0,
            p_value: if equal { 1.0 } else { 0.0 },
        });
    }

    let t = (ma - mb) / se2.sqrt();
    // Welch–Satterthwaite degrees of freedom
    let df = se2 * se2 / (sa * sa / (na - 1.0) + sb * sb / (nb - 1.0));

    let p_value = match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => 2.0 * (1.0 - dist.cdf(t.abs())),
        Err(_) => 1.0,
    };

    Some(WelchTest {
        t,
        df,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

/// Cohen's d with pooled standard deviation `sqrt((s_a² + s_b²) / 2)` over
/// population variances, the convention the reference analyses used.
///
/// Returns 0 when both samples are constant.
pub fn cohens_d(a: &[f64], b: &[f64]) -> f64 {
    let mut wa = Welford::new();
    let mut wb = Welford::new();
    for &v in a {
        wa.push(v);
    }
    for &v in b {
        wb.push(v);
    }

    let (Some(ma), Some(mb)) = (wa.mean(), wb.mean()) else {
        return 0.0;
    };
    let va = wa.population_variance().unwrap_or(0.0);
    let vb = wb.population_variance().unwrap_or(0.0);
    let pooled = ((va + vb) / 2.0).sqrt();

    if pooled <= 0.0 {
        return 0.0;
    }
    (ma - mb) / pooled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welford_matches_naive_on_small_sample() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut acc = Welford::new();
        for v in values {
            acc.push(v);
        }
        assert_eq!(acc.count(), 8);
        assert!((acc.mean().unwrap() - 5.0).abs() < 1e-12);
        assert!((acc.population_variance().unwrap() - 4.0).abs() < 1e-12);
        assert!((acc.sample_variance().unwrap() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn welford_empty_is_absent_not_zero() {
        let acc = Welford::new();
        assert_eq!(acc.mean(), None);
        assert_eq!(acc.sample_variance(), None);
    }

    #[test]
    fn percentile_endpoints_and_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), Some(1.0));
        assert_eq!(percentile(&sorted, 100.0), Some(4.0));
        assert_eq!(percentile(&sorted, 50.0), Some(2.5));
        // rank 0.75 * 3 = 2.25 -> 3 + 0.25 * (4 - 3)
        assert_eq!(percentile(&sorted, 75.0), Some(3.25));
        assert_eq!(percentile(&[], 50.0), None);
        assert_eq!(percentile(&[7.0], 99.0), Some(7.0));
    }

    #[test]
    fn percentiles_are_monotonic() {
        let mut sorted: Vec<f64> = (0..100).map(|i| (i as f64 * 17.0) % 31.0).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let ps: Vec<f64> = [50.0, 75.0, 90.0, 95.0, 99.0]
            .iter()
            .map(|&p| percentile(&sorted, p).unwrap())
            .collect();
        assert!(ps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn welch_separated_samples_are_significant() {
        let a: Vec<f64> = (0..30).map(|i| 0.24 + 0.01 * ((i % 5) as f64 - 2.0)).collect();
        let b: Vec<f64> = (0..270).map(|i| 0.17 + 0.01 * ((i % 5) as f64 - 2.0)).collect();
        let test = welch_t_test(&a, &b).unwrap();
        assert!(test.t > 5.0, "t = {}", test.t);
        assert!(test.p_value < 1e-4, "p = {}", test.p_value);
    }

    #[test]
    fn welch_identical_samples_are_not_significant() {
        let a: Vec<f64> = (0..50).map(|i| 0.1 + 0.02 * ((i % 7) as f64)).collect();
        let test = welch_t_test(&a, &a).unwrap();
        assert!(test.t.abs() < 1e-12);
        assert!(test.p_value > 0.99);
    }

    #[test]
    fn welch_is_antisymmetric() {
        let a = [0.5, 0.6, 0.7, 0.65, 0.55];
        let b = [0.1, 0.2, 0.15, 0.22, 0.18];
        let ab = welch_t_test(&a, &b).unwrap();
        let ba = welch_t_test(&b, &a).unwrap();
        assert!((ab.t + ba.t).abs() < 1e-12);
        assert!((ab.p_value - ba.p_value).abs() < 1e-12);
    }

    #[test]
    fn welch_undersized_sample_is_none() {
        assert!(welch_t_test(&[1.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn cohens_d_known_value() {
        // means 1.0 apart, both population SDs = 1.0 -> d = 1.0
        let a = [0.0, 2.0, 0.0, 2.0];
        let b = [1.0, 3.0, 1.0, 3.0];
        let d = cohens_d(&b, &a);
        assert!((d - 1.0).abs() < 1e-12, "d = {}", d);
    }

    #[test]
    fn cohens_d_constant_samples_is_zero() {
        assert_eq!(cohens_d(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }
}
