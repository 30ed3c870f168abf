//! Rank, quantile, and visualization-histogram queries

use crate::common::validation::validate_probability;
use crate::common::{Result, SketchError};
use crate::histogram::sketch::ApproximateHistogram;

/// A bucketed view of a sketch for visualization.
///
/// Holds `n + 1` ascending break points and `n` estimated per-bucket
/// counts, where bucket `k` covers `[breaks[k], breaks[k + 1])`.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    breaks: Vec<f32>,
    counts: Vec<f64>,
}

impl Histogram {
    fn new(breaks: Vec<f32>, counts: Vec<f64>) -> Self {
        Histogram { breaks, counts }
    }

    fn empty() -> Self {
        Histogram {
            breaks: Vec::new(),
            counts: Vec::new(),
        }
    }

    /// The bucket boundaries, ascending.
    pub fn breaks(&self) -> &[f32] {
        &self.breaks
    }

    /// Estimated observation count per bucket.
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.counts.len()
    }

    /// Whether the view has no buckets.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Estimated mass below which `histogram_aligned` drops a bucket.
const ALIGNED_MASS_CUTOFF: f64 = 0.1;

impl ApproximateHistogram {
    /// Estimated number of observations with value `<= b`.
    ///
    /// Interpolates with the trapezoid rule between the two bins bracketing
    /// `b`, using `min` and `max` as zero-count virtual boundaries. Exact
    /// bins are point masses: they contribute their full count once passed
    /// and take no part in the interpolation, while approximate bins spread
    /// half their count to each side of their centroid.
    ///
    /// Returns 0 below `min` (and for NaN queries) and `total_count` at or
    /// above `max`; an empty sketch reports 0 everywhere.
    ///
    /// # Examples
    ///
    /// ```
    /// use approx_histogram::ApproximateHistogram;
    ///
    /// let mut hist = ApproximateHistogram::new(5).unwrap();
    /// hist.offer_many(&[1.0, 2.0, 3.0, 2.0, 1.0]).unwrap();
    /// assert_eq!(hist.sum(2.0), 4.0);
    /// assert_eq!(hist.sum(0.5), 0.0);
    /// assert_eq!(hist.sum(3.0), 5.0);
    /// ```
    pub fn sum(&self, b: f32) -> f64 {
        if !(b >= self.min) {
            return 0.0;
        }
        if b >= self.max {
            return self.total_count as f64;
        }

        // index of the bin at or below b; -1 when b sits below the first bin
        let idx: isize = match self.search(b) {
            Ok(j) => j as isize,
            Err(ins) => ins as isize - 1,
        };

        let (p0, m0, exact0) = if idx >= 0 {
            let w = self.bins[idx as usize];
            (
                self.positions[idx as usize] as f64,
                w.count() as f64,
                !w.is_approx(),
            )
        } else {
            (self.min as f64, 0.0, true)
        };
        let (p1, m1, exact1) = if ((idx + 1) as usize) < self.bin_count {
            let w = self.bins[(idx + 1) as usize];
            (
                self.positions[(idx + 1) as usize] as f64,
                w.count() as f64,
                !w.is_approx(),
            )
        } else {
            (self.max as f64, 0.0, true)
        };

        // exact bins are point masses, not interpolation triangles
        let tm0 = if exact0 { 0.0 } else { m0 };
        let tm1 = if exact1 { 0.0 } else { m1 };
        let l = if p1 > p0 { (b as f64 - p0) / (p1 - p0) } else { 0.0 };

        let mut s = 0.5 * (tm0 + tm0 + (tm1 - tm0) * l) * l;
        s += self.bins[..idx.max(0) as usize]
            .iter()
            .map(|w| w.count() as f64)
            .sum::<f64>();
        s += if exact0 { m0 } else { 0.5 * m0 };
        s
    }

    /// Estimated value at the given quantile probability.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProbability` unless `0 < p < 1`.
    pub fn quantile(&self, p: f32) -> Result<f32> {
        let q = self.quantiles(&[p])?;
        Ok(q[0])
    }

    /// Estimated values at each of the given quantile probabilities.
    ///
    /// The estimate inverts the cumulative count: bin counts accumulate
    /// until the target rank falls inside a bin pair, then the position is
    /// recovered from the linear-density interpolation between the two
    /// centroids. An empty sketch yields NaN for every probability.
    ///
    /// # Errors
    ///
    /// Returns `InvalidProbability` if any probability is outside the open
    /// interval (0, 1); no estimates are produced in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use approx_histogram::ApproximateHistogram;
    ///
    /// let mut hist = ApproximateHistogram::new(50).unwrap();
    /// for i in 0..=100 {
    ///     hist.offer(i as f32 / 100.0).unwrap();
    /// }
    ///
    /// let q = hist.quantiles(&[0.25, 0.5, 0.75]).unwrap();
    /// assert!((q[1] - 0.5).abs() < 0.02);
    /// assert!(q[0] <= q[1] && q[1] <= q[2]);
    /// ```
    pub fn quantiles(&self, probs: &[f32]) -> Result<Vec<f32>> {
        for &p in probs {
            validate_probability(p)?;
        }
        if self.total_count == 0 {
            return Ok(vec![f32::NAN; probs.len()]);
        }

        let mut out = Vec::with_capacity(probs.len());
        for &p in probs {
            let s = p as f64 * self.total_count as f64;

            let mut i = 0;
            let mut sum = 0u64;
            while i < self.bin_count {
                let k = self.bins[i].count();
                if sum as f64 + k as f64 > s {
                    break;
                }
                sum += k;
                i += 1;
            }

            if i == 0 {
                out.push(self.min);
            } else if i == self.bin_count {
                // p * total rounded up to the full count in f64
                out.push(self.max);
            } else {
                // linear-density interpolation between bins i-1 and i
                let d = s - sum as f64;
                let c = -2.0 * d;
                let a = self.bins[i].count() as f64 - self.bins[i - 1].count() as f64;
                let b = 2.0 * self.bins[i - 1].count() as f64;
                let z = if a == 0.0 {
                    -c / b
                } else {
                    let disc = (b * b - 4.0 * a * c).max(0.0);
                    (-b + disc.sqrt()) / (2.0 * a)
                };
                let p0 = self.positions[i - 1] as f64;
                let p1 = self.positions[i] as f64;
                out.push((p0 + (p1 - p0) * z) as f32);
            }
        }
        Ok(out)
    }

    /// Estimated counts between consecutive user-provided break points.
    ///
    /// Bucket `k` holds `sum(breaks[k + 1]) - sum(breaks[k])`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` unless at least two strictly ascending
    /// breaks are given.
    pub fn histogram(&self, breaks: &[f32]) -> Result<Histogram> {
        if breaks.len() < 2 {
            return Err(SketchError::InvalidCapacity {
                param: "breaks".to_string(),
                value: breaks.len().to_string(),
                constraint: "must contain at least two break points".to_string(),
            });
        }
        for pair in breaks.windows(2) {
            if !(pair[0] < pair[1]) {
                return Err(SketchError::InvalidCapacity {
                    param: "breaks".to_string(),
                    value: format!("{:?}", pair),
                    constraint: "break points must be strictly ascending".to_string(),
                });
            }
        }

        let mut counts = Vec::with_capacity(breaks.len() - 1);
        let mut prev = self.sum(breaks[0]);
        for &b in &breaks[1..] {
            let s = self.sum(b);
            counts.push(s - prev);
            prev = s;
        }
        Ok(Histogram::new(breaks.to_vec(), counts))
    }

    /// A view with `n` equal-width buckets spanning the observed range.
    ///
    /// Breaks step by `(max - min) / (n - 1)` starting one step below
    /// `min`, with the last break pinned to `max`, so the extremes land
    /// strictly inside the bucketed span. An empty sketch yields an empty
    /// view, as does a sketch whose observations are all identical (no
    /// width to divide).
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` if `n < 2`.
    pub fn histogram_equal(&self, n: usize) -> Result<Histogram> {
        if n < 2 {
            return Err(SketchError::InvalidCapacity {
                param: "n".to_string(),
                value: n.to_string(),
                constraint: "must be at least 2".to_string(),
            });
        }
        if self.bin_count == 0 || self.max == self.min {
            return Ok(Histogram::empty());
        }

        let delta = (self.max - self.min) / (n as f32 - 1.0);
        let mut breaks = vec![0.0f32; n + 1];
        breaks[0] = self.min - delta;
        for i in 1..n {
            breaks[i] = breaks[i - 1] + delta;
        }
        breaks[n] = self.max;
        self.histogram(&breaks)
    }

    /// A view with buckets of width `bucket_size` aligned to `offset`.
    ///
    /// The first and last breaks come from flooring `min` and ceiling `max`
    /// onto the bucket grid, clamped to the (grid-aligned) limits. A
    /// leading bucket absorbs mass sitting exactly on the first break, and
    /// interior buckets are kept only when they hold more than 0.1
    /// estimated observations, so long empty stretches collapse into a
    /// single wide bucket. The sweep's upper-bound comparison allows
    /// `bucket_size / 10` of slack to absorb f32 accumulation error. An
    /// empty sketch yields an empty view.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` unless `bucket_size` is positive and
    /// finite and `offset` is finite.
    pub fn histogram_aligned(&self, bucket_size: f32, offset: f32) -> Result<Histogram> {
        if !(bucket_size > 0.0 && bucket_size.is_finite()) {
            return Err(SketchError::InvalidCapacity {
                param: "bucket_size".to_string(),
                value: bucket_size.to_string(),
                constraint: "must be positive and finite".to_string(),
            });
        }
        if !offset.is_finite() {
            return Err(SketchError::InvalidCapacity {
                param: "offset".to_string(),
                value: offset.to_string(),
                constraint: "must be finite".to_string(),
            });
        }
        if self.bin_count == 0 {
            return Ok(Histogram::empty());
        }

        let min_floor = ((self.min - offset) / bucket_size).floor() * bucket_size + offset;
        let lower_floor =
            ((self.lower_limit - offset) / bucket_size).floor() * bucket_size + offset;
        let first_break = min_floor.max(lower_floor);

        let max_ceil = ((self.max - offset) / bucket_size).ceil() * bucket_size + offset;
        let upper_ceil =
            ((self.upper_limit - offset) / bucket_size).ceil() * bucket_size + offset;
        let last_break = max_ceil.min(upper_ceil);

        let mut breaks: Vec<f32> = Vec::new();

        // a sample sitting exactly on the first break belongs to the bucket
        // below it
        let bottom = min_floor - bucket_size;
        if bottom != first_break && self.sum(first_break) - self.sum(bottom) > ALIGNED_MASS_CUTOFF
        {
            breaks.push(bottom);
        }

        // f32 accumulation overshoots; allow bucket_size / 10 of slack
        let tolerance = bucket_size / 10.0;
        let mut left = first_break;
        while left + bucket_size <= last_break + tolerance {
            let right = left + bucket_size;
            if right == left {
                // bucket width vanished in f32; cannot advance further
                break;
            }
            if self.sum(right) - self.sum(left) > ALIGNED_MASS_CUTOFF {
                if breaks.last() != Some(&left) {
                    breaks.push(left);
                }
                breaks.push(right);
            }
            left = right;
        }

        if let Some(&last) = breaks.last() {
            if last != max_ceil && self.sum(max_ceil) - self.sum(last) > ALIGNED_MASS_CUTOFF {
                breaks.push(max_ceil);
            }
        }

        if breaks.len() < 2 {
            return Ok(Histogram::empty());
        }
        self.histogram(&breaks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact_123_sketch() -> ApproximateHistogram {
        let mut h = ApproximateHistogram::new(5).unwrap();
        h.offer_many(&[1.0, 2.0, 3.0, 2.0, 1.0]).unwrap();
        h
    }

    #[test]
    fn test_sum_exact_bins_are_point_masses() {
        let h = exact_123_sketch();

        assert_eq!(h.sum(0.5), 0.0);
        assert_eq!(h.sum(1.0), 2.0);
        assert_eq!(h.sum(2.0), 4.0);
        // the bin at 3 is exact, so nothing accrues between 2 and 3
        assert_eq!(h.sum(2.5), 4.0);
        assert_eq!(h.sum(3.0), 5.0);
        assert_eq!(h.sum(100.0), 5.0);
    }

    #[test]
    fn test_sum_approx_bin_interpolates() {
        let mut h = ApproximateHistogram::new(2).unwrap();
        h.offer_many(&[0.0, 10.0, 1.0]).unwrap();
        // bins: approximate (0.5, count 2), exact (10, count 1)
        assert_eq!(h.counts(), vec![2, 1]);
        assert!(h.bins[0].is_approx());

        // half the approximate bin's mass sits at or below its centroid
        assert!((h.sum(0.5) - 1.0).abs() < 1e-9);
        // halfway across the gap: 1 + trapezoid from the fading density
        assert!((h.sum(5.25) - 1.75).abs() < 1e-6);
        assert_eq!(h.sum(10.0), 3.0);
    }

    #[test]
    fn test_sum_handles_nan_query() {
        let h = exact_123_sketch();
        assert_eq!(h.sum(f32::NAN), 0.0);
    }

    #[test]
    fn test_sum_empty_sketch_is_zero() {
        let h = ApproximateHistogram::new(5).unwrap();
        assert_eq!(h.sum(-1.0), 0.0);
        assert_eq!(h.sum(0.0), 0.0);
        assert_eq!(h.sum(1e30), 0.0);
    }

    #[test]
    fn test_quantiles_validate_probabilities() {
        let h = exact_123_sketch();
        assert!(h.quantiles(&[0.0]).is_err());
        assert!(h.quantiles(&[1.0]).is_err());
        assert!(h.quantiles(&[-0.5]).is_err());
        assert!(h.quantiles(&[f32::NAN]).is_err());
        assert!(h.quantiles(&[0.5, 1.5]).is_err());
    }

    #[test]
    fn test_quantiles_empty_sketch_is_nan() {
        let h = ApproximateHistogram::new(5).unwrap();
        let q = h.quantiles(&[0.25, 0.75]).unwrap();
        assert!(q[0].is_nan());
        assert!(q[1].is_nan());
    }

    #[test]
    fn test_quantiles_are_ordered_and_bounded() {
        let mut h = ApproximateHistogram::new(20).unwrap();
        for i in 0..500 {
            h.offer(i as f32).unwrap();
        }

        let q = h.quantiles(&[0.1, 0.25, 0.5, 0.75, 0.9]).unwrap();
        for w in q.windows(2) {
            assert!(w[0] <= w[1], "quantiles out of order: {:?}", q);
        }
        for &v in &q {
            assert!(v >= h.min() && v <= h.max());
        }
        assert!((q[2] - 250.0).abs() < 25.0);
    }

    #[test]
    fn test_quantile_tiny_probability_hits_min() {
        let h = exact_123_sketch();
        // rank target below the first bin's count resolves to the minimum
        assert_eq!(h.quantile(0.1).unwrap(), 1.0);
    }

    #[test]
    fn test_histogram_breaks_validation() {
        let h = exact_123_sketch();
        assert!(h.histogram(&[1.0]).is_err());
        assert!(h.histogram(&[1.0, 1.0]).is_err());
        assert!(h.histogram(&[2.0, 1.0]).is_err());
    }

    #[test]
    fn test_histogram_counts_are_sum_differences() {
        let h = exact_123_sketch();
        let view = h.histogram(&[0.0, 1.5, 2.5, 3.5]).unwrap();

        assert_eq!(view.breaks(), &[0.0, 1.5, 2.5, 3.5]);
        assert_eq!(view.bucket_count(), 3);
        assert_eq!(view.counts()[0], 2.0);
        assert_eq!(view.counts()[1], 2.0);
        assert_eq!(view.counts()[2], 1.0);
    }

    #[test]
    fn test_histogram_equal_spans_range() {
        let mut h = ApproximateHistogram::new(10).unwrap();
        h.offer_many(&[1.0, 2.0, 3.0, 4.0]).unwrap();

        let view = h.histogram_equal(3).unwrap();
        assert_eq!(view.breaks().len(), 4);
        assert_eq!(view.breaks()[0], -0.5);
        assert_eq!(*view.breaks().last().unwrap(), 4.0);
        assert_eq!(view.counts(), &[1.0, 1.0, 2.0]);

        assert!(h.histogram_equal(1).is_err());
    }

    #[test]
    fn test_histogram_equal_empty_sketch() {
        let h = ApproximateHistogram::new(5).unwrap();
        assert!(h.histogram_equal(4).unwrap().is_empty());
    }

    #[test]
    fn test_histogram_aligned_snaps_to_grid() {
        let mut h = ApproximateHistogram::new(10).unwrap();
        h.offer_many(&[1.5, 2.5, 3.5, 7.5]).unwrap();

        let view = h.histogram_aligned(2.0, 0.0).unwrap();
        let breaks = view.breaks();
        assert!(breaks.len() >= 2);
        // grid-aligned and ascending
        for pair in breaks.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for &b in breaks {
            assert_eq!(b % 2.0, 0.0, "break {} off the grid", b);
        }
        // every observation is accounted for
        let total: f64 = view.counts().iter().sum();
        assert!((total - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_histogram_aligned_drops_empty_middle() {
        let mut h = ApproximateHistogram::new(10).unwrap();
        h.offer_many(&[1.0, 101.0]).unwrap();

        let view = h.histogram_aligned(1.0, 0.0).unwrap();
        // two occupied buckets, with the empty middle collapsed
        assert!(view.breaks().len() < 10);
        let total: f64 = view.counts().iter().sum();
        assert!((total - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_histogram_aligned_validation() {
        let h = exact_123_sketch();
        assert!(h.histogram_aligned(0.0, 0.0).is_err());
        assert!(h.histogram_aligned(-1.0, 0.0).is_err());
        assert!(h.histogram_aligned(f32::NAN, 0.0).is_err());
        assert!(h.histogram_aligned(1.0, f32::INFINITY).is_err());
    }
}
