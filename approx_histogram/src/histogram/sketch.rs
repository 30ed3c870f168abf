//! Sketch storage, constructors, and the streaming insertion engine

use std::cmp::Ordering;

use crate::common::validation::{
    validate_capacity, validate_limits, validate_sample,
};
use crate::common::{Mergeable, Result, Sketch, SketchError};
use crate::histogram::bin::{BinWord, COUNT_MASK};

/// Streaming approximate histogram sketch
///
/// Ingests f32 samples one at a time, keeping at most `size` bins. Bins hold
/// a centroid position and a packed count word ([`BinWord`]); the used bins
/// always occupy the prefix of the storage arrays in strictly ascending
/// position order.
///
/// A sketch is single-threaded: `&mut self` receivers make concurrent
/// mutation unrepresentable. Compute one sketch per thread and combine them
/// with [`fold`](Self::fold) or [`fold_fast`](Self::fold_fast).
///
/// # Examples
///
/// ```
/// use approx_histogram::ApproximateHistogram;
///
/// let mut hist = ApproximateHistogram::new(5).unwrap();
/// hist.offer_many(&[1.0, 2.0, 3.0, 2.0, 1.0]).unwrap();
///
/// assert_eq!(hist.bin_count(), 3);
/// assert_eq!(hist.counts(), vec![2, 2, 1]);
/// assert_eq!(hist.total_count(), 5);
/// assert_eq!(hist.sum(2.0), 4.0);
/// ```
#[derive(Clone, Debug)]
pub struct ApproximateHistogram {
    /// Maximum number of bins retained.
    pub(crate) size: usize,
    /// Bin centroids; the used prefix is strictly ascending.
    pub(crate) positions: Vec<f32>,
    /// Packed count words, parallel to `positions`.
    pub(crate) bins: Vec<BinWord>,
    /// Number of used slots.
    pub(crate) bin_count: usize,
    /// Smallest sample ever observed; `+inf` when empty.
    pub(crate) min: f32,
    /// Largest sample ever observed; `-inf` when empty.
    pub(crate) max: f32,
    /// Sum of counts over the used bins.
    pub(crate) total_count: u64,
    /// Lower clamp boundary for rule-merge; `-inf` when unbounded.
    pub(crate) lower_limit: f32,
    /// Upper clamp boundary for rule-merge; `+inf` when unbounded.
    pub(crate) upper_limit: f32,
}

impl ApproximateHistogram {
    /// Default bin capacity, a reasonable accuracy/memory balance for
    /// typical metric streams.
    pub const DEFAULT_SIZE: usize = 50;

    /// Creates an empty sketch with the given bin capacity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` if `size < 2` or the capacity is large
    /// enough to breach the serialized-size cap.
    ///
    /// # Examples
    ///
    /// ```
    /// use approx_histogram::ApproximateHistogram;
    ///
    /// let hist = ApproximateHistogram::new(100).unwrap();
    /// assert!(hist.is_empty());
    /// assert_eq!(hist.capacity(), 100);
    /// ```
    pub fn new(size: usize) -> Result<Self> {
        validate_capacity(size)?;
        Ok(Self::empty(size, f32::NEG_INFINITY, f32::INFINITY))
    }

    /// Creates an empty sketch with clamp limits for the rule-merge path.
    ///
    /// Samples are always recorded at their true positions; the limits only
    /// steer [`fold_fast`](Self::fold_fast), which collapses bins outside
    /// `[lower, upper]` into single boundary buckets. Pass `-inf` / `+inf`
    /// to leave a side unbounded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` if the capacity is out of range, either
    /// limit is NaN, or `lower > upper`.
    pub fn with_limits(size: usize, lower: f32, upper: f32) -> Result<Self> {
        validate_capacity(size)?;
        validate_limits(lower, upper)?;
        Ok(Self::empty(size, lower, upper))
    }

    fn empty(size: usize, lower: f32, upper: f32) -> Self {
        ApproximateHistogram {
            size,
            positions: vec![0.0; size],
            bins: vec![BinWord::default(); size],
            bin_count: 0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
            total_count: 0,
            lower_limit: lower,
            upper_limit: upper,
        }
    }

    /// Number of used bins.
    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Maximum number of bins this sketch retains.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Total number of observations the sketch represents.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Whether the sketch has seen no samples.
    pub fn is_empty(&self) -> bool {
        self.bin_count == 0
    }

    /// Smallest sample ever observed, `+inf` when empty.
    pub fn min(&self) -> f32 {
        self.min
    }

    /// Largest sample ever observed, `-inf` when empty.
    pub fn max(&self) -> f32 {
        self.max
    }

    /// Centroid positions of the used bins, ascending.
    pub fn positions(&self) -> &[f32] {
        &self.positions[..self.bin_count]
    }

    /// Observation counts of the used bins, flags stripped.
    pub fn counts(&self) -> Vec<u64> {
        self.bins[..self.bin_count]
            .iter()
            .copied()
            .map(BinWord::count)
            .collect()
    }

    /// Number of observations sitting in exact (never-merged) bins.
    pub fn exact_count(&self) -> u64 {
        self.bins[..self.bin_count]
            .iter()
            .filter(|w| !w.is_approx())
            .map(|w| w.count())
            .sum()
    }

    /// Lower clamp boundary, `-inf` when unbounded.
    pub fn lower_limit(&self) -> f32 {
        self.lower_limit
    }

    /// Upper clamp boundary, `+inf` when unbounded.
    pub fn upper_limit(&self) -> f32 {
        self.upper_limit
    }

    /// Reconfigures the clamp limits.
    ///
    /// Limits are transient: they are not serialized, so callers that rely
    /// on [`fold_fast`](Self::fold_fast) clamping must restore them after
    /// [`from_bytes`](Self::from_bytes).
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` if either limit is NaN or `lower > upper`.
    pub fn set_limits(&mut self, lower: f32, upper: f32) -> Result<()> {
        validate_limits(lower, upper)?;
        self.lower_limit = lower;
        self.upper_limit = upper;
        Ok(())
    }

    /// Inserts a single sample.
    ///
    /// Updates the observed extremes, then either increments an existing
    /// bin (exact position match), shift-inserts a new exact bin (free slot
    /// available), or makes room by merging: the new value folds into its
    /// nearest neighbor, or the overall closest pair of bins collapses,
    /// whichever costs the smaller position delta. Ties prefer folding into
    /// an existing bin.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSample` for non-finite input and `CountOverflow` once
    /// the total count reaches 2^63 - 1. Either failure leaves the sketch
    /// unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use approx_histogram::ApproximateHistogram;
    ///
    /// let mut hist = ApproximateHistogram::new(10).unwrap();
    /// hist.offer(3.5).unwrap();
    /// assert!(hist.offer(f32::NAN).is_err());
    /// assert_eq!(hist.total_count(), 1);
    /// ```
    pub fn offer(&mut self, value: f32) -> Result<()> {
        validate_sample(value)?;
        if self.total_count >= COUNT_MASK {
            return Err(SketchError::CountOverflow);
        }
        self.offer_unchecked(value);
        Ok(())
    }

    /// Inserts a slice of samples.
    ///
    /// The whole slice is validated up front, so a rejected sample leaves
    /// the sketch unchanged rather than partially updated.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSample` if any element is non-finite, or
    /// `CountOverflow` if the batch would push the total count past
    /// 2^63 - 1.
    pub fn offer_many(&mut self, values: &[f32]) -> Result<()> {
        for &v in values {
            validate_sample(v)?;
        }
        let headroom = COUNT_MASK - self.total_count;
        if values.len() as u64 > headroom {
            return Err(SketchError::CountOverflow);
        }
        for &v in values {
            self.offer_unchecked(v);
        }
        Ok(())
    }

    /// Insertion after validation; callers guarantee `value` is finite and
    /// the total count has headroom.
    fn offer_unchecked(&mut self, value: f32) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        if self.bin_count == 0 {
            self.positions[0] = value;
            self.bins[0] = BinWord::exact(1);
            self.bin_count = 1;
            self.total_count += 1;
            return;
        }

        match self.search(value) {
            Ok(j) => {
                // exact match keeps the bin's flag as-is
                let w = self.bins[j];
                self.bins[j] = w.with_count(w.count() + 1);
            }
            Err(ins) if self.bin_count < self.size => {
                for i in (ins..self.bin_count).rev() {
                    self.positions[i + 1] = self.positions[i];
                    self.bins[i + 1] = self.bins[i];
                }
                self.positions[ins] = value;
                self.bins[ins] = BinWord::exact(1);
                self.bin_count += 1;
            }
            Err(ins) => self.offer_full(value, ins),
        }
        self.total_count += 1;
    }

    /// Insertion into a full bin array: fold the value into a neighbor bin
    /// or collapse the closest pair to free a slot, whichever moves less.
    fn offer_full(&mut self, value: f32, ins: usize) {
        let (closest, min_delta) = self.closest_pair();
        let delta_right = if ins < self.bin_count {
            self.positions[ins] - value
        } else {
            f32::INFINITY
        };
        let delta_left = if ins > 0 {
            value - self.positions[ins - 1]
        } else {
            f32::INFINITY
        };

        if delta_right <= delta_left && delta_right <= min_delta {
            self.fold_value_into(ins, value);
        } else if delta_left <= min_delta {
            self.fold_value_into(ins - 1, value);
        } else {
            self.merge_insert(closest, Some(ins), value, 1);
        }
    }

    /// Folds a single observation into the bin at `at`, blurring its
    /// centroid.
    fn fold_value_into(&mut self, at: usize, value: f32) {
        let k = self.bins[at].count();
        self.positions[at] = (self.positions[at] * k as f32 + value) / (k as f32 + 1.0);
        self.bins[at] = BinWord::new(k + 1, true);
    }

    /// Index and width of the narrowest gap between adjacent bins; the
    /// lowest index wins ties so results stay deterministic.
    pub(crate) fn closest_pair(&self) -> (usize, f32) {
        let mut best = 0;
        let mut best_delta = f32::INFINITY;
        for i in 0..self.bin_count.saturating_sub(1) {
            let delta = self.positions[i + 1] - self.positions[i];
            if delta < best_delta {
                best = i;
                best_delta = delta;
            }
        }
        (best, best_delta)
    }

    /// Collapses bins `merge_at` and `merge_at + 1` into one approximate
    /// bin, then reuses the freed slot.
    ///
    /// The merged centroid is the count-weighted average computed in f64 to
    /// avoid cancellation, truncated back to f32. With `insert_at` given,
    /// the free slot shifts to the insertion point (an index into the
    /// pre-merge array) and receives `(value, count)` as an exact bin; with
    /// `None` the array compacts left and `bin_count` drops by one.
    pub(crate) fn merge_insert(
        &mut self,
        merge_at: usize,
        insert_at: Option<usize>,
        value: f32,
        count: u64,
    ) {
        let k0 = self.bins[merge_at].count();
        let k1 = self.bins[merge_at + 1].count();
        let sum = k0 + k1;
        let centroid = (self.positions[merge_at] as f64 * k0 as f64
            + self.positions[merge_at + 1] as f64 * k1 as f64)
            / sum as f64;
        self.positions[merge_at] = centroid as f32;
        self.bins[merge_at] = BinWord::new(sum, true);

        match insert_at {
            Some(ins) if ins <= merge_at => {
                // free slot travels left from merge_at + 1
                for i in (ins..=merge_at).rev() {
                    self.positions[i + 1] = self.positions[i];
                    self.bins[i + 1] = self.bins[i];
                }
                self.positions[ins] = value;
                self.bins[ins] = BinWord::exact(count);
            }
            Some(ins) => {
                // free slot travels right; the removed slot shifts the
                // insertion index down by one
                for i in (merge_at + 1)..(ins - 1) {
                    self.positions[i] = self.positions[i + 1];
                    self.bins[i] = self.bins[i + 1];
                }
                self.positions[ins - 1] = value;
                self.bins[ins - 1] = BinWord::exact(count);
            }
            None => {
                for i in (merge_at + 1)..(self.bin_count - 1) {
                    self.positions[i] = self.positions[i + 1];
                    self.bins[i] = self.bins[i + 1];
                }
                self.bin_count -= 1;
            }
        }
    }

    /// Binary search over the used prefix. Positions never contain NaN, so
    /// the comparison fallback is unreachable.
    pub(crate) fn search(&self, value: f32) -> std::result::Result<usize, usize> {
        self.positions[..self.bin_count]
            .binary_search_by(|p| p.partial_cmp(&value).unwrap_or(Ordering::Equal))
    }
}

impl Default for ApproximateHistogram {
    /// An empty sketch with [`DEFAULT_SIZE`](Self::DEFAULT_SIZE) bins and
    /// unbounded limits.
    fn default() -> Self {
        Self::empty(Self::DEFAULT_SIZE, f32::NEG_INFINITY, f32::INFINITY)
    }
}

impl PartialEq for ApproximateHistogram {
    /// Compares observable state: capacity, used bins, extremes, total
    /// count, and limits. Unused storage slots do not participate.
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size
            && self.bin_count == other.bin_count
            && self.positions[..self.bin_count] == other.positions[..other.bin_count]
            && self.bins[..self.bin_count] == other.bins[..other.bin_count]
            && self.min == other.min
            && self.max == other.max
            && self.total_count == other.total_count
            && self.lower_limit == other.lower_limit
            && self.upper_limit == other.upper_limit
    }
}

impl Sketch for ApproximateHistogram {
    type Item = f32;

    /// Inserts a sample, silently skipping non-finite values and overflow
    /// the way a fire-and-forget metrics path expects; use
    /// [`offer`](Self::offer) when rejection must be observable.
    fn update(&mut self, item: &Self::Item) {
        let _ = self.offer(*item);
    }

    /// Returns the estimated median.
    fn estimate(&self) -> f64 {
        self.quantile(0.5).map_or(f64::NAN, f64::from)
    }

    fn is_empty(&self) -> bool {
        self.is_empty()
    }

    fn serialize(&self) -> Vec<u8> {
        self.to_bytes()
    }

    fn deserialize(bytes: &[u8]) -> std::result::Result<Self, SketchError> {
        Self::from_bytes(bytes)
    }
}

impl Mergeable for ApproximateHistogram {
    /// Merges via the optimal heap strategy, [`fold`](Self::fold).
    fn merge(&mut self, other: &Self) -> std::result::Result<(), SketchError> {
        self.fold(other)
    }
}
