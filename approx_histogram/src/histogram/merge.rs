//! Merge engines: optimal heap-merge and greedy cutoff rule-merge

use crate::common::validation::validate_scratch;
use crate::common::{Result, SketchError};
use crate::histogram::bin::{BinWord, COUNT_MASK};
use crate::histogram::sketch::ApproximateHistogram;

impl ApproximateHistogram {
    /// Merges another sketch into this one using the optimal strategy.
    ///
    /// The union of both bin arrays is built in sorted order (bins at
    /// identical positions combine by summing counts and OR-ing flags),
    /// then exactly as many closest-pair merges as needed to fit this
    /// sketch's capacity are performed, always collapsing the currently
    /// narrowest gap. A min-heap over neighbor deltas keeps each step at
    /// O(log n); the whole merge is O((n+m) log(n+m)).
    ///
    /// Tie-breaks are pinned (lowest delta index, left heap child), so the
    /// result is a pure function of the inputs: for two sketches of equal
    /// capacity, `a.fold(&b)` and `b.fold(&a)` produce bit-identical state.
    ///
    /// Scratch buffers are allocated internally; use
    /// [`fold_with_scratch`](Self::fold_with_scratch) to amortize
    /// allocations across many merges.
    ///
    /// # Errors
    ///
    /// Returns `CountOverflow` if the combined total would exceed
    /// 2^63 - 1. The receiver is unchanged on failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use approx_histogram::ApproximateHistogram;
    ///
    /// let mut a = ApproximateHistogram::new(20).unwrap();
    /// let mut b = ApproximateHistogram::new(20).unwrap();
    /// for i in 1..=50 {
    ///     a.offer(i as f32).unwrap();
    ///     b.offer((i + 50) as f32).unwrap();
    /// }
    ///
    /// a.fold(&b).unwrap();
    /// assert_eq!(a.total_count(), 100);
    /// assert!(a.bin_count() <= 20);
    /// ```
    pub fn fold(&mut self, other: &Self) -> Result<()> {
        let needed = self.bin_count + other.bin_count;
        let mut positions = vec![0.0f32; needed];
        let mut bins = vec![BinWord::default(); needed];
        let mut deltas = vec![0.0f32; needed];
        self.fold_with_scratch(other, &mut positions, &mut bins, &mut deltas)
    }

    /// [`fold`](Self::fold) with caller-supplied scratch buffers.
    ///
    /// Each buffer must hold at least `self.bin_count() +
    /// other.bin_count()` slots. The buffers are working storage for one
    /// call only; their contents afterwards are unspecified.
    ///
    /// # Errors
    ///
    /// Returns `BufferTooSmall` if any buffer is undersized and
    /// `CountOverflow` if the combined total would exceed 2^63 - 1. The
    /// receiver is unchanged on failure.
    pub fn fold_with_scratch(
        &mut self,
        other: &Self,
        scratch_positions: &mut [f32],
        scratch_bins: &mut [BinWord],
        scratch_deltas: &mut [f32],
    ) -> Result<()> {
        if other.bin_count == 0 {
            return Ok(());
        }
        let needed = self.bin_count + other.bin_count;
        validate_scratch(needed, scratch_positions.len())?;
        validate_scratch(needed, scratch_bins.len())?;
        validate_scratch(needed, scratch_deltas.len())?;
        let merged_total = self.checked_merged_total(other)?;
        let merged_min = self.min.min(other.min);
        let merged_max = self.max.max(other.max);

        let m = combine_bins(self, other, scratch_positions, scratch_bins, scratch_deltas);

        if m <= self.size {
            self.positions[..m].copy_from_slice(&scratch_positions[..m]);
            self.bins[..m].copy_from_slice(&scratch_bins[..m]);
            for i in m..self.size {
                self.positions[i] = 0.0;
                self.bins[i] = BinWord::default();
            }
            self.bin_count = m;
        } else {
            self.heap_merge(m, scratch_positions, scratch_bins, scratch_deltas);
        }

        self.min = merged_min;
        self.max = merged_max;
        self.total_count = merged_total;
        Ok(())
    }

    /// Collapses `m - size` closest pairs in the combined arrays, then
    /// compacts the survivors into this sketch's storage.
    fn heap_merge(
        &mut self,
        m: usize,
        positions: &mut [f32],
        bins: &mut [BinWord],
        deltas: &mut [f32],
    ) {
        let num_merge = m - self.size;

        // rings of surviving bin indices; -1 terminates
        let mut next: Vec<isize> = (1..=m as isize).collect();
        next[m - 1] = -1;
        let mut prev: Vec<isize> = (-1..m as isize - 1).collect();

        let mut heap = DeltaHeap::build(m - 1, deltas);

        for _ in 0..num_merge {
            let c = heap.peek();
            let n = next[c] as usize;

            let k0 = bins[c].count();
            let k1 = bins[n].count();
            let total = k0 + k1;
            positions[c] = ((positions[c] as f64 * k0 as f64 + positions[n] as f64 * k1 as f64)
                / total as f64) as f32;
            bins[c] = BinWord::new(total, true);

            let nn = next[n];
            next[c] = nn;
            if nn >= 0 {
                prev[nn as usize] = c as isize;
                // the gap at n is gone; the gap at c widened
                heap.remove(n, deltas);
                deltas[c] = positions[nn as usize] - positions[c];
                heap.sink(c, deltas);
            } else {
                // merged bin is now the last one; it no longer has a gap
                heap.remove(c, deltas);
            }

            let p = prev[c];
            if p >= 0 {
                deltas[p as usize] = positions[c] - positions[p as usize];
                heap.sink(p as usize, deltas);
            }
        }

        let mut out = 0;
        let mut idx: isize = 0;
        while idx >= 0 {
            self.positions[out] = positions[idx as usize];
            self.bins[out] = bins[idx as usize];
            out += 1;
            idx = next[idx as usize];
        }
        debug_assert_eq!(out, self.size);
        self.bin_count = out;
    }

    /// Merges another sketch into this one with the greedy single-pass
    /// strategy.
    ///
    /// A cutoff distance is derived from the clamp limits (or the observed
    /// range when unbounded):
    ///
    /// | limits | cutoff |
    /// |---|---|
    /// | both finite | `(upper - lower) / (size - 3)` |
    /// | upper only | `(upper - min) / (size - 2)` |
    /// | lower only | `(max - lower) / (size - 2)` |
    /// | neither | `(max - min) / (size - 1)` |
    ///
    /// The sweep visits both sketches' bins in ascending order. Bins below
    /// the lower limit collapse into a single approximate boundary bucket,
    /// bins above the upper limit into another; in between, a bin folds
    /// into the running tail whenever the gap is within the cutoff,
    /// otherwise it starts a new bin. If the caller's limits leave the
    /// cutoff too tight to fit capacity, a final closest-pair compaction
    /// restores the bin bound.
    ///
    /// Merging an empty sketch is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `CountOverflow` if the combined total would exceed
    /// 2^63 - 1. The receiver is unchanged on failure.
    pub fn fold_fast(&mut self, other: &Self) -> Result<()> {
        let needed = self.bin_count + other.bin_count;
        let mut positions = vec![0.0f32; needed];
        let mut bins = vec![BinWord::default(); needed];
        self.fold_fast_with_scratch(other, &mut positions, &mut bins)
    }

    /// [`fold_fast`](Self::fold_fast) with caller-supplied scratch buffers
    /// of at least `self.bin_count() + other.bin_count()` slots each.
    ///
    /// # Errors
    ///
    /// Returns `BufferTooSmall` if a buffer is undersized and
    /// `CountOverflow` if the combined total would exceed 2^63 - 1. The
    /// receiver is unchanged on failure.
    pub fn fold_fast_with_scratch(
        &mut self,
        other: &Self,
        scratch_positions: &mut [f32],
        scratch_bins: &mut [BinWord],
    ) -> Result<()> {
        if other.bin_count == 0 {
            return Ok(());
        }
        let needed = self.bin_count + other.bin_count;
        validate_scratch(needed, scratch_positions.len())?;
        validate_scratch(needed, scratch_bins.len())?;
        let merged_total = self.checked_merged_total(other)?;
        let merged_min = self.min.min(other.min);
        let merged_max = self.max.max(other.max);

        let m = rule_combine_bins(
            &self.positions[..self.bin_count],
            &self.bins[..self.bin_count],
            &other.positions[..other.bin_count],
            &other.bins[..other.bin_count],
            self.rule_cutoff(),
            self.lower_limit,
            self.upper_limit,
            scratch_positions,
            scratch_bins,
        );
        let m = compact_closest_pairs(scratch_positions, scratch_bins, m, self.size);

        self.positions[..m].copy_from_slice(&scratch_positions[..m]);
        self.bins[..m].copy_from_slice(&scratch_bins[..m]);
        for i in m..self.size {
            self.positions[i] = 0.0;
            self.bins[i] = BinWord::default();
        }
        self.bin_count = m;
        self.min = merged_min;
        self.max = merged_max;
        self.total_count = merged_total;
        Ok(())
    }

    fn checked_merged_total(&self, other: &Self) -> Result<u64> {
        self.total_count
            .checked_add(other.total_count)
            .filter(|&t| t <= COUNT_MASK)
            .ok_or(SketchError::CountOverflow)
    }

    /// Cluster cutoff for the rule-merge sweep. Computed in f32 so
    /// degenerate capacities produce a negative or non-finite cutoff, which
    /// disables folding instead of underflowing.
    fn rule_cutoff(&self) -> f32 {
        let lower_bounded = self.lower_limit.is_finite();
        let upper_bounded = self.upper_limit.is_finite();
        if lower_bounded && upper_bounded {
            (self.upper_limit - self.lower_limit) / (self.size as f32 - 3.0)
        } else if upper_bounded {
            (self.upper_limit - self.min) / (self.size as f32 - 2.0)
        } else if lower_bounded {
            (self.max - self.lower_limit) / (self.size as f32 - 2.0)
        } else {
            (self.max - self.min) / (self.size as f32 - 1.0)
        }
    }
}

/// Merge-sorts the used bins of both sketches into the output arrays.
/// Bins at identical positions combine: counts sum, flags OR. Fills
/// `deltas` with consecutive position gaps and returns the merged length.
fn combine_bins(
    a: &ApproximateHistogram,
    b: &ApproximateHistogram,
    out_positions: &mut [f32],
    out_bins: &mut [BinWord],
    deltas: &mut [f32],
) -> usize {
    let mut i = 0;
    let mut j = 0;
    let mut k = 0;
    while i < a.bin_count || j < b.bin_count {
        let take_a = j >= b.bin_count || (i < a.bin_count && a.positions[i] <= b.positions[j]);
        let (p, w) = if take_a {
            i += 1;
            (a.positions[i - 1], a.bins[i - 1])
        } else {
            j += 1;
            (b.positions[j - 1], b.bins[j - 1])
        };
        if k > 0 && out_positions[k - 1] == p {
            let merged = out_bins[k - 1].count() + w.count();
            out_bins[k - 1] = BinWord::new(merged, out_bins[k - 1].is_approx() || w.is_approx());
        } else {
            out_positions[k] = p;
            out_bins[k] = w;
            k += 1;
        }
    }
    for x in 1..k {
        deltas[x - 1] = out_positions[x] - out_positions[x - 1];
    }
    k
}

/// Single-pass cutoff sweep over both sketches' bins in ascending order.
/// Out-of-limit bins accumulate into approximate boundary buckets; in-range
/// bins fold into the running tail when the gap is within the cutoff.
/// Returns the output length.
#[allow(clippy::too_many_arguments)]
fn rule_combine_bins(
    a_positions: &[f32],
    a_bins: &[BinWord],
    b_positions: &[f32],
    b_bins: &[BinWord],
    cutoff: f32,
    lower: f32,
    upper: f32,
    out_positions: &mut [f32],
    out_bins: &mut [BinWord],
) -> usize {
    let mut i = 0;
    let mut j = 0;
    let mut k = 0;
    let mut tail: Option<usize> = None;
    let mut lo_sum = 0.0f64;
    let mut lo_count = 0u64;
    let mut lo_flushed = false;
    let mut hi_sum = 0.0f64;
    let mut hi_count = 0u64;

    while i < a_positions.len() || j < b_positions.len() {
        let take_a =
            j >= b_positions.len() || (i < a_positions.len() && a_positions[i] <= b_positions[j]);
        let (p, w) = if take_a {
            i += 1;
            (a_positions[i - 1], a_bins[i - 1])
        } else {
            j += 1;
            (b_positions[j - 1], b_bins[j - 1])
        };
        let count = w.count();

        // ascending sweep: every below-limit bin precedes the in-range
        // ones, every above-limit bin follows them
        if p < lower {
            lo_sum += p as f64 * count as f64;
            lo_count += count;
            continue;
        }
        if p > upper {
            hi_sum += p as f64 * count as f64;
            hi_count += count;
            continue;
        }

        if !lo_flushed {
            if lo_count > 0 {
                out_positions[k] = (lo_sum / lo_count as f64) as f32;
                out_bins[k] = BinWord::new(lo_count, true);
                k += 1;
            }
            lo_flushed = true;
        }

        match tail {
            Some(t) if p - out_positions[t] <= cutoff || p == out_positions[t] => {
                let k0 = out_bins[t].count();
                let total = k0 + count;
                out_positions[t] = ((out_positions[t] as f64 * k0 as f64
                    + p as f64 * count as f64)
                    / total as f64) as f32;
                out_bins[t] = BinWord::new(total, true);
            }
            _ => {
                if k > 0 && p == out_positions[k - 1] {
                    // boundary-bucket centroid rounded up onto this bin
                    let total = out_bins[k - 1].count() + count;
                    out_bins[k - 1] = BinWord::new(total, true);
                    tail = Some(k - 1);
                } else {
                    out_positions[k] = p;
                    out_bins[k] = w;
                    tail = Some(k);
                    k += 1;
                }
            }
        }
    }

    if !lo_flushed && lo_count > 0 {
        out_positions[k] = (lo_sum / lo_count as f64) as f32;
        out_bins[k] = BinWord::new(lo_count, true);
        k += 1;
    }
    if hi_count > 0 {
        let hp = (hi_sum / hi_count as f64) as f32;
        if k > 0 && hp <= out_positions[k - 1] {
            // rounding collapsed the high bucket onto the last bin
            let total = out_bins[k - 1].count() + hi_count;
            out_bins[k - 1] = BinWord::new(total, true);
        } else {
            out_positions[k] = hp;
            out_bins[k] = BinWord::new(hi_count, true);
            k += 1;
        }
    }
    k
}

/// Repeatedly collapses the closest adjacent pair (lowest index on ties)
/// until at most `target` bins remain. Returns the final length.
fn compact_closest_pairs(
    positions: &mut [f32],
    bins: &mut [BinWord],
    mut m: usize,
    target: usize,
) -> usize {
    while m > target {
        let mut best = 0;
        for i in 1..m - 1 {
            if positions[i + 1] - positions[i] < positions[best + 1] - positions[best] {
                best = i;
            }
        }
        let k0 = bins[best].count();
        let k1 = bins[best + 1].count();
        let total = k0 + k1;
        positions[best] = ((positions[best] as f64 * k0 as f64
            + positions[best + 1] as f64 * k1 as f64)
            / total as f64) as f32;
        bins[best] = BinWord::new(total, true);
        for i in best + 1..m - 1 {
            positions[i] = positions[i + 1];
            bins[i] = bins[i + 1];
        }
        m -= 1;
    }
    m
}

/// Min-heap of delta indices keyed by the `deltas` array, with a reverse
/// index for O(log n) removal of arbitrary entries.
///
/// Comparisons use strict `<` and sift-down prefers the left child on equal
/// keys, so equal deltas resolve in insertion order and merge results stay
/// deterministic.
struct DeltaHeap {
    heap: Vec<usize>,
    /// Delta index -> heap slot; -1 once evicted.
    reverse: Vec<isize>,
}

impl DeltaHeap {
    fn build(len: usize, deltas: &[f32]) -> Self {
        let heap: Vec<usize> = (0..len).collect();
        let reverse: Vec<isize> = (0..len as isize).collect();
        let mut this = DeltaHeap { heap, reverse };
        for i in (0..len / 2).rev() {
            this.sift_down(i, deltas);
        }
        this
    }

    /// Delta index with the smallest key. The caller guarantees the heap is
    /// non-empty (one entry is evicted per merge and the merge count leaves
    /// at least one gap behind).
    fn peek(&self) -> usize {
        self.heap[0]
    }

    /// Re-sinks an entry whose key grew in place.
    fn sink(&mut self, d: usize, deltas: &[f32]) {
        let slot = self.reverse[d];
        debug_assert!(slot >= 0);
        self.sift_down(slot as usize, deltas);
    }

    /// Evicts the entry for delta index `d`.
    fn remove(&mut self, d: usize, deltas: &[f32]) {
        let slot = self.reverse[d];
        debug_assert!(slot >= 0);
        let slot = slot as usize;
        self.reverse[d] = -1;
        if let Some(last) = self.heap.pop() {
            if slot < self.heap.len() {
                self.heap[slot] = last;
                self.reverse[last] = slot as isize;
                self.sift_down(slot, deltas);
                self.sift_up(slot, deltas);
            }
        }
    }

    fn sift_down(&mut self, start: usize, deltas: &[f32]) {
        let mut root = start;
        loop {
            let mut child = 2 * root + 1;
            if child >= self.heap.len() {
                break;
            }
            // strict <: the left child wins ties
            if child + 1 < self.heap.len()
                && deltas[self.heap[child + 1]] < deltas[self.heap[child]]
            {
                child += 1;
            }
            if deltas[self.heap[child]] < deltas[self.heap[root]] {
                self.heap.swap(root, child);
                self.reverse[self.heap[root]] = root as isize;
                self.reverse[self.heap[child]] = child as isize;
                root = child;
            } else {
                break;
            }
        }
    }

    fn sift_up(&mut self, start: usize, deltas: &[f32]) {
        let mut node = start;
        while node > 0 {
            let parent = (node - 1) / 2;
            if deltas[self.heap[node]] < deltas[self.heap[parent]] {
                self.heap.swap(node, parent);
                self.reverse[self.heap[node]] = node as isize;
                self.reverse[self.heap[parent]] = parent as isize;
                node = parent;
            } else {
                break;
            }
        }
    }
}
