//! Dense and sparse binary encodings of the sketch
//!
//! Every encoded sketch starts with a one-byte format tag followed by a
//! fixed header; all multi-byte fields are big-endian. The dense form
//! writes the full capacity with a zero-padded suffix, the sparse form
//! only the used prefix. `total_count` and the clamp limits are transient:
//! the byte form is a pure function of `(size, bin_count, positions, bins,
//! min, max)`, the total is recomputed at load, and limits reset to
//! unbounded.

use crate::common::validation::{dense_byte_size, validate_min_size, MAX_CAPACITY};
use crate::common::{Result, SketchError};
use crate::histogram::bin::{BinWord, COUNT_MASK};
use crate::histogram::sketch::ApproximateHistogram;

/// Format tag for the full-capacity layout.
const DENSE_TAG: u8 = 0x00;
/// Format tag for the used-prefix layout.
const SPARSE_TAG: u8 = 0x01;
/// Tag byte, two i32 counts, and the two f32 extremes.
const HEADER_SIZE: usize = 17;

fn malformed(reason: impl Into<String>) -> SketchError {
    SketchError::MalformedSerialization {
        reason: reason.into(),
    }
}

impl ApproximateHistogram {
    /// Serializes the sketch, choosing the smaller encoding.
    ///
    /// A partially filled sketch encodes sparsely; a full one encodes
    /// densely (the two layouts are the same length in that case).
    ///
    /// # Examples
    ///
    /// ```
    /// use approx_histogram::ApproximateHistogram;
    ///
    /// let mut hist = ApproximateHistogram::new(10).unwrap();
    /// hist.offer_many(&[1.0, 2.0, 3.0]).unwrap();
    ///
    /// let restored = ApproximateHistogram::from_bytes(&hist.to_bytes()).unwrap();
    /// assert_eq!(restored, hist);
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.bin_count < self.size {
            self.to_bytes_sparse()
        } else {
            self.to_bytes_dense()
        }
    }

    /// Serializes in the dense layout: the full capacity is written with
    /// unused slots zero-padded.
    pub fn to_bytes_dense(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(dense_byte_size(self.size));
        bytes.push(DENSE_TAG);
        bytes.extend_from_slice(&(self.size as i32).to_be_bytes());
        bytes.extend_from_slice(&(self.bin_count as i32).to_be_bytes());
        bytes.extend_from_slice(&self.min.to_be_bytes());
        bytes.extend_from_slice(&self.max.to_be_bytes());
        for i in 0..self.size {
            let p = if i < self.bin_count {
                self.positions[i]
            } else {
                0.0
            };
            bytes.extend_from_slice(&p.to_be_bytes());
        }
        for i in 0..self.size {
            let w = if i < self.bin_count {
                self.bins[i].raw()
            } else {
                0
            };
            bytes.extend_from_slice(&(w as i64).to_be_bytes());
        }
        bytes
    }

    /// Serializes in the sparse layout: only the used prefix is written.
    pub fn to_bytes_sparse(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + 12 * self.bin_count);
        bytes.push(SPARSE_TAG);
        bytes.extend_from_slice(&(self.size as i32).to_be_bytes());
        bytes.extend_from_slice(&(self.bin_count as i32).to_be_bytes());
        bytes.extend_from_slice(&self.min.to_be_bytes());
        bytes.extend_from_slice(&self.max.to_be_bytes());
        for &p in &self.positions[..self.bin_count] {
            bytes.extend_from_slice(&p.to_be_bytes());
        }
        for &w in &self.bins[..self.bin_count] {
            bytes.extend_from_slice(&(w.raw() as i64).to_be_bytes());
        }
        bytes
    }

    /// Upper bound on the serialized size of this sketch.
    ///
    /// Always the dense size, even when [`to_bytes`](Self::to_bytes) would
    /// pick the smaller sparse form: use it to pre-allocate, not to learn
    /// the actual on-disk length.
    pub fn max_storage_size(&self) -> usize {
        dense_byte_size(self.size)
    }

    /// Deserializes a sketch, dispatching on the format tag.
    ///
    /// Trailing bytes beyond the encoded form are ignored so the form can
    /// be embedded in larger buffers. `total_count` is recomputed from the
    /// decoded counts; clamp limits reset to unbounded and must be
    /// restored with [`set_limits`](Self::set_limits) if needed.
    ///
    /// # Errors
    ///
    /// Returns `MalformedSerialization` for an unknown tag, truncated
    /// input, or decoded state violating the sketch invariants (capacity
    /// below 2, counts of zero, positions out of order, or extremes
    /// inconsistent with the bins).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        validate_min_size(bytes.len(), HEADER_SIZE)?;
        match bytes[0] {
            DENSE_TAG => Self::from_bytes_tagged(bytes, true),
            SPARSE_TAG => Self::from_bytes_tagged(bytes, false),
            tag => Err(malformed(format!("unknown format tag {:#04x}", tag))),
        }
    }

    fn from_bytes_tagged(bytes: &[u8], dense: bool) -> Result<Self> {
        let size_raw = i32::from_be_bytes(bytes[1..5].try_into().unwrap());
        let bin_count_raw = i32::from_be_bytes(bytes[5..9].try_into().unwrap());
        let min = f32::from_be_bytes(bytes[9..13].try_into().unwrap());
        let max = f32::from_be_bytes(bytes[13..17].try_into().unwrap());

        if size_raw < 2 {
            return Err(malformed(format!("size {} is below the minimum of 2", size_raw)));
        }
        let size = size_raw as usize;
        if size > MAX_CAPACITY {
            return Err(malformed(format!(
                "size {} exceeds the decode cap of {}",
                size, MAX_CAPACITY
            )));
        }
        if bin_count_raw < 0 || bin_count_raw as usize > size {
            return Err(malformed(format!(
                "bin count {} outside [0, {}]",
                bin_count_raw, size
            )));
        }
        let bin_count = bin_count_raw as usize;

        let stored = if dense { size } else { bin_count };
        validate_min_size(bytes.len(), HEADER_SIZE + 12 * stored)?;

        let mut positions = vec![0.0f32; size];
        let mut pos = HEADER_SIZE;
        for slot in positions.iter_mut().take(bin_count) {
            *slot = f32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap());
            pos += 4;
        }

        let mut bins = vec![BinWord::default(); size];
        let mut pos = HEADER_SIZE + 4 * stored;
        for slot in bins.iter_mut().take(bin_count) {
            let raw = i64::from_be_bytes(bytes[pos..pos + 8].try_into().unwrap());
            *slot = BinWord::from_raw(raw as u64);
            pos += 8;
        }

        let mut total_count: u64 = 0;
        for (i, w) in bins[..bin_count].iter().enumerate() {
            if w.count() == 0 {
                return Err(malformed(format!("bin {} has a zero count", i)));
            }
            total_count = total_count
                .checked_add(w.count())
                .filter(|&t| t <= COUNT_MASK)
                .ok_or_else(|| malformed("total count exceeds 2^63 - 1"))?;
        }
        for i in 1..bin_count {
            if !(positions[i - 1] < positions[i]) {
                return Err(malformed(format!(
                    "positions not strictly ascending at bin {}",
                    i
                )));
            }
        }

        let (min, max) = if bin_count == 0 {
            // normalize: an empty sketch has sentinel extremes
            (f32::INFINITY, f32::NEG_INFINITY)
        } else {
            if !min.is_finite() || !max.is_finite() {
                return Err(malformed("extremes of a non-empty sketch must be finite"));
            }
            if !(min <= positions[0]) || !(positions[bin_count - 1] <= max) {
                return Err(malformed(
                    "extremes inconsistent with the bin positions",
                ));
            }
            (min, max)
        };

        Ok(ApproximateHistogram {
            size,
            positions,
            bins,
            bin_count,
            min,
            max,
            total_count,
            lower_limit: f32::NEG_INFINITY,
            upper_limit: f32::INFINITY,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_sketch() -> ApproximateHistogram {
        let mut h = ApproximateHistogram::new(5).unwrap();
        h.offer_many(&[1.0, 2.0, 3.0, 2.0]).unwrap();
        h
    }

    #[test]
    fn test_sparse_chosen_when_partially_filled() {
        let h = sample_sketch();
        let bytes = h.to_bytes();
        assert_eq!(bytes[0], SPARSE_TAG);
        assert_eq!(bytes.len(), HEADER_SIZE + 12 * h.bin_count());
    }

    #[test]
    fn test_dense_chosen_when_full() {
        let mut h = ApproximateHistogram::new(3).unwrap();
        h.offer_many(&[1.0, 5.0, 9.0]).unwrap();
        let bytes = h.to_bytes();
        assert_eq!(bytes[0], DENSE_TAG);
        assert_eq!(bytes.len(), dense_byte_size(3));
    }

    #[test]
    fn test_round_trip_both_layouts() {
        let h = sample_sketch();

        let from_dense = ApproximateHistogram::from_bytes(&h.to_bytes_dense()).unwrap();
        let from_sparse = ApproximateHistogram::from_bytes(&h.to_bytes_sparse()).unwrap();

        assert_eq!(from_dense, h);
        assert_eq!(from_sparse, h);
        assert_eq!(from_dense, from_sparse);
    }

    #[test]
    fn test_round_trip_empty_sketch() {
        let h = ApproximateHistogram::new(4).unwrap();
        let restored = ApproximateHistogram::from_bytes(&h.to_bytes()).unwrap();
        assert_eq!(restored, h);
        assert_eq!(restored.min(), f32::INFINITY);
        assert_eq!(restored.max(), f32::NEG_INFINITY);
        assert_eq!(restored.total_count(), 0);
    }

    #[test]
    fn test_limits_are_transient() {
        let mut h = ApproximateHistogram::with_limits(5, 0.0, 10.0).unwrap();
        h.offer_many(&[1.0, 2.0]).unwrap();

        let restored = ApproximateHistogram::from_bytes(&h.to_bytes()).unwrap();
        assert_eq!(restored.lower_limit(), f32::NEG_INFINITY);
        assert_eq!(restored.upper_limit(), f32::INFINITY);
        // bins and extremes survive even though limits do not
        assert_eq!(restored.positions(), h.positions());
        assert_eq!(restored.counts(), h.counts());
        assert_eq!(restored.total_count(), h.total_count());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let h = sample_sketch();
        let mut bytes = h.to_bytes();
        bytes.extend_from_slice(&[0xAB; 16]);
        let restored = ApproximateHistogram::from_bytes(&bytes).unwrap();
        assert_eq!(restored, h);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let h = sample_sketch();
        let mut bytes = h.to_bytes();
        bytes[0] = 0x7F;
        assert!(ApproximateHistogram::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_truncated_input_rejected() {
        let h = sample_sketch();
        let bytes = h.to_bytes();
        for len in [0, 5, HEADER_SIZE, bytes.len() - 1] {
            assert!(
                ApproximateHistogram::from_bytes(&bytes[..len]).is_err(),
                "accepted {} byte prefix",
                len
            );
        }
    }

    #[test]
    fn test_undersized_capacity_rejected() {
        let h = sample_sketch();
        let mut bytes = h.to_bytes();
        bytes[1..5].copy_from_slice(&1i32.to_be_bytes());
        assert!(ApproximateHistogram::from_bytes(&bytes).is_err());
        bytes[1..5].copy_from_slice(&(-5i32).to_be_bytes());
        assert!(ApproximateHistogram::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_bin_count_beyond_size_rejected() {
        let h = sample_sketch();
        let mut bytes = h.to_bytes_dense();
        bytes[5..9].copy_from_slice(&6i32.to_be_bytes());
        assert!(ApproximateHistogram::from_bytes(&bytes).is_err());
        bytes[5..9].copy_from_slice(&(-1i32).to_be_bytes());
        assert!(ApproximateHistogram::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_unsorted_positions_rejected() {
        let h = sample_sketch();
        let mut bytes = h.to_bytes_sparse();
        // swap the first two stored positions
        let (a, b) = (HEADER_SIZE, HEADER_SIZE + 4);
        let first: [u8; 4] = bytes[a..a + 4].try_into().unwrap();
        let second: [u8; 4] = bytes[b..b + 4].try_into().unwrap();
        bytes[a..a + 4].copy_from_slice(&second);
        bytes[b..b + 4].copy_from_slice(&first);
        assert!(ApproximateHistogram::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_zero_count_bin_rejected() {
        let h = sample_sketch();
        let mut bytes = h.to_bytes_sparse();
        let off = HEADER_SIZE + 4 * h.bin_count();
        bytes[off..off + 8].copy_from_slice(&0i64.to_be_bytes());
        assert!(ApproximateHistogram::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_inconsistent_extremes_rejected() {
        let h = sample_sketch();
        let mut bytes = h.to_bytes_sparse();
        // claim a minimum above the first bin position
        bytes[9..13].copy_from_slice(&10.0f32.to_be_bytes());
        assert!(ApproximateHistogram::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_approx_flags_survive_round_trip() {
        let mut h = ApproximateHistogram::new(3).unwrap();
        h.offer_many(&[1.0, 2.0, 3.0, 10.0]).unwrap();
        assert!(h.bins[0].is_approx());

        let restored = ApproximateHistogram::from_bytes(&h.to_bytes()).unwrap();
        assert!(restored.bins[0].is_approx());
        assert!(!restored.bins[1].is_approx());
        assert_eq!(restored.exact_count(), h.exact_count());
    }

    #[test]
    fn test_max_storage_size_is_upper_bound() {
        let h = sample_sketch();
        assert!(h.to_bytes().len() <= h.max_storage_size());
        assert!(h.to_bytes_dense().len() <= h.max_storage_size());
        assert!(h.to_bytes_sparse().len() <= h.max_storage_size());
        assert_eq!(h.max_storage_size(), dense_byte_size(h.capacity()));
    }
}
