//! Round-trip and robustness tests for the binary sketch encodings
//!
//! Tests verify:
//! - Dense and sparse round trips reproduce observable state
//! - The two layouts decode to bit-identical sketches
//! - Writers choose the smaller encoding
//! - Malformed inputs are rejected with an error, never a panic
//! - Trait-level serialize/deserialize matches the inherent methods

use proptest::prelude::*;

use approx_histogram::{ApproximateHistogram, Sketch};

fn sketch_of(size: usize, values: &[f32]) -> ApproximateHistogram {
    let mut h = ApproximateHistogram::new(size).unwrap();
    h.offer_many(values).unwrap();
    h
}

// ============================================================================
// Round Trips
// ============================================================================

#[test]
fn test_round_trip_partial_sketch() {
    let h = sketch_of(10, &[1.0, 5.0, 2.0, 5.0]);
    let restored = ApproximateHistogram::from_bytes(&h.to_bytes()).unwrap();
    assert_eq!(restored, h);
}

#[test]
fn test_round_trip_full_sketch_with_merges() {
    let values: Vec<f32> = (0..500).map(|i| (i as f32 * 0.37).sin() * 100.0).collect();
    let h = sketch_of(16, &values);
    assert_eq!(h.bin_count(), h.capacity());

    let restored = ApproximateHistogram::from_bytes(&h.to_bytes()).unwrap();
    assert_eq!(restored, h);
    assert_eq!(restored.exact_count(), h.exact_count());
}

#[test]
fn test_dense_and_sparse_decode_identically() {
    let h = sketch_of(12, &[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0]);
    assert!(h.bin_count() < h.capacity());

    let from_dense = ApproximateHistogram::from_bytes(&h.to_bytes_dense()).unwrap();
    let from_sparse = ApproximateHistogram::from_bytes(&h.to_bytes_sparse()).unwrap();

    assert_eq!(from_dense, from_sparse);
    assert_eq!(from_dense.positions(), from_sparse.positions());
    assert_eq!(from_dense.counts(), from_sparse.counts());
    assert_eq!(from_dense.min().to_bits(), from_sparse.min().to_bits());
    assert_eq!(from_dense.max().to_bits(), from_sparse.max().to_bits());
}

#[test]
fn test_writer_minimizes_size() {
    let partial = sketch_of(10, &[1.0, 2.0]);
    assert_eq!(
        partial.to_bytes().len(),
        partial.to_bytes_sparse().len(),
        "partial sketch should pick the sparse layout"
    );
    assert!(partial.to_bytes().len() < partial.to_bytes_dense().len());

    let full = sketch_of(2, &[1.0, 2.0]);
    assert_eq!(full.to_bytes().len(), full.to_bytes_dense().len());
    assert!(full.to_bytes().len() <= full.max_storage_size());
}

#[test]
fn test_total_count_recomputed_on_load() {
    let h = sketch_of(6, &[7.0, 7.0, 7.0, 8.0]);
    let restored = ApproximateHistogram::from_bytes(&h.to_bytes()).unwrap();
    assert_eq!(restored.total_count(), 4);
    assert_eq!(restored.counts(), vec![3, 1]);
}

#[test]
fn test_limits_restored_by_caller_after_load() {
    let mut h = ApproximateHistogram::with_limits(8, -1.0, 1.0).unwrap();
    h.offer_many(&[-2.0, 0.0, 2.0]).unwrap();

    let mut restored = ApproximateHistogram::from_bytes(&h.to_bytes()).unwrap();
    assert_eq!(restored.lower_limit(), f32::NEG_INFINITY);
    assert_eq!(restored.upper_limit(), f32::INFINITY);

    restored.set_limits(-1.0, 1.0).unwrap();
    assert_eq!(restored, h);
}

#[test]
fn test_trait_serialization_matches_inherent() {
    let h = sketch_of(8, &[10.0, 20.0, 30.0]);
    assert_eq!(Sketch::serialize(&h), h.to_bytes());

    let restored = <ApproximateHistogram as Sketch>::deserialize(&h.to_bytes()).unwrap();
    assert_eq!(restored, h);
}

// ============================================================================
// Malformed Inputs
// ============================================================================

#[test]
fn test_rejects_garbage_without_panicking() {
    assert!(ApproximateHistogram::from_bytes(&[]).is_err());
    assert!(ApproximateHistogram::from_bytes(&[0x02]).is_err());
    assert!(ApproximateHistogram::from_bytes(&[0xFF; 16]).is_err());
    assert!(ApproximateHistogram::from_bytes(&[0x00; 17]).is_err());
}

#[test]
fn test_rejects_every_truncation() {
    let h = sketch_of(4, &[1.0, 2.0, 3.0]);
    let bytes = h.to_bytes();
    for len in 0..bytes.len() {
        assert!(
            ApproximateHistogram::from_bytes(&bytes[..len]).is_err(),
            "accepted a {} byte prefix of a {} byte form",
            len,
            bytes.len()
        );
    }
}

#[test]
fn test_rejects_header_corruption() {
    let h = sketch_of(4, &[1.0, 2.0, 3.0]);
    let good = h.to_bytes();

    // capacity below minimum
    let mut bad = good.clone();
    bad[1..5].copy_from_slice(&0i32.to_be_bytes());
    assert!(ApproximateHistogram::from_bytes(&bad).is_err());

    // bin count beyond capacity
    let mut bad = good.clone();
    bad[5..9].copy_from_slice(&5i32.to_be_bytes());
    assert!(ApproximateHistogram::from_bytes(&bad).is_err());

    // NaN minimum on a non-empty sketch
    let mut bad = good.clone();
    bad[9..13].copy_from_slice(&f32::NAN.to_be_bytes());
    assert!(ApproximateHistogram::from_bytes(&bad).is_err());

    // absurd capacity triggers the decode cap, not an allocation
    let mut bad = good;
    bad[1..5].copy_from_slice(&i32::MAX.to_be_bytes());
    assert!(ApproximateHistogram::from_bytes(&bad).is_err());
}

// ============================================================================
// Property-Based Tests (using proptest)
// ============================================================================

proptest! {
    #[test]
    fn prop_round_trip_is_identity(
        size in 2usize..24,
        values in prop::collection::vec(-1e4f32..1e4, 0..150),
    ) {
        let h = sketch_of(size, &values);

        let restored = ApproximateHistogram::from_bytes(&h.to_bytes()).unwrap();
        prop_assert_eq!(&restored, &h);

        let dense = ApproximateHistogram::from_bytes(&h.to_bytes_dense()).unwrap();
        let sparse = ApproximateHistogram::from_bytes(&h.to_bytes_sparse()).unwrap();
        prop_assert_eq!(&dense, &sparse);
        prop_assert_eq!(&dense, &h);
    }

    #[test]
    fn prop_encoded_size_never_exceeds_bound(
        size in 2usize..24,
        values in prop::collection::vec(-1e4f32..1e4, 0..150),
    ) {
        let h = sketch_of(size, &values);
        prop_assert!(h.to_bytes().len() <= h.max_storage_size());
    }
}
