//! Streaming approximate histogram (Ben-Haim & Tom-Tov 2010)
//!
//! A bounded-memory histogram over a stream of f32 samples. The sketch keeps
//! at most `size` bins, each a centroid position and a count; when the stream
//! brings more distinct values than bins, the two closest bins are merged
//! into a weighted centroid. Bins carry an exactness flag: a bin that has
//! never been merged represents repeated observations of one exact value,
//! while a merged bin represents a blurred neighborhood.
//!
//! # Algorithm Overview
//!
//! - **Insertion** is a binary search followed by either a count increment
//!   (exact match), a shift-insert (free slot), or a closest-pair merge to
//!   make room.
//! - **Merging** two sketches either runs the optimal strategy
//!   ([`ApproximateHistogram::fold`]): union both bin arrays, then collapse
//!   exactly as many closest pairs as needed to fit capacity, driven by a
//!   min-heap over neighbor distances; or the greedy strategy
//!   ([`ApproximateHistogram::fold_fast`]): a single pass that folds bins
//!   closer than a precomputed cutoff and clamps out-of-limit bins into
//!   boundary buckets.
//! - **Queries** interpolate the cumulative count with the trapezoid rule,
//!   treating exact bins as point masses.
//!
//! # Time Complexity
//!
//! - Insert: O(log size) search + O(size) shift
//! - Fold: O((n+m) log(n+m))
//! - Fold fast: O(n+m)
//! - Sum / quantile: O(size)
//!
//! # Space Complexity
//!
//! O(size) — two parallel fixed-capacity arrays.
//!
//! # References
//!
//! - Ben-Haim & Tom-Tov "A Streaming Parallel Decision Tree Algorithm"
//!   (JMLR 2010)
//!
//! # Examples
//!
//! ```
//! use approx_histogram::ApproximateHistogram;
//!
//! let mut hist = ApproximateHistogram::new(20).unwrap();
//! for i in 0..1_000 {
//!     hist.offer(i as f32).unwrap();
//! }
//!
//! let median = hist.quantile(0.5).unwrap();
//! assert!((median - 500.0).abs() < 50.0);
//! assert!(hist.sum(250.0) > 200.0);
//! ```

mod bin;
mod merge;
mod query;
mod serialize;
mod sketch;

pub use bin::BinWord;
pub use query::Histogram;
pub use sketch::ApproximateHistogram;
