//! approx_histogram: a streaming approximate histogram sketch
//!
//! This library implements the Ben-Haim / Tom-Tov streaming histogram with
//! per-bin exactness flags, out-of-range clamping limits, optimal and greedy
//! merge strategies, rank and quantile queries, and a compact binary
//! serialization.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod common;
pub mod histogram;

// Re-export core types for convenience
pub use common::{Mergeable, Result, Sketch, SketchError};
pub use histogram::{ApproximateHistogram, BinWord, Histogram};

/// Error types and result aliases for sketch operations
pub mod error {
    pub use crate::common::{Result, SketchError};
}
