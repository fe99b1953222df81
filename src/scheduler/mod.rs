//! Send-path pacing: the pluggable congestion-control seam (spec.md §4.3/§6).

pub mod rate;

pub use rate::{FixedRateController, RateController};
