//! Numerical tolerances and engine defaults.

/// Permissible distance of a probability mass function's sum from 1.
/// Sums outside `1 ± PROB_TOLERANCE` are a model-construction error.
pub const PROB_TOLERANCE: f64 = 1e-9;

/// Slack when checking value curves for monotonicity. A step of
/// `-1e-12` is floating-point noise, not a decreasing curve.
pub const CURVE_SLACK: f64 = 1e-12;

/// Default wishlist-size limit for the exact subset DP. Above this the
/// calculator refuses (or falls back to the independence approximation,
/// depending on [`crate::value_dp::FallbackMode`]).
pub const DEFAULT_MAX_EXACT_WISHLIST: usize = 16;

/// Default ceiling on exact DP table entries: 2^26 f64 slots (~512 MB).
pub const DEFAULT_MEMO_CEILING: usize = 1 << 26;

/// Hard upper bound on exact wishlist size — the pending set is a u32
/// bitmask, and 2^31 table entries is far past any sane memo ceiling.
pub const MAX_WISHLIST_BITS: usize = 31;

/// Distribution supports merge outcomes whose values differ by at most
/// this much when convolving value distributions.
pub const VALUE_MERGE_TOLERANCE: f64 = 1e-9;

/// Two-sided 95% normal quantile, used for confidence intervals.
pub const Z_95: f64 = 1.959963984540054;

/// A simulation report flags `insufficient_trials` when the 95% CI
/// half-width exceeds this fraction of |mean|.
pub const CI_WIDTH_WARN_RATIO: f64 = 0.05;

/// Trials per rayon work unit in batch simulation.
pub const SIM_CHUNK_SIZE: u64 = 4096;
