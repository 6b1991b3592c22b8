//! Pool coordinator resize math (§4.4).
//!
//! This module is pure arithmetic and ordering policy; the pools in this
//! crate each own the actual mechanics of growing/shrinking (pre-warming,
//! eviction) and call into this module to decide the *numbers* and the
//! *order* in which `set_max`/`set_min` must be applied.

/// Divide a globally-configured pool size across `healthy_count` servers,
/// per §4.4: `ceil(configured / healthy_count)`, lower-bounded by 1.
///
/// `healthy_count == 0` is treated as 1 — a coordinator reconciling with no
/// healthy endpoints is a transient state the pool should still hold a
/// sane (if useless) size for, rather than divide by zero.
#[must_use]
pub fn applied_limit(configured: u32, healthy_count: u32) -> u32 {
    let healthy_count = healthy_count.max(1);
    configured.div_ceil(healthy_count).max(1)
}

/// Compute `{appliedMax, appliedMin}` for the current healthy-endpoint count.
#[must_use]
pub fn applied_limits(configured_max: u32, configured_min: u32, healthy_count: u32) -> (u32, u32) {
    (
        applied_limit(configured_max, healthy_count),
        applied_limit(configured_min, healthy_count),
    )
}

/// The order in which a pool's `max` and `min` must be updated to avoid a
/// transient violation of the pool's internal `min <= max` invariant (§4.4,
/// §5 "deadlock avoidance").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOrder {
    /// Apply `min` first, then `max` — used when the new max is smaller
    /// than the current one, so `min` never transiently exceeds it.
    MinThenMax,
    /// Apply `max` first, then `min` — used when the new max is larger
    /// than or equal to the current one.
    MaxThenMin,
}

/// Decide the resize order for a transition from `current_max` to `new_max`.
#[must_use]
pub fn resize_order(current_max: u32, new_max: u32) -> ResizeOrder {
    if new_max < current_max {
        ResizeOrder::MinThenMax
    } else {
        ResizeOrder::MaxThenMin
    }
}
