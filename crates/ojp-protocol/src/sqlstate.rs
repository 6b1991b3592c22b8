//! SQL state conventions (§6).

/// Force-invalid connections surface this SQL state: "connection does not
/// exist / connection lost".
pub const CONNECTION_LOST: &str = "08006";

/// Substring a pool-exhaustion timeout's message is required to contain,
/// so application code that greps driver error text keeps working.
pub const POOL_EXHAUSTED_MARKER: &str = "POOL EXHAUSTED";
