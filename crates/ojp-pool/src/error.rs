//! Pool error types.

/// Errors a pool can return from `borrow`, `resize`, or `close` (§4.5, §4.6).
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No connection became available before `connectionTimeout` elapsed.
    #[error("POOL EXHAUSTED: waited {waited_ms}ms, {in_use}/{max} in use")]
    Exhausted {
        /// Milliseconds waited before giving up.
        waited_ms: u64,
        /// Connections in use at the time of the timeout.
        in_use: u32,
        /// Configured maximum pool size.
        max: u32,
    },

    /// The pool has been closed and can no longer hand out connections.
    #[error("pool is closed")]
    Closed,

    /// Backend connection factory failed to create a new connection.
    #[error("failed to create backend connection: {0}")]
    CreateFailed(String),

    /// Sanitizing a returned connection failed; the connection was destroyed
    /// rather than returned to the pool (§4.5).
    #[error("failed to sanitize connection on return: {0}")]
    SanitizeFailed(String),

    /// Pool configuration was invalid (e.g. `min > max`).
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias for `Result<T, PoolError>`.
pub type Result<T> = std::result::Result<T, PoolError>;
