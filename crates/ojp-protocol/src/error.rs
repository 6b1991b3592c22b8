//! Error taxonomy (§7).

use uuid::Uuid;

/// Convenience alias for `Result<T, OjpError>`.
pub type Result<T> = std::result::Result<T, OjpError>;

/// XA protocol error codes (§4.7, §7), mapped from the backend's XA
/// responses or synthesized by the registry when a non-XA cause occurs
/// mid-transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum XaErrorCode {
    /// `XAER_DUPID`: a transaction branch with this Xid already exists.
    #[error("XAER_DUPID: duplicate transaction branch")]
    DupId,
    /// `XAER_NOTA`: the Xid is not known to the resource manager.
    #[error("XAER_NOTA: unknown transaction branch")]
    NotA,
    /// `XAER_PROTO`: the call was made in an invalid state for the branch.
    #[error("XAER_PROTO: protocol violation")]
    Proto,
    /// `XAER_RMERR`: the resource manager encountered an error.
    #[error("XAER_RMERR: resource manager error")]
    RmErr,
    /// `XAER_RMFAIL`: the resource manager is unavailable.
    #[error("XAER_RMFAIL: resource manager unavailable")]
    RmFail,
    /// `XAER_INVAL`: invalid arguments were given.
    #[error("XAER_INVAL: invalid arguments")]
    Inval,
}

/// Outcome of a `prepare` call that is not itself an error: either the
/// backend voted to commit (`XA_OK`) or it reports no durable state to
/// commit (`XA_RDONLY`), in which case the registry retires the context
/// immediately (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaPrepareOutcome {
    /// Backend voted to commit; the coordinator must still call `commit`.
    Ok,
    /// Backend has no work to commit; the transaction is already complete.
    ReadOnly,
}

/// The full error taxonomy the core can surface (§7).
#[derive(Debug, thiserror::Error)]
pub enum OjpError {
    /// Transport to a server endpoint was unavailable (connection-level).
    #[error("transport unavailable: {message}")]
    TransportUnavailable {
        /// Human-readable detail from the transport.
        message: String,
    },

    /// The RPC's deadline elapsed before a response arrived (connection-level).
    #[error("deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded {
        /// Milliseconds waited before giving up.
        elapsed_ms: u64,
    },

    /// The RPC was cancelled by the caller (connection-level).
    #[error("RPC cancelled")]
    Cancelled,

    /// A transport-reported error whose message matches one of the
    /// connection-level keywords (connection/timeout/server-unavailable).
    #[error("connection lost: {message}")]
    ConnectionLost {
        /// The underlying transport message.
        message: String,
    },

    /// §4.11: an RPC carried a `sessionId` the server does not track.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// The unrecognized session identifier.
        session_id: Uuid,
    },

    /// The session was looked up but belongs to a different server —
    /// only possible under a routing misconfiguration (§4.11).
    #[error("session {session_id} is misrouted")]
    SessionMisrouted {
        /// The session identifier that was misrouted.
        session_id: Uuid,
    },

    /// The session exists but has been terminated.
    #[error("session {session_id} has been terminated")]
    SessionTerminated {
        /// The terminated session's identifier.
        session_id: Uuid,
    },

    /// Race between health-checker invalidation and connect completion
    /// (§7): the caller must discard the session and retry.
    #[error("session invalidated during connect; retry")]
    SessionInvalidatedDuringConnect,

    /// A database-level error returned inside a successful RPC frame,
    /// preserved verbatim for the caller.
    #[error("database error [{sql_state}]: {message}")]
    Database {
        /// SQL state code reported by the backend.
        sql_state: String,
        /// Backend-provided message text.
        message: String,
    },

    /// An XA protocol-level error, carrying the original cause when one
    /// triggered the translation (§4.7: "translate to the appropriate XA
    /// error code ... carries the original cause").
    #[error("XA error: {code}")]
    Xa {
        /// The XA error code.
        code: XaErrorCode,
        /// Original cause, if the error was translated from a backend
        /// exception rather than synthesized by the registry itself.
        #[source]
        cause: Option<Box<OjpError>>,
    },

    /// Pool exhaustion: no connection became available before
    /// `connectionTimeout` elapsed (§4.5, §7).
    #[error("POOL EXHAUSTED: waited {waited_ms}ms, {in_use}/{max} in use")]
    PoolExhausted {
        /// Milliseconds waited before giving up.
        waited_ms: u64,
        /// Connections in use at the time of the timeout.
        in_use: u32,
        /// Configured maximum pool size.
        max: u32,
    },

    /// No healthy server endpoint was available to route to.
    #[error("no healthy server available")]
    NoHealthyServer,

    /// Configuration is invalid; fails fast at initialization (§7).
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl OjpError {
    /// Classify this error per §4.8 / §7: connection-level errors are
    /// retry-safe for `xaStart` and otherwise trigger endpoint failure
    /// handling; everything else is surfaced to the caller unmodified.
    #[must_use]
    pub fn is_connection_level(&self) -> bool {
        match self {
            Self::TransportUnavailable { .. }
            | Self::DeadlineExceeded { .. }
            | Self::Cancelled
            | Self::ConnectionLost { .. } => true,
            Self::Database { .. }
            | Self::Xa { .. }
            | Self::SessionNotFound { .. }
            | Self::SessionMisrouted { .. }
            | Self::SessionTerminated { .. }
            | Self::SessionInvalidatedDuringConnect
            | Self::PoolExhausted { .. }
            | Self::NoHealthyServer
            | Self::Configuration(_) => false,
        }
    }

    /// Build a [`OjpError::ConnectionLost`] if `message` contains one of the
    /// connection-level keywords (§4.8), otherwise `None`. Used to classify
    /// errors surfaced by a transport that does not already report a typed
    /// connection-level variant.
    #[must_use]
    pub fn classify_message(message: &str) -> Option<Self> {
        const KEYWORDS: [&str; 3] = ["connection", "timeout", "server-unavailable"];
        let lower = message.to_lowercase();
        if KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            Some(Self::ConnectionLost {
                message: message.to_string(),
            })
        } else {
            None
        }
    }

    /// Wrap a non-XA cause as `XAER_RMERR`, preserving the cause (§4.7: "the
    /// registry translates non-XA causes to `RMERR`").
    #[must_use]
    pub fn into_xa_rmerr(self) -> Self {
        Self::Xa {
            code: XaErrorCode::RmErr,
            cause: Some(Box::new(self)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_level_classification() {
        assert!(
            OjpError::TransportUnavailable {
                message: "x".into()
            }
            .is_connection_level()
        );
        assert!(OjpError::Cancelled.is_connection_level());
        assert!(!OjpError::SessionNotFound {
            session_id: Uuid::nil()
        }
        .is_connection_level());
        assert!(
            !OjpError::Database {
                sql_state: "42000".into(),
                message: "syntax error".into()
            }
            .is_connection_level()
        );
    }

    #[test]
    fn keyword_classification() {
        assert!(OjpError::classify_message("connection reset by peer").is_some());
        assert!(OjpError::classify_message("operation timeout").is_some());
        assert!(OjpError::classify_message("server-unavailable: retry later").is_some());
        assert!(OjpError::classify_message("duplicate key value").is_none());
    }
}
