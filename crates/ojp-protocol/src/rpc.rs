//! RPC surface data shapes (§6).
//!
//! Wire encoding is orthogonal to these types (§1, §6): this module only
//! fixes the fields an implementer must carry on each operation. SQL
//! parameter values, result rows, and LOB bytes are represented as
//! [`OpaqueBlock`] — the codec for their contents is an external
//! collaborator the core never inspects.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::endpoint::EndpointAddr;
use crate::xid::Xid;

/// Opaque payload the core threads through without interpreting —
/// serialized SQL parameters, a row block, or LOB bytes.
pub type OpaqueBlock = Vec<u8>;

/// Session handle threaded through every RPC after `connect` (§6, §4.11).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Process-unique session identifier.
    pub session_id: Uuid,
    /// Identifier of the client process that owns this session.
    pub client_id: Uuid,
    /// Stable hash of `{url, user}`, used to key server-side pools.
    pub connection_hash: u64,
    /// Whether this session is bound to an XA backend session.
    pub is_xa: bool,
    /// The server endpoint this session is bound to, once known.
    pub target_server: Option<EndpointAddr>,
}

bitflags! {
    /// XA call flags (`TMNOFLAGS`, `TMJOIN`, ... per the X/Open XA standard).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct XaFlags: u32 {
        /// No flags; starts a brand-new transaction branch.
        const TMNOFLAGS = 0x0000_0000;
        /// Join an existing transaction branch.
        const TMJOIN = 0x0020_0000;
        /// Resume a suspended transaction branch.
        const TMRESUME = 0x0800_0000;
        /// Suspend the transaction branch; it may be resumed later.
        const TMSUSPEND = 0x0200_0000;
        /// The branch completed successfully.
        const TMSUCCESS = 0x0400_0000;
        /// The branch failed.
        const TMFAIL = 0x2000_0000;
        /// Start a recovery scan.
        const TMSTARTRSCAN = 0x0100_0000;
        /// End a recovery scan.
        const TMENDRSCAN = 0x0080_0000;
        /// One-phase optimization for commit.
        const TMONEPHASE = 0x4000_0000;
    }
}

/// Outcome of a committed/rolled-back transaction (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    /// The transaction committed.
    Commited,
    /// The transaction rolled back.
    RolledBack,
}

/// `connect` request (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Backend JDBC-equivalent URL (after stripping the OJP endpoint frame).
    pub url: String,
    /// Backend user name.
    pub user: String,
    /// Backend credential (password or token); never logged.
    pub credential: String,
    /// Client process identifier.
    pub client_id: Uuid,
    /// Whether the caller intends to use this session for XA work.
    pub is_xa: bool,
    /// Free-form connection properties.
    pub properties: std::collections::BTreeMap<String, String>,
    /// The full endpoint list the client knows about.
    pub server_endpoints: Vec<EndpointAddr>,
    /// Current cluster-health string (§4.2).
    pub cluster_health: String,
}

/// `connect` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// The newly created session.
    pub session: SessionInfo,
}

/// `terminateSession` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminateSessionRequest {
    /// Session to terminate.
    pub session: SessionInfo,
}

/// `startTransaction` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTransactionRequest {
    /// Owning session.
    pub session: SessionInfo,
}

/// `startTransaction` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTransactionResponse {
    /// Session, echoed back (auto-commit is now off).
    pub session: SessionInfo,
}

/// `commitTransaction` / `rollbackTransaction` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndTransactionRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// Current cluster-health string.
    pub cluster_health: String,
}

/// `commitTransaction` / `rollbackTransaction` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndTransactionResponse {
    /// Session, echoed back.
    pub session: SessionInfo,
    /// Resulting transaction status.
    pub status: TxnStatus,
}

/// `executeUpdate` / `executeQuery` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// SQL text, if not a previously-prepared statement.
    pub sql: Option<String>,
    /// Opaque server-side statement identifier, if previously prepared.
    pub statement_id: Option<u64>,
    /// Opaque, codec-owned parameter block.
    pub params: OpaqueBlock,
}

/// `executeUpdate` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteUpdateResponse {
    /// Number of rows affected.
    pub update_count: u64,
}

/// `executeQuery` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteQueryResponse {
    /// Opaque server-side handle for the open result set.
    pub result_set_id: u64,
}

/// `fetchNextRows` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchNextRowsRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// Result-set handle from a prior `executeQuery`.
    pub result_set_id: u64,
    /// Maximum number of rows to return in this block.
    pub max_rows: u32,
}

/// `fetchNextRows` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchNextRowsResponse {
    /// Opaque, codec-owned row block.
    pub rows: OpaqueBlock,
    /// Whether the result set is exhausted.
    pub done: bool,
}

/// `createLob` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLobRequest {
    /// Owning session.
    pub session: SessionInfo,
}

/// `createLob` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLobResponse {
    /// Opaque server-side LOB identifier.
    pub lob_id: u64,
}

/// `readLob` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadLobRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// LOB identifier from `createLob`.
    pub lob_id: u64,
    /// Byte offset to read from.
    pub offset: u64,
    /// Number of bytes to read.
    pub length: u64,
}

/// `readLob` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadLobResponse {
    /// Opaque data block.
    pub data: OpaqueBlock,
}

/// `xaStart` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaStartRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// Transaction branch identifier.
    pub xid: Xid,
    /// Start flags (`TMNOFLAGS`, `TMJOIN`, or `TMRESUME`).
    pub flags: XaFlags,
    /// Current cluster-health string.
    pub cluster_health: String,
}

/// `xaEnd` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaEndRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// Transaction branch identifier.
    pub xid: Xid,
    /// End flags (`TMSUCCESS`, `TMFAIL`, or `TMSUSPEND`).
    pub flags: XaFlags,
    /// Current cluster-health string.
    pub cluster_health: String,
}

/// `xaPrepare` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaPrepareRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// Transaction branch identifier.
    pub xid: Xid,
    /// Current cluster-health string.
    pub cluster_health: String,
}

/// `xaPrepare` response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct XaPrepareResponse {
    /// `true` if the branch is read-only and already retired.
    pub read_only: bool,
}

/// `xaCommit` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaCommitRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// Transaction branch identifier.
    pub xid: Xid,
    /// Whether this is a one-phase commit.
    pub one_phase: bool,
    /// Current cluster-health string.
    pub cluster_health: String,
}

/// `xaRollback` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaRollbackRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// Transaction branch identifier.
    pub xid: Xid,
    /// Current cluster-health string.
    pub cluster_health: String,
}

/// `xaRecover` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaRecoverRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// Recovery scan flag (`TMSTARTRSCAN`, `TMENDRSCAN`, or both).
    pub flag: XaFlags,
}

/// `xaRecover` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaRecoverResponse {
    /// In-doubt transaction branches known to the backend.
    pub xids: Vec<Xid>,
}

/// `xaForget` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaForgetRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// Transaction branch identifier.
    pub xid: Xid,
}

/// `xaSetTransactionTimeout` / `xaGetTransactionTimeout` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaTransactionTimeoutRequest {
    /// Owning session.
    pub session: SessionInfo,
    /// Seconds to set; ignored for a get request.
    pub seconds: Option<u32>,
}

/// `xaSetTransactionTimeout` / `xaGetTransactionTimeout` response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct XaTransactionTimeoutResponse {
    /// Current timeout, in seconds.
    pub seconds: u32,
}

/// `xaIsSameRm` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaIsSameRmRequest {
    /// This session.
    pub session: SessionInfo,
    /// The other session to compare against.
    pub other_session: SessionInfo,
}

/// `xaIsSameRm` response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct XaIsSameRmResponse {
    /// Whether the two sessions are backed by the same resource manager.
    pub same: bool,
}

/// Plain acknowledgement response for operations with no payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ack;

/// Every request shape the RPC surface supports (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// `connect`.
    Connect(ConnectRequest),
    /// `terminateSession`.
    TerminateSession(TerminateSessionRequest),
    /// `startTransaction`.
    StartTransaction(StartTransactionRequest),
    /// `commitTransaction`.
    CommitTransaction(EndTransactionRequest),
    /// `rollbackTransaction`.
    RollbackTransaction(EndTransactionRequest),
    /// `executeUpdate`.
    ExecuteUpdate(ExecuteRequest),
    /// `executeQuery`.
    ExecuteQuery(ExecuteRequest),
    /// `fetchNextRows`.
    FetchNextRows(FetchNextRowsRequest),
    /// `createLob`.
    CreateLob(CreateLobRequest),
    /// `readLob`.
    ReadLob(ReadLobRequest),
    /// `xaStart`.
    XaStart(XaStartRequest),
    /// `xaEnd`.
    XaEnd(XaEndRequest),
    /// `xaPrepare`.
    XaPrepare(XaPrepareRequest),
    /// `xaCommit`.
    XaCommit(XaCommitRequest),
    /// `xaRollback`.
    XaRollback(XaRollbackRequest),
    /// `xaRecover`.
    XaRecover(XaRecoverRequest),
    /// `xaForget`.
    XaForget(XaForgetRequest),
    /// `xaSetTransactionTimeout`.
    XaSetTransactionTimeout(XaTransactionTimeoutRequest),
    /// `xaGetTransactionTimeout`.
    XaGetTransactionTimeout(XaTransactionTimeoutRequest),
    /// `xaIsSameRm`.
    XaIsSameRm(XaIsSameRmRequest),
}

/// Every response shape the RPC surface supports (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Response to `connect`.
    Connect(ConnectResponse),
    /// Plain acknowledgement.
    Ack(Ack),
    /// Response to `startTransaction`.
    StartTransaction(StartTransactionResponse),
    /// Response to `commitTransaction`/`rollbackTransaction`.
    EndTransaction(EndTransactionResponse),
    /// Response to `executeUpdate`.
    ExecuteUpdate(ExecuteUpdateResponse),
    /// Response to `executeQuery`.
    ExecuteQuery(ExecuteQueryResponse),
    /// Response to `fetchNextRows`.
    FetchNextRows(FetchNextRowsResponse),
    /// Response to `createLob`.
    CreateLob(CreateLobResponse),
    /// Response to `readLob`.
    ReadLob(ReadLobResponse),
    /// Response to `xaPrepare`.
    XaPrepare(XaPrepareResponse),
    /// Response to `xaRecover`.
    XaRecover(XaRecoverResponse),
    /// Response to `xaGetTransactionTimeout`/`xaSetTransactionTimeout`.
    XaTransactionTimeout(XaTransactionTimeoutResponse),
    /// Response to `xaIsSameRm`.
    XaIsSameRm(XaIsSameRmResponse),
}

impl Request {
    /// The session this request targets, if any (§4.11 dispatch).
    #[must_use]
    pub fn session(&self) -> Option<&SessionInfo> {
        match self {
            Self::Connect(_) => None,
            Self::TerminateSession(r) => Some(&r.session),
            Self::StartTransaction(r) => Some(&r.session),
            Self::CommitTransaction(r) | Self::RollbackTransaction(r) => Some(&r.session),
            Self::ExecuteUpdate(r) | Self::ExecuteQuery(r) => Some(&r.session),
            Self::FetchNextRows(r) => Some(&r.session),
            Self::CreateLob(r) => Some(&r.session),
            Self::ReadLob(r) => Some(&r.session),
            Self::XaStart(r) => Some(&r.session),
            Self::XaEnd(r) => Some(&r.session),
            Self::XaPrepare(r) => Some(&r.session),
            Self::XaCommit(r) => Some(&r.session),
            Self::XaRollback(r) => Some(&r.session),
            Self::XaRecover(r) => Some(&r.session),
            Self::XaForget(r) => Some(&r.session),
            Self::XaSetTransactionTimeout(r) | Self::XaGetTransactionTimeout(r) => {
                Some(&r.session)
            }
            Self::XaIsSameRm(r) => Some(&r.session),
        }
    }

    /// The cluster-health string carried by this request, if the operation
    /// carries one (§4.2: every outbound RPC carries it; a handful of pure
    /// bookkeeping calls like `xaForget` do not need reconciliation).
    #[must_use]
    pub fn cluster_health(&self) -> Option<&str> {
        match self {
            Self::Connect(r) => Some(&r.cluster_health),
            Self::CommitTransaction(r) | Self::RollbackTransaction(r) => {
                Some(&r.cluster_health)
            }
            Self::XaStart(r) => Some(&r.cluster_health),
            Self::XaEnd(r) => Some(&r.cluster_health),
            Self::XaPrepare(r) => Some(&r.cluster_health),
            Self::XaCommit(r) => Some(&r.cluster_health),
            Self::XaRollback(r) => Some(&r.cluster_health),
            _ => None,
        }
    }

    /// Whether this is a session-creation RPC, which requires cluster-health
    /// reconciliation to happen *before* its substantive work (§4.2, §4.11).
    #[must_use]
    pub fn is_session_creation(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips_through_json() {
        let req = Request::XaStart(XaStartRequest {
            session: SessionInfo {
                session_id: Uuid::nil(),
                client_id: Uuid::nil(),
                connection_hash: 42,
                is_xa: true,
                target_server: Some(EndpointAddr::new("localhost", 10591)),
            },
            xid: Xid::new(1, vec![1, 2], vec![3]),
            flags: XaFlags::TMNOFLAGS,
            cluster_health: "localhost:10591(UP)".to_string(),
        });

        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, Request::XaStart(_)));
    }

    #[test]
    fn connect_has_no_session_but_carries_health() {
        let req = Request::Connect(ConnectRequest {
            url: "jdbc:postgresql://db/app".into(),
            user: "u".into(),
            credential: "p".into(),
            client_id: Uuid::nil(),
            is_xa: false,
            properties: Default::default(),
            server_endpoints: vec![],
            cluster_health: "h".into(),
        });
        assert!(req.session().is_none());
        assert_eq!(req.cluster_health(), Some("h"));
        assert!(req.is_session_creation());
    }
}
