//! XA transaction branch identifier (§3, §9 "Xid identity").

use std::fmt;

/// Branch identifier comprising format-id, global-transaction-id bytes, and
/// branch-qualifier bytes, per the X/Open XA standard.
///
/// Equality and hashing are structural (by value), which is what lets the
/// transaction registry look a branch up by a freshly-deserialized `Xid`
/// that is merely *equal* to the one passed at `start`. The registry itself
/// must still hand the *original* `Xid` instance back to the backend on
/// `end`/`prepare`/`commit`/`rollback` (§9) — callers that need that
/// guarantee should hold on to the `Arc<Xid>` the registry returns from
/// `start`, not reconstruct an equal one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Xid {
    /// XA format identifier.
    pub format_id: i32,
    /// Global transaction identifier bytes.
    pub global_txn_id: Vec<u8>,
    /// Branch qualifier bytes.
    pub branch_qualifier: Vec<u8>,
}

impl Xid {
    /// Build a new `Xid` from its three components.
    #[must_use]
    pub fn new(format_id: i32, global_txn_id: Vec<u8>, branch_qualifier: Vec<u8>) -> Self {
        Self {
            format_id,
            global_txn_id,
            branch_qualifier,
        }
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Xid(fmt={}, gtrid={}, bqual={})",
            self.format_id,
            hex(&self.global_txn_id),
            hex(&self.branch_qualifier)
        )
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
