//! # ojp-server
//!
//! The proxy server's session and pool management (C2, C3, C4, C11):
//! tracking the cluster-health view each client has reported, dividing a
//! globally-configured pool size across healthy servers, and routing
//! session-bearing RPCs to the session they name.
//!
//! The connection pools (C5, C6) and the XA transaction registry (C7) live
//! in [`ojp_pool`] and [`ojp_xa`] respectively; [`RequestDispatcher`] ties
//! them to C4/C11 by binding each session to the backend resource `connect`
//! borrowed and dispatching later requests to it, rather than reimplementing
//! either pool kind or the registry here.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cluster_health;
pub mod dispatcher;
pub mod pool_coordinator;
pub mod session;

pub use cluster_health::ClusterHealthTracker;
pub use dispatcher::RequestDispatcher;
pub use pool_coordinator::{ConfiguredSizing, PoolCoordinator, Resizable};
pub use session::{BoundBackend, Session, SessionTracker};
