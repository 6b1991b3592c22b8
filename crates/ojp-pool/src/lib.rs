//! # ojp-pool
//!
//! Backend connection pools for the Open J Proxy server (§4.4–§4.6):
//! a non-XA pool with the usual borrow/return/resize/close contract, and an
//! XA backend session pool whose release is gated on the dual condition
//! described in §4.6 — a backend XA session returns to the pool only once
//! its transaction has reached a terminal state *and* the owning logical
//! connection has closed.
//!
//! Both pools are generic over an SPI trait ([`backend::BackendConnection`]
//! / [`backend::XaBackendConnection`]) rather than any concrete database
//! driver; the driver and its XA implementation are out of scope here (§1).
//!
//! [`coordinator`] holds the pure resize arithmetic (§4.4) shared by both
//! pool kinds.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod non_xa;
pub mod xa;

pub use backend::{BackendConnection, ConnectionFactory, XaBackendConnection, XaConnectionFactory};
pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use non_xa::{Pool, PooledConnection, PoolMetrics, PoolStatus};
pub use xa::{XaPinnedSession, XaSessionPool};
