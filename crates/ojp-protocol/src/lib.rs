//! # ojp-protocol
//!
//! Wire-orthogonal data model for the Open J Proxy RPC surface.
//!
//! This crate defines *what* the proxy core consumes on every RPC — session
//! identifiers, the cluster-health string, `Xid`s, the request/response
//! shapes of the operation table — without committing to any particular
//! byte encoding. The wire codec for SQL results, LOB streaming, and
//! parameter serialization is an external collaborator (see the crate's
//! [`rpc::OpaqueBlock`] type, which is exactly as opaque as that implies).
//!
//! ## Example
//!
//! ```
//! use ojp_protocol::cluster_health::cluster_health_string;
//! use ojp_protocol::endpoint::EndpointAddr;
//!
//! let endpoints = vec![
//!     (EndpointAddr::new("localhost", 10592), false),
//!     (EndpointAddr::new("localhost", 10591), true),
//! ];
//! assert_eq!(
//!     cluster_health_string(&endpoints),
//!     "localhost:10591(UP);localhost:10592(DOWN)"
//! );
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cluster_health;
pub mod endpoint;
pub mod error;
pub mod rpc;
pub mod sqlstate;
pub mod transport;
pub mod xid;

pub use endpoint::EndpointAddr;
pub use error::{OjpError, Result, XaErrorCode};
pub use rpc::{Request, Response};
pub use transport::RpcTransport;
pub use xid::Xid;
