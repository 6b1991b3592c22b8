//! # ojp-testing
//!
//! In-memory backend and transport fakes for exercising the proxy core
//! without a real database or network socket: a [`backend::FakeConnection`]
//! that satisfies every SPI trait `ojp-pool`/`ojp-xa` are generic over, and
//! an [`transport::InMemoryTransport`] that lets a client and server wired
//! up in the same process trade requests directly.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
pub mod transport;

pub use backend::{connection_lost, FakeConnection, FakeConnectionFactory};
pub use transport::{Handler, InMemoryTransport};
