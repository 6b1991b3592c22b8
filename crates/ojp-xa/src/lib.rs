//! # ojp-xa
//!
//! The transaction branch registry (C7, §4.7): a `Xid`-keyed state machine
//! that delegates the actual two-phase-commit verbs to each branch's bound
//! [`resource::XaResource`], pinning the backend session behind it for the
//! lifetime of the branch.
//!
//! Generic over the backend connection type so the registry never depends
//! on a concrete driver (§1); [`ojp_pool`] supplies the pooling and
//! dual-condition release half, this crate supplies the Xid bookkeeping.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod registry;
pub mod resource;

pub use registry::XaRegistry;
pub use resource::{is_same_resource_manager, translate_backend_error, XaResource};
