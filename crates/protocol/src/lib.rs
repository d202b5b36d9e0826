//! Wire types for the remote debugging protocol.
//!
//! This crate contains the serde-serializable shapes exchanged with a
//! protocol backend: the message envelope used in both directions and the
//! JSON descriptor format that domains publish their commands and events in.
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization and name helpers
//! - **Field-exact**: Match the envelope as it appears on the wire
//!
//! Session routing, correlation and dispatch are built on top of these
//! types in `cdp-runtime`.

pub mod message;
pub mod schema;

pub use message::*;
pub use schema::*;
