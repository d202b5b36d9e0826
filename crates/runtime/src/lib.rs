//! CDP Runtime - Session routing, call surfaces and event dispatch
//!
//! This crate multiplexes one transport connection into many logical
//! sessions, each addressing a remote target (a page, a worker, a nested
//! frame), and routes command/response/event traffic between callers and
//! that transport:
//!
//! - **Registry**: Command and event schemas keyed by `Domain.name`
//! - **Router**: Request ID assignment, reply correlation, proxy fan-out
//!   and the drain barrier
//! - **Target**: One session, its per-domain call surfaces and dispatchers
//! - **Call surfaces**: Validated positional calls and raw invocations that
//!   never fail
//! - **Transport**: The channel abstraction plus in-memory and parallel
//!   implementations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ feature code │  agents + DomainListener impls
//! └──────┬───────┘
//!        │ call / invoke / register_dispatcher
//! ┌──────▼───────┐
//! │    Target    │  one per session
//! └──────┬───────┘
//!        │ send_message / dispatch
//! ┌──────▼───────┐
//! │    Router    │  one per transport
//! └──────┬───────┘
//!        │ serialized envelopes
//! ┌──────▼───────┐
//! │  Transport   │
//! └──────────────┘
//! ```
//!
//! # Backend context
//!
//! There are no process-wide singletons. A [`Backend`] carries the
//! registry, the default connection factory, the diagnostic hooks and the
//! configuration, and every [`Target`] is built against one.
//!
//! # Runtimes
//!
//! Inside a tokio runtime deferred work is spawned. Without one it waits on
//! a per-thread queue that the router flushes around each incoming message;
//! [`run_deferred`] flushes it explicitly.

pub mod agent;
pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod router;
pub mod target;
pub mod tick;
pub mod transport;

// Re-export key types at crate root
pub use agent::{CallResult, Command, DomainAgent, RawResponse};
pub use backend::{Backend, BackendBuilder};
pub use config::{BackendConfig, DEFAULT_LONG_POLLING_METHODS};
pub use diagnostics::{Diagnostics, Report, ReportLevel, ReportLog, SentMessage};
pub use dispatcher::{DispatcherManager, DomainListener, EventHandlers};
pub use error::{Error, Result};
pub use registry::{CommandParameter, CommandSchema, MethodRegistry, ParamType};
pub use router::{DrainCallback, ResponseCallback, Router, SessionTarget};
pub use target::{Target, TargetOptions};
pub use tick::{pending_deferred, run_deferred};
pub use transport::{
	ConnectionFactory, MemoryTransport, ParallelConnection, ProxyConnection, RemoteEnd, Transport,
};
