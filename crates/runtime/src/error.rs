//! Error types for the protocol runtime.
//!
//! These cover programming and configuration mistakes only. Command
//! failures reported by a backend travel as [`cdp_protocol::ProtocolError`]
//! inside call results and are never raised through this type.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while wiring up the runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// Target options violate the connection/session invariant.
	#[error("Invalid target: {0}")]
	InvalidTarget(String),

	/// A root target was requested without a connection and no factory is installed.
	#[error("No connection supplied and no connection factory installed")]
	NoConnectionFactory,

	/// Domain is not known to the registry or target.
	#[error("Unknown domain: {0}")]
	UnknownDomain(String),

	/// Command is not registered.
	#[error("Unknown command: {0}")]
	UnknownCommand(String),

	/// Invalid configuration value.
	#[error("Configuration error: {0}")]
	Config(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns true if this error comes from target construction.
	pub fn is_invalid_target(&self) -> bool {
		matches!(self, Error::InvalidTarget(_) | Error::NoConnectionFactory)
	}
}
