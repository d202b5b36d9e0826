//! Transport abstraction hiding the physical channel.
//!
//! The router only ever sees serialized text: it hands outgoing envelopes
//! to [`Transport::send_raw_message`] and receives incoming ones through the
//! handler installed with [`Transport::set_on_message`]. How the bytes move
//! is up to the implementation.
//!
//! Two implementations ship with the crate:
//! - [`MemoryTransport`]: in-process channel driven by a [`RemoteEnd`]
//! - [`ParallelConnection`]: a proxy connection riding on another transport

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

mod memory;
mod parallel;

pub use memory::{MemoryTransport, RemoteEnd};
pub use parallel::ParallelConnection;

/// Handler invoked with each raw incoming message.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Handler invoked once with the disconnect reason.
pub type DisconnectHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Bidirectional message channel to a protocol backend.
pub trait Transport: Send + Sync {
	/// Sends one serialized envelope.
	fn send_raw_message(&self, message: &str);

	/// Installs (or clears) the incoming message handler.
	fn set_on_message(&self, handler: Option<MessageHandler>);

	/// Installs (or clears) the disconnect handler.
	fn set_on_disconnect(&self, handler: Option<DisconnectHandler>);

	/// Closes the channel.
	fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// A connection a session delegates all of its traffic to.
///
/// The router feeds every raw incoming message to each registered proxy.
pub trait ProxyConnection: Transport {
	/// Delivers a raw message to the proxy's handler.
	///
	/// Returns `false` when no handler is installed.
	fn on_message(&self, message: &str) -> bool;
}

/// Produces the default transport for targets built without one.
pub trait ConnectionFactory: Send + Sync {
	fn create(&self) -> Arc<dyn Transport>;
}

impl<F> ConnectionFactory for F
where
	F: Fn() -> Arc<dyn Transport> + Send + Sync,
{
	fn create(&self) -> Arc<dyn Transport> {
		self()
	}
}
