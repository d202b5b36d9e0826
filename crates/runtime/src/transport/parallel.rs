//! Proxy connection multiplexed over an existing transport.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::{DisconnectHandler, MessageHandler, ProxyConnection, Transport};

/// A second logical connection to one session, sharing its parent's channel.
///
/// Outgoing messages without a `sessionId` are stamped with this
/// connection's session. Incoming traffic is whatever the owning router
/// forwards, verbatim.
pub struct ParallelConnection {
	connection: Arc<dyn Transport>,
	session_id: String,
	on_message: RwLock<Option<MessageHandler>>,
	on_disconnect: RwLock<Option<DisconnectHandler>>,
}

impl ParallelConnection {
	pub fn new(connection: Arc<dyn Transport>, session_id: impl Into<String>) -> Self {
		Self {
			connection,
			session_id: session_id.into(),
			on_message: RwLock::new(None),
			on_disconnect: RwLock::new(None),
		}
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}
}

impl Transport for ParallelConnection {
	fn send_raw_message(&self, message: &str) {
		let mut value: Value = match serde_json::from_str(message) {
			Ok(value) => value,
			Err(e) => {
				tracing::warn!(error = %e, "Forwarding unparseable message unchanged");
				self.connection.send_raw_message(message);
				return;
			}
		};
		if let Some(object) = value.as_object_mut() {
			let missing = object
				.get("sessionId")
				.and_then(Value::as_str)
				.is_none_or(str::is_empty);
			if missing {
				object.insert("sessionId".into(), Value::String(self.session_id.clone()));
			}
		}
		self.connection.send_raw_message(&value.to_string());
	}

	fn set_on_message(&self, handler: Option<MessageHandler>) {
		*self.on_message.write() = handler;
	}

	fn set_on_disconnect(&self, handler: Option<DisconnectHandler>) {
		*self.on_disconnect.write() = handler;
	}

	fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
		Box::pin(async move {
			let handler = self.on_disconnect.write().take();
			if let Some(handler) = handler {
				handler("force disconnect");
			}
			*self.on_message.write() = None;
		})
	}
}

impl ProxyConnection for ParallelConnection {
	fn on_message(&self, message: &str) -> bool {
		let handler = self.on_message.read().clone();
		match handler {
			Some(handler) => {
				handler(message);
				true
			}
			None => false,
		}
	}
}
