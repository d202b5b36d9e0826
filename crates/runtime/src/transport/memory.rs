//! In-process transport with a scriptable remote end.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{DisconnectHandler, MessageHandler, Transport};

/// Transport whose far side is a [`RemoteEnd`] held by the caller.
///
/// Outgoing messages are queued on an unbounded channel. Incoming messages
/// are delivered synchronously on the caller's turn.
pub struct MemoryTransport {
	outgoing: mpsc::UnboundedSender<String>,
	on_message: RwLock<Option<MessageHandler>>,
	on_disconnect: RwLock<Option<DisconnectHandler>>,
	closed: AtomicBool,
}

impl MemoryTransport {
	pub fn pair() -> (Arc<Self>, RemoteEnd) {
		let (tx, rx) = mpsc::unbounded_channel();
		let transport = Arc::new(Self {
			outgoing: tx,
			on_message: RwLock::new(None),
			on_disconnect: RwLock::new(None),
			closed: AtomicBool::new(false),
		});
		let remote = RemoteEnd {
			transport: Arc::clone(&transport),
			sent: rx,
		};
		(transport, remote)
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	fn close_with(&self, reason: &str) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		let handler = self.on_disconnect.write().take();
		if let Some(handler) = handler {
			handler(reason);
		}
	}
}

impl Transport for MemoryTransport {
	fn send_raw_message(&self, message: &str) {
		if self.is_closed() {
			tracing::debug!("Dropping message on closed memory transport");
			return;
		}
		let _ = self.outgoing.send(message.to_string());
	}

	fn set_on_message(&self, handler: Option<MessageHandler>) {
		*self.on_message.write() = handler;
	}

	fn set_on_disconnect(&self, handler: Option<DisconnectHandler>) {
		*self.on_disconnect.write() = handler;
	}

	fn disconnect(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
		Box::pin(async move { self.close_with("force disconnect") })
	}
}

/// The backend side of a [`MemoryTransport`].
pub struct RemoteEnd {
	transport: Arc<MemoryTransport>,
	sent: mpsc::UnboundedReceiver<String>,
}

impl RemoteEnd {
	pub fn transport(&self) -> Arc<MemoryTransport> {
		Arc::clone(&self.transport)
	}

	/// Delivers a raw message to the transport's handler.
	///
	/// Returns `false` if no handler is installed or the transport is closed.
	pub fn deliver(&self, raw: &str) -> bool {
		if self.transport.is_closed() {
			return false;
		}
		let handler = self.transport.on_message.read().clone();
		match handler {
			Some(handler) => {
				handler(raw);
				true
			}
			None => false,
		}
	}

	pub fn deliver_json(&self, message: &Value) -> bool {
		self.deliver(&message.to_string())
	}

	/// Simulates the backend hanging up.
	pub fn hang_up(&self, reason: &str) {
		self.transport.close_with(reason);
	}

	/// Waits for the next raw message sent by the client.
	pub async fn next_sent(&mut self) -> Option<String> {
		self.sent.recv().await
	}

	/// Waits for the next sent message, parsed as JSON.
	pub async fn next_request(&mut self) -> Option<Value> {
		let raw = self.sent.recv().await?;
		serde_json::from_str(&raw).ok()
	}

	/// Returns every message sent so far without waiting.
	pub fn take_sent(&mut self) -> Vec<Value> {
		let mut messages = Vec::new();
		while let Ok(raw) = self.sent.try_recv() {
			if let Ok(value) = serde_json::from_str(&raw) {
				messages.push(value);
			}
		}
		messages
	}
}
