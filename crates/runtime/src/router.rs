//! Session router: request/response correlation over one transport.
//!
//! The router owns the transport and multiplexes it into sessions, each
//! addressing one target. It handles:
//! - Assigning monotonically increasing request IDs (starting at 1)
//! - Recording pending callbacks per session and correlating replies by ID
//! - Fanning raw incoming traffic out to proxy connections
//! - Routing events to the session's target
//! - The drain barrier used to sequence test steps
//!
//! # Message Flow
//!
//! 1. A call surface calls [`Router::send_message`] with a callback
//! 2. The router assigns an ID, stores `(callback, method)` under the session
//! 3. The serialized envelope goes out through the transport
//! 4. The reply arrives through the transport's message handler
//! 5. The router finds the session, removes the callback by ID and invokes it
//!
//! Callbacks and listeners always run with no router lock held, so they may
//! send further messages or register sessions.
//!
//! Connection-closed errors and drain passes run on a later turn. Outside a
//! tokio runtime that turn is the router's next incoming message, or an
//! explicit [`run_deferred`](crate::tick::run_deferred).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use cdp_protocol::{
	EventMessage, Message, MessageId, MessageKind, ProtocolError, Request, split_qualified_name,
};
use downcast_rs::{DowncastSync, impl_downcast};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::{Notify, oneshot};

use crate::config::BackendConfig;
use crate::diagnostics::{Diagnostics, SentMessage};
use crate::tick;
use crate::transport::{ProxyConnection, Transport};

/// Callback completing a pending command: `(error, result)`.
pub type ResponseCallback = Box<dyn FnOnce(Option<ProtocolError>, Option<Value>) + Send>;

/// Callback queued on the drain barrier.
pub type DrainCallback = Box<dyn FnOnce() + Send>;

/// The router's view of the entity behind a session.
pub trait SessionTarget: DowncastSync {
	/// Handles an event addressed to this session.
	fn dispatch(&self, message: EventMessage);

	/// Tears the target down. Must be idempotent.
	fn dispose(&self, reason: &str);
}

impl_downcast!(sync SessionTarget);

struct PendingCall {
	callback: ResponseCallback,
	method: String,
}

struct Session {
	target: Weak<dyn SessionTarget>,
	callbacks: BTreeMap<MessageId, PendingCall>,
	proxy_connection: Option<Arc<dyn ProxyConnection>>,
}

#[derive(Default)]
struct RouterState {
	sessions: HashMap<String, Session>,
	pending_responses_count: usize,
	pending_long_polling_ids: HashSet<MessageId>,
	pending_scripts: Vec<DrainCallback>,
	draining: bool,
}

impl RouterState {
	fn has_outstanding_non_long_polling_requests(&self) -> bool {
		self.pending_responses_count > self.pending_long_polling_ids.len()
	}
}

/// Where an incoming message goes once the session is resolved.
enum Route {
	UnknownSession,
	Proxied,
	Response {
		call: Option<PendingCall>,
		drain: bool,
	},
	Event(Weak<dyn SessionTarget>),
	Invalid,
}

pub struct Router {
	connection: Arc<dyn Transport>,
	last_id: AtomicU64,
	state: Mutex<RouterState>,
	long_polling_methods: HashSet<String>,
	diagnostics: Arc<Diagnostics>,
	idle: Arc<Notify>,
}

impl Router {
	/// Wraps `connection` and installs the router's message and disconnect handlers.
	pub fn new(
		connection: Arc<dyn Transport>,
		diagnostics: Arc<Diagnostics>,
		config: &BackendConfig,
	) -> Arc<Self> {
		let router = Arc::new(Self {
			connection,
			last_id: AtomicU64::new(1),
			state: Mutex::new(RouterState::default()),
			long_polling_methods: config.long_polling_set(),
			diagnostics,
			idle: Arc::new(Notify::new()),
		});

		let weak = Arc::downgrade(&router);
		router
			.connection
			.set_on_message(Some(Arc::new(move |raw: &str| {
				if let Some(router) = weak.upgrade() {
					router.on_message(raw);
				}
			})));

		let weak = Arc::downgrade(&router);
		router
			.connection
			.set_on_disconnect(Some(Arc::new(move |reason: &str| {
				if let Some(router) = weak.upgrade() {
					router.on_disconnect(reason);
				}
			})));

		router
	}

	pub fn connection(&self) -> Arc<dyn Transport> {
		Arc::clone(&self.connection)
	}

	pub fn diagnostics(&self) -> &Arc<Diagnostics> {
		&self.diagnostics
	}

	/// Allocates the next request ID. IDs are never reused.
	pub fn next_message_id(&self) -> MessageId {
		self.last_id.fetch_add(1, Ordering::SeqCst)
	}

	/// Registers a session for `target`.
	///
	/// Only one session should hold a proxy connection; a second one is
	/// logged and registered anyway.
	pub fn register_session(
		&self,
		target: Weak<dyn SessionTarget>,
		session_id: &str,
		proxy_connection: Option<Arc<dyn ProxyConnection>>,
	) {
		let mut state = self.state.lock();
		if proxy_connection.is_some()
			&& state
				.sessions
				.values()
				.any(|s| s.proxy_connection.is_some())
		{
			tracing::warn!(
				session_id,
				"Multiple simultaneous proxy connections are currently unsupported"
			);
		}
		state.sessions.insert(
			session_id.to_string(),
			Session {
				target,
				callbacks: BTreeMap::new(),
				proxy_connection,
			},
		);
		tracing::debug!(session_id, "Registered session");
	}

	/// Removes a session, failing each of its pending calls asynchronously.
	///
	/// The calls leave the pending table before this returns; their
	/// callbacks run on a later tick.
	pub fn unregister_session(self: &Arc<Self>, session_id: &str) {
		let (session, idle, drain) = {
			let mut state = self.state.lock();
			let Some(session) = state.sessions.remove(session_id) else {
				return;
			};
			for id in session.callbacks.keys() {
				state.pending_long_polling_ids.remove(id);
			}
			state.pending_responses_count = state
				.pending_responses_count
				.saturating_sub(session.callbacks.len());
			let idle = !state.has_outstanding_non_long_polling_requests();
			(session, idle, idle && !state.pending_scripts.is_empty())
		};

		tracing::debug!(
			session_id,
			pending = session.callbacks.len(),
			"Unregistered session"
		);
		if idle {
			self.idle.notify_waiters();
		}
		for call in session.callbacks.into_values() {
			Self::dispatch_unregister_session_error(call.callback, &call.method);
		}
		if drain {
			self.schedule_drain();
		}
	}

	pub fn target_by_session_id(&self, session_id: &str) -> Option<Arc<dyn SessionTarget>> {
		self.state
			.lock()
			.sessions
			.get(session_id)
			.and_then(|s| s.target.upgrade())
	}

	pub fn has_session(&self, session_id: &str) -> bool {
		self.state.lock().sessions.contains_key(session_id)
	}

	pub fn session_count(&self) -> usize {
		self.state.lock().sessions.len()
	}

	/// Number of sent commands still waiting for a reply.
	pub fn pending_response_count(&self) -> usize {
		self.state.lock().pending_responses_count
	}

	pub fn has_outstanding_non_long_polling_requests(&self) -> bool {
		self.state.lock().has_outstanding_non_long_polling_requests()
	}

	/// Sends a command on `session_id` and records `callback` for its reply.
	///
	/// A send to an unknown session is dropped and its callback never runs.
	pub fn send_message(
		&self,
		session_id: &str,
		domain: &str,
		method: &str,
		params: Option<Map<String, Value>>,
		callback: ResponseCallback,
	) {
		let id = self.next_message_id();
		let request = Request::new(id, method, params, session_id);

		self.diagnostics.message_sent(|| SentMessage {
			id,
			domain: domain.to_string(),
			method: method.to_string(),
			params: Value::Object(request.params.clone().unwrap_or_default()),
			session_id: session_id.to_string(),
		});

		let raw = match serde_json::to_string(&request) {
			Ok(raw) => raw,
			Err(e) => {
				self.diagnostics
					.error(&format!("Failed to serialize {method} request: {e}"));
				return;
			}
		};

		{
			let mut state = self.state.lock();
			state.pending_responses_count += 1;
			if self.long_polling_methods.contains(method) {
				state.pending_long_polling_ids.insert(id);
			}
			let Some(session) = state.sessions.get_mut(session_id) else {
				tracing::debug!(id, method, session_id, "Dropping message for unknown session");
				return;
			};
			session.callbacks.insert(
				id,
				PendingCall {
					callback,
					method: method.to_string(),
				},
			);
		}

		tracing::debug!(id, method, session_id, "Sending message");
		self.diagnostics.frontend_dump(&raw);
		self.connection.send_raw_message(&raw);
	}

	/// Sends an arbitrary command, bypassing call-surface validation.
	pub fn send_raw_message_for_testing(
		&self,
		method: &str,
		params: Option<Value>,
		callback: Option<ResponseCallback>,
		session_id: &str,
	) {
		let (domain, _) = split_qualified_name(method);
		let params = match params {
			Some(Value::Object(map)) => Some(map),
			_ => None,
		};
		let callback = callback.unwrap_or_else(|| Box::new(|_, _| {}));
		self.send_message(session_id, domain, method, params, callback);
	}

	fn on_message(self: &Arc<Self>, raw: &str) {
		tick::run_deferred();
		self.handle_message(raw);
		tick::run_deferred();
	}

	fn handle_message(self: &Arc<Self>, raw: &str) {
		let value: Value = match serde_json::from_str(raw) {
			Ok(value) => value,
			Err(e) => {
				self.diagnostics.protocol_error(
					&format!("Protocol Error: the message is not valid JSON ({e})"),
					&Value::String(raw.to_string()),
				);
				return;
			}
		};
		self.diagnostics.message_received(raw, &value);

		let proxies: Vec<Arc<dyn ProxyConnection>> = self
			.state
			.lock()
			.sessions
			.values()
			.filter_map(|s| s.proxy_connection.clone())
			.collect();
		let mut suppress_unknown_message_errors = false;
		for proxy in proxies {
			if !proxy.on_message(raw) {
				self.diagnostics.protocol_error(
					"Protocol Error: the session has a proxyConnection with no message handler",
					&value,
				);
				continue;
			}
			suppress_unknown_message_errors = true;
		}

		let message: Message = match serde_json::from_value(value.clone()) {
			Ok(message) => message,
			Err(e) => {
				self.diagnostics.protocol_error(
					&format!("Protocol Error: the message has an invalid envelope ({e})"),
					&value,
				);
				return;
			}
		};

		match self.route(&message) {
			Route::UnknownSession => {
				if !suppress_unknown_message_errors {
					self.diagnostics
						.protocol_error("Protocol Error: the message with wrong session id", &value);
				}
			}
			Route::Proxied => {}
			Route::Response { call: None, .. } => {
				if message.error.as_ref().is_some_and(ProtocolError::is_connection_closed) {
					return;
				}
				if !suppress_unknown_message_errors {
					self.diagnostics
						.protocol_error("Protocol Error: the message with wrong id", &value);
				}
			}
			Route::Response {
				call: Some(call),
				drain,
			} => {
				(call.callback)(message.error, message.result);
				if drain {
					self.schedule_drain();
				}
			}
			Route::Event(target) => match (target.upgrade(), message.into_event()) {
				(Some(target), Some(event)) => target.dispatch(event),
				(None, Some(event)) => {
					tracing::debug!(method = %event.method, "Event for dropped target (ignored)");
				}
				(_, None) => {}
			},
			Route::Invalid => {
				self.diagnostics
					.protocol_error("Protocol Error: the message without method", &value);
			}
		}
	}

	/// Resolves a message against the session table, removing a matched callback.
	fn route(&self, message: &Message) -> Route {
		let mut guard = self.state.lock();
		let state = &mut *guard;
		let Some(session) = state.sessions.get_mut(message.session_id()) else {
			return Route::UnknownSession;
		};
		if session.proxy_connection.is_some() {
			return Route::Proxied;
		}
		match message.kind() {
			MessageKind::Response(id) => {
				let call = session.callbacks.remove(&id);
				if call.is_none() {
					return Route::Response { call, drain: false };
				}
				state.pending_responses_count = state.pending_responses_count.saturating_sub(1);
				state.pending_long_polling_ids.remove(&id);
				let idle = !state.has_outstanding_non_long_polling_requests();
				if idle {
					self.idle.notify_waiters();
				}
				Route::Response {
					call,
					drain: idle && !state.pending_scripts.is_empty(),
				}
			}
			MessageKind::Event => Route::Event(session.target.clone()),
			MessageKind::Invalid => Route::Invalid,
		}
	}

	fn on_disconnect(&self, reason: &str) {
		tracing::info!(reason, "Connection disconnected");
		if let Some(target) = self.target_by_session_id("") {
			target.dispose(reason);
		}
	}

	/// Runs `callback` once no non-long-polling request is outstanding.
	///
	/// Callbacks run in FIFO order on a later tick. A callback queued while
	/// a drain pass is running waits for the next pass.
	pub fn run_after_pending_dispatches(self: &Arc<Self>, callback: impl FnOnce() + Send + 'static) {
		self.state.lock().pending_scripts.push(Box::new(callback));
		self.schedule_drain();
	}

	/// Resolves once the drain barrier releases.
	pub fn wait_for_pending_dispatches(self: &Arc<Self>) -> impl Future<Output = ()> + Send + 'static {
		let (tx, rx) = oneshot::channel();
		self.run_after_pending_dispatches(move || {
			let _ = tx.send(());
		});
		async move {
			let _ = rx.await;
		}
	}

	fn schedule_drain(self: &Arc<Self>) {
		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			let weak = Arc::downgrade(self);
			tick::defer(move || {
				if let Some(router) = weak.upgrade() {
					router.execute_after_pending_dispatches();
				}
			});
			return;
		};

		let weak = Arc::downgrade(self);
		let idle = Arc::clone(&self.idle);
		handle.spawn(async move {
			loop {
				let notified = idle.notified();
				tokio::pin!(notified);
				notified.as_mut().enable();
				{
					let Some(router) = weak.upgrade() else {
						return;
					};
					if !router.has_outstanding_non_long_polling_requests() {
						router.execute_after_pending_dispatches();
						return;
					}
				}
				notified.await;
			}
		});
	}

	/// Runs one drain pass. Scripts queued during the pass wait for the next.
	fn execute_after_pending_dispatches(self: &Arc<Self>) {
		let scripts = {
			let mut state = self.state.lock();
			if state.draining || state.has_outstanding_non_long_polling_requests() {
				return;
			}
			state.draining = true;
			std::mem::take(&mut state.pending_scripts)
		};
		for script in scripts {
			script();
		}
		let more = {
			let mut state = self.state.lock();
			state.draining = false;
			!state.pending_scripts.is_empty()
		};
		if more {
			self.schedule_drain();
		}
	}

	/// Fails `callback` on a later tick because no router is available.
	pub fn dispatch_connection_error(callback: ResponseCallback, method: &str) {
		let error = ProtocolError {
			data: Some(Value::Null),
			..ProtocolError::connection_closed(format!(
				"Connection is closed, can't dispatch pending call to {method}"
			))
		};
		tick::defer(move || callback(Some(error), None));
	}

	/// Fails `callback` on a later tick because its session is going away.
	pub fn dispatch_unregister_session_error(callback: ResponseCallback, method: &str) {
		let error = ProtocolError {
			data: Some(Value::Null),
			..ProtocolError::connection_closed(format!(
				"Session is unregistering, can't dispatch pending call to {method}"
			))
		};
		tick::defer(move || callback(Some(error), None));
	}
}

impl Drop for Router {
	fn drop(&mut self) {
		self.idle.notify_waiters();
	}
}

impl std::fmt::Debug for Router {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("Router")
			.field("sessions", &state.sessions.len())
			.field("pending_responses_count", &state.pending_responses_count)
			.field("pending_long_polling", &state.pending_long_polling_ids.len())
			.field("pending_scripts", &state.pending_scripts.len())
			.finish_non_exhaustive()
	}
}
