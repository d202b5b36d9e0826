//! Targets: addressable remote entities bound to one session.
//!
//! A root target owns a fresh [`Router`] over an explicit connection or one
//! produced by the backend's connection factory. A child target attaches to
//! its parent's router under a non-empty session ID.
//!
//! At construction a target materializes one [`DomainAgent`] per domain in
//! the registry and one [`DispatcherManager`] per domain with registered
//! events. Domains registered later are not picked up; commands and events
//! added to an existing domain are.
//!
//! # Lifecycle
//!
//! ```text
//! new ──► registered with router ──► (dispatchers attached) ──► dispose
//! ```
//!
//! Dispose is idempotent and permanent: the session is unregistered, the
//! router reference dropped, and every later send fails with a
//! connection-closed error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use cdp_protocol::{EventMessage, split_qualified_name};
use indexmap::IndexMap;
use serde_json::Value;

use crate::agent::{Command, DomainAgent, Endpoint, build_agents};
use crate::backend::Backend;
use crate::diagnostics::Diagnostics;
use crate::dispatcher::{DispatcherManager, DomainListener};
use crate::error::{Error, Result};
use crate::router::{Router, SessionTarget};
use crate::transport::{ProxyConnection, Transport};

/// How a [`Target`] attaches.
///
/// A root target takes an explicit `connection` or falls back to the
/// backend's factory. A child target takes `parent` and a non-empty
/// `session_id`, never a connection.
#[derive(Default)]
pub struct TargetOptions {
	pub parent: Option<Arc<Target>>,
	pub session_id: String,
	pub connection: Option<Arc<dyn Transport>>,
	/// Connection the session delegates its traffic to.
	pub proxy_connection: Option<Arc<dyn ProxyConnection>>,
}

impl TargetOptions {
	/// Root target over the backend's default connection.
	pub fn root() -> Self {
		Self::default()
	}

	pub fn with_connection(connection: Arc<dyn Transport>) -> Self {
		Self {
			connection: Some(connection),
			..Self::default()
		}
	}

	pub fn child(parent: &Arc<Target>, session_id: impl Into<String>) -> Self {
		Self {
			parent: Some(Arc::clone(parent)),
			session_id: session_id.into(),
			..Self::default()
		}
	}

	pub fn proxy(mut self, proxy_connection: Arc<dyn ProxyConnection>) -> Self {
		self.proxy_connection = Some(proxy_connection);
		self
	}

	fn validate(&self) -> Result<()> {
		if self.session_id.is_empty() {
			if self.parent.is_some() && self.connection.is_some() {
				return Err(Error::InvalidTarget(
					"a target takes either a parent or a connection, not both".into(),
				));
			}
			return Ok(());
		}
		if self.connection.is_some() {
			return Err(Error::InvalidTarget(format!(
				"session '{}' cannot be given its own connection",
				self.session_id
			)));
		}
		if self.parent.is_none() {
			return Err(Error::InvalidTarget(format!(
				"session '{}' requires a parent target",
				self.session_id
			)));
		}
		Ok(())
	}
}

pub struct Target {
	session_id: String,
	parent: Option<Arc<Target>>,
	endpoint: Arc<Endpoint>,
	agents: IndexMap<String, DomainAgent>,
	dispatchers: IndexMap<String, DispatcherManager>,
	diagnostics: Arc<Diagnostics>,
	disposed: AtomicBool,
}

impl Target {
	pub fn new(backend: &Backend, options: TargetOptions) -> Result<Arc<Self>> {
		options.validate()?;
		let TargetOptions {
			parent,
			session_id,
			connection,
			proxy_connection,
		} = options;

		let parent_router = match &parent {
			Some(parent) if !session_id.is_empty() => match parent.router() {
				Some(router) => Some(router),
				None => {
					return Err(Error::InvalidTarget(format!(
						"parent of session '{session_id}' is already disposed"
					)));
				}
			},
			_ => None,
		};
		let router = match parent_router {
			Some(router) => router,
			None => {
				let connection = match connection {
					Some(connection) => connection,
					None => backend
						.create_connection()
						.ok_or(Error::NoConnectionFactory)?,
				};
				Router::new(
					connection,
					Arc::clone(backend.diagnostics()),
					backend.config(),
				)
			}
		};

		let diagnostics = Arc::clone(backend.diagnostics());
		let endpoint = Arc::new(Endpoint::new(
			session_id.clone(),
			Arc::clone(&router),
			Arc::clone(&diagnostics),
		));
		let registry = backend.registry();
		let agents = build_agents(registry.command_tables(), &endpoint);
		let dispatchers = registry
			.event_tables()
			.into_iter()
			.map(|(domain, names)| {
				(
					domain,
					DispatcherManager::new(names, Arc::clone(&diagnostics)),
				)
			})
			.collect();

		let target = Arc::new(Self {
			session_id,
			parent,
			endpoint,
			agents,
			dispatchers,
			diagnostics,
			disposed: AtomicBool::new(false),
		});

		let weak: Weak<dyn SessionTarget> = Arc::downgrade(&target) as Weak<dyn SessionTarget>;
		router.register_session(weak, &target.session_id, proxy_connection);
		tracing::debug!(
			session_id = %target.session_id,
			domains = target.agents.len(),
			"Created target"
		);
		Ok(target)
	}

	/// Recovers the concrete target behind a router session.
	pub fn from_session_target(target: Arc<dyn SessionTarget>) -> Option<Arc<Self>> {
		target.downcast_arc::<Self>().ok()
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	pub fn parent_target(&self) -> Option<&Arc<Target>> {
		self.parent.as_ref()
	}

	/// The router, or `None` once disposed.
	pub fn router(&self) -> Option<Arc<Router>> {
		self.endpoint.router()
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::SeqCst)
	}

	pub fn agent(&self, domain: &str) -> Option<&DomainAgent> {
		self.agents.get(domain)
	}

	/// Like [`agent`](Self::agent) but fails for domains unknown to this target.
	pub fn try_agent(&self, domain: &str) -> Result<&DomainAgent> {
		self.agent(domain)
			.ok_or_else(|| Error::UnknownDomain(domain.to_string()))
	}

	/// Looks up a command by its qualified `Domain.command` name.
	pub fn command(&self, method: &str) -> Result<Command> {
		let (domain, name) = split_qualified_name(method);
		self.try_agent(domain)?
			.command(name)
			.ok_or_else(|| Error::UnknownCommand(method.to_string()))
	}

	/// Domains with a call surface, in registry order.
	pub fn domains(&self) -> impl Iterator<Item = &str> {
		self.agents.keys().map(String::as_str)
	}

	/// Attaches `listener` to `domain`. Ignored for unknown domains.
	pub fn register_dispatcher(&self, domain: &str, listener: Arc<dyn DomainListener>) {
		if let Some(manager) = self.dispatchers.get(domain) {
			manager.add_dispatcher(listener);
		}
	}

	/// Detaches `listener` from `domain`. Ignored for unknown domains.
	pub fn unregister_dispatcher(&self, domain: &str, listener: &Arc<dyn DomainListener>) {
		if let Some(manager) = self.dispatchers.get(domain) {
			manager.remove_dispatcher(listener);
		}
	}

	/// Routes an event to its domain's dispatcher manager.
	pub fn dispatch(&self, message: EventMessage) {
		let (domain, event) = split_qualified_name(&message.method);
		let Some(manager) = self.dispatchers.get(domain) else {
			let payload = serde_json::to_value(&message).unwrap_or(Value::Null);
			self.diagnostics.protocol_error(
				&format!(
					"Protocol Error: the message {} is for non-existing domain '{domain}'",
					message.method
				),
				&payload,
			);
			return;
		};
		manager.dispatch(event, &message);
	}

	/// Unregisters the session and drops the router. Later calls are no-ops.
	pub fn dispose(&self, reason: &str) {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return;
		}
		if let Some(router) = self.endpoint.take_router() {
			router.unregister_session(&self.session_id);
		}
		tracing::debug!(session_id = %self.session_id, reason, "Disposed target");
	}
}

impl SessionTarget for Target {
	fn dispatch(&self, message: EventMessage) {
		Target::dispatch(self, message);
	}

	fn dispose(&self, reason: &str) {
		Target::dispose(self, reason);
	}
}

impl std::fmt::Debug for Target {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Target")
			.field("session_id", &self.session_id)
			.field("has_parent", &self.parent.is_some())
			.field("domains", &self.agents.len())
			.field("disposed", &self.is_disposed())
			.finish()
	}
}

#[cfg(test)]
mod tests;
