//! Call surfaces generated from registered command schemas.
//!
//! Every command yields a [`Command`] with two forms sharing one send path:
//!
//! - [`Command::call`]: positional arguments validated against the declared
//!   parameter list; resolves to the first declared reply field.
//! - [`Command::invoke`]: a single request object, no validation; resolves
//!   to the whole result object plus the error, if any.
//!
//! Neither form fails. Validation errors are reported through
//! [`Diagnostics`] and resolve without touching the transport; backend
//! errors are logged unless benign and come back inside the result.

use std::collections::VecDeque;
use std::sync::Arc;

use cdp_protocol::{
	INVALID_PARAMS_ERROR_CODE, METHOD_NOT_FOUND_ERROR_CODE, ProtocolError, split_qualified_name,
};
use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::diagnostics::Diagnostics;
use crate::registry::{CommandSchema, CommandTable, ParamType};
use crate::router::{ResponseCallback, Router};

type Reply = (Option<ProtocolError>, Option<Value>);

/// Session address shared by a target and all of its call surfaces.
///
/// The router slot is cleared when the target is disposed; sends after
/// that fail with a connection-closed error.
pub(crate) struct Endpoint {
	session_id: String,
	router: RwLock<Option<Arc<Router>>>,
	diagnostics: Arc<Diagnostics>,
}

impl Endpoint {
	pub(crate) fn new(session_id: String, router: Arc<Router>, diagnostics: Arc<Diagnostics>) -> Self {
		Self {
			session_id,
			router: RwLock::new(Some(router)),
			diagnostics,
		}
	}

	pub(crate) fn router(&self) -> Option<Arc<Router>> {
		self.router.read().clone()
	}

	pub(crate) fn take_router(&self) -> Option<Arc<Router>> {
		self.router.write().take()
	}

	fn send(&self, method: &str, params: Option<Map<String, Value>>) -> oneshot::Receiver<Reply> {
		let (tx, rx) = oneshot::channel();
		let callback: ResponseCallback = Box::new(move |error, result| {
			let _ = tx.send((error, result));
		});
		match self.router() {
			Some(router) => {
				let (domain, _) = split_qualified_name(method);
				router.send_message(&self.session_id, domain, method, params, callback);
			}
			None => Router::dispatch_connection_error(callback, method),
		}
		rx
	}
}

/// Outcome of [`Command::call`].
///
/// `value` is `None` when the command declares no reply fields, when the
/// reply lacks the first field, or when the call failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallResult {
	pub value: Option<Value>,
	pub error: Option<ProtocolError>,
}

impl CallResult {
	fn failed(error: ProtocolError) -> Self {
		Self {
			value: None,
			error: Some(error),
		}
	}

	pub fn is_ok(&self) -> bool {
		self.error.is_none()
	}

	pub fn value(&self) -> Option<&Value> {
		self.value.as_ref()
	}

	/// Decodes the reply value, or `None` when absent or of the wrong shape.
	pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
		self.value
			.as_ref()
			.and_then(|v| serde_json::from_value(v.clone()).ok())
	}
}

/// Outcome of [`Command::invoke`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResponse {
	pub result: Map<String, Value>,
	pub error: Option<ProtocolError>,
}

impl RawResponse {
	/// Message of the backend error, if the command failed.
	pub fn get_error(&self) -> Option<&str> {
		self.error.as_ref().map(|e| e.message.as_str())
	}

	pub fn get(&self, field: &str) -> Option<&Value> {
		self.result.get(field)
	}
}

/// Both callable forms of one command.
#[derive(Clone)]
pub struct Command {
	schema: Arc<CommandSchema>,
	endpoint: Arc<Endpoint>,
}

impl Command {
	pub fn method(&self) -> &str {
		&self.schema.method
	}

	pub fn schema(&self) -> &CommandSchema {
		&self.schema
	}

	/// Validates `args` positionally and sends the command.
	///
	/// The request goes out before this returns; the future only waits for
	/// the reply.
	pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, CallResult> {
		let params = match prepare_parameters(&self.schema, args) {
			Ok(params) => params,
			Err(message) => {
				self.endpoint.diagnostics.error(&message);
				let error = ProtocolError::new(INVALID_PARAMS_ERROR_CODE, message);
				return future::ready(CallResult::failed(error)).boxed();
			}
		};

		let reply = self.endpoint.send(&self.schema.method, Some(params));
		let schema = Arc::clone(&self.schema);
		let diagnostics = Arc::clone(&self.endpoint.diagnostics);
		async move {
			let (error, result) = await_reply(reply, &schema.method).await;
			if let Some(error) = error {
				diagnostics.request_failed(&schema.method, &error);
				return CallResult::failed(error);
			}
			let value = schema
				.reply_fields
				.first()
				.and_then(|field| result.as_ref()?.get(field).cloned());
			CallResult { value, error: None }
		}
		.boxed()
	}

	/// Sends `request` as the command's params without validation.
	pub fn invoke(&self, request: Map<String, Value>) -> BoxFuture<'static, RawResponse> {
		let reply = self.endpoint.send(&self.schema.method, Some(request));
		let method = self.schema.method.clone();
		let diagnostics = Arc::clone(&self.endpoint.diagnostics);
		async move {
			let (error, result) = await_reply(reply, &method).await;
			if let Some(error) = &error {
				diagnostics.request_failed(&method, error);
			}
			let result = match result {
				Some(Value::Object(map)) => map,
				_ => Map::new(),
			};
			RawResponse { result, error }
		}
		.boxed()
	}
}

impl std::fmt::Debug for Command {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Command")
			.field("method", &self.schema.method)
			.finish_non_exhaustive()
	}
}

/// Call surface for one domain of a target.
///
/// Commands registered into the domain after the target was built are
/// visible here too.
#[derive(Clone)]
pub struct DomainAgent {
	domain: String,
	commands: CommandTable,
	endpoint: Arc<Endpoint>,
}

impl DomainAgent {
	pub(crate) fn new(domain: String, commands: CommandTable, endpoint: Arc<Endpoint>) -> Self {
		Self {
			domain,
			commands,
			endpoint,
		}
	}

	pub fn domain(&self) -> &str {
		&self.domain
	}

	/// Unqualified command names in registration order.
	pub fn commands(&self) -> Vec<String> {
		self.commands.read().keys().cloned().collect()
	}

	pub fn has_command(&self, name: &str) -> bool {
		self.commands.read().contains_key(name)
	}

	pub fn command(&self, name: &str) -> Option<Command> {
		let schema = self.commands.read().get(name).cloned()?;
		Some(Command {
			schema,
			endpoint: Arc::clone(&self.endpoint),
		})
	}

	/// Promise form of `name`. See [`Command::call`].
	pub fn call(&self, name: &str, args: Vec<Value>) -> BoxFuture<'static, CallResult> {
		match self.command(name) {
			Some(command) => command.call(args),
			None => future::ready(CallResult::failed(self.unknown_command(name))).boxed(),
		}
	}

	/// Raw form of `name`. See [`Command::invoke`].
	pub fn invoke(&self, name: &str, request: Map<String, Value>) -> BoxFuture<'static, RawResponse> {
		match self.command(name) {
			Some(command) => command.invoke(request),
			None => future::ready(RawResponse {
				result: Map::new(),
				error: Some(self.unknown_command(name)),
			})
			.boxed(),
		}
	}

	fn unknown_command(&self, name: &str) -> ProtocolError {
		let message = format!(
			"Protocol Error: method '{}.{}' is not registered",
			self.domain, name
		);
		self.endpoint.diagnostics.error(&message);
		ProtocolError::new(METHOD_NOT_FOUND_ERROR_CODE, message)
	}
}

impl std::fmt::Debug for DomainAgent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DomainAgent")
			.field("domain", &self.domain)
			.field("commands", &self.commands.read().len())
			.finish()
	}
}

/// Builds one agent per domain in `tables`.
pub(crate) fn build_agents(
	tables: IndexMap<String, CommandTable>,
	endpoint: &Arc<Endpoint>,
) -> IndexMap<String, DomainAgent> {
	tables
		.into_iter()
		.map(|(domain, commands)| {
			let agent = DomainAgent::new(domain.clone(), commands, Arc::clone(endpoint));
			(domain, agent)
		})
		.collect()
}

async fn await_reply(reply: oneshot::Receiver<Reply>, method: &str) -> Reply {
	match reply.await {
		Ok(reply) => reply,
		Err(_) => {
			tracing::debug!(method, "Response callback dropped without a reply");
			let error = ProtocolError::connection_closed(format!(
				"No session to dispatch call to {method}"
			));
			(Some(error), None)
		}
	}
}

/// Binds positional `args` to the declared parameters of `schema`.
///
/// A `null` argument in an optional slot is consumed and leaves the
/// parameter unset.
fn prepare_parameters(schema: &CommandSchema, args: Vec<Value>) -> Result<Map<String, Value>, String> {
	let method = &schema.method;
	let mut args = VecDeque::from(args);
	let mut params = Map::new();

	for parameter in &schema.parameters {
		let Some(value) = args.pop_front() else {
			if parameter.optional {
				continue;
			}
			let signature = serde_json::to_string(&schema.parameters).unwrap_or_default();
			return Err(format!(
				"Protocol Error: Invalid number of arguments for method '{method}' call. It must have the following arguments {signature}'."
			));
		};
		if parameter.optional && value.is_null() {
			continue;
		}
		if !parameter.kind.matches(&value) {
			return Err(format!(
				"Protocol Error: Invalid type of argument '{}' for method '{method}' call. It must be '{}' but it is '{}'.",
				parameter.name,
				parameter.kind.name(),
				ParamType::of(&value)
			));
		}
		params.insert(parameter.name.clone(), value);
	}

	if !args.is_empty() {
		return Err(format!(
			"Protocol Error: Extra {} arguments in a call to method '{method}'.",
			args.len()
		));
	}
	Ok(params)
}
