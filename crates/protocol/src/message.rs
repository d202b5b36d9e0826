//! Message envelope shared by commands, responses and events.
//!
//! One JSON object shape travels in both directions:
//!
//! ```text
//! { id?, sessionId?, method?, params?, error?, result? }
//! ```
//!
//! A message with an `id` is a response to an earlier command; a message
//! without one but with a `method` is an event.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request ID assigned by the router, unique per router instance.
pub type MessageId = u64;

/// Opaque session identifier. The empty string addresses the root session.
pub type SessionId = String;

/// Generic backend failure.
pub const GENERIC_ERROR_CODE: i64 = -32000;

/// The connection or session went away before a reply arrived.
pub const CONNECTION_CLOSED_ERROR_CODE: i64 = -32001;

/// Command dispatched to a stubbed-out backend.
pub const DEV_TOOLS_STUB_ERROR_CODE: i64 = -32015;

/// JSON-RPC: the method does not exist.
pub const METHOD_NOT_FOUND_ERROR_CODE: i64 = -32601;

/// JSON-RPC: invalid method parameters.
pub const INVALID_PARAMS_ERROR_CODE: i64 = -32602;

/// Error payload carried in the `error` field of a response.
///
/// Backends sometimes omit `code` or `message`; missing fields default to
/// `0` and the empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolError {
	#[serde(default)]
	pub code: i64,
	#[serde(default)]
	pub message: String,
	#[serde(default)]
	pub data: Option<Value>,
}

impl ProtocolError {
	pub fn new(code: i64, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			data: None,
		}
	}

	/// Builds a locally synthesized connection-closed error.
	pub fn connection_closed(message: impl Into<String>) -> Self {
		Self::new(CONNECTION_CLOSED_ERROR_CODE, message)
	}

	/// Returns true for the codes that are expected during teardown races
	/// and are never logged as request failures.
	pub fn is_benign(&self) -> bool {
		matches!(
			self.code,
			GENERIC_ERROR_CODE | CONNECTION_CLOSED_ERROR_CODE | DEV_TOOLS_STUB_ERROR_CODE
		)
	}

	pub fn is_connection_closed(&self) -> bool {
		self.code == CONNECTION_CLOSED_ERROR_CODE
	}
}

impl std::fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} ({})", self.message, self.code)
	}
}

/// Outgoing command envelope.
///
/// `params` is omitted when absent or empty; `sessionId` is omitted for the
/// root session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
	pub id: MessageId,
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Map<String, Value>>,
	#[serde(
		rename = "sessionId",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub session_id: Option<SessionId>,
}

impl Request {
	pub fn new(
		id: MessageId,
		method: impl Into<String>,
		params: Option<Map<String, Value>>,
		session_id: &str,
	) -> Self {
		Self {
			id,
			method: method.into(),
			params: params.filter(|p| !p.is_empty()),
			session_id: (!session_id.is_empty()).then(|| session_id.to_string()),
		}
	}
}

/// Incoming message as read off the transport.
///
/// Every field is optional; [`Message::kind`] classifies it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<MessageId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<SessionId>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub method: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ProtocolError>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
}

/// Classification of an incoming [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
	/// Has an `id`: a reply to a pending command.
	Response(MessageId),
	/// No `id` but a `method`: an unsolicited event.
	Event,
	/// Neither `id` nor `method`.
	Invalid,
}

impl Message {
	pub fn kind(&self) -> MessageKind {
		match (self.id, &self.method) {
			(Some(id), _) => MessageKind::Response(id),
			(None, Some(_)) => MessageKind::Event,
			(None, None) => MessageKind::Invalid,
		}
	}

	/// Session this message addresses; the root session when absent.
	pub fn session_id(&self) -> &str {
		self.session_id.as_deref().unwrap_or_default()
	}

	/// Converts an event-shaped message into an [`EventMessage`].
	///
	/// Returns `None` when the message has no `method`.
	pub fn into_event(self) -> Option<EventMessage> {
		Some(EventMessage {
			method: self.method?,
			params: self.params,
			session_id: self.session_id,
		})
	}
}

/// An unsolicited event routed to a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<SessionId>,
}

/// Splits `Domain.name` into `("Domain", "name")`.
///
/// A name without a dot yields an empty second half.
pub fn split_qualified_name(qualified: &str) -> (&str, &str) {
	qualified.split_once('.').unwrap_or((qualified, ""))
}

/// Joins a domain and a member name into `Domain.name`.
pub fn qualify_name(domain: &str, name: &str) -> String {
	format!("{domain}.{name}")
}
