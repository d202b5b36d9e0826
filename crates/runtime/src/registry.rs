//! Method registry: command and event schemas keyed by qualified name.
//!
//! Schemas are registered once, at load time, and accumulate for the life
//! of the registry; nothing is ever removed. Re-registering a name
//! overwrites the previous entry.
//!
//! Per-domain tables are handed out as shared references. A target built
//! from the registry holds on to the tables of the domains that existed at
//! construction, so later registrations into those domains stay visible
//! while domains added afterwards do not.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cdp_protocol::{ProtocolDescriptor, qualify_name, split_qualified_name};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Declared type of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
	String,
	Number,
	Boolean,
	/// Any structured value (object or array).
	Object,
	Array,
	Any,
}

impl ParamType {
	/// Maps a protocol descriptor type name. Returns `None` for unknown names.
	pub fn from_protocol(kind: &str) -> Option<Self> {
		Some(match kind {
			"string" => Self::String,
			"integer" | "number" => Self::Number,
			"boolean" => Self::Boolean,
			"object" => Self::Object,
			"array" => Self::Array,
			"any" => Self::Any,
			_ => return None,
		})
	}

	pub fn matches(self, value: &Value) -> bool {
		match self {
			Self::String => value.is_string(),
			Self::Number => value.is_number(),
			Self::Boolean => value.is_boolean(),
			Self::Object => value.is_object() || value.is_array(),
			Self::Array => value.is_array(),
			Self::Any => true,
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Self::String => "string",
			Self::Number => "number",
			Self::Boolean => "boolean",
			Self::Object => "object",
			Self::Array => "array",
			Self::Any => "any",
		}
	}

	/// Runtime type name of a JSON value, for diagnostics.
	pub fn of(value: &Value) -> &'static str {
		match value {
			Value::Null => "null",
			Value::Bool(_) => "boolean",
			Value::Number(_) => "number",
			Value::String(_) => "string",
			Value::Array(_) => "array",
			Value::Object(_) => "object",
		}
	}
}

/// One declared parameter of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParameter {
	pub name: String,
	#[serde(rename = "type")]
	pub kind: ParamType,
	#[serde(default)]
	pub optional: bool,
}

impl CommandParameter {
	pub fn required(name: impl Into<String>, kind: ParamType) -> Self {
		Self {
			name: name.into(),
			kind,
			optional: false,
		}
	}

	pub fn optional(name: impl Into<String>, kind: ParamType) -> Self {
		Self {
			name: name.into(),
			kind,
			optional: true,
		}
	}
}

/// Registered schema of a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSchema {
	/// Qualified `Domain.command` name.
	pub method: String,
	pub parameters: Vec<CommandParameter>,
	/// Reply fields in declaration order. Only the first is surfaced.
	pub reply_fields: Vec<String>,
}

/// Commands of one domain keyed by unqualified name.
pub type CommandTable = Arc<RwLock<IndexMap<String, Arc<CommandSchema>>>>;

/// Event parameter names of one domain keyed by qualified event name.
pub type EventParameterNames = Arc<RwLock<HashMap<String, Vec<String>>>>;

/// Schema table shared by every target built from it.
#[derive(Debug, Default)]
pub struct MethodRegistry {
	initialized: AtomicBool,
	commands: RwLock<IndexMap<String, CommandTable>>,
	events: RwLock<IndexMap<String, EventParameterNames>>,
	enums: RwLock<HashMap<String, IndexMap<String, String>>>,
}

impl MethodRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// True once any command or event has been registered.
	pub fn is_initialized(&self) -> bool {
		self.initialized.load(Ordering::SeqCst)
	}

	pub fn register_command(
		&self,
		method: &str,
		parameters: Vec<CommandParameter>,
		reply_fields: Vec<String>,
	) {
		let (domain, command) = split_qualified_name(method);
		let table = self.command_table_or_create(domain);
		table.write().insert(
			command.to_string(),
			Arc::new(CommandSchema {
				method: method.to_string(),
				parameters,
				reply_fields,
			}),
		);
		self.initialized.store(true, Ordering::SeqCst);
	}

	pub fn register_event(&self, event: &str, parameter_names: Vec<String>) {
		let (domain, _) = split_qualified_name(event);
		let names = self.event_table_or_create(domain);
		names.write().insert(event.to_string(), parameter_names);
		self.initialized.store(true, Ordering::SeqCst);
	}

	/// Installs a `Domain.Type` constant table. Kept apart from command and
	/// event tables.
	pub fn register_enum(&self, qualified: &str, values: IndexMap<String, String>) {
		self.enums.write().insert(qualified.to_string(), values);
	}

	pub fn enum_values(&self, qualified: &str) -> Option<IndexMap<String, String>> {
		self.enums.read().get(qualified).cloned()
	}

	pub fn command(&self, method: &str) -> Option<Arc<CommandSchema>> {
		let (domain, command) = split_qualified_name(method);
		let table = self.commands.read().get(domain).cloned()?;
		let schema = table.read().get(command).cloned();
		schema
	}

	/// Domains that currently have commands, in registration order.
	pub fn domains(&self) -> Vec<String> {
		self.commands.read().keys().cloned().collect()
	}

	/// Snapshot of domain → command table at this instant.
	pub fn command_tables(&self) -> IndexMap<String, CommandTable> {
		self.commands.read().clone()
	}

	/// Snapshot of domain → shared event parameter map at this instant.
	pub fn event_tables(&self) -> IndexMap<String, EventParameterNames> {
		self.events.read().clone()
	}

	/// Returns the shared event parameter map for `domain`, if any event of
	/// that domain has been registered.
	pub fn event_parameter_names(&self, domain: &str) -> Option<EventParameterNames> {
		self.events.read().get(domain).cloned()
	}

	fn event_table_or_create(&self, domain: &str) -> EventParameterNames {
		if let Some(names) = self.events.read().get(domain) {
			return Arc::clone(names);
		}
		Arc::clone(self.events.write().entry(domain.to_string()).or_default())
	}

	fn command_table_or_create(&self, domain: &str) -> CommandTable {
		if let Some(table) = self.commands.read().get(domain) {
			return Arc::clone(table);
		}
		Arc::clone(self.commands.write().entry(domain.to_string()).or_default())
	}

	/// Registers every command, event and string enum of a protocol document.
	pub fn register_protocol(&self, descriptor: &ProtocolDescriptor) {
		for domain in &descriptor.domains {
			for ty in &domain.types {
				if let Some(values) = &ty.enum_values {
					let table = values.iter().map(|v| (enum_key(v), v.clone())).collect();
					self.register_enum(&qualify_name(&domain.domain, &ty.id), table);
				}
			}

			for command in &domain.commands {
				let parameters = command
					.parameters
					.iter()
					.map(|p| CommandParameter {
						name: p.name.clone(),
						kind: resolve_kind(descriptor, &domain.domain, p),
						optional: p.optional,
					})
					.collect();
				let reply_fields = command.returns.iter().map(|r| r.name.clone()).collect();
				self.register_command(
					&qualify_name(&domain.domain, &command.name),
					parameters,
					reply_fields,
				);
			}

			for event in &domain.events {
				self.register_event(
					&qualify_name(&domain.domain, &event.name),
					event.parameters.iter().map(|p| p.name.clone()).collect(),
				);
			}
		}
		tracing::debug!(domains = descriptor.domains.len(), "Registered protocol descriptor");
	}

	pub fn load_protocol_json(&self, text: &str) -> Result<()> {
		let descriptor = ProtocolDescriptor::from_json(text)?;
		self.register_protocol(&descriptor);
		Ok(())
	}
}

fn resolve_kind(
	descriptor: &ProtocolDescriptor,
	domain: &str,
	parameter: &cdp_protocol::ParameterDescriptor,
) -> ParamType {
	if let Some(kind) = parameter.kind.as_deref() {
		return ParamType::from_protocol(kind).unwrap_or(ParamType::Any);
	}
	let Some(reference) = parameter.reference.as_deref() else {
		return ParamType::Any;
	};
	let (ref_domain, ref_id) = match reference.split_once('.') {
		Some((d, id)) => (d, id),
		None => (domain, reference),
	};
	descriptor
		.domain(ref_domain)
		.and_then(|d| d.type_by_id(ref_id))
		.and_then(|t| ParamType::from_protocol(&t.kind))
		.unwrap_or(ParamType::Object)
}

/// `"will-navigate"` → `"WillNavigate"`.
fn enum_key(value: &str) -> String {
	value
		.split(['-', '_'])
		.filter(|part| !part.is_empty())
		.map(|part| {
			let mut chars = part.chars();
			match chars.next() {
				Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
				None => String::new(),
			}
		})
		.collect()
}
