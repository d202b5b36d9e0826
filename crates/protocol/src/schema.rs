//! Protocol descriptor types.
//!
//! Backends publish their surface as a JSON document listing every domain
//! with its types, commands and events. These structs mirror that document
//! so it can be fed to the method registry at load time.

use serde::{Deserialize, Serialize};

/// Top-level protocol document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<ProtocolVersion>,
	#[serde(default)]
	pub domains: Vec<DomainDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolVersion {
	pub major: String,
	pub minor: String,
}

/// One domain: a named group of types, commands and events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainDescriptor {
	pub domain: String,
	#[serde(default)]
	pub experimental: bool,
	#[serde(default)]
	pub deprecated: bool,
	#[serde(default)]
	pub dependencies: Vec<String>,
	#[serde(default)]
	pub types: Vec<TypeDescriptor>,
	#[serde(default)]
	pub commands: Vec<CommandDescriptor>,
	#[serde(default)]
	pub events: Vec<EventDescriptor>,
}

/// Named type declared by a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
	pub enum_values: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
	pub name: String,
	#[serde(default)]
	pub parameters: Vec<ParameterDescriptor>,
	#[serde(default)]
	pub returns: Vec<ParameterDescriptor>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDescriptor {
	pub name: String,
	#[serde(default)]
	pub parameters: Vec<ParameterDescriptor>,
}

/// A parameter, return value or property.
///
/// Exactly one of `kind` and `reference` is normally present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
	pub name: String,
	#[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
	pub kind: Option<String>,
	#[serde(default, rename = "$ref", skip_serializing_if = "Option::is_none")]
	pub reference: Option<String>,
	#[serde(default)]
	pub optional: bool,
}

impl ProtocolDescriptor {
	pub fn from_json(text: &str) -> serde_json::Result<Self> {
		serde_json::from_str(text)
	}

	pub fn domain(&self, name: &str) -> Option<&DomainDescriptor> {
		self.domains.iter().find(|d| d.domain == name)
	}
}

impl DomainDescriptor {
	pub fn type_by_id(&self, id: &str) -> Option<&TypeDescriptor> {
		self.types.iter().find(|t| t.id == id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_descriptor_parses_protocol_document() {
		let json = r#"{
			"version": {"major": "1", "minor": "3"},
			"domains": [{
				"domain": "Page",
				"types": [
					{"id": "FrameId", "type": "string"},
					{"id": "TransitionType", "type": "string", "enum": ["link", "typed"]}
				],
				"commands": [{
					"name": "navigate",
					"parameters": [
						{"name": "url", "type": "string"},
						{"name": "frameId", "$ref": "FrameId", "optional": true}
					],
					"returns": [{"name": "frameId", "$ref": "FrameId"}]
				}],
				"events": [{"name": "loadEventFired", "parameters": [{"name": "timestamp", "type": "number"}]}]
			}]
		}"#;

		let descriptor = ProtocolDescriptor::from_json(json).unwrap();
		let page = descriptor.domain("Page").unwrap();
		assert_eq!(page.commands[0].parameters.len(), 2);
		assert!(page.commands[0].parameters[1].optional);
		assert_eq!(
			page.commands[0].parameters[1].reference.as_deref(),
			Some("FrameId")
		);
		assert_eq!(
			page.type_by_id("TransitionType").unwrap().enum_values,
			Some(vec!["link".to_string(), "typed".to_string()])
		);
		assert_eq!(page.events[0].name, "loadEventFired");
	}
}
