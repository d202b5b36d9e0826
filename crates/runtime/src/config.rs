//! Runtime configuration.
//!
//! Loaded from JSON, usually next to the protocol descriptor. Every field
//! has a default so an empty object is a valid configuration.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Commands whose replies stay open until the backend has an update.
pub const DEFAULT_LONG_POLLING_METHODS: &[&str] = &["CSS.takeComputedStyleUpdates"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BackendConfig {
	/// Qualified method names excluded from drain accounting.
	pub long_polling_methods: Vec<String>,
	/// Silences request-failure logging from call surfaces.
	pub suppress_request_errors: bool,
	/// Traces every raw message sent and received.
	pub dump_protocol: bool,
}

impl Default for BackendConfig {
	fn default() -> Self {
		Self {
			long_polling_methods: DEFAULT_LONG_POLLING_METHODS
				.iter()
				.map(|m| m.to_string())
				.collect(),
			suppress_request_errors: false,
			dump_protocol: false,
		}
	}
}

impl BackendConfig {
	pub fn from_json_str(text: &str) -> Result<Self> {
		let config: Self = serde_json::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let text = std::fs::read_to_string(path)?;
		Self::from_json_str(&text)
	}

	fn validate(&self) -> Result<()> {
		for method in &self.long_polling_methods {
			if !method.contains('.') {
				return Err(Error::Config(format!(
					"long polling method '{method}' is not a qualified Domain.method name"
				)));
			}
		}
		Ok(())
	}

	pub(crate) fn long_polling_set(&self) -> HashSet<String> {
		self.long_polling_methods.iter().cloned().collect()
	}
}
