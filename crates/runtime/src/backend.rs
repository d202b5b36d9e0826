//! Backend context shared by every target of one client.
//!
//! Bundles the schema registry, the default connection factory, the
//! diagnostic hooks and the runtime configuration. Register all schemas
//! before building the first target: targets snapshot the registry's
//! domains at construction.

use std::sync::Arc;

use crate::config::BackendConfig;
use crate::diagnostics::Diagnostics;
use crate::registry::MethodRegistry;
use crate::transport::{ConnectionFactory, Transport};

pub struct Backend {
	registry: Arc<MethodRegistry>,
	connection_factory: Option<Arc<dyn ConnectionFactory>>,
	diagnostics: Arc<Diagnostics>,
	config: BackendConfig,
}

impl Backend {
	pub fn builder() -> BackendBuilder {
		BackendBuilder::default()
	}

	pub fn registry(&self) -> &Arc<MethodRegistry> {
		&self.registry
	}

	pub fn diagnostics(&self) -> &Arc<Diagnostics> {
		&self.diagnostics
	}

	pub fn config(&self) -> &BackendConfig {
		&self.config
	}

	pub fn has_connection_factory(&self) -> bool {
		self.connection_factory.is_some()
	}

	/// Produces a fresh transport from the installed factory.
	pub fn create_connection(&self) -> Option<Arc<dyn Transport>> {
		self.connection_factory.as_ref().map(|factory| factory.create())
	}
}

impl Default for Backend {
	fn default() -> Self {
		Self::builder().build()
	}
}

impl std::fmt::Debug for Backend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Backend")
			.field("domains", &self.registry.domains())
			.field("connection_factory", &self.connection_factory.is_some())
			.field("config", &self.config)
			.finish()
	}
}

#[derive(Default)]
pub struct BackendBuilder {
	registry: Option<Arc<MethodRegistry>>,
	connection_factory: Option<Arc<dyn ConnectionFactory>>,
	diagnostics: Option<Arc<Diagnostics>>,
	config: BackendConfig,
}

impl BackendBuilder {
	pub fn registry(mut self, registry: Arc<MethodRegistry>) -> Self {
		self.registry = Some(registry);
		self
	}

	pub fn config(mut self, config: BackendConfig) -> Self {
		self.config = config;
		self
	}

	pub fn connection_factory(mut self, factory: impl ConnectionFactory + 'static) -> Self {
		self.connection_factory = Some(Arc::new(factory));
		self
	}

	/// Uses `diagnostics` as is. Otherwise one is built from the config.
	pub fn diagnostics(mut self, diagnostics: Arc<Diagnostics>) -> Self {
		self.diagnostics = Some(diagnostics);
		self
	}

	pub fn build(self) -> Backend {
		let diagnostics = self
			.diagnostics
			.unwrap_or_else(|| Arc::new(Diagnostics::from_config(&self.config)));
		Backend {
			registry: self.registry.unwrap_or_default(),
			connection_factory: self.connection_factory,
			diagnostics,
			config: self.config,
		}
	}
}
