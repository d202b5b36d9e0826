//! Shared setup for runtime integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use cdp_runtime::{
	Backend, CommandParameter, MemoryTransport, MethodRegistry, ParamType, RemoteEnd, ReportLog,
	Target, TargetOptions,
};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

pub fn init_tracing() {
	TRACING.call_once(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
		tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_test_writer()
			.compact()
			.init();
	});
}

/// A `Foo` domain with one two-argument command and one event.
pub fn foo_registry() -> Arc<MethodRegistry> {
	let registry = MethodRegistry::new();
	registry.register_command(
		"Foo.bar",
		vec![
			CommandParameter::required("a", ParamType::String),
			CommandParameter::required("b", ParamType::Number),
		],
		vec!["result".into()],
	);
	registry.register_command("Foo.poll", vec![], vec![]);
	registry.register_event("Foo.baz", vec!["x".into()]);
	Arc::new(registry)
}

pub struct Fixture {
	pub backend: Backend,
	pub root: Arc<Target>,
	pub remote: RemoteEnd,
	pub log: ReportLog,
}

impl Fixture {
	pub fn new(registry: Arc<MethodRegistry>) -> Self {
		init_tracing();
		let backend = Backend::builder().registry(registry).build();
		let log = backend.diagnostics().record_reports();
		let (transport, remote) = MemoryTransport::pair();
		let root = Target::new(&backend, TargetOptions::with_connection(transport))
			.expect("root target");
		Self {
			backend,
			root,
			remote,
			log,
		}
	}

	pub fn child(&self, session_id: &str) -> Arc<Target> {
		Target::new(&self.backend, TargetOptions::child(&self.root, session_id))
			.expect("child target")
	}
}
