//! Per-domain fan-out of events to registered listeners.
//!
//! Each target owns one [`DispatcherManager`] per domain with registered
//! events. Listeners are called synchronously in registration order; a
//! listener that has no handler for an event is skipped.

use std::sync::Arc;

use cdp_protocol::EventMessage;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::diagnostics::Diagnostics;
use crate::registry::EventParameterNames;

/// An object receiving events of one domain.
pub trait DomainListener: Send + Sync {
	/// Returns true if this listener has a handler for the unqualified `event`.
	fn handles(&self, event: &str) -> bool;

	/// Invokes the handler for `event`. Only called when [`handles`](Self::handles) is true.
	fn on_event(&self, event: &str, params: &Value);
}

/// Event handler closure.
pub type EventHandlerFn = Arc<dyn Fn(&Value) + Send + Sync>;

/// A [`DomainListener`] built from closures keyed by event name.
///
/// ```ignore
/// let listener = EventHandlers::new()
///     .on("frameNavigated", |params| println!("{params}"))
///     .on("loadEventFired", |_| {});
/// target.register_dispatcher("Page", Arc::new(listener));
/// ```
#[derive(Clone, Default)]
pub struct EventHandlers {
	handlers: IndexMap<String, EventHandlerFn>,
}

impl EventHandlers {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn on<F>(mut self, event: impl Into<String>, handler: F) -> Self
	where
		F: Fn(&Value) + Send + Sync + 'static,
	{
		self.handlers.insert(event.into(), Arc::new(handler));
		self
	}

	pub fn events(&self) -> impl Iterator<Item = &str> {
		self.handlers.keys().map(String::as_str)
	}
}

impl DomainListener for EventHandlers {
	fn handles(&self, event: &str) -> bool {
		self.handlers.contains_key(event)
	}

	fn on_event(&self, event: &str, params: &Value) {
		if let Some(handler) = self.handlers.get(event) {
			handler(params);
		}
	}
}

impl std::fmt::Debug for EventHandlers {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_list().entries(self.events()).finish()
	}
}

pub struct DispatcherManager {
	event_parameter_names: EventParameterNames,
	dispatchers: Mutex<Vec<Arc<dyn DomainListener>>>,
	diagnostics: Arc<Diagnostics>,
}

impl DispatcherManager {
	pub fn new(event_parameter_names: EventParameterNames, diagnostics: Arc<Diagnostics>) -> Self {
		Self {
			event_parameter_names,
			dispatchers: Mutex::new(Vec::new()),
			diagnostics,
		}
	}

	pub fn add_dispatcher(&self, dispatcher: Arc<dyn DomainListener>) {
		self.dispatchers.lock().push(dispatcher);
	}

	/// Removes `dispatcher` by identity. Unknown listeners are ignored.
	pub fn remove_dispatcher(&self, dispatcher: &Arc<dyn DomainListener>) {
		let mut dispatchers = self.dispatchers.lock();
		if let Some(index) = dispatchers.iter().position(|d| Arc::ptr_eq(d, dispatcher)) {
			dispatchers.remove(index);
		}
	}

	pub fn dispatcher_count(&self) -> usize {
		self.dispatchers.lock().len()
	}

	/// Delivers `message` to every listener handling `event`.
	pub fn dispatch(&self, event: &str, message: &EventMessage) {
		let dispatchers = self.dispatchers.lock().clone();
		if dispatchers.is_empty() {
			return;
		}

		if !self
			.event_parameter_names
			.read()
			.contains_key(&message.method)
		{
			let payload = serde_json::to_value(message).unwrap_or(Value::Null);
			self.diagnostics.protocol_warning(
				&format!(
					"Protocol Error: Attempted to dispatch an unspecified event '{}'",
					message.method
				),
				&payload,
			);
			return;
		}

		let params = match &message.params {
			Some(Value::Object(map)) => Value::Object(map.clone()),
			_ => Value::Object(Map::new()),
		};
		for dispatcher in dispatchers {
			if dispatcher.handles(event) {
				dispatcher.on_event(event, &params);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use parking_lot::RwLock;
	use serde_json::json;

	use super::*;

	fn manager(events: &[(&str, &[&str])]) -> (DispatcherManager, EventParameterNames) {
		let names: HashMap<String, Vec<String>> = events
			.iter()
			.map(|(e, p)| (e.to_string(), p.iter().map(|s| s.to_string()).collect()))
			.collect();
		let shared = Arc::new(RwLock::new(names));
		let diagnostics = Arc::new(Diagnostics::new());
		(
			DispatcherManager::new(Arc::clone(&shared), diagnostics),
			shared,
		)
	}

	fn recording(event: &'static str) -> (Arc<dyn DomainListener>, Arc<Mutex<Vec<Value>>>) {
		let calls = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&calls);
		let listener = EventHandlers::new().on(event, move |p| sink.lock().push(p.clone()));
		(Arc::new(listener), calls)
	}

	fn event(method: &str, params: Value) -> EventMessage {
		EventMessage {
			method: method.into(),
			params: Some(params),
			session_id: None,
		}
	}

	#[test]
	fn test_event_handlers_list_events_in_order() {
		let handlers = EventHandlers::new()
			.on("frameNavigated", |_| {})
			.on("loadEventFired", |_| {})
			.on("frameNavigated", |_| {});
		assert_eq!(
			handlers.events().collect::<Vec<_>>(),
			["frameNavigated", "loadEventFired"]
		);
		assert!(handlers.handles("loadEventFired"));
		assert!(!handlers.handles("domContentEventFired"));
	}

	#[test]
	fn test_dispatch_in_registration_order() {
		let (manager, _) = manager(&[("Foo.baz", &["x"])]);
		let order = Arc::new(Mutex::new(Vec::new()));
		for name in ["a", "b"] {
			let sink = Arc::clone(&order);
			manager.add_dispatcher(Arc::new(
				EventHandlers::new().on("baz", move |_| sink.lock().push(name)),
			));
		}

		manager.dispatch("baz", &event("Foo.baz", json!({"x": 1})));
		assert_eq!(order.lock().as_slice(), ["a", "b"]);
	}

	#[test]
	fn test_listener_without_handler_is_skipped() {
		let (manager, _) = manager(&[("Foo.baz", &["x"]), ("Foo.qux", &[])]);
		let (listener, calls) = recording("baz");
		manager.add_dispatcher(listener);

		manager.dispatch("qux", &event("Foo.qux", json!({})));
		assert!(calls.lock().is_empty());
	}

	#[test]
	fn test_unspecified_event_warns_and_drops() {
		let shared = Arc::new(RwLock::new(HashMap::new()));
		let diagnostics = Arc::new(Diagnostics::new());
		let log = diagnostics.record_reports();
		let manager = DispatcherManager::new(shared, diagnostics);
		let (listener, calls) = recording("baz");
		manager.add_dispatcher(listener);

		manager.dispatch("baz", &event("Foo.baz", json!({"x": 1})));
		assert!(calls.lock().is_empty());
		assert_eq!(log.warnings().len(), 1);
		assert!(log.errors().is_empty());
		assert!(log.warnings()[0].message.contains("'Foo.baz'"));
	}

	#[test]
	fn test_no_listeners_skips_schema_check() {
		let shared = Arc::new(RwLock::new(HashMap::new()));
		let diagnostics = Arc::new(Diagnostics::new());
		let log = diagnostics.record_reports();
		let manager = DispatcherManager::new(shared, diagnostics);

		manager.dispatch("baz", &event("Foo.baz", json!({})));
		assert!(log.all().is_empty());
	}

	#[test]
	fn test_schema_map_is_live() {
		let (manager, shared) = manager(&[]);
		let (listener, calls) = recording("late");
		manager.add_dispatcher(listener);

		shared.write().insert("Foo.late".into(), vec![]);
		manager.dispatch("late", &event("Foo.late", json!({"y": true})));
		assert_eq!(calls.lock().as_slice(), [json!({"y": true})]);
	}

	#[test]
	fn test_remove_dispatcher_by_identity() {
		let (manager, _) = manager(&[("Foo.baz", &["x"])]);
		let (listener, calls) = recording("baz");
		manager.add_dispatcher(Arc::clone(&listener));
		manager.remove_dispatcher(&listener);

		manager.dispatch("baz", &event("Foo.baz", json!({"x": 1})));
		assert!(calls.lock().is_empty());
		assert_eq!(manager.dispatcher_count(), 0);
	}

	#[test]
	fn test_missing_params_become_empty_object() {
		let (manager, _) = manager(&[("Foo.baz", &[])]);
		let (listener, calls) = recording("baz");
		manager.add_dispatcher(listener);

		manager.dispatch(
			"baz",
			&EventMessage {
				method: "Foo.baz".into(),
				params: None,
				session_id: None,
			},
		);
		assert_eq!(calls.lock().as_slice(), [json!({})]);
	}
}
