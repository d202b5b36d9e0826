use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};

use super::*;
use crate::dispatcher::EventHandlers;
use crate::registry::{CommandParameter, MethodRegistry, ParamType};
use crate::transport::{MemoryTransport, ParallelConnection, RemoteEnd};

fn registry() -> Arc<MethodRegistry> {
	let registry = MethodRegistry::new();
	registry.register_command(
		"Page.navigate",
		vec![CommandParameter::required("url", ParamType::String)],
		vec!["frameId".into()],
	);
	registry.register_command("Runtime.enable", vec![], vec![]);
	registry.register_event("Page.loadEventFired", vec!["timestamp".into()]);
	Arc::new(registry)
}

fn root() -> (Backend, Arc<Target>, RemoteEnd) {
	let backend = Backend::builder().registry(registry()).build();
	let (transport, remote) = MemoryTransport::pair();
	let target = Target::new(&backend, TargetOptions::with_connection(transport)).unwrap();
	(backend, target, remote)
}

fn recording(event: &'static str) -> (Arc<dyn DomainListener>, Arc<Mutex<Vec<Value>>>) {
	let calls = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&calls);
	let listener = EventHandlers::new().on(event, move |p| sink.lock().push(p.clone()));
	(Arc::new(listener), calls)
}

#[test]
fn test_session_with_connection_is_rejected() {
	let backend = Backend::default();
	let (transport, _remote) = MemoryTransport::pair();
	let options = TargetOptions {
		session_id: "S1".into(),
		connection: Some(transport),
		..TargetOptions::default()
	};
	let err = Target::new(&backend, options).unwrap_err();
	assert!(err.is_invalid_target());
}

#[test]
fn test_session_without_parent_is_rejected() {
	let backend = Backend::default();
	let options = TargetOptions {
		session_id: "S1".into(),
		..TargetOptions::default()
	};
	assert!(matches!(
		Target::new(&backend, options),
		Err(Error::InvalidTarget(_))
	));
}

#[test]
fn test_parent_and_connection_are_exclusive() {
	let (backend, parent, _remote) = root();
	let (transport, _other) = MemoryTransport::pair();
	let options = TargetOptions {
		parent: Some(parent),
		connection: Some(transport),
		..TargetOptions::default()
	};
	assert!(Target::new(&backend, options).unwrap_err().is_invalid_target());
}

#[test]
fn test_root_without_factory_fails() {
	let backend = Backend::default();
	assert!(matches!(
		Target::new(&backend, TargetOptions::root()),
		Err(Error::NoConnectionFactory)
	));
}

#[tokio::test]
async fn test_root_uses_connection_factory() {
	let (transport, mut remote) = MemoryTransport::pair();
	let backend = Backend::builder()
		.registry(registry())
		.connection_factory(move || Arc::clone(&transport) as Arc<dyn Transport>)
		.build();
	let target = Target::new(&backend, TargetOptions::root()).unwrap();

	let _pending = target.agent("Runtime").unwrap().call("enable", vec![]);
	assert_eq!(
		remote.next_request().await.unwrap(),
		json!({"id": 1, "method": "Runtime.enable"})
	);
}

#[tokio::test]
async fn test_child_shares_parent_router() {
	let (backend, parent, mut remote) = root();
	let child = Target::new(&backend, TargetOptions::child(&parent, "S1")).unwrap();

	let router = parent.router().unwrap();
	assert!(Arc::ptr_eq(&router, &child.router().unwrap()));
	assert_eq!(router.session_count(), 2);
	assert!(Arc::ptr_eq(child.parent_target().unwrap(), &parent));

	let pending = child
		.command("Page.navigate")
		.unwrap()
		.call(vec![json!("about:blank")]);
	let request = remote.next_request().await.unwrap();
	assert_eq!(request["sessionId"], "S1");
	assert_eq!(request["id"], 1);

	remote.deliver_json(&json!({"id": 1, "sessionId": "S1", "result": {"frameId": "F"}}));
	assert_eq!(pending.await.value, Some(json!("F")));
}

#[test]
fn test_domains_are_frozen_at_construction() {
	let (backend, target, _remote) = root();
	backend
		.registry()
		.register_command("Network.enable", vec![], vec![]);
	backend
		.registry()
		.register_command("Page.reload", vec![], vec![]);

	assert_eq!(target.domains().collect::<Vec<_>>(), ["Page", "Runtime"]);
	assert!(target.agent("Network").is_none());
	assert!(target.agent("Page").unwrap().has_command("reload"));
	assert!(matches!(
		target.command("Network.enable"),
		Err(Error::UnknownDomain(_))
	));
	assert!(matches!(
		target.command("Page.missing"),
		Err(Error::UnknownCommand(_))
	));
}

#[tokio::test]
async fn test_event_reaches_listener() {
	let (_backend, target, remote) = root();
	let (listener, calls) = recording("loadEventFired");
	target.register_dispatcher("Page", listener);

	remote.deliver_json(&json!({"method": "Page.loadEventFired", "params": {"timestamp": 1.5}}));
	assert_eq!(calls.lock().as_slice(), [json!({"timestamp": 1.5})]);
}

#[tokio::test]
async fn test_event_for_unknown_domain_is_protocol_error() {
	let (backend, target, _remote) = root();
	let log = backend.diagnostics().record_reports();

	target.dispatch(EventMessage {
		method: "Runtime.consoleAPICalled".into(),
		params: None,
		session_id: None,
	});
	let errors = log.errors();
	assert_eq!(errors.len(), 1);
	assert_eq!(
		errors[0].message,
		"Protocol Error: the message Runtime.consoleAPICalled is for non-existing domain 'Runtime'"
	);
}

#[test]
fn test_dispatcher_registration_ignores_unknown_domain() {
	let (_backend, target, _remote) = root();
	let (listener, _calls) = recording("anything");
	target.register_dispatcher("Nope", Arc::clone(&listener));
	target.unregister_dispatcher("Nope", &listener);
}

#[tokio::test]
async fn test_unregistered_dispatcher_stops_receiving() {
	let (_backend, target, remote) = root();
	let (listener, calls) = recording("loadEventFired");
	target.register_dispatcher("Page", Arc::clone(&listener));
	target.unregister_dispatcher("Page", &listener);

	remote.deliver_json(&json!({"method": "Page.loadEventFired", "params": {}}));
	assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn test_dispose_is_idempotent() {
	let (backend, target, mut remote) = root();
	let log = backend.diagnostics().record_reports();
	let router = target.router().unwrap();
	let agent = target.agent("Page").unwrap().clone();

	target.dispose("done");
	target.dispose("again");
	assert!(target.is_disposed());
	assert!(target.router().is_none());
	assert!(!router.has_session(""));

	let result = agent.call("navigate", vec![json!("about:blank")]).await;
	assert!(result.error.unwrap().is_connection_closed());
	assert!(log.all().is_empty());
	assert!(remote.take_sent().is_empty());
}

#[tokio::test]
async fn test_dispose_fails_pending_calls() {
	let (_backend, target, mut remote) = root();
	let pending = target
		.agent("Page")
		.unwrap()
		.call("navigate", vec![json!("about:blank")]);
	remote.next_request().await.unwrap();

	target.dispose("closing");
	let error = pending.await.error.unwrap();
	assert_eq!(
		error.message,
		"Session is unregistering, can't dispatch pending call to Page.navigate"
	);
}

#[tokio::test]
async fn test_disconnect_disposes_root() {
	let (_backend, target, remote) = root();
	remote.hang_up("target closed");
	assert!(target.is_disposed());
}

#[tokio::test]
async fn test_child_of_disposed_parent_is_rejected() {
	let (backend, parent, _remote) = root();
	parent.dispose("gone");
	let err = Target::new(&backend, TargetOptions::child(&parent, "S1")).unwrap_err();
	assert!(err.is_invalid_target());
}

#[test]
fn test_from_session_target() {
	let (_backend, target, _remote) = root();
	let router = target.router().unwrap();
	let session = router.target_by_session_id("").unwrap();
	let recovered = Target::from_session_target(session).unwrap();
	assert!(Arc::ptr_eq(&recovered, &target));
}

#[tokio::test]
async fn test_proxy_session_receives_raw_traffic() {
	let (backend, parent, remote) = root();
	let proxy = Arc::new(ParallelConnection::new(remote.transport(), "P1"));
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	proxy.set_on_message(Some(Arc::new(move |raw: &str| {
		sink.lock().push(raw.to_string())
	})));
	let log = backend.diagnostics().record_reports();

	let _child = Target::new(
		&backend,
		TargetOptions::child(&parent, "P1").proxy(proxy as Arc<dyn ProxyConnection>),
	)
	.unwrap();

	let raw = r#"{"id":99,"sessionId":"P1","result":{}}"#;
	remote.deliver(raw);
	assert_eq!(seen.lock().as_slice(), [raw.to_string()]);
	assert!(log.errors().is_empty());
}
