//! Diagnostic hooks: protocol error reporting and harness taps.
//!
//! Every report is logged through `tracing` and, when a sink is installed,
//! handed to it as a [`Report`]. The remaining hooks exist for test
//! harnesses: raw message taps and the request-error suppression flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cdp_protocol::{MessageId, ProtocolError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::config::BackendConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLevel {
	Error,
	Warning,
}

/// A single diagnostic emitted by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
	pub level: ReportLevel,
	pub message: String,
	/// The offending message, when there is one.
	pub payload: Option<Value>,
}

/// An outgoing command as seen by the sent-message tap.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
	pub id: MessageId,
	pub domain: String,
	pub method: String,
	pub params: Value,
	pub session_id: String,
}

pub type ReportSink = Arc<dyn Fn(&Report) + Send + Sync>;
pub type SentTap = Arc<dyn Fn(&SentMessage) + Send + Sync>;
pub type ReceivedTap = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
pub struct Diagnostics {
	sink: RwLock<Option<ReportSink>>,
	on_message_sent: RwLock<Option<SentTap>>,
	on_message_received: RwLock<Option<ReceivedTap>>,
	suppress_request_errors: AtomicBool,
	dump_protocol: AtomicBool,
}

impl std::fmt::Debug for Diagnostics {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Diagnostics")
			.field("sink", &self.sink.read().is_some())
			.field("suppress_request_errors", &self.suppress_request_errors())
			.field("dump_protocol", &self.dump_protocol())
			.finish_non_exhaustive()
	}
}

impl Diagnostics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_config(config: &BackendConfig) -> Self {
		let diagnostics = Self::new();
		diagnostics.set_suppress_request_errors(config.suppress_request_errors);
		diagnostics.set_dump_protocol(config.dump_protocol);
		diagnostics
	}

	pub fn set_report_sink(&self, sink: Option<ReportSink>) {
		*self.sink.write() = sink;
	}

	/// Installs a sink that records every report and returns the log.
	pub fn record_reports(&self) -> ReportLog {
		let log = ReportLog::default();
		let entries = Arc::clone(&log.entries);
		self.set_report_sink(Some(Arc::new(move |report: &Report| {
			entries.lock().push(report.clone());
		})));
		log
	}

	pub fn set_on_message_sent(&self, tap: Option<SentTap>) {
		*self.on_message_sent.write() = tap;
	}

	pub fn set_on_message_received(&self, tap: Option<ReceivedTap>) {
		*self.on_message_received.write() = tap;
	}

	pub fn set_suppress_request_errors(&self, suppress: bool) {
		self.suppress_request_errors.store(suppress, Ordering::SeqCst);
	}

	pub fn suppress_request_errors(&self) -> bool {
		self.suppress_request_errors.load(Ordering::SeqCst)
	}

	pub fn set_dump_protocol(&self, dump: bool) {
		self.dump_protocol.store(dump, Ordering::SeqCst);
	}

	pub fn dump_protocol(&self) -> bool {
		self.dump_protocol.load(Ordering::SeqCst)
	}

	/// Reports a malformed or unroutable message.
	pub fn protocol_error(&self, message: &str, payload: &Value) {
		tracing::error!(payload = %payload, "{message}");
		self.emit(Report {
			level: ReportLevel::Error,
			message: message.to_string(),
			payload: Some(payload.clone()),
		});
	}

	/// Reports a message that is well-formed but not expected by the schema.
	pub fn protocol_warning(&self, message: &str, payload: &Value) {
		tracing::warn!(payload = %payload, "{message}");
		self.emit(Report {
			level: ReportLevel::Warning,
			message: message.to_string(),
			payload: Some(payload.clone()),
		});
	}

	/// Reports a local failure without an offending message.
	pub fn error(&self, message: &str) {
		tracing::error!("{message}");
		self.emit(Report {
			level: ReportLevel::Error,
			message: message.to_string(),
			payload: None,
		});
	}

	/// Logs a failed command unless its code is benign or suppression is on.
	pub fn request_failed(&self, method: &str, error: &ProtocolError) {
		if self.suppress_request_errors() || error.is_benign() {
			return;
		}
		let json = serde_json::to_string(error).unwrap_or_else(|_| error.message.clone());
		self.error(&format!("Request {method} failed. {json}"));
	}

	pub(crate) fn message_sent(&self, sent: impl FnOnce() -> SentMessage) {
		let tap = self.on_message_sent.read().clone();
		if let Some(tap) = tap {
			tap(&sent());
		}
	}

	pub(crate) fn message_received(&self, raw: &str, message: &Value) {
		if self.dump_protocol() {
			tracing::trace!("backend: {raw}");
		}
		let tap = self.on_message_received.read().clone();
		if let Some(tap) = tap {
			tap(message);
		}
	}

	pub(crate) fn frontend_dump(&self, raw: &str) {
		if self.dump_protocol() {
			tracing::trace!("frontend: {raw}");
		}
	}

	fn emit(&self, report: Report) {
		let sink = self.sink.read().clone();
		if let Some(sink) = sink {
			sink(&report);
		}
	}
}

/// Reports captured by [`Diagnostics::record_reports`].
#[derive(Clone, Default)]
pub struct ReportLog {
	entries: Arc<Mutex<Vec<Report>>>,
}

impl ReportLog {
	pub fn all(&self) -> Vec<Report> {
		self.entries.lock().clone()
	}

	pub fn errors(&self) -> Vec<Report> {
		self.by_level(ReportLevel::Error)
	}

	pub fn warnings(&self) -> Vec<Report> {
		self.by_level(ReportLevel::Warning)
	}

	pub fn clear(&self) {
		self.entries.lock().clear();
	}

	fn by_level(&self, level: ReportLevel) -> Vec<Report> {
		self.entries
			.lock()
			.iter()
			.filter(|r| r.level == level)
			.cloned()
			.collect()
	}
}
