//! Caller side of a frame channel.
//!
//! A [`Connection`] correlates requests with responses and answers nested
//! callbacks through the instance's [`CallbackBroker`]. Callbacks arrive on the
//! same channel as the response they are nested in, so a single router task
//! preserves their ordering.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pdfhost_proto::{InstanceId, IpcFrame, PdfError, Request, RequestId, Response};
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::broker::CallbackBroker;
use crate::error::{Error, Result};
use crate::host::{Inbound, Outbound};
use crate::spawn::{TaskClass, spawn};

type Pending = Arc<Mutex<FxHashMap<RequestId, oneshot::Sender<std::result::Result<Response, PdfError>>>>>;

/// Handshake answer from an engine host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Ready {
	pub(crate) protocol: u32,
	pub(crate) engine: String,
}

struct Shared {
	pending: Pending,
	closed: CancellationToken,
	reason: Mutex<Option<String>>,
}

impl Shared {
	fn mark_dead(&self, reason: String) {
		{
			let mut slot = self.reason.lock();
			if slot.is_none() {
				*slot = Some(reason);
			}
		}
		self.closed.cancel();
		self.pending.lock().clear();
	}

	fn reason(&self) -> String {
		self.reason
			.lock()
			.clone()
			.unwrap_or_else(|| "worker channel closed".to_owned())
	}
}

/// Request/response correlation over one frame channel.
pub(crate) struct Connection {
	instance: InstanceId,
	outbound: Outbound,
	next_id: AtomicU64,
	shared: Arc<Shared>,
}

impl Connection {
	/// Starts the router task. The returned receiver resolves with the host's `Ready` frame.
	pub(crate) fn start(
		instance: InstanceId,
		broker: Arc<CallbackBroker>,
		outbound: Outbound,
		inbound: Inbound,
	) -> (Self, oneshot::Receiver<Ready>) {
		let shared = Arc::new(Shared {
			pending: Arc::new(Mutex::new(FxHashMap::default())),
			closed: CancellationToken::new(),
			reason: Mutex::new(None),
		});
		let (ready_tx, ready_rx) = oneshot::channel();

		spawn(
			TaskClass::Interactive,
			route(instance, broker, outbound.clone(), inbound, Arc::clone(&shared), ready_tx),
		);

		let connection = Self {
			instance,
			outbound,
			next_id: AtomicU64::new(1),
			shared,
		};
		(connection, ready_rx)
	}

	/// Sends a request and waits for its outcome.
	pub(crate) async fn call(&self, request: Request, timeout: Option<Duration>) -> Result<Response> {
		if self.shared.closed.is_cancelled() {
			return Err(Error::WorkerDied(self.shared.reason()));
		}

		let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let (tx, rx) = oneshot::channel();
		self.shared.pending.lock().insert(id, tx);
		if self.shared.closed.is_cancelled() {
			self.shared.pending.lock().remove(&id);
			return Err(Error::WorkerDied(self.shared.reason()));
		}

		let name = request.name();
		if self.outbound.send(IpcFrame::Request { id, request }).is_err() {
			self.shared.pending.lock().remove(&id);
			self.mark_dead("worker channel closed".to_owned());
			return Err(Error::WorkerDied(self.shared.reason()));
		}

		let outcome = match timeout {
			Some(limit) => match tokio::time::timeout(limit, rx).await {
				Ok(outcome) => outcome,
				Err(_) => {
					self.shared.pending.lock().remove(&id);
					tracing::warn!(instance = %self.instance, op = name, limit_ms = limit.as_millis() as u64, "connection.call_timed_out");
					return Err(Error::Timeout(limit));
				}
			},
			None => rx.await,
		};

		match outcome {
			Ok(Ok(response)) => Ok(response),
			Ok(Err(error)) => Err(Error::Pdf(error)),
			Err(_) => Err(Error::WorkerDied(self.shared.reason())),
		}
	}

	/// Sends a frame without waiting for an answer.
	pub(crate) fn send(&self, frame: IpcFrame) -> bool {
		self.outbound.send(frame).is_ok()
	}

	/// Fails every outstanding and future call with `reason`.
	pub(crate) fn mark_dead(&self, reason: String) {
		self.shared.mark_dead(reason);
	}

	pub(crate) fn is_alive(&self) -> bool {
		!self.shared.closed.is_cancelled()
	}

	/// Resolves once the channel is closed.
	pub(crate) fn closed(&self) -> CancellationToken {
		self.shared.closed.clone()
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.shared.mark_dead("connection dropped".to_owned());
	}
}

/// Waits for the host's `Ready` frame and checks its protocol version.
pub(crate) async fn handshake(ready: oneshot::Receiver<Ready>, timeout: Duration) -> Result<Ready> {
	let ready = match tokio::time::timeout(timeout, ready).await {
		Ok(Ok(ready)) => ready,
		Ok(Err(_)) => return Err(Error::Handshake("engine host exited before it was ready".to_owned())),
		Err(_) => return Err(Error::Handshake(format!("no ready frame within {timeout:?}"))),
	};
	if ready.protocol != pdfhost_proto::PROTOCOL_VERSION {
		return Err(Error::Handshake(format!(
			"protocol mismatch: host speaks {}, caller speaks {}",
			ready.protocol,
			pdfhost_proto::PROTOCOL_VERSION
		)));
	}
	Ok(ready)
}

async fn route(
	instance: InstanceId,
	broker: Arc<CallbackBroker>,
	outbound: Outbound,
	mut inbound: Inbound,
	shared: Arc<Shared>,
	ready: oneshot::Sender<Ready>,
) {
	let mut ready = Some(ready);
	loop {
		let frame = tokio::select! {
			frame = inbound.recv() => frame,
			_ = shared.closed.cancelled() => break,
		};
		let Some(frame) = frame else {
			shared.mark_dead("worker channel closed".to_owned());
			break;
		};

		match frame {
			IpcFrame::Ready { protocol, engine } => match ready.take() {
				Some(tx) => {
					let _ = tx.send(Ready { protocol, engine });
				}
				None => tracing::warn!(%instance, "connection.duplicate_ready"),
			},
			IpcFrame::Response { id, result } => {
				let waiter = shared.pending.lock().remove(&id);
				match waiter {
					Some(tx) => {
						let _ = tx.send(result);
					}
					None => tracing::debug!(%instance, request = id.0, "connection.orphan_response"),
				}
			}
			IpcFrame::Callback { id, call } => {
				let reply = broker.invoke(call);
				if outbound.send(IpcFrame::CallbackReply { id, reply }).is_err() {
					shared.mark_dead("worker channel closed".to_owned());
					break;
				}
			}
			IpcFrame::Event(event) => broker.dispatch_event(event),
			other => {
				tracing::warn!(%instance, frame = ?other, "connection.protocol_violation");
				shared.mark_dead(format!("protocol violation: unexpected {other:?}"));
				break;
			}
		}
	}
	tracing::debug!(%instance, "connection.router_stopped");
}

#[cfg(test)]
mod tests {
	use pdfhost_proto::{CallbackCall, CallbackId, CallbackReply, RefKind, Reference};
	use tokio::sync::mpsc;

	use super::*;

	#[tokio::test]
	async fn callbacks_are_answered_before_the_response() {
		let instance = InstanceId(5);
		let broker = Arc::new(CallbackBroker::new(instance));
		let (host_tx, caller_rx) = mpsc::unbounded_channel();
		let (caller_tx, mut host_rx) = mpsc::unbounded_channel();
		let (connection, ready) = Connection::start(instance, broker, caller_tx, caller_rx);

		host_tx
			.send(IpcFrame::Ready {
				protocol: pdfhost_proto::PROTOCOL_VERSION,
				engine: "fake".to_owned(),
			})
			.unwrap();
		assert_eq!(handshake(ready, Duration::from_secs(1)).await.unwrap().engine, "fake");

		let host = tokio::spawn(async move {
			let Some(IpcFrame::Request { id, .. }) = host_rx.recv().await else {
				panic!("expected a request");
			};
			let page = Reference::new(RefKind::Page, 1, instance);
			host_tx
				.send(IpcFrame::Callback {
					id: CallbackId(1),
					call: CallbackCall::NeedToPauseNow { page },
				})
				.unwrap();
			let Some(IpcFrame::CallbackReply { reply, .. }) = host_rx.recv().await else {
				panic!("expected a callback reply");
			};
			assert_eq!(reply, CallbackReply::Pause(false));
			host_tx
				.send(IpcFrame::Response {
					id,
					result: Ok(Response::Pong),
				})
				.unwrap();
			host_tx
		});

		assert_eq!(connection.call(Request::Ping, None).await.unwrap(), Response::Pong);
		drop(host.await.unwrap());
	}

	#[tokio::test]
	async fn outstanding_calls_fail_when_the_host_disappears() {
		let instance = InstanceId(6);
		let broker = Arc::new(CallbackBroker::new(instance));
		let (host_tx, caller_rx) = mpsc::unbounded_channel();
		let (caller_tx, _host_rx) = mpsc::unbounded_channel();
		let (connection, _ready) = Connection::start(instance, broker, caller_tx, caller_rx);

		let call = connection.call(Request::Ping, None);
		drop(host_tx);
		assert!(matches!(call.await, Err(Error::WorkerDied(_))));
		assert!(!connection.is_alive());
	}

	#[tokio::test]
	async fn timeouts_leave_no_pending_call() {
		let instance = InstanceId(7);
		let broker = Arc::new(CallbackBroker::new(instance));
		let (_host_tx, caller_rx) = mpsc::unbounded_channel::<IpcFrame>();
		let (caller_tx, _host_rx) = mpsc::unbounded_channel();
		let (connection, _ready) = Connection::start(instance, broker, caller_tx, caller_rx);

		let error = connection.call(Request::Ping, Some(Duration::from_millis(20))).await.unwrap_err();
		assert!(matches!(error, Error::Timeout(_)));
		assert!(connection.shared.pending.lock().is_empty());
	}
}
