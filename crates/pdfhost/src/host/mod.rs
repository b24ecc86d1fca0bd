//! The instance side of a frame channel.
//!
//! An [`EngineHost`] owns an [`Executor`] on a dedicated thread and speaks
//! [`IpcFrame`]s with exactly one caller. The same loop serves sandboxed
//! instances (over in-memory channels) and worker processes (over pipes).

mod timers;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use pdfhost_engine::{CallbackHost, Executor, PdfEngine};
use pdfhost_proto::{CallbackCall, CallbackId, CallbackReply, Event, IpcFrame, PROTOCOL_VERSION, Reference};
use tokio::sync::mpsc;

pub(crate) use self::timers::{EventSink, TimerWheel};

/// Frames flowing into a host.
pub(crate) type Inbound = mpsc::UnboundedReceiver<IpcFrame>;
/// Frames flowing out of a host.
pub(crate) type Outbound = mpsc::UnboundedSender<IpcFrame>;

/// How a host loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostExit {
	/// The caller asked for shutdown.
	Shutdown,
	/// The caller went away.
	Disconnected,
	/// The engine panicked; its state is not trusted any more.
	Panicked,
}

/// Serves one caller on the current thread.
pub(crate) struct EngineHost<E> {
	executor: Executor<E>,
	link: FrameLink,
}

impl<E: PdfEngine> EngineHost<E> {
	pub(crate) fn new(executor: Executor<E>, inbound: Inbound, outbound: Outbound) -> Self {
		let sink = outbound.clone();
		let events: EventSink = Arc::new(move |event| {
			let _ = sink.send(IpcFrame::Event(event));
		});
		Self {
			executor,
			link: FrameLink {
				inbound,
				outbound,
				timers: TimerWheel::new(events),
				next_callback: 0,
				shutdown: false,
			},
		}
	}

	/// Runs until shutdown, disconnect or an engine panic.
	///
	/// Blocks the calling thread; must not run on an async worker.
	pub(crate) fn run(mut self) -> HostExit {
		let instance = self.executor.instance();
		let engine = self.executor.engine().name().to_owned();
		if !self.link.send(IpcFrame::Ready {
			protocol: PROTOCOL_VERSION,
			engine,
		}) {
			return HostExit::Disconnected;
		}
		tracing::debug!(%instance, "host.ready");

		let exit = loop {
			if self.link.shutdown {
				break HostExit::Shutdown;
			}
			let Some(frame) = self.link.inbound.blocking_recv() else {
				break HostExit::Disconnected;
			};
			match frame {
				IpcFrame::Request { id, request } => {
					let name = request.name();
					let executor = &mut self.executor;
					let link = &mut self.link;
					match catch_unwind(AssertUnwindSafe(|| executor.execute(request, link))) {
						Ok(result) => {
							self.link.send(IpcFrame::Response { id, result });
						}
						Err(payload) => {
							let message = panic_message(&*payload);
							tracing::error!(%instance, op = name, %message, "host.engine_panicked");
							break HostExit::Panicked;
						}
					}
				}
				IpcFrame::Shutdown => break HostExit::Shutdown,
				other => tracing::warn!(%instance, frame = ?other, "host.unexpected_frame"),
			}
		};

		self.link.timers.disarm_all();
		if exit != HostExit::Panicked {
			let released = self.executor.close_all(&mut self.link);
			tracing::debug!(%instance, released, ?exit, "host.stopped");
		}
		exit
	}
}

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(message) = payload.downcast_ref::<&str>() {
		(*message).to_owned()
	} else if let Some(message) = payload.downcast_ref::<String>() {
		message.clone()
	} else {
		"engine panicked".to_owned()
	}
}

/// Host side of the callback channel over frames.
struct FrameLink {
	inbound: Inbound,
	outbound: Outbound,
	timers: TimerWheel,
	next_callback: u64,
	shutdown: bool,
}

impl FrameLink {
	fn send(&self, frame: IpcFrame) -> bool {
		self.outbound.send(frame).is_ok()
	}
}

impl CallbackHost for FrameLink {
	fn invoke(&mut self, call: CallbackCall) -> Option<CallbackReply> {
		if self.shutdown {
			return None;
		}
		self.next_callback += 1;
		let id = CallbackId(self.next_callback);
		if !self.send(IpcFrame::Callback { id, call }) {
			return None;
		}

		loop {
			match self.inbound.blocking_recv()? {
				IpcFrame::CallbackReply { id: reply_id, reply } if reply_id == id => return Some(reply),
				IpcFrame::Shutdown => {
					self.shutdown = true;
					return None;
				}
				other => tracing::warn!(callback = id.0, frame = ?other, "host.unexpected_frame_in_callback"),
			}
		}
	}

	fn arm_timer(&mut self, form: Reference, timer_id: i32, interval: Duration) {
		self.timers.arm(form, timer_id, interval);
	}

	fn disarm_timer(&mut self, form: Reference, timer_id: i32) {
		self.timers.disarm(form, timer_id);
	}

	fn notify(&mut self, event: Event) {
		self.send(IpcFrame::Event(event));
	}
}

#[cfg(test)]
mod tests {
	use pdfhost_engine::{FixtureDocument, MemoryEngine};
	use pdfhost_proto::{DocumentSource, InstanceId, RequestId, Request, Response};

	use super::*;

	#[tokio::test]
	async fn serves_requests_and_closes_everything_on_shutdown() {
		let (in_tx, in_rx) = mpsc::unbounded_channel();
		let (out_tx, mut out_rx) = mpsc::unbounded_channel();
		let host = EngineHost::new(Executor::new(MemoryEngine::new(), InstanceId(3)), in_rx, out_tx);
		let thread = std::thread::spawn(move || host.run());

		assert!(matches!(out_rx.recv().await, Some(IpcFrame::Ready { protocol: PROTOCOL_VERSION, .. })));
		in_tx
			.send(IpcFrame::Request {
				id: RequestId(1),
				request: Request::OpenDocument {
					source: DocumentSource::Bytes(FixtureDocument::with_pages(2).to_bytes()),
					password: None,
				},
			})
			.unwrap();
		let Some(IpcFrame::Response { id, result: Ok(Response::Document(document)) }) = out_rx.recv().await else {
			panic!("expected a document");
		};
		assert_eq!(id, RequestId(1));
		assert_eq!(document.instance, InstanceId(3));

		in_tx.send(IpcFrame::Shutdown).unwrap();
		assert_eq!(thread.join().unwrap(), HostExit::Shutdown);
	}

	#[test]
	fn panic_messages_are_extracted() {
		let payload = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
		assert_eq!(panic_message(&*payload), "boom 1");
	}
}
