//! Sandboxed instances: one engine copy per isolated thread.
//!
//! The engine shares no state with the caller; requests and callbacks travel
//! as frames over in-memory channels, so a panicking engine takes down only
//! its own thread.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pdfhost_engine::{EngineFactory, Executor};
use pdfhost_proto::{InstanceId, IpcFrame, Request, Response};
use tokio::sync::{mpsc, oneshot};

use super::connection::{Connection, handshake};
use super::{LaunchFuture, LaunchOptions, Launcher, Transport};
use crate::broker::CallbackBroker;
use crate::config::Mode;
use crate::error::{Error, Result};
use crate::host::{EngineHost, HostExit, panic_message};
use crate::spawn::{TaskClass, runtime_handle, spawn_named_thread};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Launches each instance on its own engine thread.
pub struct SandboxLauncher<F> {
	factory: Arc<F>,
}

impl<F: EngineFactory> SandboxLauncher<F> {
	/// Creates a launcher building engines with `factory`.
	pub fn new(factory: F) -> Self {
		Self {
			factory: Arc::new(factory),
		}
	}
}

impl<F: EngineFactory> Launcher for SandboxLauncher<F> {
	fn mode(&self) -> Mode {
		Mode::Sandbox
	}

	fn launch(&self, instance: InstanceId, broker: Arc<CallbackBroker>, options: LaunchOptions) -> LaunchFuture {
		let factory = Arc::clone(&self.factory);
		Box::pin(async move {
			let (to_host, host_inbound) = mpsc::unbounded_channel();
			let (host_outbound, from_host) = mpsc::unbounded_channel();
			let (exit_tx, exit_rx) = oneshot::channel();
			let runtime = runtime_handle();

			spawn_named_thread(TaskClass::CpuBlocking, format!("pdfhost-sandbox-{}", instance.0), move || {
				let _runtime = runtime.enter();
				let exit = match catch_unwind(AssertUnwindSafe(|| factory.create())) {
					Ok(engine) => EngineHost::new(Executor::new(engine, instance), host_inbound, host_outbound).run(),
					Err(payload) => {
						tracing::error!(%instance, message = %panic_message(&*payload), "sandbox.engine_create_panicked");
						HostExit::Panicked
					}
				};
				let _ = exit_tx.send(exit);
			})?;

			let (connection, ready) = Connection::start(instance, broker, to_host, from_host);
			let ready = match handshake(ready, options.handshake_timeout).await {
				Ok(ready) => ready,
				Err(error) => {
					connection.send(IpcFrame::Shutdown);
					connection.mark_dead(error.to_string());
					return Err(error);
				}
			};
			tracing::debug!(%instance, engine = %ready.engine, "sandbox.started");

			Ok(Box::new(SandboxTransport {
				instance,
				connection,
				call_timeout: options.call_timeout,
				exit: Mutex::new(Some(exit_rx)),
			}) as Box<dyn Transport>)
		})
	}
}

struct SandboxTransport {
	instance: InstanceId,
	connection: Connection,
	call_timeout: Option<Duration>,
	exit: Mutex<Option<oneshot::Receiver<HostExit>>>,
}

#[async_trait]
impl Transport for SandboxTransport {
	async fn call(&self, request: Request) -> Result<Response> {
		match self.connection.call(request, self.call_timeout).await {
			Err(Error::Timeout(limit)) => {
				// A stuck engine thread cannot be interrupted; abandon it.
				self.connection.mark_dead(format!("call exceeded {limit:?}"));
				Err(Error::Timeout(limit))
			}
			other => other,
		}
	}

	fn is_alive(&self) -> bool {
		self.connection.is_alive()
	}

	async fn shutdown(&self) -> Result<()> {
		self.connection.send(IpcFrame::Shutdown);
		let exit = self.exit.lock().take();
		if let Some(exit) = exit {
			match tokio::time::timeout(SHUTDOWN_GRACE, exit).await {
				Ok(Ok(exit)) => tracing::debug!(instance = %self.instance, ?exit, "sandbox.stopped"),
				Ok(Err(_)) => tracing::debug!(instance = %self.instance, "sandbox.thread_gone"),
				Err(_) => tracing::warn!(instance = %self.instance, "sandbox.shutdown_abandoned"),
			}
		}
		self.connection.mark_dead("instance shut down".to_owned());
		Ok(())
	}
}
