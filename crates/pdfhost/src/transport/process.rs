//! Process-isolated instances: one `pdfhost-worker` child per instance.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pdfhost_proto::{InstanceId, IpcFrame, PROTOCOL_VERSION, Request, Response, read_frame, write_frame};
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

use super::connection::{Connection, handshake};
use super::{LaunchFuture, LaunchOptions, Launcher, Transport};
use crate::broker::CallbackBroker;
use crate::config::{Mode, WorkerConfig};
use crate::error::{Error, Result};
use crate::spawn::{TaskClass, spawn};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
const KILL_GRACE: Duration = Duration::from_secs(1);

/// How the monitor should stop a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
	/// Ask for shutdown, kill after a grace period.
	Graceful,
	/// Kill immediately.
	Kill,
}

/// Production launcher that spawns worker processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
	worker: Arc<WorkerConfig>,
}

impl ProcessLauncher {
	/// Creates a launcher running `worker` for every instance.
	#[must_use]
	pub fn new(worker: WorkerConfig) -> Self {
		Self { worker: Arc::new(worker) }
	}
}

impl Launcher for ProcessLauncher {
	fn mode(&self) -> Mode {
		Mode::Process
	}

	/// Spawns a worker, starts its frame pumps and lifecycle monitor, then handshakes.
	fn launch(&self, instance: InstanceId, broker: Arc<CallbackBroker>, options: LaunchOptions) -> LaunchFuture {
		let worker = Arc::clone(&self.worker);
		Box::pin(async move {
			let mut child = Command::new(&worker.program)
				.args(&worker.args)
				.envs(&worker.env)
				.stdin(Stdio::piped())
				.stdout(Stdio::piped())
				.stderr(Stdio::inherit())
				.kill_on_drop(true)
				.spawn()
				.map_err(|error| {
					tracing::error!(%instance, program = %worker.program.display(), %error, "process.spawn_failed");
					Error::Handshake(format!("failed to spawn {}: {error}", worker.program.display()))
				})?;

			let stdin = child.stdin.take().ok_or_else(|| Error::Handshake("worker stdin unavailable".to_owned()))?;
			let stdout = child.stdout.take().ok_or_else(|| Error::Handshake("worker stdout unavailable".to_owned()))?;
			let pid = child.id();

			let (to_worker, outgoing) = mpsc::unbounded_channel();
			let (incoming, from_worker) = mpsc::unbounded_channel();
			spawn(TaskClass::Background, pump_out(instance, stdin, outgoing));
			spawn(TaskClass::Background, pump_in(instance, stdout, incoming));

			let _ = to_worker.send(IpcFrame::Hello {
				protocol: PROTOCOL_VERSION,
				instance,
			});
			let (connection, ready) = Connection::start(instance, broker, to_worker, from_worker);
			let connection = Arc::new(connection);

			let (term_tx, term_rx) = oneshot::channel();
			spawn(TaskClass::Background, monitor(instance, child, Arc::clone(&connection), term_rx));

			let ready = match handshake(ready, options.handshake_timeout).await {
				Ok(ready) => ready,
				Err(error) => {
					let _ = term_tx.send(Termination::Kill);
					return Err(error);
				}
			};
			tracing::debug!(%instance, ?pid, engine = %ready.engine, "process.started");

			Ok(Box::new(ProcessTransport {
				instance,
				connection,
				call_timeout: options.call_timeout,
				terminate: Mutex::new(Some(term_tx)),
			}) as Box<dyn Transport>)
		})
	}
}

async fn pump_out(instance: InstanceId, mut stdin: ChildStdin, mut outgoing: mpsc::UnboundedReceiver<IpcFrame>) {
	while let Some(frame) = outgoing.recv().await {
		if let Err(error) = write_frame(&mut stdin, &frame).await {
			tracing::debug!(%instance, %error, "process.write_failed");
			break;
		}
	}
}

async fn pump_in(instance: InstanceId, stdout: ChildStdout, incoming: mpsc::UnboundedSender<IpcFrame>) {
	let mut reader = BufReader::new(stdout);
	loop {
		match read_frame(&mut reader).await {
			Ok(Some(frame)) => {
				if incoming.send(frame).is_err() {
					break;
				}
			}
			Ok(None) => break,
			Err(error) => {
				tracing::warn!(%instance, %error, "process.read_failed");
				break;
			}
		}
	}
}

/// Owns the child until it exits or termination is requested.
async fn monitor(instance: InstanceId, mut child: Child, connection: Arc<Connection>, mut terminate: oneshot::Receiver<Termination>) {
	let reason = tokio::select! {
		status = child.wait() => match status {
			Ok(status) => {
				tracing::info!(%instance, %status, crashed = !status.success(), "process.exited");
				format!("worker exited with {status}")
			}
			Err(error) => {
				tracing::error!(%instance, %error, "process.wait_failed");
				format!("failed to wait on worker: {error}")
			}
		},
		request = &mut terminate => {
			// A dropped sender means the transport is gone without a shutdown.
			let request = request.unwrap_or(Termination::Kill);
			tracing::debug!(%instance, ?request, "process.terminating");
			if request == Termination::Graceful {
				connection.send(IpcFrame::Shutdown);
				if tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
					let _ = child.kill().await;
				}
			} else {
				let _ = child.kill().await;
			}
			let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;
			"worker stopped".to_owned()
		}
	};
	connection.mark_dead(reason);
}

struct ProcessTransport {
	instance: InstanceId,
	connection: Arc<Connection>,
	call_timeout: Option<Duration>,
	terminate: Mutex<Option<oneshot::Sender<Termination>>>,
}

impl ProcessTransport {
	fn terminate(&self, request: Termination) {
		if let Some(tx) = self.terminate.lock().take() {
			let _ = tx.send(request);
		}
	}
}

#[async_trait]
impl Transport for ProcessTransport {
	async fn call(&self, request: Request) -> Result<Response> {
		let result = self.connection.call(request, self.call_timeout).await;
		if let Err(Error::Timeout(limit)) = &result {
			tracing::warn!(instance = %self.instance, limit_ms = limit.as_millis() as u64, "process.killing_stuck_worker");
			self.connection.mark_dead(format!("call exceeded {limit:?}"));
			self.terminate(Termination::Kill);
		}
		result
	}

	fn is_alive(&self) -> bool {
		self.connection.is_alive()
	}

	async fn shutdown(&self) -> Result<()> {
		let closed = self.connection.closed();
		self.terminate(Termination::Graceful);
		if tokio::time::timeout(SHUTDOWN_GRACE + KILL_GRACE, closed.cancelled()).await.is_err() {
			tracing::warn!(instance = %self.instance, "process.shutdown_slow");
		}
		Ok(())
	}
}

impl Drop for ProcessTransport {
	fn drop(&mut self) {
		self.terminate(Termination::Kill);
	}
}
