//! The worker side of process mode.
//!
//! A worker reads `Hello` from its caller, boots one engine on a dedicated
//! thread and serves frames until the caller sends `Shutdown` or closes the
//! pipe. Logs go to stderr; stdout carries frames only.

use std::time::Duration;

use pdfhost_engine::{EngineFactory, Executor};
use pdfhost_proto::{FrameError, IpcFrame, PROTOCOL_VERSION, read_frame, write_frame};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::host::{EngineHost, HostExit};
use crate::spawn::{TaskClass, runtime_handle, spawn, spawn_named_thread};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Serves the caller on stdin and stdout.
pub async fn run_worker<F: EngineFactory>(factory: F) -> Result<()> {
	serve(factory, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serves one caller over an arbitrary byte stream pair.
pub async fn serve<F, R, W>(factory: F, reader: R, writer: W) -> Result<()>
where
	F: EngineFactory,
	R: AsyncRead + Unpin + Send + 'static,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let mut reader = BufReader::new(reader);
	let instance = match read_frame(&mut reader).await? {
		Some(IpcFrame::Hello { protocol, instance }) if protocol == PROTOCOL_VERSION => instance,
		Some(IpcFrame::Hello { protocol, .. }) => {
			return Err(Error::Handshake(format!(
				"caller speaks protocol {protocol}, worker speaks {PROTOCOL_VERSION}"
			)));
		}
		Some(other) => return Err(Error::Protocol(format!("expected Hello, got {other:?}"))),
		None => return Err(Error::Handshake("caller went away before Hello".to_owned())),
	};
	tracing::info!(%instance, pid = std::process::id(), "worker.hello");

	let (to_host, host_inbound) = mpsc::unbounded_channel();
	let (host_outbound, mut from_host) = mpsc::unbounded_channel();
	let (exit_tx, mut exit_rx) = oneshot::channel();
	let runtime = runtime_handle();
	spawn_named_thread(TaskClass::CpuBlocking, "pdfhost-engine", move || {
		let _runtime = runtime.enter();
		let exit = EngineHost::new(Executor::new(factory.create(), instance), host_inbound, host_outbound).run();
		let _ = exit_tx.send(exit);
	})?;

	let writer = spawn(TaskClass::Interactive, async move {
		let mut writer = BufWriter::new(writer);
		while let Some(frame) = from_host.recv().await {
			write_frame(&mut writer, &frame).await?;
		}
		Ok::<_, FrameError>(())
	});

	let exit = loop {
		let frame = tokio::select! {
			exit = &mut exit_rx => break exit.unwrap_or(HostExit::Panicked),
			frame = read_frame(&mut reader) => frame,
		};
		match frame {
			Ok(Some(frame)) => {
				if to_host.send(frame).is_err() {
					break (&mut exit_rx).await.unwrap_or(HostExit::Panicked);
				}
			}
			Ok(None) => {
				tracing::debug!(%instance, "worker.caller_closed");
				drop(to_host);
				break exit_rx.await.unwrap_or(HostExit::Panicked);
			}
			Err(error) => {
				tracing::warn!(%instance, %error, "worker.read_failed");
				drop(to_host);
				break exit_rx.await.unwrap_or(HostExit::Panicked);
			}
		}
	};

	match tokio::time::timeout(DRAIN_TIMEOUT, writer).await {
		Ok(Ok(Err(error))) => tracing::debug!(%instance, %error, "worker.write_failed"),
		Err(_) => tracing::debug!(%instance, "worker.drain_timed_out"),
		_ => {}
	}
	tracing::info!(%instance, ?exit, "worker.exiting");

	match exit {
		HostExit::Panicked => Err(Error::WorkerDied("engine panicked".to_owned())),
		HostExit::Shutdown | HostExit::Disconnected => Ok(()),
	}
}
