//! How requests reach an engine.
//!
//! Every [`Instance`](crate::Instance) talks to its engine through a
//! [`Transport`]; a [`Launcher`] creates one per instance. The three modes
//! differ only here:
//!
//! - [`InProcessLauncher`]: the engine lives in the caller's process and every
//!   call holds the process-wide native lock.
//! - [`SandboxLauncher`]: each instance owns an engine copy on an isolated thread
//!   reached only through frames; panics are contained.
//! - [`ProcessLauncher`]: each instance is a `pdfhost-worker` child process
//!   speaking length-prefixed frames on its stdin and stdout.

mod connection;
mod inprocess;
mod process;
mod sandbox;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pdfhost_proto::{InstanceId, Request, Response};

pub use self::inprocess::InProcessLauncher;
pub(crate) use self::inprocess::{install_global_hooks, uninstall_global_hooks};
pub use self::process::ProcessLauncher;
pub use self::sandbox::SandboxLauncher;
use crate::broker::CallbackBroker;
use crate::config::Mode;
use crate::error::Result;

/// A live channel to one engine.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Runs one request. Calls on one transport are never concurrent.
	async fn call(&self, request: Request) -> Result<Response>;

	/// Returns false once the engine is known to be gone.
	fn is_alive(&self) -> bool;

	/// Releases every native object and stops the engine.
	async fn shutdown(&self) -> Result<()>;
}

/// Per-launch parameters taken from the pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
	/// Deadline of a single call.
	pub call_timeout: Option<Duration>,
	/// Deadline of the startup handshake.
	pub handshake_timeout: Duration,
}

/// Future returned by [`Launcher::launch`].
pub type LaunchFuture = Pin<Box<dyn Future<Output = Result<Box<dyn Transport>>> + Send>>;

/// Starts engines for new instances.
///
/// This abstraction lets the pool run real worker processes in production and
/// in-process engines in tests.
pub trait Launcher: Send + Sync + 'static {
	/// Mode of the transports this launcher creates.
	fn mode(&self) -> Mode;

	/// Starts an engine for `instance`. Callbacks are answered by `broker`.
	fn launch(&self, instance: InstanceId, broker: Arc<CallbackBroker>, options: LaunchOptions) -> LaunchFuture;
}
