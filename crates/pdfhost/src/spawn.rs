//! Task and thread spawning tagged with an execution class.

use std::future::Future;
use std::sync::OnceLock;

use tokio::task::JoinHandle;

/// Execution classes used for scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Frame routing and waiter hand-off on the caller side.
	Interactive,
	/// Replenishing instances, monitors and timers.
	Background,
	/// Engine calls.
	CpuBlocking,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Interactive => "interactive",
			Self::Background => "background",
			Self::CpuBlocking => "cpu_blocking",
		}
	}
}

/// Handle of the current runtime, or of a lazily built global one outside any runtime.
pub(crate) fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("pdfhost-global")
			.build()
			.expect("failed to build pdfhost global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "pdfhost.spawn");
	runtime_handle().spawn(fut)
}

/// Spawns blocking work on the runtime's blocking pool.
pub fn spawn_blocking<F, R>(class: TaskClass, f: F) -> JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "pdfhost.spawn_blocking");
	runtime_handle().spawn_blocking(f)
}

/// Spawns a dedicated named OS thread.
pub fn spawn_named_thread<F, R>(class: TaskClass, name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "pdfhost.spawn_named_thread");
	std::thread::Builder::new().name(name.into()).spawn(f)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn spawns_outside_a_runtime_on_the_global_one() {
		let joined = spawn_named_thread(TaskClass::Background, "pdfhost-test", || {
			let handle = spawn(TaskClass::Background, async { 7 });
			let (tx, rx) = std::sync::mpsc::channel();
			spawn(TaskClass::Background, async move {
				let _ = tx.send(handle.await.unwrap());
			});
			rx.recv().unwrap()
		})
		.unwrap();
		assert_eq!(joined.join().unwrap(), 7);
	}
}
