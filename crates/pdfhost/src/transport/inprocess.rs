//! In-process instances behind the process-wide native lock.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, const_mutex};
use pdfhost_engine::{CallbackHost, EngineFactory, Executor, GlobalHooks, PdfEngine};
use pdfhost_proto::{CallbackCall, CallbackReply, Event, InstanceId, Reference, Request, Response};

use super::{LaunchFuture, LaunchOptions, Launcher, Transport};
use crate::broker::CallbackBroker;
use crate::config::Mode;
use crate::error::{Error, Result};
use crate::host::{TimerWheel, panic_message};
use crate::spawn::{TaskClass, spawn_blocking};

/// Serializes every native call made in this process.
static NATIVE_LOCK: Mutex<()> = const_mutex(());

/// Process-wide hooks and the engines they apply to.
static REGISTRY: Mutex<Registry> = const_mutex(Registry {
	hooks: GlobalHooks::none(),
	targets: Vec::new(),
});

struct Registry {
	hooks: GlobalHooks,
	targets: Vec<Weak<dyn HookTarget>>,
}

trait HookTarget: Send + Sync {
	fn apply(&self, hooks: &GlobalHooks);
}

/// Installs process-wide hooks into every in-process engine, current and future.
pub(crate) fn install_global_hooks(hooks: GlobalHooks) {
	let _native = NATIVE_LOCK.lock();
	let mut registry = REGISTRY.lock();
	registry.targets.retain(|target| target.strong_count() > 0);
	for target in registry.targets.iter().filter_map(Weak::upgrade) {
		target.apply(&hooks);
	}
	tracing::debug!(?hooks, engines = registry.targets.len(), "inprocess.global_hooks_installed");
	registry.hooks = hooks;
}

/// Removes process-wide hooks from every in-process engine.
pub(crate) fn uninstall_global_hooks() {
	install_global_hooks(GlobalHooks::none());
}

struct EngineState<E> {
	executor: Executor<E>,
	timers: TimerWheel,
}

struct EngineCell<E> {
	state: Mutex<EngineState<E>>,
}

impl<E: PdfEngine> HookTarget for EngineCell<E> {
	fn apply(&self, hooks: &GlobalHooks) {
		let mut state = self.state.lock();
		let engine = state.executor.engine_mut();
		engine.set_time_source(hooks.time.clone());
		engine.set_unsupported_handler(hooks.unsupported.clone());
	}
}

/// Answers callbacks by calling the broker directly.
struct InlineHost<'a> {
	broker: &'a CallbackBroker,
	timers: &'a mut TimerWheel,
}

impl CallbackHost for InlineHost<'_> {
	fn invoke(&mut self, call: CallbackCall) -> Option<CallbackReply> {
		Some(self.broker.invoke(call))
	}

	fn arm_timer(&mut self, form: Reference, timer_id: i32, interval: Duration) {
		self.timers.arm(form, timer_id, interval);
	}

	fn disarm_timer(&mut self, form: Reference, timer_id: i32) {
		self.timers.disarm(form, timer_id);
	}

	fn notify(&mut self, event: Event) {
		self.broker.dispatch_event(event);
	}
}

/// Launches engines inside the caller's process.
pub struct InProcessLauncher<F> {
	factory: Arc<F>,
}

impl<F: EngineFactory> InProcessLauncher<F> {
	/// Creates a launcher building engines with `factory`.
	pub fn new(factory: F) -> Self {
		Self {
			factory: Arc::new(factory),
		}
	}
}

impl<F: EngineFactory> Launcher for InProcessLauncher<F> {
	fn mode(&self) -> Mode {
		Mode::InProcess
	}

	fn launch(&self, instance: InstanceId, broker: Arc<CallbackBroker>, _options: LaunchOptions) -> LaunchFuture {
		let factory = Arc::clone(&self.factory);
		Box::pin(async move {
			let sink = Arc::clone(&broker);
			let joined = spawn_blocking(TaskClass::CpuBlocking, move || {
				let _native = NATIVE_LOCK.lock();
				let engine = catch_unwind(AssertUnwindSafe(|| factory.create())).map_err(|payload| panic_message(&*payload))?;
				let cell = Arc::new(EngineCell {
					state: Mutex::new(EngineState {
						executor: Executor::new(engine, instance),
						timers: TimerWheel::new(Arc::new(move |event| sink.dispatch_event(event))),
					}),
				});

				let mut registry = REGISTRY.lock();
				cell.apply(&registry.hooks);
				let target: Arc<dyn HookTarget> = cell.clone();
				registry.targets.push(Arc::downgrade(&target));
				Ok::<_, String>(cell)
			})
			.await;

			let cell = match joined {
				Ok(Ok(cell)) => cell,
				Ok(Err(message)) => return Err(Error::Handshake(format!("engine failed to start: {message}"))),
				Err(error) => return Err(Error::Handshake(error.to_string())),
			};
			tracing::debug!(%instance, "inprocess.started");

			Ok(Box::new(InProcessTransport {
				instance,
				cell,
				broker,
				alive: AtomicBool::new(true),
			}) as Box<dyn Transport>)
		})
	}
}

struct InProcessTransport<E> {
	instance: InstanceId,
	cell: Arc<EngineCell<E>>,
	broker: Arc<CallbackBroker>,
	alive: AtomicBool,
}

#[async_trait]
impl<E: PdfEngine + 'static> Transport for InProcessTransport<E> {
	async fn call(&self, request: Request) -> Result<Response> {
		if !self.is_alive() {
			return Err(Error::WorkerDied("engine panicked earlier".to_owned()));
		}

		let cell = Arc::clone(&self.cell);
		let broker = Arc::clone(&self.broker);
		let name = request.name();
		let joined = spawn_blocking(TaskClass::CpuBlocking, move || {
			let _native = NATIVE_LOCK.lock();
			let mut state = cell.state.lock();
			let EngineState { executor, timers } = &mut *state;
			let mut host = InlineHost { broker: &broker, timers };
			catch_unwind(AssertUnwindSafe(|| executor.execute(request, &mut host))).map_err(|payload| panic_message(&*payload))
		})
		.await;

		match joined {
			Ok(Ok(result)) => result.map_err(Error::Pdf),
			Ok(Err(message)) => {
				self.alive.store(false, Ordering::Release);
				tracing::error!(instance = %self.instance, op = name, %message, "inprocess.engine_panicked");
				Err(Error::WorkerDied(format!("engine panicked: {message}")))
			}
			Err(error) => {
				self.alive.store(false, Ordering::Release);
				Err(Error::WorkerDied(error.to_string()))
			}
		}
	}

	fn is_alive(&self) -> bool {
		self.alive.load(Ordering::Acquire)
	}

	async fn shutdown(&self) -> Result<()> {
		let healthy = self.alive.swap(false, Ordering::AcqRel);
		let cell = Arc::clone(&self.cell);
		let broker = Arc::clone(&self.broker);
		let instance = self.instance;
		spawn_blocking(TaskClass::CpuBlocking, move || {
			let _native = NATIVE_LOCK.lock();
			let mut state = cell.state.lock();
			let EngineState { executor, timers } = &mut *state;
			timers.disarm_all();
			if healthy {
				let released = executor.close_all(&mut InlineHost { broker: &broker, timers });
				tracing::debug!(%instance, released, "inprocess.stopped");
			}
		})
		.await
		.map_err(|error| Error::WorkerDied(error.to_string()))
	}
}
