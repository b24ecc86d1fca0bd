//! Bounded pool of instances.
//!
//! The pool multiplexes callers onto at most `max_instances` live instances.
//! Callers either hold a [`Lease`] for a whole document session or hand single
//! requests to [`Pool::execute`], which routes them to the instance that minted
//! their references.
//!
//! Waiters are served first come, first served among those that can take the
//! instance being returned. A waiter that gives up never strands a slot: an
//! instance handed to it after it stopped waiting is passed on.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pdfhost_engine::{EngineFactory, GlobalHooks};
use pdfhost_proto::{InstanceId, PdfError, Request, Response};
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{LeasePolicy, Mode, PoolConfig};
use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::spawn::{TaskClass, spawn};
use crate::transport::{self, InProcessLauncher, LaunchOptions, Launcher, ProcessLauncher, SandboxLauncher};

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
	/// Instances counted against `max_instances`.
	pub live: usize,
	pub idle: usize,
	/// Leased instances.
	pub busy: usize,
	pub starting: usize,
	/// Callers blocked in acquire.
	pub waiting: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Want {
	Any,
	Instance(InstanceId),
}

impl Want {
	fn accepts(self, id: InstanceId) -> bool {
		match self {
			Self::Any => true,
			Self::Instance(wanted) => wanted == id,
		}
	}
}

type Handoff = Result<Arc<Instance>>;

struct Waiter {
	ticket: u64,
	want: Want,
	tx: oneshot::Sender<Handoff>,
}

#[derive(Default)]
struct State {
	idle: VecDeque<Arc<Instance>>,
	leased: FxHashMap<InstanceId, Arc<Instance>>,
	starting: usize,
	waiters: VecDeque<Waiter>,
	next_ticket: u64,
	closed: bool,
}

impl State {
	fn live(&self) -> usize {
		self.idle.len() + self.leased.len() + self.starting
	}

	fn waiting_for_any(&self) -> usize {
		self.waiters.iter().filter(|waiter| waiter.want == Want::Any).count()
	}
}

enum Checkout {
	Ready(Arc<Instance>),
	Wait(u64, oneshot::Receiver<Handoff>),
	Failed(Error),
}

struct Shared {
	config: PoolConfig,
	launcher: Arc<dyn Launcher>,
	state: Mutex<State>,
}

/// Bounded set of instances shared by many callers.
#[derive(Clone)]
pub struct Pool {
	shared: Arc<Shared>,
}

impl Pool {
	/// Creates an empty pool starting instances through `launcher`.
	pub fn new(config: PoolConfig, launcher: Arc<dyn Launcher>) -> Result<Self> {
		config.validate()?;
		if launcher.mode() != config.mode {
			tracing::warn!(configured = config.mode.as_str(), launcher = launcher.mode().as_str(), "pool.mode_mismatch");
		}
		tracing::debug!(
			mode = launcher.mode().as_str(),
			max_instances = config.max_instances,
			min_instances = config.min_instances,
			"pool.created"
		);
		Ok(Self {
			shared: Arc::new(Shared {
				config,
				launcher,
				state: Mutex::new(State::default()),
			}),
		})
	}

	/// Creates a pool whose launcher matches `config.mode`.
	///
	/// `factory` builds engines for in-process and sandbox modes; process mode
	/// runs `config.worker` instead.
	pub fn from_config<F: EngineFactory>(config: PoolConfig, factory: F) -> Result<Self> {
		let launcher: Arc<dyn Launcher> = match config.mode {
			Mode::InProcess => Arc::new(InProcessLauncher::new(factory)),
			Mode::Sandbox => Arc::new(SandboxLauncher::new(factory)),
			Mode::Process => Arc::new(ProcessLauncher::new(config.worker.clone())),
		};
		Self::new(config, launcher)
	}

	pub fn config(&self) -> &PoolConfig {
		&self.shared.config
	}

	pub fn mode(&self) -> Mode {
		self.shared.launcher.mode()
	}

	/// Leases an instance, waiting at most the configured acquire timeout.
	pub async fn acquire(&self) -> Result<Lease> {
		self.acquire_with(&CancellationToken::new(), self.shared.config.acquire_timeout()).await
	}

	/// Leases an instance, giving up when `cancel` fires or `timeout` elapses.
	pub async fn acquire_with(&self, cancel: &CancellationToken, timeout: Option<Duration>) -> Result<Lease> {
		if self.shared.config.policy == LeasePolicy::PerCall {
			return Err(Error::Capability(
				"leases are not available under the per-call policy; use Pool::execute".to_owned(),
			));
		}
		let instance = self.shared.checkout(Want::Any, cancel, timeout).await?;
		Ok(Lease {
			pool: Arc::clone(&self.shared),
			instance,
		})
	}

	/// Runs a single request on a pooled instance.
	///
	/// Requests carrying references go to the instance that minted them and
	/// fail as stale if it is gone. Under the per-call policy, requests that
	/// register callbacks are rejected.
	pub async fn execute(&self, request: Request) -> Result<Response> {
		if self.shared.config.policy == LeasePolicy::PerCall && request.registers_callbacks() {
			return Err(Error::Capability(format!(
				"{} registers callbacks, which the per-call policy cannot route back to the caller",
				request.name()
			)));
		}

		let owner = request.references().into_iter().find(|reference| !reference.is_nil());
		let want = owner.map_or(Want::Any, |reference| Want::Instance(reference.instance));
		let instance = self
			.shared
			.checkout(want, &CancellationToken::new(), self.shared.config.acquire_timeout())
			.await
			.map_err(|error| match (error, owner) {
				(Error::InstanceGone(_), Some(reference)) => Error::Pdf(PdfError::StaleReference { kind: reference.kind }),
				(error, _) => error,
			})?;

		let lease = Lease {
			pool: Arc::clone(&self.shared),
			instance,
		};
		lease.execute(request).await
	}

	/// Starts instances until `min_instances` are live.
	pub async fn warm(&self) -> Result<()> {
		loop {
			{
				let mut state = self.shared.state.lock();
				if state.closed {
					return Err(Error::PoolClosed);
				}
				if state.live() >= self.shared.config.min_instances {
					return Ok(());
				}
				state.starting += 1;
			}
			self.shared.start_reserved(Duration::ZERO).await?;
		}
	}

	/// Closes idle instances and fails waiters; leased instances close on release.
	pub async fn close(&self) {
		let (idle, waiters) = {
			let mut state = self.shared.state.lock();
			state.closed = true;
			(std::mem::take(&mut state.idle), std::mem::take(&mut state.waiters))
		};
		tracing::debug!(idle = idle.len(), waiters = waiters.len(), "pool.closing");
		for waiter in waiters {
			let _ = waiter.tx.send(Err(Error::PoolClosed));
		}
		for instance in idle {
			if let Err(error) = instance.close().await {
				tracing::warn!(instance = %instance.id(), %error, "pool.close_failed");
			}
		}
	}

	pub fn stats(&self) -> PoolStats {
		let state = self.shared.state.lock();
		PoolStats {
			live: state.live(),
			idle: state.idle.len(),
			busy: state.leased.len(),
			starting: state.starting,
			waiting: state.waiters.len(),
		}
	}

	/// Installs process-wide engine hooks. In-process mode only.
	pub fn install_global_hooks(&self, hooks: GlobalHooks) -> Result<()> {
		self.require_in_process()?;
		transport::install_global_hooks(hooks);
		Ok(())
	}

	/// Removes process-wide engine hooks. In-process mode only.
	pub fn uninstall_global_hooks(&self) -> Result<()> {
		self.require_in_process()?;
		transport::uninstall_global_hooks();
		Ok(())
	}

	fn require_in_process(&self) -> Result<()> {
		match self.mode() {
			Mode::InProcess => Ok(()),
			mode => Err(Error::Capability(format!(
				"global hooks are process-wide and cannot be scoped to {} instances",
				mode.as_str()
			))),
		}
	}
}

impl Shared {
	fn launch_options(&self) -> LaunchOptions {
		LaunchOptions {
			call_timeout: self.config.call_timeout(),
			handshake_timeout: self.config.handshake_timeout(),
		}
	}

	async fn checkout(self: &Arc<Self>, want: Want, cancel: &CancellationToken, timeout: Option<Duration>) -> Result<Arc<Instance>> {
		let deadline = timeout.map(|timeout| Instant::now() + timeout);
		loop {
			let instance = self.checkout_once(want, cancel, deadline).await?;
			if !self.config.ping_on_acquire {
				return Ok(instance);
			}
			match instance.ping().await {
				Ok(()) => return Ok(instance),
				Err(error) => {
					tracing::warn!(instance = %instance.id(), %error, "pool.ping_failed");
					self.discard(instance, "failed health check");
					if let Want::Instance(id) = want {
						return Err(Error::InstanceGone(id));
					}
				}
			}
		}
	}

	async fn checkout_once(
		self: &Arc<Self>,
		want: Want,
		cancel: &CancellationToken,
		deadline: Option<Instant>,
	) -> Result<Arc<Instance>> {
		let mut dead = Vec::new();
		let checkout = {
			let mut state = self.state.lock();
			self.try_checkout(&mut state, want, &mut dead)
		};
		let found_dead = !dead.is_empty();
		for instance in dead {
			self.retire(instance, "died while idle");
		}
		if found_dead || matches!(checkout, Checkout::Wait(..)) {
			self.replenish();
		}

		let (ticket, mut rx) = match checkout {
			Checkout::Ready(instance) => return Ok(instance),
			Checkout::Failed(error) => return Err(error),
			Checkout::Wait(ticket, rx) => (ticket, rx),
		};
		tracing::debug!(?want, ticket, "pool.waiting");

		let expired = async {
			match deadline {
				Some(deadline) => tokio::time::sleep_until(deadline).await,
				None => std::future::pending().await,
			}
		};
		let error = tokio::select! {
			biased;
			handed = &mut rx => return handed.unwrap_or(Err(Error::PoolClosed)),
			_ = cancel.cancelled() => Error::Cancelled,
			_ = expired => Error::AcquireTimeout,
		};

		tracing::debug!(?want, ticket, %error, "pool.wait_abandoned");
		self.give_up(ticket, rx);
		Err(error)
	}

	fn try_checkout(&self, state: &mut State, want: Want, dead: &mut Vec<Arc<Instance>>) -> Checkout {
		if state.closed {
			return Checkout::Failed(Error::PoolClosed);
		}

		while let Some(position) = state.idle.iter().position(|instance| want.accepts(instance.id())) {
			let Some(instance) = state.idle.remove(position) else {
				break;
			};
			if instance.is_usable() {
				instance.set_leased(true);
				state.leased.insert(instance.id(), Arc::clone(&instance));
				return Checkout::Ready(instance);
			}
			dead.push(instance);
		}

		if let Want::Instance(id) = want
			&& !state.leased.contains_key(&id)
		{
			return Checkout::Failed(Error::InstanceGone(id));
		}

		let ticket = state.next_ticket;
		state.next_ticket += 1;
		let (tx, rx) = oneshot::channel();
		state.waiters.push_back(Waiter { ticket, want, tx });
		Checkout::Wait(ticket, rx)
	}

	/// Withdraws a waiter. An instance already handed to it goes back to the pool.
	fn give_up(self: &Arc<Self>, ticket: u64, mut rx: oneshot::Receiver<Handoff>) {
		{
			let mut state = self.state.lock();
			if let Some(position) = state.waiters.iter().position(|waiter| waiter.ticket == ticket) {
				state.waiters.remove(position);
				return;
			}
		}
		// Handoffs are sent under the state lock, so a served waiter's value is already here.
		rx.close();
		if let Ok(Ok(instance)) = rx.try_recv() {
			tracing::debug!(instance = %instance.id(), ticket, "pool.handoff_returned");
			self.checkin(instance);
		}
	}

	/// Returns a leased instance.
	fn checkin(self: &Arc<Self>, instance: Arc<Instance>) {
		let exhausted = self
			.config
			.max_operations
			.is_some_and(|limit| instance.operations() >= limit);
		instance.set_leased(false);
		let mut state = self.state.lock();
		state.leased.remove(&instance.id());

		let reason = if state.closed {
			"pool closed"
		} else if !instance.is_usable() {
			"instance died"
		} else if exhausted {
			"operation limit reached"
		} else {
			self.offer(&mut state, instance);
			return;
		};
		drop(state);
		self.discard(instance, reason);
	}

	/// Removes an instance for good and starts a replacement if one is needed.
	fn discard(self: &Arc<Self>, instance: Arc<Instance>, reason: &'static str) {
		let id = instance.id();
		let orphans = {
			let mut state = self.state.lock();
			state.leased.remove(&id);
			let (orphans, rest): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut state.waiters)
				.into_iter()
				.partition(|waiter| waiter.want == Want::Instance(id));
			state.waiters = rest.into();
			orphans
		};
		for waiter in orphans {
			let _ = waiter.tx.send(Err(Error::InstanceGone(id)));
		}
		self.retire(instance, reason);
		self.replenish();
	}

	fn retire(&self, instance: Arc<Instance>, reason: &'static str) {
		tracing::info!(instance = %instance.id(), operations = instance.operations(), reason, "pool.retiring");
		spawn(TaskClass::Background, async move {
			if let Err(error) = instance.close().await {
				tracing::debug!(instance = %instance.id(), %error, "pool.retire_close_failed");
			}
		});
	}

	/// Hands `instance` to the first waiter that accepts it, or parks it idle.
	fn offer(&self, state: &mut State, mut instance: Arc<Instance>) {
		let id = instance.id();
		while let Some(position) = state.waiters.iter().position(|waiter| waiter.want.accepts(id)) {
			let Some(waiter) = state.waiters.remove(position) else {
				break;
			};
			instance.set_leased(true);
			state.leased.insert(id, Arc::clone(&instance));
			match waiter.tx.send(Ok(instance)) {
				Ok(()) => {
					tracing::trace!(instance = %id, ticket = waiter.ticket, "pool.handed_off");
					return;
				}
				Err(returned) => {
					state.leased.remove(&id);
					match returned {
						Ok(back) => {
							back.set_leased(false);
							instance = back;
						}
						Err(_) => return,
					}
				}
			}
		}
		state.idle.push_back(instance);
	}

	/// Starts instances for waiters and up to `min_instances`.
	fn replenish(self: &Arc<Self>) {
		let mut state = self.state.lock();
		if state.closed {
			return;
		}
		while state.live() < self.config.max_instances
			&& (state.live() < self.config.min_instances || state.starting < state.waiting_for_any())
		{
			state.starting += 1;
			self.spawn_start(Duration::ZERO);
		}
	}

	fn spawn_start(self: &Arc<Self>, delay: Duration) {
		let shared = Arc::clone(self);
		spawn(TaskClass::Background, async move {
			if let Err(error) = shared.start_reserved(delay).await {
				tracing::warn!(%error, "pool.start_failed");
			}
		});
	}

	/// Starts one instance for a slot already counted in `starting`.
	async fn start_reserved(self: &Arc<Self>, delay: Duration) -> Result<()> {
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		let started = Instance::start(&*self.launcher, self.launch_options()).await;

		let mut state = self.state.lock();
		state.starting -= 1;
		match started {
			Ok(instance) => {
				let instance = Arc::new(instance);
				if state.closed {
					drop(state);
					self.retire(instance, "pool closed");
					return Err(Error::PoolClosed);
				}
				self.offer(&mut state, instance);
				Ok(())
			}
			Err(error) => {
				let needed = state.live() < self.config.min_instances || state.starting < state.waiting_for_any();
				if !state.closed && needed && state.live() < self.config.max_instances {
					state.starting += 1;
					drop(state);
					tracing::debug!(backoff_ms = self.config.respawn_backoff_ms, "pool.respawn_scheduled");
					self.spawn_start(self.config.respawn_backoff());
				}
				Err(error)
			}
		}
	}
}

/// A leased instance; returned to the pool on drop.
pub struct Lease {
	pool: Arc<Shared>,
	instance: Arc<Instance>,
}

impl Lease {
	/// Returns the instance to the pool.
	pub fn release(self) {}
}

impl Deref for Lease {
	type Target = Instance;

	fn deref(&self) -> &Instance {
		&self.instance
	}
}

impl Drop for Lease {
	fn drop(&mut self) {
		self.pool.checkin(Arc::clone(&self.instance));
	}
}

impl std::fmt::Debug for Lease {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("Lease").field(&*self.instance).finish()
	}
}
