//! One engine context and its lifecycle.
//!
//! An [`Instance`] owns exactly one engine behind a [`Transport`] and runs at
//! most one request against it at a time. Its lifecycle is
//! `Starting → Ready ⇄ Busy → Closing → Dead`; a fatal transport error moves it
//! straight to `Dead`. An instance is `Busy` while a call runs or while a pool
//! lease holds it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use pdfhost_proto::{
	DocPermissions, DocumentSource, InstanceId, PageSelector, Reference, RenderArea, RenderStatus, Request, Response, SaveOutcome,
	SaveTarget,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use crate::broker::{CallbackBroker, CallbackFailure, FormCallbacks, PausePredicate};
use crate::error::{Error, Result};
use crate::transport::{LaunchOptions, Launcher, Transport};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of an [`Instance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
	/// The engine context is booting.
	Starting,
	/// Idle and able to serve requests.
	Ready,
	/// Leased from a pool or serving a request.
	Busy,
	/// Releasing every native object.
	Closing,
	/// Gone; every reference it minted is stale.
	Dead,
}

struct Status {
	state: InstanceState,
	death: Option<String>,
	leased: bool,
	in_call: bool,
}

impl Status {
	/// Recomputes `Ready`/`Busy` from lease and call activity.
	fn settle(&mut self) {
		if matches!(self.state, InstanceState::Ready | InstanceState::Busy) {
			self.state = if self.leased || self.in_call {
				InstanceState::Busy
			} else {
				InstanceState::Ready
			};
		}
	}
}

/// Flags and limits for [`Instance::save`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
	/// Engine save flags.
	pub flags: u32,
	/// File version to write; the document's own when absent.
	pub version: Option<i32>,
	/// Fail with `MaxSizeExceeded` instead of producing more bytes than this.
	pub max_size: Option<u64>,
}

/// Where [`Instance::save`] puts the document.
#[derive(Default)]
pub enum SaveOutput<'a> {
	/// Return the bytes.
	#[default]
	Bytes,
	/// Write to a file.
	Path(PathBuf),
	/// Stream into a writer.
	Writer(&'a mut (dyn AsyncWrite + Unpin + Send)),
}

/// A live engine context.
pub struct Instance {
	id: InstanceId,
	status: Mutex<Status>,
	transport: Box<dyn Transport>,
	broker: Arc<CallbackBroker>,
	serial: tokio::sync::Mutex<()>,
	operations: AtomicU64,
	closed: AtomicBool,
}

impl Instance {
	/// Boots a new instance through `launcher`.
	pub async fn start(launcher: &dyn Launcher, options: LaunchOptions) -> Result<Self> {
		let id = InstanceId(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed));
		let broker = Arc::new(CallbackBroker::new(id));
		let started = Instant::now();
		tracing::debug!(instance = %id, mode = launcher.mode().as_str(), "instance.starting");

		let transport = launcher.launch(id, Arc::clone(&broker), options).await.inspect_err(|error| {
			tracing::warn!(instance = %id, %error, "instance.start_failed");
		})?;

		let instance = Self {
			id,
			status: Mutex::new(Status {
				state: InstanceState::Starting,
				death: None,
				leased: false,
				in_call: false,
			}),
			transport,
			broker,
			serial: tokio::sync::Mutex::new(()),
			operations: AtomicU64::new(0),
			closed: AtomicBool::new(false),
		};
		instance.transition(InstanceState::Starting, InstanceState::Ready);
		tracing::info!(
			instance = %id,
			mode = launcher.mode().as_str(),
			elapsed_ms = started.elapsed().as_millis() as u64,
			"instance.ready"
		);
		Ok(instance)
	}

	pub fn id(&self) -> InstanceId {
		self.id
	}

	pub fn state(&self) -> InstanceState {
		self.status.lock().state
	}

	/// Requests served so far, failed ones included.
	pub fn operations(&self) -> u64 {
		self.operations.load(Ordering::Relaxed)
	}

	/// Returns true if the instance can serve another request.
	pub fn is_usable(&self) -> bool {
		!matches!(self.state(), InstanceState::Closing | InstanceState::Dead) && self.transport.is_alive()
	}

	/// Hook failures swallowed for this instance's form-fill sessions.
	pub fn callback_failures(&self) -> broadcast::Receiver<CallbackFailure> {
		self.broker.subscribe_failures()
	}

	/// Runs one request.
	///
	/// Requests are served in submission order. A fatal error leaves the
	/// instance `Dead`; every later call fails with `WorkerDied`.
	pub async fn execute(&self, request: Request) -> Result<Response> {
		self.execute_paused(request, None).await
	}

	async fn execute_paused(&self, request: Request, pause: Option<PausePredicate>) -> Result<Response> {
		let _serial = self.serial.lock().await;
		let _pause = PauseGuard::install(&self.broker, pause);
		self.execute_locked(request).await
	}

	/// Runs one request; the caller holds the serial lock.
	async fn execute_locked(&self, request: Request) -> Result<Response> {
		self.check_open()?;
		if !self.transport.is_alive() {
			let error = Error::WorkerDied("engine is gone".to_owned());
			self.mark_dead(&error);
			return Err(error);
		}

		let name = request.name();
		let started = Instant::now();
		let busy = BusyGuard::enter(self);
		let result = self.transport.call(request).await;
		drop(busy);
		self.operations.fetch_add(1, Ordering::Relaxed);

		match &result {
			Err(error) if error.is_fatal() => {
				tracing::warn!(instance = %self.id, op = name, %error, "instance.fatal_error");
				self.mark_dead(error);
			}
			_ => tracing::trace!(
				instance = %self.id,
				op = name,
				ok = result.is_ok(),
				elapsed_ms = started.elapsed().as_millis() as u64,
				"instance.executed"
			),
		}
		result
	}

	/// Releases every native object and stops the engine. Closing twice is a no-op.
	pub async fn close(&self) -> Result<()> {
		if self.closed.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		let _serial = self.serial.lock().await;
		let was_dead = {
			let mut status = self.status.lock();
			let was_dead = status.state == InstanceState::Dead;
			if !was_dead {
				status.state = InstanceState::Closing;
			}
			was_dead
		};
		tracing::debug!(instance = %self.id, was_dead, operations = self.operations(), "instance.closing");

		let result = self.transport.shutdown().await;
		self.broker.clear();
		{
			let mut status = self.status.lock();
			status.state = InstanceState::Dead;
			status.death.get_or_insert_with(|| "closed".to_owned());
		}
		tracing::info!(instance = %self.id, "instance.closed");
		result
	}

	/// Liveness round trip.
	pub async fn ping(&self) -> Result<()> {
		match self.execute(Request::Ping).await? {
			Response::Pong => Ok(()),
			other => Err(unexpected("Ping", &other)),
		}
	}

	/// Opens a document.
	pub async fn open_document(&self, source: DocumentSource, password: Option<&str>) -> Result<Reference> {
		let request = Request::OpenDocument {
			source,
			password: password.map(str::to_owned),
		};
		match self.execute(request).await? {
			Response::Document(document) => Ok(document),
			other => Err(unexpected("OpenDocument", &other)),
		}
	}

	/// Closes a document and everything obtained from it.
	pub async fn close_document(&self, document: Reference) -> Result<()> {
		self.expect_done(Request::CloseDocument { document }).await
	}

	pub async fn page_count(&self, document: Reference) -> Result<u32> {
		match self.execute(Request::GetPageCount { document }).await? {
			Response::PageCount(count) => Ok(count),
			other => Err(unexpected("GetPageCount", &other)),
		}
	}

	pub async fn permissions(&self, document: Reference) -> Result<DocPermissions> {
		match self.execute(Request::GetDocPermissions { document }).await? {
			Response::DocPermissions(permissions) => Ok(permissions),
			other => Err(unexpected("GetDocPermissions", &other)),
		}
	}

	/// Loads page `index` of `document`.
	pub async fn load_page(&self, document: Reference, index: u32) -> Result<Reference> {
		match self.execute(Request::LoadPage { document, index }).await? {
			Response::Page(page) => Ok(page),
			other => Err(unexpected("LoadPage", &other)),
		}
	}

	/// Creates a form-fill environment answered by `callbacks`.
	///
	/// Only the hooks that are set are announced to the engine.
	pub async fn init_form_fill(&self, document: Reference, callbacks: FormCallbacks) -> Result<Reference> {
		let slots = callbacks.slots();
		let _serial = self.serial.lock().await;
		self.broker.begin_session(callbacks);
		let outcome = self
			.execute_locked(Request::InitFormFillEnvironment {
				document,
				callbacks: slots,
			})
			.await;
		match outcome {
			Ok(Response::FormHandle(form)) => {
				self.broker.attach(form);
				Ok(form)
			}
			Ok(other) => {
				self.broker.abandon_pending();
				Err(unexpected("InitFormFillEnvironment", &other))
			}
			Err(error) => {
				self.broker.abandon_pending();
				Err(error)
			}
		}
	}

	/// Tears a form-fill environment down and forgets its hooks.
	pub async fn exit_form_fill(&self, form_handle: Reference) -> Result<()> {
		let result = self.expect_done(Request::ExitFormFillEnvironment { form_handle }).await;
		self.broker.detach(form_handle);
		result
	}

	/// Starts a progressive render. `pause` is polled between render steps.
	pub async fn render_start(
		&self,
		bitmap: Reference,
		page: PageSelector,
		area: RenderArea,
		flags: u32,
		pause: Option<PausePredicate>,
	) -> Result<RenderStatus> {
		let request = Request::RenderPageBitmapStart {
			bitmap,
			page,
			area,
			flags,
			pause: pause.is_some(),
		};
		match self.execute_paused(request, pause).await? {
			Response::RenderStatus(status) => Ok(status),
			other => Err(unexpected("RenderPageBitmapStart", &other)),
		}
	}

	/// Continues a progressive render.
	pub async fn render_continue(&self, page: PageSelector, pause: Option<PausePredicate>) -> Result<RenderStatus> {
		let request = Request::RenderPageContinue {
			page,
			pause: pause.is_some(),
		};
		match self.execute_paused(request, pause).await? {
			Response::RenderStatus(status) => Ok(status),
			other => Err(unexpected("RenderPageContinue", &other)),
		}
	}

	/// Releases a progressive render.
	pub async fn render_close(&self, page: PageSelector) -> Result<()> {
		self.expect_done(Request::RenderPageClose { page }).await
	}

	/// Serializes a document into `output`.
	///
	/// With `max_size` set, an oversized document fails with `MaxSizeExceeded`
	/// and nothing is written.
	pub async fn save(&self, document: Reference, options: SaveOptions, output: SaveOutput<'_>) -> Result<SaveOutcome> {
		let (target, writer) = match output {
			SaveOutput::Bytes => (SaveTarget::Bytes, None),
			SaveOutput::Path(path) => (SaveTarget::Path(path), None),
			SaveOutput::Writer(writer) => (SaveTarget::Bytes, Some(writer)),
		};
		let request = Request::SaveAsCopy {
			document,
			flags: options.flags,
			version: options.version,
			target,
			max_size: options.max_size,
		};
		let outcome = match self.execute(request).await? {
			Response::Saved(outcome) => outcome,
			other => return Err(unexpected("SaveAsCopy", &other)),
		};

		let Some(writer) = writer else {
			return Ok(outcome);
		};
		let bytes = outcome.bytes.unwrap_or_default();
		writer.write_all(&bytes).await?;
		writer.flush().await?;
		Ok(SaveOutcome {
			bytes: None,
			path: None,
			size: outcome.size,
		})
	}

	async fn expect_done(&self, request: Request) -> Result<()> {
		let name = request.name();
		match self.execute(request).await? {
			Response::Done => Ok(()),
			other => Err(unexpected(name, &other)),
		}
	}

	fn check_open(&self) -> Result<()> {
		let status = self.status.lock();
		match status.state {
			InstanceState::Closing => Err(Error::InstanceClosed),
			InstanceState::Dead if self.closed.load(Ordering::Acquire) => Err(Error::InstanceClosed),
			InstanceState::Dead => Err(Error::WorkerDied(status.death.clone().unwrap_or_default())),
			_ => Ok(()),
		}
	}

	/// Marks the instance as held by a pool lease; a leased instance is `Busy`.
	pub(crate) fn set_leased(&self, leased: bool) {
		let mut status = self.status.lock();
		status.leased = leased;
		status.settle();
	}

	fn set_in_call(&self, in_call: bool) {
		let mut status = self.status.lock();
		status.in_call = in_call;
		status.settle();
	}

	fn transition(&self, from: InstanceState, to: InstanceState) {
		let mut status = self.status.lock();
		if status.state == from {
			status.state = to;
		}
	}

	fn mark_dead(&self, error: &Error) {
		let mut status = self.status.lock();
		if status.state != InstanceState::Dead {
			tracing::info!(instance = %self.id, from = ?status.state, %error, "instance.dead");
		}
		status.state = InstanceState::Dead;
		status.death.get_or_insert_with(|| error.to_string());
	}
}

impl std::fmt::Debug for Instance {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Instance")
			.field("id", &self.id)
			.field("state", &self.state())
			.field("operations", &self.operations())
			.finish_non_exhaustive()
	}
}

fn unexpected(request: &'static str, response: &Response) -> Error {
	Error::UnexpectedResponse {
		request,
		response: response.name(),
	}
}

/// Keeps the instance `Busy` for the duration of a call, including a cancelled one.
struct BusyGuard<'a> {
	instance: &'a Instance,
}

impl<'a> BusyGuard<'a> {
	fn enter(instance: &'a Instance) -> Self {
		instance.set_in_call(true);
		Self { instance }
	}
}

impl Drop for BusyGuard<'_> {
	fn drop(&mut self) {
		self.instance.set_in_call(false);
	}
}

/// Keeps a pause predicate installed for one render step.
struct PauseGuard<'a> {
	broker: &'a CallbackBroker,
	active: bool,
}

impl<'a> PauseGuard<'a> {
	fn install(broker: &'a CallbackBroker, pause: Option<PausePredicate>) -> Self {
		let active = pause.is_some();
		if active {
			broker.set_pause(pause);
		}
		Self { broker, active }
	}
}

impl Drop for PauseGuard<'_> {
	fn drop(&mut self) {
		if self.active {
			self.broker.set_pause(None);
		}
	}
}
