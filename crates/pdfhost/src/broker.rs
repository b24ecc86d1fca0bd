//! The caller side of the callback channel.
//!
//! While an instance runs a request, the engine may call back into the caller:
//! repaint requests, focus changes, timers, actions and the progressive render
//! pause predicate. Each [`CallbackCall`] that reaches the caller is answered by
//! the [`CallbackBroker`] of the owning instance, which looks up the
//! [`FormCallbacks`] registered for the form-fill session that raised it.
//!
//! Hooks are fallible. A failing hook never fails the enclosing request: the
//! engine receives the native default, the failure is logged and published to
//! [`CallbackBroker::subscribe_failures`] subscribers.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use pdfhost_proto::{
	CallbackCall, CallbackReply, CallbackSlot, CallbackSlots, Event, FocusChange, GoToAction, InstanceId, Invalidation, LocalTime,
	Reference,
};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tokio::sync::broadcast;

/// Error returned by a caller hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl From<&str> for CallbackError {
	fn from(message: &str) -> Self {
		Self(message.to_owned())
	}
}

impl From<String> for CallbackError {
	fn from(message: String) -> Self {
		Self(message)
	}
}

/// Result of a caller hook.
pub type CallbackResult<T = ()> = Result<T, CallbackError>;

type Hook<A, R = ()> = Box<dyn Fn(A) -> CallbackResult<R> + Send + Sync>;

/// Progressive render pause predicate, polled between render steps.
pub type PausePredicate = Box<dyn FnMut() -> bool + Send>;

/// Hooks attached to one form-fill session.
///
/// Only hooks that are set are announced to the engine; everything else gets
/// the native default without a round trip.
#[derive(Default)]
pub struct FormCallbacks {
	invalidate: Option<Hook<Invalidation>>,
	output_selected_rect: Option<Hook<Invalidation>>,
	set_cursor: Option<Hook<i32>>,
	set_timer: Option<Hook<u32, i32>>,
	kill_timer: Option<Hook<i32>>,
	timer: Option<Hook<i32>>,
	local_time: Option<Hook<(), LocalTime>>,
	on_change: Option<Hook<()>>,
	focus_change: Option<Hook<FocusChange>>,
	uri_action: Option<Hook<String>>,
	goto_action: Option<Hook<GoToAction>>,
	named_action: Option<Hook<String>>,
}

impl FormCallbacks {
	/// No hooks.
	pub fn new() -> Self {
		Self::default()
	}

	/// A page area needs repainting.
	#[must_use]
	pub fn invalidate(mut self, hook: impl Fn(Invalidation) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.invalidate = Some(Box::new(hook));
		self
	}

	/// A selection rectangle is drawn.
	#[must_use]
	pub fn output_selected_rect(mut self, hook: impl Fn(Invalidation) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.output_selected_rect = Some(Box::new(hook));
		self
	}

	/// The cursor shape changes.
	#[must_use]
	pub fn set_cursor(mut self, hook: impl Fn(i32) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.set_cursor = Some(Box::new(hook));
		self
	}

	/// The engine wants a periodic timer; the hook returns the timer id.
	///
	/// Once an id other than 0 is returned, the instance delivers ticks to the
	/// [`timer`](Self::timer) hook until the timer is killed or the session ends.
	#[must_use]
	pub fn set_timer(mut self, hook: impl Fn(u32) -> CallbackResult<i32> + Send + Sync + 'static) -> Self {
		self.set_timer = Some(Box::new(hook));
		self
	}

	/// A timer is removed.
	#[must_use]
	pub fn kill_timer(mut self, hook: impl Fn(i32) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.kill_timer = Some(Box::new(hook));
		self
	}

	/// A timer elapsed.
	#[must_use]
	pub fn timer(mut self, hook: impl Fn(i32) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.timer = Some(Box::new(hook));
		self
	}

	/// The engine asks for the local time.
	#[must_use]
	pub fn local_time(mut self, hook: impl Fn(()) -> CallbackResult<LocalTime> + Send + Sync + 'static) -> Self {
		self.local_time = Some(Box::new(hook));
		self
	}

	/// Form content changed.
	#[must_use]
	pub fn on_change(mut self, hook: impl Fn(()) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.on_change = Some(Box::new(hook));
		self
	}

	/// Focus moved.
	#[must_use]
	pub fn focus_change(mut self, hook: impl Fn(FocusChange) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.focus_change = Some(Box::new(hook));
		self
	}

	/// A URI action runs.
	#[must_use]
	pub fn uri_action(mut self, hook: impl Fn(String) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.uri_action = Some(Box::new(hook));
		self
	}

	/// A GoTo action runs.
	#[must_use]
	pub fn goto_action(mut self, hook: impl Fn(GoToAction) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.goto_action = Some(Box::new(hook));
		self
	}

	/// A named action runs.
	#[must_use]
	pub fn named_action(mut self, hook: impl Fn(String) -> CallbackResult + Send + Sync + 'static) -> Self {
		self.named_action = Some(Box::new(hook));
		self
	}

	/// Slots to announce to the engine.
	pub fn slots(&self) -> CallbackSlots {
		let mut slots = CallbackSlots::empty();
		slots.set(CallbackSlots::INVALIDATE, self.invalidate.is_some());
		slots.set(CallbackSlots::OUTPUT_SELECTED_RECT, self.output_selected_rect.is_some());
		slots.set(CallbackSlots::SET_CURSOR, self.set_cursor.is_some());
		slots.set(CallbackSlots::SET_TIMER, self.set_timer.is_some());
		slots.set(CallbackSlots::KILL_TIMER, self.kill_timer.is_some());
		slots.set(CallbackSlots::TIMER, self.timer.is_some());
		slots.set(CallbackSlots::GET_LOCAL_TIME, self.local_time.is_some());
		slots.set(CallbackSlots::ON_CHANGE, self.on_change.is_some());
		slots.set(CallbackSlots::FOCUS_CHANGE, self.focus_change.is_some());
		slots.set(CallbackSlots::DO_URI_ACTION, self.uri_action.is_some());
		slots.set(CallbackSlots::DO_GOTO_ACTION, self.goto_action.is_some());
		slots.set(CallbackSlots::DO_NAMED_ACTION, self.named_action.is_some());
		slots
	}

	/// Runs the hook for `call`. `None` means the hook is not set.
	fn run(&self, call: CallbackCall) -> Option<CallbackResult<CallbackReply>> {
		fn unit<A>(hook: &Option<Hook<A>>, arg: A) -> Option<CallbackResult<CallbackReply>> {
			hook.as_ref().map(|hook| hook(arg).map(|()| CallbackReply::Unit))
		}

		match call {
			CallbackCall::Invalidate { area, .. } => unit(&self.invalidate, area),
			CallbackCall::OutputSelectedRect { area, .. } => unit(&self.output_selected_rect, area),
			CallbackCall::SetCursor { cursor, .. } => unit(&self.set_cursor, cursor),
			CallbackCall::SetTimer { elapse_ms, .. } => self
				.set_timer
				.as_ref()
				.map(|hook| hook(elapse_ms).map(CallbackReply::TimerId)),
			CallbackCall::KillTimer { timer_id, .. } => unit(&self.kill_timer, timer_id),
			CallbackCall::GetLocalTime { .. } => self
				.local_time
				.as_ref()
				.map(|hook| hook(()).map(|time| CallbackReply::LocalTime(Some(time)))),
			CallbackCall::OnChange { .. } => unit(&self.on_change, ()),
			CallbackCall::FocusChange { focus, .. } => unit(&self.focus_change, focus),
			CallbackCall::DoUriAction { uri, .. } => unit(&self.uri_action, uri),
			CallbackCall::DoGoToAction { action, .. } => unit(&self.goto_action, action),
			CallbackCall::DoNamedAction { name, .. } => unit(&self.named_action, name),
			CallbackCall::NeedToPauseNow { .. } => None,
		}
	}
}

impl fmt::Debug for FormCallbacks {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FormCallbacks").field("slots", &self.slots()).finish()
	}
}

/// The native default answer to `slot`.
fn default_reply(slot: CallbackSlot) -> CallbackReply {
	match slot {
		CallbackSlot::SetTimer => CallbackReply::TimerId(0),
		CallbackSlot::GetLocalTime => CallbackReply::LocalTime(None),
		CallbackSlot::NeedToPauseNow => CallbackReply::Pause(false),
		_ => CallbackReply::Unit,
	}
}

/// A hook failure swallowed at the broker boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
	/// Slot whose hook failed.
	pub slot: CallbackSlot,
	/// Session the call belonged to.
	pub form: Option<Reference>,
	/// Hook error message.
	pub message: String,
}

/// Answers callbacks for one instance.
pub struct CallbackBroker {
	instance: InstanceId,
	sessions: Mutex<FxHashMap<Reference, Arc<FormCallbacks>>>,
	pending: Mutex<Option<Arc<FormCallbacks>>>,
	pause: Mutex<Option<PausePredicate>>,
	failures: broadcast::Sender<CallbackFailure>,
}

impl CallbackBroker {
	/// Creates a broker with no sessions.
	pub fn new(instance: InstanceId) -> Self {
		let (failures, _) = broadcast::channel(64);
		Self {
			instance,
			sessions: Mutex::new(FxHashMap::default()),
			pending: Mutex::new(None),
			pause: Mutex::new(None),
			failures,
		}
	}

	/// Instance this broker serves.
	pub fn instance(&self) -> InstanceId {
		self.instance
	}

	/// Answers a callback. Never fails.
	pub fn invoke(&self, call: CallbackCall) -> CallbackReply {
		let slot = call.slot();
		let form = call.form();

		if slot == CallbackSlot::NeedToPauseNow {
			let mut pause = self.pause.lock();
			return CallbackReply::Pause(pause.as_mut().is_some_and(|predicate| predicate()));
		}

		let outcome = self.session(form).and_then(|callbacks| callbacks.run(call));

		match outcome {
			Some(Ok(reply)) => reply,
			Some(Err(error)) => {
				self.fail(slot, form, error);
				default_reply(slot)
			}
			None => {
				tracing::trace!(instance = %self.instance, slot = slot.name(), "broker.unhandled_callback");
				default_reply(slot)
			}
		}
	}

	/// Handles an unsolicited event.
	pub fn dispatch_event(&self, event: Event) {
		match event {
			Event::TimerFired { form, timer_id } => {
				let Some(callbacks) = self.session(Some(form)) else {
					return;
				};
				if let Some(Err(error)) = callbacks.timer.as_ref().map(|hook| hook(timer_id)) {
					self.fail(CallbackSlot::Timer, Some(form), error);
				}
			}
			Event::FormClosed { form } => self.detach(form),
		}
	}

	/// Stages hooks for a form-fill environment being created.
	pub fn begin_session(&self, callbacks: FormCallbacks) {
		*self.pending.lock() = Some(Arc::new(callbacks));
	}

	/// Binds the staged hooks to the created environment.
	pub fn attach(&self, form: Reference) {
		if let Some(callbacks) = self.pending.lock().take() {
			self.sessions.lock().insert(form, callbacks);
			tracing::debug!(instance = %self.instance, %form, "broker.session_attached");
		}
	}

	/// Drops staged hooks after a failed environment creation.
	pub fn abandon_pending(&self) {
		self.pending.lock().take();
	}

	/// Forgets a session.
	pub fn detach(&self, form: Reference) {
		if self.sessions.lock().remove(&form).is_some() {
			tracing::debug!(instance = %self.instance, %form, "broker.session_detached");
		}
	}

	/// Forgets every session.
	pub fn clear(&self) {
		self.sessions.lock().clear();
		self.pending.lock().take();
		self.pause.lock().take();
	}

	/// Number of attached sessions.
	pub fn session_count(&self) -> usize {
		self.sessions.lock().len()
	}

	/// Installs or removes the pause predicate for the next render step.
	pub fn set_pause(&self, predicate: Option<PausePredicate>) {
		*self.pause.lock() = predicate;
	}

	/// Subscribes to hook failures.
	pub fn subscribe_failures(&self) -> broadcast::Receiver<CallbackFailure> {
		self.failures.subscribe()
	}

	fn session(&self, form: Option<Reference>) -> Option<Arc<FormCallbacks>> {
		let form = form?;
		if let Some(callbacks) = self.sessions.lock().get(&form) {
			return Some(Arc::clone(callbacks));
		}
		self.pending.lock().clone()
	}

	fn fail(&self, slot: CallbackSlot, form: Option<Reference>, error: CallbackError) {
		tracing::warn!(instance = %self.instance, slot = slot.name(), %error, "broker.callback_failed");
		let _ = self.failures.send(CallbackFailure {
			slot,
			form,
			message: error.0,
		});
	}
}

impl fmt::Debug for CallbackBroker {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallbackBroker")
			.field("instance", &self.instance)
			.field("sessions", &self.session_count())
			.finish()
	}
}
