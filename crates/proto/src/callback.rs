//! Messages travelling from an engine host back to the caller.
//!
//! Library-initiated callbacks are layered on the main transport: the host
//! suspends the running call, sends a [`CallbackCall`] and waits for the matching
//! [`CallbackReply`]. Timer ticks arrive unsolicited as [`Event`]s.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::reference::Reference;
use crate::request::RectF;

bitflags! {
	/// Set of form-fill hooks a caller registered.
	///
	/// Slots outside the set are never round-tripped; the engine falls back to its
	/// native default instead.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
	#[serde(transparent)]
	pub struct CallbackSlots: u32 {
		/// Repaint request for a page area.
		const INVALIDATE = 1 << 0;
		/// Selection rectangle output.
		const OUTPUT_SELECTED_RECT = 1 << 1;
		/// Cursor shape change.
		const SET_CURSOR = 1 << 2;
		/// Timer creation; returns the timer id.
		const SET_TIMER = 1 << 3;
		/// Timer removal.
		const KILL_TIMER = 1 << 4;
		/// Timer tick delivery.
		const TIMER = 1 << 5;
		/// Current local time query.
		const GET_LOCAL_TIME = 1 << 6;
		/// Form content change notification.
		const ON_CHANGE = 1 << 7;
		/// Focus change notification.
		const FOCUS_CHANGE = 1 << 8;
		/// URI action execution.
		const DO_URI_ACTION = 1 << 9;
		/// GoTo action execution.
		const DO_GOTO_ACTION = 1 << 10;
		/// Named action execution.
		const DO_NAMED_ACTION = 1 << 11;
	}
}

impl Default for CallbackSlots {
	fn default() -> Self {
		Self::empty()
	}
}

/// A single callback slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
pub enum CallbackSlot {
	/// See [`CallbackSlots::INVALIDATE`].
	Invalidate,
	/// See [`CallbackSlots::OUTPUT_SELECTED_RECT`].
	OutputSelectedRect,
	/// See [`CallbackSlots::SET_CURSOR`].
	SetCursor,
	/// See [`CallbackSlots::SET_TIMER`].
	SetTimer,
	/// See [`CallbackSlots::KILL_TIMER`].
	KillTimer,
	/// See [`CallbackSlots::TIMER`].
	Timer,
	/// See [`CallbackSlots::GET_LOCAL_TIME`].
	GetLocalTime,
	/// See [`CallbackSlots::ON_CHANGE`].
	OnChange,
	/// See [`CallbackSlots::FOCUS_CHANGE`].
	FocusChange,
	/// See [`CallbackSlots::DO_URI_ACTION`].
	DoUriAction,
	/// See [`CallbackSlots::DO_GOTO_ACTION`].
	DoGoToAction,
	/// See [`CallbackSlots::DO_NAMED_ACTION`].
	DoNamedAction,
	/// Progressive render pause predicate.
	NeedToPauseNow,
}

impl CallbackSlot {
	/// The registration bit for this slot. The pause predicate is registered per call.
	pub const fn flag(self) -> CallbackSlots {
		match self {
			Self::Invalidate => CallbackSlots::INVALIDATE,
			Self::OutputSelectedRect => CallbackSlots::OUTPUT_SELECTED_RECT,
			Self::SetCursor => CallbackSlots::SET_CURSOR,
			Self::SetTimer => CallbackSlots::SET_TIMER,
			Self::KillTimer => CallbackSlots::KILL_TIMER,
			Self::Timer => CallbackSlots::TIMER,
			Self::GetLocalTime => CallbackSlots::GET_LOCAL_TIME,
			Self::OnChange => CallbackSlots::ON_CHANGE,
			Self::FocusChange => CallbackSlots::FOCUS_CHANGE,
			Self::DoUriAction => CallbackSlots::DO_URI_ACTION,
			Self::DoGoToAction => CallbackSlots::DO_GOTO_ACTION,
			Self::DoNamedAction => CallbackSlots::DO_NAMED_ACTION,
			Self::NeedToPauseNow => CallbackSlots::empty(),
		}
	}

	/// Slot name used in logs.
	pub fn name(self) -> &'static str {
		self.into()
	}
}

/// Wall clock time as reported to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalTime {
	/// Full year.
	pub year: u16,
	/// Month, 1 to 12.
	pub month: u16,
	/// Day of week, 0 is Sunday.
	pub day_of_week: u16,
	/// Day of month, 1 to 31.
	pub day: u16,
	/// Hour, 0 to 23.
	pub hour: u16,
	/// Minute, 0 to 59.
	pub minute: u16,
	/// Second, 0 to 59.
	pub second: u16,
	/// Millisecond, 0 to 999.
	pub milliseconds: u16,
}

/// A page area the engine wants repainted or highlighted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Invalidation {
	/// Page the area belongs to, when the caller holds a reference to it.
	pub page: Option<Reference>,
	/// Area in page space.
	pub rect: RectF,
}

/// The focused annotation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusChange {
	/// Newly focused annotation, none when focus was dropped.
	pub annotation: Option<Reference>,
	/// Page index of the annotation, -1 when unknown.
	pub page_index: i32,
}

/// Request to navigate inside the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoToAction {
	/// Target page index.
	pub page_index: i32,
	/// Zoom mode.
	pub zoom_mode: i32,
	/// Zoom mode parameters.
	pub position: Vec<f32>,
}

/// A library-initiated call into the caller, nested inside a running request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallbackCall {
	/// Repaint request.
	Invalidate {
		/// Environment raising the call.
		form: Reference,
		/// Area to repaint.
		area: Invalidation,
	},
	/// Selection rectangle output.
	OutputSelectedRect {
		/// Environment raising the call.
		form: Reference,
		/// Selected area.
		area: Invalidation,
	},
	/// Cursor shape change.
	SetCursor {
		/// Environment raising the call.
		form: Reference,
		/// Cursor type.
		cursor: i32,
	},
	/// Timer creation; answered with [`CallbackReply::TimerId`].
	SetTimer {
		/// Environment raising the call.
		form: Reference,
		/// Interval in milliseconds.
		elapse_ms: u32,
	},
	/// Timer removal.
	KillTimer {
		/// Environment raising the call.
		form: Reference,
		/// Timer to remove.
		timer_id: i32,
	},
	/// Local time query; answered with [`CallbackReply::LocalTime`].
	GetLocalTime {
		/// Environment raising the call.
		form: Reference,
	},
	/// Form content changed.
	OnChange {
		/// Environment raising the call.
		form: Reference,
	},
	/// Focus moved.
	FocusChange {
		/// Environment raising the call.
		form: Reference,
		/// New focus.
		focus: FocusChange,
	},
	/// URI action.
	DoUriAction {
		/// Environment raising the call.
		form: Reference,
		/// Target URI.
		uri: String,
	},
	/// GoTo action.
	DoGoToAction {
		/// Environment raising the call.
		form: Reference,
		/// Navigation target.
		action: GoToAction,
	},
	/// Named action such as `NextPage`.
	DoNamedAction {
		/// Environment raising the call.
		form: Reference,
		/// Action name.
		name: String,
	},
	/// Progressive render pause predicate; answered with [`CallbackReply::Pause`].
	NeedToPauseNow {
		/// Page being rendered.
		page: Reference,
	},
}

impl CallbackCall {
	/// The slot this call is routed to.
	pub const fn slot(&self) -> CallbackSlot {
		match self {
			Self::Invalidate { .. } => CallbackSlot::Invalidate,
			Self::OutputSelectedRect { .. } => CallbackSlot::OutputSelectedRect,
			Self::SetCursor { .. } => CallbackSlot::SetCursor,
			Self::SetTimer { .. } => CallbackSlot::SetTimer,
			Self::KillTimer { .. } => CallbackSlot::KillTimer,
			Self::GetLocalTime { .. } => CallbackSlot::GetLocalTime,
			Self::OnChange { .. } => CallbackSlot::OnChange,
			Self::FocusChange { .. } => CallbackSlot::FocusChange,
			Self::DoUriAction { .. } => CallbackSlot::DoUriAction,
			Self::DoGoToAction { .. } => CallbackSlot::DoGoToAction,
			Self::DoNamedAction { .. } => CallbackSlot::DoNamedAction,
			Self::NeedToPauseNow { .. } => CallbackSlot::NeedToPauseNow,
		}
	}

	/// The environment raising the call, if it belongs to one.
	pub const fn form(&self) -> Option<Reference> {
		match self {
			Self::Invalidate { form, .. }
			| Self::OutputSelectedRect { form, .. }
			| Self::SetCursor { form, .. }
			| Self::SetTimer { form, .. }
			| Self::KillTimer { form, .. }
			| Self::GetLocalTime { form }
			| Self::OnChange { form }
			| Self::FocusChange { form, .. }
			| Self::DoUriAction { form, .. }
			| Self::DoGoToAction { form, .. }
			| Self::DoNamedAction { form, .. } => Some(*form),
			Self::NeedToPauseNow { .. } => None,
		}
	}
}

/// The caller's answer to a [`CallbackCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallbackReply {
	/// The hook ran or was not registered; nothing to return.
	Unit,
	/// Timer id, 0 when no timer was created.
	TimerId(i32),
	/// Local time, none to let the engine use its own clock.
	LocalTime(Option<LocalTime>),
	/// Whether the progressive render should pause.
	Pause(bool),
}

/// Unsolicited instance-side notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
	/// A timer armed through set-timer elapsed.
	TimerFired {
		/// Environment owning the timer.
		form: Reference,
		/// Timer id returned by the caller's set-timer hook.
		timer_id: i32,
	},
	/// A form-fill environment went away, explicitly or with its document.
	FormClosed {
		/// The environment.
		form: Reference,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pause_predicate_has_no_registration_bit() {
		assert!(CallbackSlot::NeedToPauseNow.flag().is_empty());
		assert_eq!(CallbackSlot::SetTimer.flag(), CallbackSlots::SET_TIMER);
	}

	#[test]
	fn calls_know_their_slot_and_form() {
		let form = Reference::default();
		let call = CallbackCall::SetTimer { form, elapse_ms: 10 };
		assert_eq!(call.slot(), CallbackSlot::SetTimer);
		assert_eq!(call.form(), Some(form));
		assert_eq!(CallbackCall::NeedToPauseNow { page: form }.form(), None);
	}
}
