use std::time::Duration;

use pdfhost_proto::{
	CallbackCall, CallbackReply, CallbackSlot, CallbackSlots, FocusChange, FocusedAnnotation, GoToAction, Invalidation,
	LocalTime, NativeFailure, PageSelector, PdfError, RectF, RefKind, Reference, Response,
};
use rustc_hash::FxHashSet;

use super::{CallbackHost, Executor};
use crate::native::{FormHooks, Handle, PdfEngine};
use crate::refs::RefTable;

/// Callback registration and armed timers of one form-fill environment.
#[derive(Debug, Default)]
pub(super) struct FormSession {
	pub(super) slots: CallbackSlots,
	pub(super) timers: FxHashSet<i32>,
}

/// Adapts engine form hooks to the caller's registered callbacks.
///
/// Unregistered slots never reach the host; the engine sees the native default.
struct FormBridge<'a, H: ?Sized> {
	form: Reference,
	slots: CallbackSlots,
	timers: &'a mut FxHashSet<i32>,
	refs: &'a mut RefTable,
	host: &'a mut H,
}

impl<H: CallbackHost + ?Sized> FormBridge<'_, H> {
	fn call(&mut self, slot: CallbackSlot, call: CallbackCall) -> Option<CallbackReply> {
		if !self.slots.contains(slot.flag()) {
			return None;
		}
		self.host.invoke(call)
	}

	fn area(&self, page: Handle, rect: RectF) -> Invalidation {
		Invalidation {
			page: self.refs.find(RefKind::Page, page),
			rect,
		}
	}
}

impl<H: CallbackHost + ?Sized> FormHooks for FormBridge<'_, H> {
	fn invalidate(&mut self, page: Handle, rect: RectF) {
		let area = self.area(page, rect);
		self.call(CallbackSlot::Invalidate, CallbackCall::Invalidate { form: self.form, area });
	}

	fn output_selected_rect(&mut self, page: Handle, rect: RectF) {
		let area = self.area(page, rect);
		self.call(
			CallbackSlot::OutputSelectedRect,
			CallbackCall::OutputSelectedRect { form: self.form, area },
		);
	}

	fn set_cursor(&mut self, cursor: i32) {
		self.call(CallbackSlot::SetCursor, CallbackCall::SetCursor { form: self.form, cursor });
	}

	fn set_timer(&mut self, elapse_ms: u32) -> i32 {
		let reply = self.call(CallbackSlot::SetTimer, CallbackCall::SetTimer { form: self.form, elapse_ms });
		match reply {
			Some(CallbackReply::TimerId(timer_id)) if timer_id != 0 => {
				self.timers.insert(timer_id);
				self.host
					.arm_timer(self.form, timer_id, Duration::from_millis(u64::from(elapse_ms)));
				timer_id
			}
			_ => 0,
		}
	}

	fn kill_timer(&mut self, timer_id: i32) {
		self.call(CallbackSlot::KillTimer, CallbackCall::KillTimer { form: self.form, timer_id });
		if self.timers.remove(&timer_id) {
			self.host.disarm_timer(self.form, timer_id);
		}
	}

	fn local_time(&mut self) -> Option<LocalTime> {
		match self.call(CallbackSlot::GetLocalTime, CallbackCall::GetLocalTime { form: self.form }) {
			Some(CallbackReply::LocalTime(time)) => time,
			_ => None,
		}
	}

	fn on_change(&mut self) {
		self.call(CallbackSlot::OnChange, CallbackCall::OnChange { form: self.form });
	}

	fn on_focus_change(&mut self, annotation: Option<Handle>, page_index: i32) {
		if !self.slots.contains(CallbackSlots::FOCUS_CHANGE) {
			return;
		}
		let form = self.form;
		let annotation = annotation.map(|native| self.refs.alloc_child(RefKind::Annotation, native, form));
		self.call(
			CallbackSlot::FocusChange,
			CallbackCall::FocusChange {
				form,
				focus: FocusChange { annotation, page_index },
			},
		);
	}

	fn do_uri_action(&mut self, uri: &str) {
		self.call(
			CallbackSlot::DoUriAction,
			CallbackCall::DoUriAction {
				form: self.form,
				uri: uri.to_owned(),
			},
		);
	}

	fn do_goto_action(&mut self, page_index: i32, zoom_mode: i32, position: &[f32]) {
		self.call(
			CallbackSlot::DoGoToAction,
			CallbackCall::DoGoToAction {
				form: self.form,
				action: GoToAction {
					page_index,
					zoom_mode,
					position: position.to_vec(),
				},
			},
		);
	}

	fn do_named_action(&mut self, name: &str) {
		self.call(
			CallbackSlot::DoNamedAction,
			CallbackCall::DoNamedAction {
				form: self.form,
				name: name.to_owned(),
			},
		);
	}
}

impl<E: PdfEngine> Executor<E> {
	pub(super) fn init_form_fill(&mut self, document: Reference, slots: CallbackSlots) -> Result<Response, PdfError> {
		let native_document = self.resolve(document, RefKind::Document)?;
		let native = self
			.engine
			.init_form_fill(native_document)
			.ok_or(NativeFailure::FormFillEnvironment)?;
		let form = self.refs.alloc_child(RefKind::FormHandle, native, document);
		self.forms.insert(
			form,
			FormSession {
				slots,
				timers: FxHashSet::default(),
			},
		);
		tracing::debug!(instance = %self.instance(), %form, ?slots, "executor.form_fill_initialized");
		Ok(Response::FormHandle(form))
	}

	/// Splits the executor into the engine and a bridge for `form`.
	fn form_parts<'a, H: CallbackHost + ?Sized>(
		&'a mut self,
		form: Reference,
		host: &'a mut H,
	) -> Result<(&'a mut E, Handle, FormBridge<'a, H>), PdfError> {
		let native = self.resolve(form, RefKind::FormHandle)?;
		let Self { engine, refs, forms, .. } = self;
		let session = forms.entry(form).or_default();
		let bridge = FormBridge {
			form,
			slots: session.slots,
			timers: &mut session.timers,
			refs,
			host,
		};
		Ok((engine, native, bridge))
	}

	pub(super) fn form_after_load_page(
		&mut self,
		form: Reference,
		page: &PageSelector,
		host: &mut dyn CallbackHost,
	) -> Result<Response, PdfError> {
		let (_, native_page) = self.page(page)?;
		let (engine, native, mut bridge) = self.form_parts(form, host)?;
		engine.form_after_load_page(native, native_page, &mut bridge);
		Ok(Response::Done)
	}

	pub(super) fn form_lbutton_down(
		&mut self,
		form: Reference,
		page: &PageSelector,
		modifier: i32,
		x: f64,
		y: f64,
		host: &mut dyn CallbackHost,
	) -> Result<Response, PdfError> {
		let (_, native_page) = self.page(page)?;
		let (engine, native, mut bridge) = self.form_parts(form, host)?;
		Ok(Response::Handled(engine.form_lbutton_down(
			native,
			native_page,
			modifier,
			x,
			y,
			&mut bridge,
		)))
	}

	pub(super) fn form_char(
		&mut self,
		form: Reference,
		page: &PageSelector,
		character: u32,
		modifier: i32,
		host: &mut dyn CallbackHost,
	) -> Result<Response, PdfError> {
		let (_, native_page) = self.page(page)?;
		let (engine, native, mut bridge) = self.form_parts(form, host)?;
		Ok(Response::Handled(engine.form_char(native, native_page, character, modifier, &mut bridge)))
	}

	pub(super) fn form_focused_text(&mut self, form: Reference, page: &PageSelector) -> Result<Response, PdfError> {
		let (_, native_page) = self.page(page)?;
		let native = self.resolve(form, RefKind::FormHandle)?;
		Ok(Response::Text(Some(self.engine.form_focused_text(native, native_page))))
	}

	pub(super) fn form_replace_selection(
		&mut self,
		form: Reference,
		page: &PageSelector,
		text: &str,
		host: &mut dyn CallbackHost,
	) -> Result<Response, PdfError> {
		let (_, native_page) = self.page(page)?;
		let (engine, native, mut bridge) = self.form_parts(form, host)?;
		engine.form_replace_selection(native, native_page, text, &mut bridge);
		Ok(Response::Done)
	}

	pub(super) fn form_focused_annot(&mut self, form: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(form, RefKind::FormHandle)?;
		let focused = self
			.engine
			.form_focused_annot(native)
			.map(|(page_index, annotation)| FocusedAnnotation {
				page_index,
				annotation: self.refs.alloc_child(RefKind::Annotation, annotation, form),
			});
		Ok(Response::FocusedAnnotation(focused))
	}

	pub(super) fn form_kill_focus(&mut self, form: Reference, host: &mut dyn CallbackHost) -> Result<Response, PdfError> {
		let (engine, native, mut bridge) = self.form_parts(form, host)?;
		Ok(Response::Handled(engine.form_kill_focus(native, &mut bridge)))
	}

	pub(super) fn form_document_open_action(
		&mut self,
		form: Reference,
		host: &mut dyn CallbackHost,
	) -> Result<Response, PdfError> {
		let (engine, native, mut bridge) = self.form_parts(form, host)?;
		engine.form_document_open_action(native, &mut bridge);
		Ok(Response::Done)
	}

	pub(super) fn form_fire_timer(
		&mut self,
		form: Reference,
		timer_id: i32,
		host: &mut dyn CallbackHost,
	) -> Result<Response, PdfError> {
		let (engine, native, mut bridge) = self.form_parts(form, host)?;
		engine.form_fire_timer(native, timer_id, &mut bridge);
		Ok(Response::Done)
	}
}
