//! Request dispatch against one engine.
//!
//! The [`Executor`] owns an engine and the reference table of one instance. It
//! resolves references, calls the engine, mints references for new native
//! objects and releases natives when references are invalidated. Library
//! initiated callbacks leave through a [`CallbackHost`].

mod document;
mod form;
mod navigation;
mod page;
mod render;
mod signature;
mod structure;
#[cfg(test)]
mod tests;

use std::time::Duration;

use pdfhost_proto::{CallbackCall, CallbackReply, Event, InstanceId, PdfError, RefKind, Reference, Request, Response};
use rustc_hash::{FxHashMap, FxHashSet};

use self::form::FormSession;
use crate::native::{Handle, PdfEngine};
use crate::refs::{RefTable, Released};

/// The caller side of the callback channel, as seen from an engine host.
pub trait CallbackHost {
	/// Runs a callback on the caller and waits for the reply.
	///
	/// `None` means the caller is unreachable; the engine then gets the native
	/// default.
	fn invoke(&mut self, call: CallbackCall) -> Option<CallbackReply>;

	/// Starts delivering [`Event::TimerFired`] for `timer_id` every `interval`.
	fn arm_timer(&mut self, form: Reference, timer_id: i32, interval: Duration);

	/// Stops a timer armed with [`CallbackHost::arm_timer`].
	fn disarm_timer(&mut self, form: Reference, timer_id: i32);

	/// Sends an unsolicited event to the caller.
	fn notify(&mut self, event: Event);
}

/// A host with no caller attached: every callback gets the native default.
pub struct DetachedHost;

impl CallbackHost for DetachedHost {
	fn invoke(&mut self, _call: CallbackCall) -> Option<CallbackReply> {
		None
	}

	fn arm_timer(&mut self, _form: Reference, _timer_id: i32, _interval: Duration) {}

	fn disarm_timer(&mut self, _form: Reference, _timer_id: i32) {}

	fn notify(&mut self, _event: Event) {}
}

/// Serves requests for one instance.
pub struct Executor<E> {
	engine: E,
	refs: RefTable,
	forms: FxHashMap<Reference, FormSession>,
	renders: FxHashSet<Reference>,
	indexed_pages: FxHashMap<(Reference, u32), Reference>,
}

impl<E: PdfEngine> Executor<E> {
	/// Creates an executor minting references for `instance`.
	pub fn new(engine: E, instance: InstanceId) -> Self {
		Self {
			engine,
			refs: RefTable::new(instance),
			forms: FxHashMap::default(),
			renders: FxHashSet::default(),
			indexed_pages: FxHashMap::default(),
		}
	}

	/// Instance this executor serves.
	pub fn instance(&self) -> InstanceId {
		self.refs.instance()
	}

	/// The engine.
	pub fn engine(&self) -> &E {
		&self.engine
	}

	/// The engine, for installing process-wide hooks.
	pub fn engine_mut(&mut self) -> &mut E {
		&mut self.engine
	}

	/// The reference table.
	pub fn refs(&self) -> &RefTable {
		&self.refs
	}

	/// Serves one request.
	pub fn execute(&mut self, request: Request, host: &mut dyn CallbackHost) -> Result<Response, PdfError> {
		use Request::*;

		let name = request.name();
		let result = match request {
			Ping => Ok(Response::Pong),
			OpenDocument { source, password } => self.open_document(source, password.as_deref()),
			CloseDocument { document } => self.close(document, RefKind::Document, host),
			GetPageCount { document } => self.page_count(document),
			GetFileVersion { document } => self.file_version(document),
			GetDocPermissions { document } => self.permissions(document),
			GetSecurityHandlerRevision { document } => self.security_handler_revision(document),
			GetMetaText { document, tag } => self.meta_text(document, &tag),
			LoadPage { document, index } => self.load_page(document, index),
			ClosePage { page } => self.close(page, RefKind::Page, host),
			GetPageSize { page } => self.page_size(&page),
			GetPageRotation { page } => self.page_rotation(&page),
			CreateBitmap { width, height, alpha } => self.create_bitmap(width, height, alpha),
			DestroyBitmap { bitmap } => self.close(bitmap, RefKind::Bitmap, host),
			GetBitmapBuffer { bitmap } => self.bitmap_buffer(bitmap),
			RenderPageBitmap {
				bitmap,
				page,
				area,
				flags,
			} => self.render_page(bitmap, &page, &area, flags),
			RenderPageBitmapStart {
				bitmap,
				page,
				area,
				flags,
				pause,
			} => self.render_start(bitmap, &page, &area, flags, pause, host),
			RenderPageContinue { page, pause } => self.render_continue(&page, pause, host),
			RenderPageClose { page } => self.render_close(&page),
			ImportPages {
				destination,
				source,
				page_range,
				index,
			} => self.import_pages(destination, source, page_range.as_deref(), index),
			TransformWithClip { page, matrix, clip } => self.transform_with_clip(&page, matrix.as_ref(), clip.as_ref()),
			SaveAsCopy {
				document,
				flags,
				version,
				target,
				max_size,
			} => self.save(document, flags, version, target, max_size),
			GetFirstBookmark { document, parent } => self.first_bookmark(document, parent),
			GetNextBookmark { document, bookmark } => self.next_bookmark(document, bookmark),
			GetBookmarkTitle { bookmark } => self.bookmark_title(bookmark),
			GetBookmarkAction { bookmark } => self.bookmark_action(bookmark),
			GetActionType { action } => self.action_type(action),
			GetActionUriPath { document, action } => self.action_uri_path(document, action),
			GetActionDest { document, action } => self.action_dest(document, action),
			GetDestPageIndex { document, dest } => self.dest_page_index(document, dest),
			GetSignatureCount { document } => self.signature_count(document),
			GetSignatureObject { document, index } => self.signature(document, index),
			GetSignatureContents { signature } => self.signature_contents(signature),
			GetSignatureReason { signature } => self.signature_reason(signature),
			GetStructTree { page } => self.struct_tree(&page),
			CloseStructTree { struct_tree } => self.close(struct_tree, RefKind::StructTree, host),
			CountStructChildren { struct_tree } => self.struct_child_count(struct_tree),
			GetStructChild { struct_tree, index } => self.struct_child(struct_tree, index),
			GetStructElementType { struct_element } => self.struct_element_type(struct_element),
			GetStructElementAttribute { struct_element, index } => self.struct_element_attribute(struct_element, index),
			GetStructAttributeValue { attribute, name } => self.struct_attribute_value(attribute, &name),
			InitFormFillEnvironment { document, callbacks } => self.init_form_fill(document, callbacks),
			ExitFormFillEnvironment { form_handle } => self.close(form_handle, RefKind::FormHandle, host),
			FormOnAfterLoadPage { form_handle, page } => self.form_after_load_page(form_handle, &page, host),
			FormOnLButtonDown {
				form_handle,
				page,
				modifier,
				x,
				y,
			} => self.form_lbutton_down(form_handle, &page, modifier, x, y, host),
			FormOnChar {
				form_handle,
				page,
				character,
				modifier,
			} => self.form_char(form_handle, &page, character, modifier, host),
			FormGetFocusedText { form_handle, page } => self.form_focused_text(form_handle, &page),
			FormReplaceSelection { form_handle, page, text } => self.form_replace_selection(form_handle, &page, &text, host),
			FormGetFocusedAnnot { form_handle } => self.form_focused_annot(form_handle),
			FormForceToKillFocus { form_handle } => self.form_kill_focus(form_handle, host),
			FormDoDocumentOpenAction { form_handle } => self.form_document_open_action(form_handle, host),
			FormFireTimer { form_handle, timer_id } => self.form_fire_timer(form_handle, timer_id, host),
		};

		if let Err(error) = &result {
			tracing::debug!(instance = %self.instance(), op = name, %error, "executor.request_failed");
		}
		result
	}

	/// Releases every native object and invalidates every reference.
	///
	/// Returns the number of references invalidated.
	pub fn close_all(&mut self, host: &mut dyn CallbackHost) -> usize {
		let released = self.refs.clear();
		let count = released.len();
		self.release(released, host);
		count
	}

	fn resolve(&self, reference: Reference, kind: RefKind) -> Result<Handle, PdfError> {
		self.refs.resolve(reference, kind)
	}

	/// Closes `reference` and everything obtained from it.
	fn close(&mut self, reference: Reference, kind: RefKind, host: &mut dyn CallbackHost) -> Result<Response, PdfError> {
		self.resolve(reference, kind)?;
		let released = self.refs.invalidate(reference);
		self.release(released, host);
		Ok(Response::Done)
	}

	/// Releases natives behind invalidated references, children first.
	fn release(&mut self, released: Vec<Released>, host: &mut dyn CallbackHost) {
		for Released { reference, native } in released {
			match reference.kind {
				RefKind::Document => self.engine.close_document(native),
				RefKind::Page => {
					if self.renders.remove(&reference) {
						self.engine.render_close(native);
					}
					self.indexed_pages.retain(|_, page| *page != reference);
					self.engine.close_page(native);
				}
				RefKind::Bitmap => self.engine.destroy_bitmap(native),
				RefKind::FormHandle => {
					if let Some(session) = self.forms.remove(&reference) {
						for timer_id in session.timers {
							host.disarm_timer(reference, timer_id);
						}
					}
					self.engine.exit_form_fill(native);
					host.notify(Event::FormClosed { form: reference });
				}
				RefKind::StructTree => self.engine.close_struct_tree(native),
				RefKind::Bookmark
				| RefKind::Action
				| RefKind::Dest
				| RefKind::Annotation
				| RefKind::Signature
				| RefKind::StructElement
				| RefKind::StructElementAttribute => {}
			}
			tracing::trace!(instance = %self.refs.instance(), %reference, "executor.released");
		}
	}
}
