use pdfhost_proto::{
	CallbackCall, CallbackReply, NativeFailure, PageSelector, PdfError, RefKind, Reference, RenderArea, RenderStatus, Response,
};

use super::{CallbackHost, Executor};
use crate::native::PdfEngine;

/// Builds the pause predicate for a progressive render step.
///
/// Without a registered predicate the engine never pauses.
fn pause_predicate<'a>(page: Reference, registered: bool, host: &'a mut dyn CallbackHost) -> impl FnMut() -> bool + 'a {
	move || {
		registered
			&& matches!(
				host.invoke(CallbackCall::NeedToPauseNow { page }),
				Some(CallbackReply::Pause(true))
			)
	}
}

impl<E: PdfEngine> Executor<E> {
	pub(super) fn create_bitmap(&mut self, width: u32, height: u32, alpha: bool) -> Result<Response, PdfError> {
		let native = self
			.engine
			.create_bitmap(width, height, alpha)
			.ok_or(NativeFailure::CreateBitmap)?;
		let info = self.engine.bitmap_info(native);
		Ok(Response::Bitmap {
			bitmap: self.refs.alloc(RefKind::Bitmap, native),
			info,
		})
	}

	pub(super) fn bitmap_buffer(&mut self, bitmap: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(bitmap, RefKind::Bitmap)?;
		Ok(Response::BitmapBuffer {
			info: self.engine.bitmap_info(native),
			data: self.engine.bitmap_buffer(native),
		})
	}

	pub(super) fn render_page(
		&mut self,
		bitmap: Reference,
		page: &PageSelector,
		area: &RenderArea,
		flags: u32,
	) -> Result<Response, PdfError> {
		let bitmap = self.resolve(bitmap, RefKind::Bitmap)?;
		let (_, page) = self.page(page)?;
		self.engine.render_page(bitmap, page, area, flags);
		Ok(Response::Done)
	}

	pub(super) fn render_start(
		&mut self,
		bitmap: Reference,
		page: &PageSelector,
		area: &RenderArea,
		flags: u32,
		pause: bool,
		host: &mut dyn CallbackHost,
	) -> Result<Response, PdfError> {
		let native_bitmap = self.resolve(bitmap, RefKind::Bitmap)?;
		let (page, native_page) = self.page(page)?;
		if self.renders.contains(&page) {
			return Err(PdfError::InvalidState(
				"progressive render already started for this page, close it first".into(),
			));
		}

		self.renders.insert(page);
		let mut predicate = pause_predicate(page, pause, host);
		let status = self
			.engine
			.render_start(native_bitmap, native_page, area, flags, &mut predicate);
		Ok(Response::RenderStatus(status))
	}

	pub(super) fn render_continue(
		&mut self,
		page: &PageSelector,
		pause: bool,
		host: &mut dyn CallbackHost,
	) -> Result<Response, PdfError> {
		let (page, native) = self.page(page)?;
		if !self.renders.contains(&page) {
			return Err(not_started());
		}
		let mut predicate = pause_predicate(page, pause, host);
		let status: RenderStatus = self.engine.render_continue(native, &mut predicate);
		Ok(Response::RenderStatus(status))
	}

	pub(super) fn render_close(&mut self, page: &PageSelector) -> Result<Response, PdfError> {
		let (page, native) = self.page(page)?;
		if !self.renders.remove(&page) {
			return Err(not_started());
		}
		self.engine.render_close(native);
		Ok(Response::Done)
	}
}

fn not_started() -> PdfError {
	PdfError::InvalidState("progressive render not started for this page".into())
}
