use pdfhost_proto::{NativeFailure, PdfError, RefKind, Reference, Response};

use super::Executor;
use crate::native::PdfEngine;

impl<E: PdfEngine> Executor<E> {
	pub(super) fn signature_count(&mut self, document: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(document, RefKind::Document)?;
		Ok(Response::Count(self.engine.signature_count(native)))
	}

	pub(super) fn signature(&mut self, document: Reference, index: u32) -> Result<Response, PdfError> {
		let native_document = self.resolve(document, RefKind::Document)?;
		let native = self
			.engine
			.signature(native_document, index)
			.ok_or(NativeFailure::Signature)?;
		Ok(Response::Signature(self.refs.alloc_child(RefKind::Signature, native, document)))
	}

	pub(super) fn signature_contents(&mut self, signature: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(signature, RefKind::Signature)?;
		Ok(Response::Blob(self.engine.signature_contents(native)))
	}

	pub(super) fn signature_reason(&mut self, signature: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(signature, RefKind::Signature)?;
		Ok(Response::Text(self.engine.signature_reason(native)))
	}
}
