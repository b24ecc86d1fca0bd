use pdfhost_proto::{LoadError, Matrix, NativeFailure, PageIndex, PageSelector, PdfError, RectF, RefKind, Reference, Response};

use super::Executor;
use crate::native::{Handle, PdfEngine};

impl<E: PdfEngine> Executor<E> {
	/// Resolves dual page addressing.
	///
	/// Pages addressed by index are loaded on first use and cached per document
	/// until the page or its document is closed.
	pub(super) fn page(&mut self, selector: &PageSelector) -> Result<(Reference, Handle), PdfError> {
		match (selector.by_reference, selector.by_index) {
			(Some(page), None) => {
				if page.is_nil() {
					return Err(PdfError::Argument("page reference can't be empty".into()));
				}
				Ok((page, self.resolve(page, RefKind::Page)?))
			}
			(None, Some(PageIndex { document, index })) => {
				let native_document = self.resolve(document, RefKind::Document)?;
				if let Some(page) = self.indexed_pages.get(&(document, index)).copied()
					&& let Ok(native) = self.resolve(page, RefKind::Page)
				{
					return Ok((page, native));
				}
				let native = self.engine.load_page(native_document, index).ok_or(LoadError::Page)?;
				let page = self.refs.alloc_child(RefKind::Page, native, document);
				self.indexed_pages.insert((document, index), page);
				Ok((page, native))
			}
			_ => Err(PdfError::Argument("either page reference or index should be given".into())),
		}
	}

	pub(super) fn load_page(&mut self, document: Reference, index: u32) -> Result<Response, PdfError> {
		let native_document = self.resolve(document, RefKind::Document)?;
		let native = self.engine.load_page(native_document, index).ok_or(LoadError::Page)?;
		Ok(Response::Page(self.refs.alloc_child(RefKind::Page, native, document)))
	}

	pub(super) fn page_size(&mut self, page: &PageSelector) -> Result<Response, PdfError> {
		let (_, native) = self.page(page)?;
		Ok(Response::PageSize(self.engine.page_size(native)))
	}

	pub(super) fn page_rotation(&mut self, page: &PageSelector) -> Result<Response, PdfError> {
		let (_, native) = self.page(page)?;
		Ok(Response::PageRotation(self.engine.page_rotation(native)))
	}

	pub(super) fn transform_with_clip(
		&mut self,
		page: &PageSelector,
		matrix: Option<&Matrix>,
		clip: Option<&RectF>,
	) -> Result<Response, PdfError> {
		let (_, native) = self.page(page)?;
		if !self.engine.transform_with_clip(native, matrix, clip) {
			return Err(NativeFailure::ClipTransform.into());
		}
		Ok(Response::Done)
	}
}
