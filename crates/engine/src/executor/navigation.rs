use pdfhost_proto::{PdfError, RefKind, Reference, Response};

use super::Executor;
use crate::native::PdfEngine;

impl<E: PdfEngine> Executor<E> {
	pub(super) fn first_bookmark(&mut self, document: Reference, parent: Option<Reference>) -> Result<Response, PdfError> {
		let native_document = self.resolve(document, RefKind::Document)?;
		let native_parent = parent.map(|parent| self.resolve(parent, RefKind::Bookmark)).transpose()?;
		let bookmark = self
			.engine
			.first_bookmark(native_document, native_parent)
			.map(|native| self.refs.alloc_child(RefKind::Bookmark, native, document));
		Ok(Response::Bookmark(bookmark))
	}

	pub(super) fn next_bookmark(&mut self, document: Reference, bookmark: Reference) -> Result<Response, PdfError> {
		let native_document = self.resolve(document, RefKind::Document)?;
		let native_bookmark = self.resolve(bookmark, RefKind::Bookmark)?;
		let next = self
			.engine
			.next_bookmark(native_document, native_bookmark)
			.map(|native| self.refs.alloc_child(RefKind::Bookmark, native, document));
		Ok(Response::Bookmark(next))
	}

	pub(super) fn bookmark_title(&mut self, bookmark: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(bookmark, RefKind::Bookmark)?;
		Ok(Response::Text(Some(self.engine.bookmark_title(native))))
	}

	pub(super) fn bookmark_action(&mut self, bookmark: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(bookmark, RefKind::Bookmark)?;
		let document = self.refs.parent(&bookmark).unwrap_or(bookmark);
		let action = self
			.engine
			.bookmark_action(native)
			.map(|native| self.refs.alloc_child(RefKind::Action, native, document));
		Ok(Response::Action(action))
	}

	pub(super) fn action_type(&mut self, action: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(action, RefKind::Action)?;
		Ok(Response::ActionType(self.engine.action_type(native)))
	}

	pub(super) fn action_uri_path(&mut self, document: Reference, action: Reference) -> Result<Response, PdfError> {
		let native_document = self.resolve(document, RefKind::Document)?;
		let native_action = self.resolve(action, RefKind::Action)?;
		Ok(Response::Text(self.engine.action_uri_path(native_document, native_action)))
	}

	pub(super) fn action_dest(&mut self, document: Reference, action: Reference) -> Result<Response, PdfError> {
		let native_document = self.resolve(document, RefKind::Document)?;
		let native_action = self.resolve(action, RefKind::Action)?;
		let dest = self
			.engine
			.action_dest(native_document, native_action)
			.map(|native| self.refs.alloc_child(RefKind::Dest, native, document));
		Ok(Response::Dest(dest))
	}

	pub(super) fn dest_page_index(&mut self, document: Reference, dest: Reference) -> Result<Response, PdfError> {
		let native_document = self.resolve(document, RefKind::Document)?;
		let native_dest = self.resolve(dest, RefKind::Dest)?;
		Ok(Response::PageIndex(self.engine.dest_page_index(native_document, native_dest)))
	}
}
