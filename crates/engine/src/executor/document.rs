use std::fs;

use pdfhost_proto::{DocPermissions, DocumentSource, NativeFailure, PdfError, RefKind, Reference, Response, SaveOutcome, SaveTarget};

use super::Executor;
use crate::native::{DocumentData, PdfEngine};

impl<E: PdfEngine> Executor<E> {
	pub(super) fn open_document(&mut self, source: DocumentSource, password: Option<&str>) -> Result<Response, PdfError> {
		let data = match &source {
			DocumentSource::Bytes(bytes) => DocumentData::Bytes(bytes),
			DocumentSource::Path(path) => DocumentData::Path(path),
		};
		let native = self.engine.load_document(data, password)?;
		let document = self.refs.alloc(RefKind::Document, native);
		tracing::debug!(instance = %self.instance(), %document, "executor.document_opened");
		Ok(Response::Document(document))
	}

	pub(super) fn page_count(&mut self, document: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(document, RefKind::Document)?;
		Ok(Response::PageCount(self.engine.page_count(native)))
	}

	pub(super) fn file_version(&mut self, document: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(document, RefKind::Document)?;
		Ok(Response::FileVersion(self.engine.file_version(native)))
	}

	pub(super) fn permissions(&mut self, document: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(document, RefKind::Document)?;
		Ok(Response::DocPermissions(DocPermissions::from_bits(self.engine.permissions(native))))
	}

	pub(super) fn security_handler_revision(&mut self, document: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(document, RefKind::Document)?;
		Ok(Response::SecurityHandlerRevision(self.engine.security_handler_revision(native)))
	}

	pub(super) fn meta_text(&mut self, document: Reference, tag: &str) -> Result<Response, PdfError> {
		let native = self.resolve(document, RefKind::Document)?;
		Ok(Response::Text(self.engine.meta_text(native, tag)))
	}

	pub(super) fn import_pages(
		&mut self,
		destination: Reference,
		source: Reference,
		range: Option<&str>,
		index: u32,
	) -> Result<Response, PdfError> {
		let destination = self.resolve(destination, RefKind::Document)?;
		let source = self.resolve(source, RefKind::Document)?;
		if !self.engine.import_pages(destination, source, range, index) {
			return Err(NativeFailure::ImportPages.into());
		}
		Ok(Response::Done)
	}

	/// Serializes into memory first so a size limit or failure never leaves partial output.
	pub(super) fn save(
		&mut self,
		document: Reference,
		flags: u32,
		version: Option<i32>,
		target: SaveTarget,
		max_size: Option<u64>,
	) -> Result<Response, PdfError> {
		let native = self.resolve(document, RefKind::Document)?;
		let mut bytes = Vec::new();
		if !self.engine.save(native, flags, version, &mut bytes) {
			return Err(NativeFailure::Save.into());
		}

		let size = bytes.len() as u64;
		if let Some(limit) = max_size
			&& size > limit
		{
			return Err(PdfError::MaxSizeExceeded { limit, actual: size });
		}

		let outcome = match target {
			SaveTarget::Bytes => SaveOutcome {
				bytes: Some(bytes),
				path: None,
				size,
			},
			SaveTarget::Path(path) => {
				fs::write(&path, &bytes)?;
				SaveOutcome {
					bytes: None,
					path: Some(path),
					size,
				}
			}
		};
		Ok(Response::Saved(outcome))
	}
}
