use pdfhost_proto::{NativeFailure, PageSelector, PdfError, RefKind, Reference, Response};

use super::Executor;
use crate::native::PdfEngine;

impl<E: PdfEngine> Executor<E> {
	pub(super) fn struct_tree(&mut self, page: &PageSelector) -> Result<Response, PdfError> {
		let (page, native_page) = self.page(page)?;
		let native = self.engine.struct_tree(native_page).ok_or(NativeFailure::StructTree)?;
		Ok(Response::StructTree(self.refs.alloc_child(RefKind::StructTree, native, page)))
	}

	pub(super) fn struct_child_count(&mut self, tree: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(tree, RefKind::StructTree)?;
		Ok(Response::Count(self.engine.struct_child_count(native)))
	}

	pub(super) fn struct_child(&mut self, tree: Reference, index: u32) -> Result<Response, PdfError> {
		let native_tree = self.resolve(tree, RefKind::StructTree)?;
		let element = self
			.engine
			.struct_child(native_tree, index)
			.map(|native| self.refs.alloc_child(RefKind::StructElement, native, tree));
		Ok(Response::StructElement(element))
	}

	pub(super) fn struct_element_type(&mut self, element: Reference) -> Result<Response, PdfError> {
		let native = self.resolve(element, RefKind::StructElement)?;
		Ok(Response::Text(self.engine.struct_element_type(native)))
	}

	pub(super) fn struct_element_attribute(&mut self, element: Reference, index: u32) -> Result<Response, PdfError> {
		let native_element = self.resolve(element, RefKind::StructElement)?;
		let native = self
			.engine
			.struct_element_attribute(native_element, index)
			.ok_or(NativeFailure::Attribute)?;
		Ok(Response::StructElementAttribute(self.refs.alloc_child(
			RefKind::StructElementAttribute,
			native,
			element,
		)))
	}

	pub(super) fn struct_attribute_value(&mut self, attribute: Reference, name: &str) -> Result<Response, PdfError> {
		let native = self.resolve(attribute, RefKind::StructElementAttribute)?;
		Ok(Response::Text(self.engine.struct_attribute_value(native, name)))
	}
}
