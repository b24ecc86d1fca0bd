//! The response half of the call envelope.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::reference::Reference;

/// Permission bits of an encrypted document, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocPermissions {
	/// Raw permission word; `0xFFFFFFFF` for unprotected documents.
	pub bits: u32,
	/// Bit 3.
	pub print_document: bool,
	/// Bit 4.
	pub modify_contents: bool,
	/// Bit 5.
	pub copy_or_extract_text: bool,
	/// Bit 6.
	pub add_or_modify_text_annotations: bool,
	/// Bit 6, as it applies to interactive form fields.
	pub fill_in_interactive_form_fields: bool,
	/// Bits 4 and 6 together.
	pub create_or_modify_interactive_form_fields: bool,
	/// Bit 9.
	pub fill_in_existing_interactive_form_fields: bool,
	/// Bit 10.
	pub extract_text_and_graphics: bool,
	/// Bit 11.
	pub assemble_document: bool,
	/// Bit 12.
	pub print_document_as_faithful_digital_copy: bool,
}

impl DocPermissions {
	/// Decodes a permission word (bit numbers in the field docs are one-based).
	pub fn from_bits(bits: u32) -> Self {
		let set = |bit: u32| bits & (1 << bit) != 0;
		let modify_contents = set(3);
		let add_or_modify = set(5);
		Self {
			bits,
			print_document: set(2),
			modify_contents,
			copy_or_extract_text: set(4),
			add_or_modify_text_annotations: add_or_modify,
			fill_in_interactive_form_fields: add_or_modify,
			create_or_modify_interactive_form_fields: modify_contents && add_or_modify,
			fill_in_existing_interactive_form_fields: set(8),
			extract_text_and_graphics: set(9),
			assemble_document: set(10),
			print_document_as_faithful_digital_copy: set(11),
		}
	}
}

/// Page dimensions in points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageSize {
	/// Width.
	pub width: f32,
	/// Height.
	pub height: f32,
}

/// Bitmap layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BitmapInfo {
	/// Width in pixels.
	pub width: u32,
	/// Height in pixels.
	pub height: u32,
	/// Bytes per row.
	pub stride: u32,
}

/// Progress of a progressive render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderStatus {
	/// More work remains; call continue.
	ToBeContinued,
	/// Rendering finished.
	Done,
	/// Rendering failed.
	Failed,
}

/// Kind of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
	/// Unsupported action type.
	Unsupported,
	/// Go to a destination in the same document.
	GoTo,
	/// Go to a destination in another document.
	RemoteGoTo,
	/// Open a URI.
	Uri,
	/// Launch an application or open a file.
	Launch,
	/// Embedded go-to.
	EmbeddedGoTo,
}

/// Where a saved document went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
	/// The bytes, when saved to bytes.
	pub bytes: Option<Vec<u8>>,
	/// The path written, when saved to a path.
	pub path: Option<PathBuf>,
	/// Size of the output.
	pub size: u64,
}

/// The focused annotation of a form-fill environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusedAnnotation {
	/// Page index of the annotation.
	pub page_index: u32,
	/// The annotation.
	pub annotation: Reference,
}

/// A successful result of a [`Request`](crate::Request).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
pub enum Response {
	/// Answer to `Ping`.
	Pong,
	/// A close or fire-and-forget operation completed.
	Done,
	/// An opened document.
	Document(Reference),
	/// Number of pages.
	PageCount(u32),
	/// File version such as 14 for 1.4; none if unknown.
	FileVersion(Option<i32>),
	/// Decoded permission flags.
	DocPermissions(DocPermissions),
	/// Standard security handler revision, -1 if unprotected.
	SecurityHandlerRevision(i32),
	/// A loaded page.
	Page(Reference),
	/// Page dimensions.
	PageSize(PageSize),
	/// Page rotation in quarter turns.
	PageRotation(i32),
	/// A created bitmap.
	Bitmap {
		/// The bitmap.
		bitmap: Reference,
		/// Its layout.
		info: BitmapInfo,
	},
	/// Bitmap pixels.
	BitmapBuffer {
		/// Layout of `data`.
		info: BitmapInfo,
		/// Raw BGRA pixels.
		data: Vec<u8>,
	},
	/// Progressive render progress.
	RenderStatus(RenderStatus),
	/// A saved document.
	Saved(SaveOutcome),
	/// An outline entry, none at the end of a level.
	Bookmark(Option<Reference>),
	/// An action, none if the target has no action.
	Action(Option<Reference>),
	/// Action kind.
	ActionType(ActionType),
	/// A destination, none if the action has none.
	Dest(Option<Reference>),
	/// Zero-based page index, none if unresolved.
	PageIndex(Option<u32>),
	/// A count of children or signatures.
	Count(u32),
	/// A signature object.
	Signature(Reference),
	/// Opaque binary payload.
	Blob(Vec<u8>),
	/// A string value, none if absent.
	Text(Option<String>),
	/// A page structure tree.
	StructTree(Reference),
	/// A structure element, none if the index has no element.
	StructElement(Option<Reference>),
	/// A structure attribute object.
	StructElementAttribute(Reference),
	/// A form-fill environment.
	FormHandle(Reference),
	/// Whether an input event was consumed.
	Handled(bool),
	/// The focused annotation, if any.
	FocusedAnnotation(Option<FocusedAnnotation>),
}

impl Response {
	/// Variant name used in logs and errors.
	pub fn name(&self) -> &'static str {
		self.into()
	}
}
