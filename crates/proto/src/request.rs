//! The request half of the call envelope.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::callback::CallbackSlots;
use crate::reference::{PageSelector, Reference};

/// Where a document is loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentSource {
	/// The complete file contents.
	Bytes(Vec<u8>),
	/// A path readable by the engine host.
	Path(PathBuf),
}

/// Where the engine host puts a saved document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveTarget {
	/// Return the bytes in the response.
	#[default]
	Bytes,
	/// Write the bytes to a path on the engine host.
	Path(PathBuf),
}

/// Axis-aligned rectangle in page space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RectF {
	/// Left edge.
	pub left: f32,
	/// Top edge.
	pub top: f32,
	/// Right edge.
	pub right: f32,
	/// Bottom edge.
	pub bottom: f32,
}

impl RectF {
	/// Returns true if the point lies inside the rectangle (PDF coordinates, y grows upward).
	pub fn contains(&self, x: f64, y: f64) -> bool {
		let (x, y) = (x as f32, y as f32);
		x >= self.left && x <= self.right && y <= self.top && y >= self.bottom
	}
}

/// Affine transform `[a b c d e f]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
	/// Horizontal scale.
	pub a: f32,
	/// Vertical skew.
	pub b: f32,
	/// Horizontal skew.
	pub c: f32,
	/// Vertical scale.
	pub d: f32,
	/// Horizontal translation.
	pub e: f32,
	/// Vertical translation.
	pub f: f32,
}

impl Matrix {
	/// The identity transform.
	pub const IDENTITY: Matrix = Matrix {
		a: 1.0,
		b: 0.0,
		c: 0.0,
		d: 1.0,
		e: 0.0,
		f: 0.0,
	};
}

/// Device area a page is rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderArea {
	/// Left pixel position of the display area in bitmap coordinates.
	pub start_x: i32,
	/// Top pixel position of the display area in bitmap coordinates.
	pub start_y: i32,
	/// Horizontal size in pixels.
	pub size_x: i32,
	/// Vertical size in pixels.
	pub size_y: i32,
	/// Page orientation: 0 normal, 1 clockwise, 2 upside down, 3 counter-clockwise.
	pub rotate: i32,
}

/// A single call into an instance.
///
/// Every variant maps to exactly one [`Response`](crate::Response) shape or a typed
/// [`PdfError`](crate::PdfError).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
pub enum Request {
	/// Liveness probe, answered with `Pong`.
	Ping,
	/// Opens a document, answered with `Document`.
	OpenDocument {
		/// Document data.
		source: DocumentSource,
		/// Password for encrypted documents.
		password: Option<String>,
	},
	/// Closes a document and everything obtained from it.
	CloseDocument {
		/// Document to close.
		document: Reference,
	},
	/// Answered with `PageCount`.
	GetPageCount {
		/// Document to query.
		document: Reference,
	},
	/// Answered with `FileVersion`.
	GetFileVersion {
		/// Document to query.
		document: Reference,
	},
	/// Answered with `DocPermissions`.
	GetDocPermissions {
		/// Document to query.
		document: Reference,
	},
	/// Answered with `SecurityHandlerRevision`; -1 when unprotected.
	GetSecurityHandlerRevision {
		/// Document to query.
		document: Reference,
	},
	/// Answered with `Text`.
	GetMetaText {
		/// Document to query.
		document: Reference,
		/// Info dictionary key such as `Title` or `ModDate`.
		tag: String,
	},
	/// Loads a page explicitly, answered with `Page`.
	LoadPage {
		/// Owning document.
		document: Reference,
		/// Zero-based page index.
		index: u32,
	},
	/// Closes a page and everything obtained from it.
	ClosePage {
		/// Page to close.
		page: Reference,
	},
	/// Answered with `PageSize`.
	GetPageSize {
		/// Page to query.
		page: PageSelector,
	},
	/// Answered with `PageRotation`.
	GetPageRotation {
		/// Page to query.
		page: PageSelector,
	},
	/// Creates a render target, answered with `Bitmap`.
	CreateBitmap {
		/// Width in pixels.
		width: u32,
		/// Height in pixels.
		height: u32,
		/// Whether the bitmap carries an alpha channel.
		alpha: bool,
	},
	/// Destroys a bitmap.
	DestroyBitmap {
		/// Bitmap to destroy.
		bitmap: Reference,
	},
	/// Copies the pixels out of a bitmap, answered with `BitmapBuffer`.
	GetBitmapBuffer {
		/// Bitmap to read.
		bitmap: Reference,
	},
	/// Renders a page in one step.
	RenderPageBitmap {
		/// Target bitmap.
		bitmap: Reference,
		/// Page to render.
		page: PageSelector,
		/// Device area.
		area: RenderArea,
		/// Engine render flags.
		flags: u32,
	},
	/// Starts a progressive render, answered with `RenderStatus`.
	RenderPageBitmapStart {
		/// Target bitmap.
		bitmap: Reference,
		/// Page to render.
		page: PageSelector,
		/// Device area.
		area: RenderArea,
		/// Engine render flags.
		flags: u32,
		/// Whether the caller registered a pause predicate for this call.
		pause: bool,
	},
	/// Continues a progressive render, answered with `RenderStatus`.
	RenderPageContinue {
		/// Page being rendered.
		page: PageSelector,
		/// Whether the caller registered a pause predicate for this call.
		pause: bool,
	},
	/// Releases a progressive render.
	RenderPageClose {
		/// Page being rendered.
		page: PageSelector,
	},
	/// Copies pages between documents.
	ImportPages {
		/// Receiving document.
		destination: Reference,
		/// Donor document.
		source: Reference,
		/// One-based page range such as `"1,3-5"`; all pages when absent.
		page_range: Option<String>,
		/// Insertion index in the destination.
		index: u32,
	},
	/// Applies a transform and clip to every object of a page.
	TransformWithClip {
		/// Page to transform.
		page: PageSelector,
		/// Transform to apply.
		matrix: Option<Matrix>,
		/// Clip rectangle.
		clip: Option<RectF>,
	},
	/// Serializes a document, answered with `Saved`.
	SaveAsCopy {
		/// Document to save.
		document: Reference,
		/// Engine save flags.
		flags: u32,
		/// File version to write; the document's own version when absent.
		version: Option<i32>,
		/// Output target.
		target: SaveTarget,
		/// Maximum permitted size of the output in bytes.
		max_size: Option<u64>,
	},
	/// Answered with `Bookmark`.
	GetFirstBookmark {
		/// Owning document.
		document: Reference,
		/// Parent bookmark; top level when absent.
		parent: Option<Reference>,
	},
	/// Answered with `Bookmark`.
	GetNextBookmark {
		/// Owning document.
		document: Reference,
		/// Current bookmark.
		bookmark: Reference,
	},
	/// Answered with `Text`.
	GetBookmarkTitle {
		/// Bookmark to query.
		bookmark: Reference,
	},
	/// Answered with `Action`.
	GetBookmarkAction {
		/// Bookmark to query.
		bookmark: Reference,
	},
	/// Answered with `ActionType`.
	GetActionType {
		/// Action to query.
		action: Reference,
	},
	/// Answered with `Text`.
	GetActionUriPath {
		/// Owning document.
		document: Reference,
		/// Action to query.
		action: Reference,
	},
	/// Answered with `Dest`.
	GetActionDest {
		/// Owning document.
		document: Reference,
		/// Action to query.
		action: Reference,
	},
	/// Answered with `PageIndex`.
	GetDestPageIndex {
		/// Owning document.
		document: Reference,
		/// Destination to query.
		dest: Reference,
	},
	/// Answered with `Count`.
	GetSignatureCount {
		/// Document to query.
		document: Reference,
	},
	/// Answered with `Signature`.
	GetSignatureObject {
		/// Owning document.
		document: Reference,
		/// Zero-based signature index.
		index: u32,
	},
	/// Answered with `Blob`.
	GetSignatureContents {
		/// Signature to query.
		signature: Reference,
	},
	/// Answered with `Text`.
	GetSignatureReason {
		/// Signature to query.
		signature: Reference,
	},
	/// Answered with `StructTree`.
	GetStructTree {
		/// Page to query.
		page: PageSelector,
	},
	/// Releases a structure tree and its elements.
	CloseStructTree {
		/// Tree to close.
		struct_tree: Reference,
	},
	/// Answered with `Count`.
	CountStructChildren {
		/// Tree to query.
		struct_tree: Reference,
	},
	/// Answered with `StructElement`.
	GetStructChild {
		/// Tree to query.
		struct_tree: Reference,
		/// Zero-based child index.
		index: u32,
	},
	/// Answered with `Text`.
	GetStructElementType {
		/// Element to query.
		struct_element: Reference,
	},
	/// Answered with `StructElementAttribute`.
	GetStructElementAttribute {
		/// Element to query.
		struct_element: Reference,
		/// Zero-based attribute object index.
		index: u32,
	},
	/// Answered with `Text`.
	GetStructAttributeValue {
		/// Attribute object to query.
		attribute: Reference,
		/// Attribute key.
		name: String,
	},
	/// Creates a form-fill environment, answered with `FormHandle`.
	InitFormFillEnvironment {
		/// Document to attach to.
		document: Reference,
		/// Callback slots the caller registered.
		callbacks: CallbackSlots,
	},
	/// Tears a form-fill environment down.
	ExitFormFillEnvironment {
		/// Environment to exit.
		form_handle: Reference,
	},
	/// Notifies the environment that a page was loaded.
	FormOnAfterLoadPage {
		/// Environment.
		form_handle: Reference,
		/// Loaded page.
		page: PageSelector,
	},
	/// Left mouse button press, answered with `Handled`.
	FormOnLButtonDown {
		/// Environment.
		form_handle: Reference,
		/// Target page.
		page: PageSelector,
		/// Modifier key state.
		modifier: i32,
		/// Horizontal position in page space.
		x: f64,
		/// Vertical position in page space.
		y: f64,
	},
	/// Character input, answered with `Handled`.
	FormOnChar {
		/// Environment.
		form_handle: Reference,
		/// Target page.
		page: PageSelector,
		/// Unicode scalar value.
		character: u32,
		/// Modifier key state.
		modifier: i32,
	},
	/// Answered with `Text`.
	FormGetFocusedText {
		/// Environment.
		form_handle: Reference,
		/// Page holding the focus.
		page: PageSelector,
	},
	/// Replaces the selected text of the focused field.
	FormReplaceSelection {
		/// Environment.
		form_handle: Reference,
		/// Page holding the focus.
		page: PageSelector,
		/// Replacement text.
		text: String,
	},
	/// Answered with `FocusedAnnotation`.
	FormGetFocusedAnnot {
		/// Environment.
		form_handle: Reference,
	},
	/// Drops the focus, answered with `Handled`.
	FormForceToKillFocus {
		/// Environment.
		form_handle: Reference,
	},
	/// Runs the document's open action.
	FormDoDocumentOpenAction {
		/// Environment.
		form_handle: Reference,
	},
	/// Delivers a timer tick to the engine.
	FormFireTimer {
		/// Environment.
		form_handle: Reference,
		/// Timer returned by the caller's set-timer hook.
		timer_id: i32,
	},
}

impl Request {
	/// Operation name used in logs and errors.
	pub fn name(&self) -> &'static str {
		self.into()
	}

	/// Every reference carried by this request, in field order.
	pub fn references(&self) -> Vec<Reference> {
		use Request::*;

		match self {
			Ping | OpenDocument { .. } | CreateBitmap { .. } => Vec::new(),
			CloseDocument { document }
			| GetPageCount { document }
			| GetFileVersion { document }
			| GetDocPermissions { document }
			| GetSecurityHandlerRevision { document }
			| GetMetaText { document, .. }
			| LoadPage { document, .. }
			| SaveAsCopy { document, .. }
			| GetSignatureCount { document }
			| GetSignatureObject { document, .. }
			| InitFormFillEnvironment { document, .. } => vec![*document],
			ClosePage { page } => vec![*page],
			GetPageSize { page }
			| GetPageRotation { page }
			| RenderPageContinue { page, .. }
			| RenderPageClose { page }
			| TransformWithClip { page, .. }
			| GetStructTree { page } => page.owner().into_iter().collect(),
			DestroyBitmap { bitmap } | GetBitmapBuffer { bitmap } => vec![*bitmap],
			RenderPageBitmap { bitmap, page, .. } | RenderPageBitmapStart { bitmap, page, .. } => {
				std::iter::once(*bitmap).chain(page.owner()).collect()
			}
			ImportPages { destination, source, .. } => vec![*destination, *source],
			GetFirstBookmark { document, parent } => std::iter::once(*document).chain(*parent).collect(),
			GetNextBookmark { document, bookmark } => vec![*document, *bookmark],
			GetBookmarkTitle { bookmark } | GetBookmarkAction { bookmark } => vec![*bookmark],
			GetActionType { action } => vec![*action],
			GetActionUriPath { document, action } | GetActionDest { document, action } => vec![*document, *action],
			GetDestPageIndex { document, dest } => vec![*document, *dest],
			GetSignatureContents { signature } | GetSignatureReason { signature } => vec![*signature],
			CloseStructTree { struct_tree } | CountStructChildren { struct_tree } | GetStructChild { struct_tree, .. } => {
				vec![*struct_tree]
			}
			GetStructElementType { struct_element } | GetStructElementAttribute { struct_element, .. } => vec![*struct_element],
			GetStructAttributeValue { attribute, .. } => vec![*attribute],
			ExitFormFillEnvironment { form_handle }
			| FormGetFocusedAnnot { form_handle }
			| FormForceToKillFocus { form_handle }
			| FormDoDocumentOpenAction { form_handle }
			| FormFireTimer { form_handle, .. } => vec![*form_handle],
			FormOnAfterLoadPage { form_handle, page }
			| FormOnLButtonDown { form_handle, page, .. }
			| FormOnChar { form_handle, page, .. }
			| FormGetFocusedText { form_handle, page }
			| FormReplaceSelection { form_handle, page, .. } => std::iter::once(*form_handle).chain(page.owner()).collect(),
		}
	}

	/// Returns true if serving this request needs a reverse callback channel to the caller.
	pub fn registers_callbacks(&self) -> bool {
		match self {
			Request::InitFormFillEnvironment { callbacks, .. } => !callbacks.is_empty(),
			Request::RenderPageBitmapStart { pause, .. } | Request::RenderPageContinue { pause, .. } => *pause,
			_ => false,
		}
	}
}
