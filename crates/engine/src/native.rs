//! The native library boundary.
//!
//! [`PdfEngine`] is the narrow, pointer-shaped surface of a single-threaded PDF
//! library. Implementations are not reentrant and are driven by exactly one
//! [`Executor`](crate::Executor) at a time. Handles returned here never leave the
//! engine host; the executor maps them to [`Reference`](pdfhost_proto::Reference)s.

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use pdfhost_proto::{ActionType, BitmapInfo, LoadError, LocalTime, Matrix, PageSize, RectF, RenderArea, RenderStatus};

/// Raw engine handle, the equivalent of a native pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

/// Document data handed to [`PdfEngine::load_document`].
#[derive(Debug, Clone, Copy)]
pub enum DocumentData<'a> {
	/// In-memory file contents.
	Bytes(&'a [u8]),
	/// A file the engine opens itself.
	Path(&'a Path),
}

/// Replacement clock for the engine, in seconds since the Unix epoch.
pub type TimeSource = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Receives the feature code of every unsupported object the engine meets.
pub type UnsupportedHandler = Arc<dyn Fn(i32) + Send + Sync>;

/// Process-wide engine state.
///
/// The native library keeps these in statics, so they cannot be scoped to one
/// instance when several instances share a process.
#[derive(Clone, Default)]
pub struct GlobalHooks {
	/// Clock override.
	pub time: Option<TimeSource>,
	/// Unsupported-feature handler.
	pub unsupported: Option<UnsupportedHandler>,
}

impl GlobalHooks {
	/// No overrides installed.
	pub const fn none() -> Self {
		Self {
			time: None,
			unsupported: None,
		}
	}
}

impl fmt::Debug for GlobalHooks {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("GlobalHooks")
			.field("time", &self.time.is_some())
			.field("unsupported", &self.unsupported.is_some())
			.finish()
	}
}

/// Hooks a form-fill environment calls back into while an engine call runs.
///
/// Every method has the native default, so implementations only override what the
/// caller registered.
pub trait FormHooks {
	/// A page area needs repainting.
	fn invalidate(&mut self, _page: Handle, _rect: RectF) {}

	/// A selection rectangle is being drawn.
	fn output_selected_rect(&mut self, _page: Handle, _rect: RectF) {}

	/// The cursor shape should change.
	fn set_cursor(&mut self, _cursor: i32) {}

	/// Creates a periodic timer, returning its id or 0.
	fn set_timer(&mut self, _elapse_ms: u32) -> i32 {
		0
	}

	/// Removes a timer.
	fn kill_timer(&mut self, _timer_id: i32) {}

	/// Local time, or `None` to let the engine use its own clock.
	fn local_time(&mut self) -> Option<LocalTime> {
		None
	}

	/// Form content changed.
	fn on_change(&mut self) {}

	/// Focus moved to `annotation` on `page_index`, or was dropped.
	fn on_focus_change(&mut self, _annotation: Option<Handle>, _page_index: i32) {}

	/// Open a URI.
	fn do_uri_action(&mut self, _uri: &str) {}

	/// Navigate inside the document.
	fn do_goto_action(&mut self, _page_index: i32, _zoom_mode: i32, _position: &[f32]) {}

	/// Run a named action.
	fn do_named_action(&mut self, _name: &str) {}
}

/// Hooks that accept every native default.
pub struct NoHooks;

impl FormHooks for NoHooks {}

/// A single-threaded native PDF library.
pub trait PdfEngine: Send {
	/// Engine name for diagnostics.
	fn name(&self) -> &str;

	/// Installs or removes the clock override.
	fn set_time_source(&mut self, source: Option<TimeSource>);

	/// Installs or removes the unsupported-feature handler.
	fn set_unsupported_handler(&mut self, handler: Option<UnsupportedHandler>);

	/// Opens a document.
	fn load_document(&mut self, data: DocumentData<'_>, password: Option<&str>) -> Result<Handle, LoadError>;
	/// Closes a document. Pages and environments are already closed.
	fn close_document(&mut self, document: Handle);
	/// Number of pages.
	fn page_count(&mut self, document: Handle) -> u32;
	/// File version such as 17 for 1.7.
	fn file_version(&mut self, document: Handle) -> Option<i32>;
	/// Raw permission word, `0xFFFFFFFF` when unprotected.
	fn permissions(&mut self, document: Handle) -> u32;
	/// Security handler revision, -1 when unprotected.
	fn security_handler_revision(&mut self, document: Handle) -> i32;
	/// Info dictionary value.
	fn meta_text(&mut self, document: Handle, tag: &str) -> Option<String>;
	/// Serializes the document into `out`; false on failure.
	fn save(&mut self, document: Handle, flags: u32, version: Option<i32>, out: &mut dyn Write) -> bool;
	/// Copies pages of `source` into `destination`; false on failure.
	fn import_pages(&mut self, destination: Handle, source: Handle, range: Option<&str>, index: u32) -> bool;

	/// Loads a page.
	fn load_page(&mut self, document: Handle, index: u32) -> Option<Handle>;
	/// Closes a page. Any progressive render is already closed.
	fn close_page(&mut self, page: Handle);
	/// Page dimensions.
	fn page_size(&mut self, page: Handle) -> PageSize;
	/// Page rotation in quarter turns.
	fn page_rotation(&mut self, page: Handle) -> i32;
	/// Applies a transform and clip; false on failure.
	fn transform_with_clip(&mut self, page: Handle, matrix: Option<&Matrix>, clip: Option<&RectF>) -> bool;

	/// Allocates a bitmap.
	fn create_bitmap(&mut self, width: u32, height: u32, alpha: bool) -> Option<Handle>;
	/// Frees a bitmap.
	fn destroy_bitmap(&mut self, bitmap: Handle);
	/// Bitmap layout.
	fn bitmap_info(&mut self, bitmap: Handle) -> BitmapInfo;
	/// Copy of the bitmap pixels.
	fn bitmap_buffer(&mut self, bitmap: Handle) -> Vec<u8>;
	/// Renders a page in one step.
	fn render_page(&mut self, bitmap: Handle, page: Handle, area: &RenderArea, flags: u32);
	/// Starts a progressive render, polling `pause` between steps.
	fn render_start(
		&mut self,
		bitmap: Handle,
		page: Handle,
		area: &RenderArea,
		flags: u32,
		pause: &mut dyn FnMut() -> bool,
	) -> RenderStatus;
	/// Continues a progressive render.
	fn render_continue(&mut self, page: Handle, pause: &mut dyn FnMut() -> bool) -> RenderStatus;
	/// Releases progressive render state.
	fn render_close(&mut self, page: Handle);

	/// First child of `parent`, or the first top level entry.
	fn first_bookmark(&mut self, document: Handle, parent: Option<Handle>) -> Option<Handle>;
	/// Next sibling.
	fn next_bookmark(&mut self, document: Handle, bookmark: Handle) -> Option<Handle>;
	/// Bookmark title.
	fn bookmark_title(&mut self, bookmark: Handle) -> String;
	/// Bookmark action.
	fn bookmark_action(&mut self, bookmark: Handle) -> Option<Handle>;
	/// Action kind.
	fn action_type(&mut self, action: Handle) -> ActionType;
	/// URI of a URI action.
	fn action_uri_path(&mut self, document: Handle, action: Handle) -> Option<String>;
	/// Destination of a GoTo action.
	fn action_dest(&mut self, document: Handle, action: Handle) -> Option<Handle>;
	/// Page index of a destination.
	fn dest_page_index(&mut self, document: Handle, dest: Handle) -> Option<u32>;

	/// Number of signatures.
	fn signature_count(&mut self, document: Handle) -> u32;
	/// Signature at `index`.
	fn signature(&mut self, document: Handle, index: u32) -> Option<Handle>;
	/// Raw signature contents.
	fn signature_contents(&mut self, signature: Handle) -> Vec<u8>;
	/// Signing reason.
	fn signature_reason(&mut self, signature: Handle) -> Option<String>;

	/// Structure tree of a page.
	fn struct_tree(&mut self, page: Handle) -> Option<Handle>;
	/// Releases a structure tree.
	fn close_struct_tree(&mut self, tree: Handle);
	/// Number of top level elements.
	fn struct_child_count(&mut self, tree: Handle) -> u32;
	/// Top level element at `index`.
	fn struct_child(&mut self, tree: Handle, index: u32) -> Option<Handle>;
	/// Element type such as `P` or `Figure`.
	fn struct_element_type(&mut self, element: Handle) -> Option<String>;
	/// Attribute object at `index`.
	fn struct_element_attribute(&mut self, element: Handle, index: u32) -> Option<Handle>;
	/// Value of `name` in an attribute object.
	fn struct_attribute_value(&mut self, attribute: Handle, name: &str) -> Option<String>;

	/// Creates a form-fill environment.
	fn init_form_fill(&mut self, document: Handle) -> Option<Handle>;
	/// Tears a form-fill environment down.
	fn exit_form_fill(&mut self, form: Handle);
	/// A page was loaded under the environment.
	fn form_after_load_page(&mut self, form: Handle, page: Handle, hooks: &mut dyn FormHooks);
	/// Left mouse button press.
	fn form_lbutton_down(&mut self, form: Handle, page: Handle, modifier: i32, x: f64, y: f64, hooks: &mut dyn FormHooks)
	-> bool;
	/// Character input.
	fn form_char(&mut self, form: Handle, page: Handle, character: u32, modifier: i32, hooks: &mut dyn FormHooks) -> bool;
	/// Text of the focused field.
	fn form_focused_text(&mut self, form: Handle, page: Handle) -> String;
	/// Replaces the selection of the focused field.
	fn form_replace_selection(&mut self, form: Handle, page: Handle, text: &str, hooks: &mut dyn FormHooks);
	/// Focused annotation and its page index.
	fn form_focused_annot(&mut self, form: Handle) -> Option<(u32, Handle)>;
	/// Drops the focus.
	fn form_kill_focus(&mut self, form: Handle, hooks: &mut dyn FormHooks) -> bool;
	/// Runs the document open action.
	fn form_document_open_action(&mut self, form: Handle, hooks: &mut dyn FormHooks);
	/// Delivers a timer tick.
	fn form_fire_timer(&mut self, form: Handle, timer_id: i32, hooks: &mut dyn FormHooks);
}

/// Creates engines for new instances.
pub trait EngineFactory: Send + Sync + 'static {
	/// The engine type produced.
	type Engine: PdfEngine + 'static;

	/// Creates a fresh engine.
	fn create(&self) -> Self::Engine;
}

impl<F, E> EngineFactory for F
where
	F: Fn() -> E + Send + Sync + 'static,
	E: PdfEngine + 'static,
{
	type Engine = E;

	fn create(&self) -> E {
		self()
	}
}
