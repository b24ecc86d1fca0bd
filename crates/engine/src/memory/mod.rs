//! A reference engine over in-memory fixture documents.
//!
//! [`MemoryEngine`] implements the whole [`PdfEngine`] surface with the native
//! library's observable behavior: password checks, permission words, progressive
//! rendering in steps, form focus and timers. Pages can carry injected faults so
//! hosts can be tested against panics, aborts and hangs.

mod fixture;

use std::collections::BTreeMap;
use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pdfhost_proto::{ActionType, BitmapInfo, LoadError, LocalTime, Matrix, PageSize, RectF, RenderArea, RenderStatus};
use rustc_hash::FxHashMap;

pub use self::fixture::{
	FIXTURE_MAGIC, Fault, FixtureAction, FixtureBookmark, FixtureDocument, FixtureField, FixturePage, FixtureSecurity,
	FixtureSignature, FixtureStructElement,
};
use crate::native::{DocumentData, FormHooks, Handle, PdfEngine, TimeSource, UnsupportedHandler};

/// Permission word granted to owners.
pub const OWNER_PERMISSIONS: u32 = 0xFFFF_FFFC;

const UNPROTECTED_PERMISSIONS: u32 = 0xFFFF_FFFF;
const TEXT_CURSOR: i32 = 1;

/// Engine over [`FixtureDocument`]s.
#[derive(Default)]
pub struct MemoryEngine {
	next: u64,
	objects: FxHashMap<Handle, Object>,
	interned: FxHashMap<(Handle, String), Handle>,
	time: Option<TimeSource>,
	unsupported: Option<UnsupportedHandler>,
}

enum Object {
	Document(DocumentState),
	Page(PageState),
	Bitmap(BitmapState),
	Bookmark(Vec<usize>),
	Action(FixtureAction),
	Dest(u32),
	Signature(FixtureSignature),
	StructTree(Vec<FixtureStructElement>),
	StructElement(FixtureStructElement),
	Attribute(BTreeMap<String, String>),
	Form(FormState),
	Annotation,
}

struct DocumentState {
	fixture: FixtureDocument,
	permissions: u32,
	revision: i32,
}

struct PageState {
	index: u32,
	page: FixturePage,
	render: Option<Progress>,
	transforms: u32,
}

struct Progress {
	bitmap: Handle,
	remaining: u32,
}

struct BitmapState {
	width: u32,
	height: u32,
	data: Vec<u8>,
}

struct FormState {
	document: Handle,
	focus: Option<(u32, usize)>,
	values: FxHashMap<(u32, usize), String>,
	timers: Vec<i32>,
	ticks: u32,
}

impl MemoryEngine {
	/// An engine with no documents open.
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of live native objects, for leak checks.
	pub fn live_objects(&self) -> usize {
		self.objects.len()
	}

	/// Timer ticks delivered to a form-fill environment.
	pub fn timer_ticks(&self, form: Handle) -> u32 {
		match self.objects.get(&form) {
			Some(Object::Form(state)) => state.ticks,
			_ => 0,
		}
	}

	fn insert(&mut self, object: Object) -> Handle {
		self.next += 1;
		let handle = Handle(self.next);
		self.objects.insert(handle, object);
		handle
	}

	/// Returns the handle interned under `parent` for `key`, creating it once.
	fn intern(&mut self, parent: Handle, key: String, make: impl FnOnce() -> Object) -> Handle {
		if let Some(handle) = self.interned.get(&(parent, key.clone())) {
			if self.objects.contains_key(handle) {
				return *handle;
			}
		}
		let handle = self.insert(make());
		self.interned.insert((parent, key), handle);
		handle
	}

	/// Removes `handle` and everything interned under it.
	fn remove(&mut self, handle: Handle) {
		self.objects.remove(&handle);
		let children: Vec<_> = self
			.interned
			.iter()
			.filter(|((parent, _), _)| *parent == handle)
			.map(|(key, child)| (key.clone(), *child))
			.collect();
		for (key, child) in children {
			self.interned.remove(&key);
			self.remove(child);
		}
	}

	fn document(&self, handle: Handle) -> Option<&DocumentState> {
		match self.objects.get(&handle) {
			Some(Object::Document(state)) => Some(state),
			_ => None,
		}
	}

	fn document_mut(&mut self, handle: Handle) -> Option<&mut DocumentState> {
		match self.objects.get_mut(&handle) {
			Some(Object::Document(state)) => Some(state),
			_ => None,
		}
	}

	fn page(&self, handle: Handle) -> Option<&PageState> {
		match self.objects.get(&handle) {
			Some(Object::Page(state)) => Some(state),
			_ => None,
		}
	}

	fn page_mut(&mut self, handle: Handle) -> Option<&mut PageState> {
		match self.objects.get_mut(&handle) {
			Some(Object::Page(state)) => Some(state),
			_ => None,
		}
	}

	fn form_mut(&mut self, handle: Handle) -> Option<&mut FormState> {
		match self.objects.get_mut(&handle) {
			Some(Object::Form(state)) => Some(state),
			_ => None,
		}
	}

	fn bookmark_at(&self, document: Handle, path: &[usize]) -> Option<&FixtureBookmark> {
		let (first, rest) = path.split_first()?;
		let mut bookmark = self.document(document)?.fixture.bookmarks.get(*first)?;
		for index in rest {
			bookmark = bookmark.children.get(*index)?;
		}
		Some(bookmark)
	}

	fn bookmark_handle(&mut self, document: Handle, path: Vec<usize>) -> Option<Handle> {
		self.bookmark_at(document, &path)?;
		let key = format!("bookmark:{path:?}");
		Some(self.intern(document, key, || Object::Bookmark(path)))
	}

	fn now(&self) -> i64 {
		match &self.time {
			Some(source) => source(),
			None => SystemTime::now()
				.duration_since(UNIX_EPOCH)
				.map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)),
		}
	}

	fn paint(&mut self, bitmap: Handle, page: Handle) {
		let Some(state) = self.page(page) else {
			return;
		};
		let ink = [
			u8::try_from(state.index % 256).unwrap_or(0),
			u8::try_from(state.rotation_quarters()).unwrap_or(0),
			0x80,
			0xFF,
		];
		if let Some(Object::Bitmap(bitmap)) = self.objects.get_mut(&bitmap) {
			for pixel in bitmap.data.chunks_exact_mut(4) {
				pixel.copy_from_slice(&ink);
			}
		}
	}

	/// Runs render steps until done or paused.
	fn advance(&mut self, page: Handle, pause: &mut dyn FnMut() -> bool) -> RenderStatus {
		loop {
			let Some(progress) = self.page_mut(page).and_then(|state| state.render.as_mut()) else {
				return RenderStatus::Failed;
			};
			if progress.remaining == 0 {
				return RenderStatus::Done;
			}
			progress.remaining -= 1;
			if progress.remaining == 0 {
				let bitmap = progress.bitmap;
				self.paint(bitmap, page);
				return RenderStatus::Done;
			}
			if pause() {
				return RenderStatus::ToBeContinued;
			}
		}
	}

	fn trip(&self, page: Handle) {
		let Some(fault) = self.page(page).and_then(|state| state.page.fault) else {
			return;
		};
		tracing::warn!(?fault, "memory.fault_injected");
		match fault {
			Fault::Panic => panic!("injected engine fault"),
			Fault::Abort => std::process::abort(),
			Fault::Hang { millis } => std::thread::sleep(Duration::from_millis(millis)),
		}
	}

	fn field_at(&self, page: Handle, x: f64, y: f64) -> Option<(u32, usize, RectF)> {
		let state = self.page(page)?;
		state
			.page
			.fields
			.iter()
			.position(|field| field.rect.contains(x, y))
			.map(|field| (state.index, field, state.page.fields[field].rect))
	}

	fn field_value(&self, form: &FormState, page_index: u32, field: usize) -> String {
		if let Some(value) = form.values.get(&(page_index, field)) {
			return value.clone();
		}
		self.document(form.document)
			.and_then(|document| document.fixture.pages.get(page_index as usize))
			.and_then(|page| page.fields.get(field))
			.map(|field| field.value.clone())
			.unwrap_or_default()
	}

	/// Focus of `form` if it lies on `page`.
	fn focus_on(&self, form: Handle, page: Handle) -> Option<(u32, usize)> {
		let Some(Object::Form(state)) = self.objects.get(&form) else {
			return None;
		};
		let index = self.page(page)?.index;
		state.focus.filter(|(page_index, _)| *page_index == index)
	}

	fn field_rect(&self, page: Handle, field: usize) -> RectF {
		self.page(page)
			.and_then(|state| state.page.fields.get(field))
			.map(|field| field.rect)
			.unwrap_or_default()
	}

	fn annotation(&mut self, form: Handle, page_index: u32, field: usize) -> Handle {
		self.intern(form, format!("annotation:{page_index}:{field}"), || Object::Annotation)
	}
}

impl PageState {
	fn rotation_quarters(&self) -> i32 {
		self.page.rotation.rem_euclid(4)
	}
}

/// Parses a one-based page range such as `1,3-5` into zero-based indices.
fn parse_range(range: &str, count: u32) -> Option<Vec<u32>> {
	let mut pages = Vec::new();
	for part in range.split(',').map(str::trim) {
		let (start, end) = match part.split_once('-') {
			Some((start, end)) => (start.trim().parse::<u32>().ok()?, end.trim().parse::<u32>().ok()?),
			None => {
				let page = part.parse::<u32>().ok()?;
				(page, page)
			}
		};
		if start == 0 || start > end || end > count {
			return None;
		}
		pages.extend(start - 1..end);
	}
	(!pages.is_empty()).then_some(pages)
}

/// Converts Unix seconds to a UTC calendar time.
fn calendar(seconds: i64) -> LocalTime {
	let days = seconds.div_euclid(86_400);
	let of_day = seconds.rem_euclid(86_400);

	// Civil-from-days over 400 year eras.
	let z = days + 719_468;
	let era = z.div_euclid(146_097);
	let doe = z.rem_euclid(146_097);
	let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
	let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
	let mp = (5 * doy + 2) / 153;
	let day = doy - (153 * mp + 2) / 5 + 1;
	let month = if mp < 10 { mp + 3 } else { mp - 9 };
	let year = yoe + era * 400 + i64::from(month <= 2);
	let day_of_week = (days + 4).rem_euclid(7);

	let narrow = |value: i64| u16::try_from(value).unwrap_or(0);
	LocalTime {
		year: narrow(year),
		month: narrow(month),
		day_of_week: narrow(day_of_week),
		day: narrow(day),
		hour: narrow(of_day / 3_600),
		minute: narrow(of_day % 3_600 / 60),
		second: narrow(of_day % 60),
		milliseconds: 0,
	}
}

impl PdfEngine for MemoryEngine {
	fn name(&self) -> &str {
		"memory"
	}

	fn set_time_source(&mut self, source: Option<TimeSource>) {
		self.time = source;
	}

	fn set_unsupported_handler(&mut self, handler: Option<UnsupportedHandler>) {
		self.unsupported = handler;
	}

	fn load_document(&mut self, data: DocumentData<'_>, password: Option<&str>) -> Result<Handle, LoadError> {
		let fixture = match data {
			DocumentData::Bytes(bytes) => FixtureDocument::from_bytes(bytes)?,
			DocumentData::Path(path) => {
				let bytes = std::fs::read(path).map_err(|error| {
					tracing::debug!(path = %path.display(), %error, "memory.read_failed");
					LoadError::File
				})?;
				FixtureDocument::from_bytes(&bytes)?
			}
		};

		let (permissions, revision) = match &fixture.security {
			None => (UNPROTECTED_PERMISSIONS, -1),
			Some(security) => {
				let password = password.filter(|password| !password.is_empty());
				if password.is_some() && password == security.owner_password.as_deref() {
					(OWNER_PERMISSIONS, security.revision)
				} else if password == security.user_password.as_deref() {
					(security.permissions, security.revision)
				} else {
					return Err(LoadError::Password);
				}
			}
		};

		if let Some(handler) = &self.unsupported {
			for feature in &fixture.unsupported_features {
				handler(*feature);
			}
		}

		Ok(self.insert(Object::Document(DocumentState {
			fixture,
			permissions,
			revision,
		})))
	}

	fn close_document(&mut self, document: Handle) {
		self.remove(document);
	}

	fn page_count(&mut self, document: Handle) -> u32 {
		self.document(document)
			.map_or(0, |state| u32::try_from(state.fixture.pages.len()).unwrap_or(u32::MAX))
	}

	fn file_version(&mut self, document: Handle) -> Option<i32> {
		self.document(document)?.fixture.version
	}

	fn permissions(&mut self, document: Handle) -> u32 {
		self.document(document).map_or(0, |state| state.permissions)
	}

	fn security_handler_revision(&mut self, document: Handle) -> i32 {
		self.document(document).map_or(-1, |state| state.revision)
	}

	fn meta_text(&mut self, document: Handle, tag: &str) -> Option<String> {
		self.document(document)?.fixture.metadata.get(tag).cloned()
	}

	fn save(&mut self, document: Handle, _flags: u32, version: Option<i32>, out: &mut dyn Write) -> bool {
		let stamp = self.now();
		let Some(state) = self.document_mut(document) else {
			return false;
		};
		if state.fixture.save_fails {
			return false;
		}
		let mut fixture = state.fixture.clone();
		if version.is_some() {
			fixture.version = version;
		}
		fixture.metadata.insert("ModDate".to_owned(), format!("D:{stamp}"));
		out.write_all(&fixture.to_bytes()).is_ok()
	}

	fn import_pages(&mut self, destination: Handle, source: Handle, range: Option<&str>, index: u32) -> bool {
		let Some(source) = self.document(source) else {
			return false;
		};
		let count = u32::try_from(source.fixture.pages.len()).unwrap_or(u32::MAX);
		let selected = match range {
			Some(range) => match parse_range(range, count) {
				Some(selected) => selected,
				None => return false,
			},
			None => (0..count).collect(),
		};
		let pages: Vec<_> = selected
			.iter()
			.filter_map(|page| source.fixture.pages.get(*page as usize).cloned())
			.collect();
		let Some(destination) = self.document_mut(destination) else {
			return false;
		};
		let index = index as usize;
		if index > destination.fixture.pages.len() {
			return false;
		}
		destination.fixture.pages.splice(index..index, pages);
		true
	}

	fn load_page(&mut self, document: Handle, index: u32) -> Option<Handle> {
		let page = self.document(document)?.fixture.pages.get(index as usize)?.clone();
		Some(self.insert(Object::Page(PageState {
			index,
			page,
			render: None,
			transforms: 0,
		})))
	}

	fn close_page(&mut self, page: Handle) {
		self.remove(page);
	}

	fn page_size(&mut self, page: Handle) -> PageSize {
		self.page(page).map_or(PageSize { width: 0.0, height: 0.0 }, |state| PageSize {
			width: state.page.width,
			height: state.page.height,
		})
	}

	fn page_rotation(&mut self, page: Handle) -> i32 {
		self.page(page).map_or(0, PageState::rotation_quarters)
	}

	fn transform_with_clip(&mut self, page: Handle, matrix: Option<&Matrix>, clip: Option<&RectF>) -> bool {
		if matrix.is_none() && clip.is_none() {
			return false;
		}
		match self.page_mut(page) {
			Some(state) => {
				state.transforms += 1;
				true
			}
			None => false,
		}
	}

	fn create_bitmap(&mut self, width: u32, height: u32, _alpha: bool) -> Option<Handle> {
		if width == 0 || height == 0 {
			return None;
		}
		let len = (width as usize).checked_mul(height as usize)?.checked_mul(4)?;
		Some(self.insert(Object::Bitmap(BitmapState {
			width,
			height,
			data: vec![0xFF; len],
		})))
	}

	fn destroy_bitmap(&mut self, bitmap: Handle) {
		self.remove(bitmap);
	}

	fn bitmap_info(&mut self, bitmap: Handle) -> BitmapInfo {
		match self.objects.get(&bitmap) {
			Some(Object::Bitmap(state)) => BitmapInfo {
				width: state.width,
				height: state.height,
				stride: state.width * 4,
			},
			_ => BitmapInfo {
				width: 0,
				height: 0,
				stride: 0,
			},
		}
	}

	fn bitmap_buffer(&mut self, bitmap: Handle) -> Vec<u8> {
		match self.objects.get(&bitmap) {
			Some(Object::Bitmap(state)) => state.data.clone(),
			_ => Vec::new(),
		}
	}

	fn render_page(&mut self, bitmap: Handle, page: Handle, _area: &RenderArea, _flags: u32) {
		self.trip(page);
		self.paint(bitmap, page);
	}

	fn render_start(
		&mut self,
		bitmap: Handle,
		page: Handle,
		_area: &RenderArea,
		_flags: u32,
		pause: &mut dyn FnMut() -> bool,
	) -> RenderStatus {
		self.trip(page);
		let Some(state) = self.page_mut(page) else {
			return RenderStatus::Failed;
		};
		state.render = Some(Progress {
			bitmap,
			remaining: state.page.render_steps.max(1),
		});
		self.advance(page, pause)
	}

	fn render_continue(&mut self, page: Handle, pause: &mut dyn FnMut() -> bool) -> RenderStatus {
		self.advance(page, pause)
	}

	fn render_close(&mut self, page: Handle) {
		if let Some(state) = self.page_mut(page) {
			state.render = None;
		}
	}

	fn first_bookmark(&mut self, document: Handle, parent: Option<Handle>) -> Option<Handle> {
		let mut path = match parent {
			Some(parent) => match self.objects.get(&parent) {
				Some(Object::Bookmark(path)) => path.clone(),
				_ => return None,
			},
			None => Vec::new(),
		};
		path.push(0);
		self.bookmark_handle(document, path)
	}

	fn next_bookmark(&mut self, document: Handle, bookmark: Handle) -> Option<Handle> {
		let Some(Object::Bookmark(path)) = self.objects.get(&bookmark) else {
			return None;
		};
		let mut path = path.clone();
		*path.last_mut()? += 1;
		self.bookmark_handle(document, path)
	}

	fn bookmark_title(&mut self, bookmark: Handle) -> String {
		let Some((document, path)) = self.interned.iter().find_map(|((parent, _), handle)| {
			match (self.objects.get(handle), *handle == bookmark) {
				(Some(Object::Bookmark(path)), true) => Some((*parent, path.clone())),
				_ => None,
			}
		}) else {
			return String::new();
		};
		self.bookmark_at(document, &path)
			.map(|bookmark| bookmark.title.clone())
			.unwrap_or_default()
	}

	fn bookmark_action(&mut self, bookmark: Handle) -> Option<Handle> {
		let (document, path) = self.interned.iter().find_map(|((parent, _), handle)| {
			match (self.objects.get(handle), *handle == bookmark) {
				(Some(Object::Bookmark(path)), true) => Some((*parent, path.clone())),
				_ => None,
			}
		})?;
		let action = self.bookmark_at(document, &path)?.action.clone()?;
		Some(self.intern(bookmark, "action".to_owned(), || Object::Action(action)))
	}

	fn action_type(&mut self, action: Handle) -> ActionType {
		match self.objects.get(&action) {
			Some(Object::Action(FixtureAction::GoTo { .. })) => ActionType::GoTo,
			Some(Object::Action(FixtureAction::RemoteGoTo(_))) => ActionType::RemoteGoTo,
			Some(Object::Action(FixtureAction::Uri(_))) => ActionType::Uri,
			Some(Object::Action(FixtureAction::Launch(_))) => ActionType::Launch,
			_ => ActionType::Unsupported,
		}
	}

	fn action_uri_path(&mut self, _document: Handle, action: Handle) -> Option<String> {
		match self.objects.get(&action) {
			Some(Object::Action(FixtureAction::Uri(uri))) => Some(uri.clone()),
			_ => None,
		}
	}

	fn action_dest(&mut self, _document: Handle, action: Handle) -> Option<Handle> {
		let Some(Object::Action(FixtureAction::GoTo { page })) = self.objects.get(&action) else {
			return None;
		};
		let page = *page;
		Some(self.intern(action, "dest".to_owned(), || Object::Dest(page)))
	}

	fn dest_page_index(&mut self, document: Handle, dest: Handle) -> Option<u32> {
		let Some(Object::Dest(page)) = self.objects.get(&dest) else {
			return None;
		};
		let page = *page;
		(page < self.page_count(document)).then_some(page)
	}

	fn signature_count(&mut self, document: Handle) -> u32 {
		self.document(document)
			.map_or(0, |state| u32::try_from(state.fixture.signatures.len()).unwrap_or(u32::MAX))
	}

	fn signature(&mut self, document: Handle, index: u32) -> Option<Handle> {
		let signature = self.document(document)?.fixture.signatures.get(index as usize)?.clone();
		Some(self.intern(document, format!("signature:{index}"), || Object::Signature(signature)))
	}

	fn signature_contents(&mut self, signature: Handle) -> Vec<u8> {
		match self.objects.get(&signature) {
			Some(Object::Signature(signature)) => signature.contents.clone(),
			_ => Vec::new(),
		}
	}

	fn signature_reason(&mut self, signature: Handle) -> Option<String> {
		match self.objects.get(&signature) {
			Some(Object::Signature(signature)) => signature.reason.clone(),
			_ => None,
		}
	}

	fn struct_tree(&mut self, page: Handle) -> Option<Handle> {
		let elements = self.page(page)?.page.structure.clone();
		Some(self.intern(page, "struct_tree".to_owned(), || Object::StructTree(elements)))
	}

	fn close_struct_tree(&mut self, tree: Handle) {
		self.interned.retain(|_, handle| *handle != tree);
		self.remove(tree);
	}

	fn struct_child_count(&mut self, tree: Handle) -> u32 {
		match self.objects.get(&tree) {
			Some(Object::StructTree(elements)) => u32::try_from(elements.len()).unwrap_or(u32::MAX),
			_ => 0,
		}
	}

	fn struct_child(&mut self, tree: Handle, index: u32) -> Option<Handle> {
		let Some(Object::StructTree(elements)) = self.objects.get(&tree) else {
			return None;
		};
		let element = elements.get(index as usize)?.clone();
		Some(self.intern(tree, format!("element:{index}"), || Object::StructElement(element)))
	}

	fn struct_element_type(&mut self, element: Handle) -> Option<String> {
		match self.objects.get(&element) {
			Some(Object::StructElement(element)) => Some(element.kind.clone()),
			_ => None,
		}
	}

	fn struct_element_attribute(&mut self, element: Handle, index: u32) -> Option<Handle> {
		let Some(Object::StructElement(state)) = self.objects.get(&element) else {
			return None;
		};
		let attribute = state.attributes.get(index as usize)?.clone();
		Some(self.intern(element, format!("attribute:{index}"), || Object::Attribute(attribute)))
	}

	fn struct_attribute_value(&mut self, attribute: Handle, name: &str) -> Option<String> {
		match self.objects.get(&attribute) {
			Some(Object::Attribute(values)) => values.get(name).cloned(),
			_ => None,
		}
	}

	fn init_form_fill(&mut self, document: Handle) -> Option<Handle> {
		self.document(document)?;
		Some(self.insert(Object::Form(FormState {
			document,
			focus: None,
			values: FxHashMap::default(),
			timers: Vec::new(),
			ticks: 0,
		})))
	}

	fn exit_form_fill(&mut self, form: Handle) {
		self.remove(form);
	}

	fn form_after_load_page(&mut self, _form: Handle, _page: Handle, _hooks: &mut dyn FormHooks) {}

	fn form_lbutton_down(&mut self, form: Handle, page: Handle, _modifier: i32, x: f64, y: f64, hooks: &mut dyn FormHooks) -> bool {
		let hit = self.field_at(page, x, y);
		let Some(state) = self.form_mut(form) else {
			return false;
		};
		match hit {
			Some((page_index, field, rect)) => {
				state.focus = Some((page_index, field));
				let annotation = self.annotation(form, page_index, field);
				hooks.on_focus_change(Some(annotation), i32::try_from(page_index).unwrap_or(-1));
				hooks.invalidate(page, rect);
				hooks.set_cursor(TEXT_CURSOR);
				true
			}
			None => {
				if state.focus.take().is_some() {
					hooks.on_focus_change(None, -1);
				}
				false
			}
		}
	}

	fn form_char(&mut self, form: Handle, page: Handle, character: u32, _modifier: i32, hooks: &mut dyn FormHooks) -> bool {
		let Some((page_index, field)) = self.focus_on(form, page) else {
			return false;
		};
		let Some(character) = char::from_u32(character) else {
			return false;
		};
		let Some(Object::Form(state)) = self.objects.get(&form) else {
			return false;
		};
		let mut value = self.field_value(state, page_index, field);
		value.push(character);
		if let Some(state) = self.form_mut(form) {
			state.values.insert((page_index, field), value);
		}
		hooks.on_change();
		hooks.invalidate(page, self.field_rect(page, field));
		true
	}

	fn form_focused_text(&mut self, form: Handle, page: Handle) -> String {
		let Some((page_index, field)) = self.focus_on(form, page) else {
			return String::new();
		};
		match self.objects.get(&form) {
			Some(Object::Form(state)) => self.field_value(state, page_index, field),
			_ => String::new(),
		}
	}

	fn form_replace_selection(&mut self, form: Handle, page: Handle, text: &str, hooks: &mut dyn FormHooks) {
		let Some((page_index, field)) = self.focus_on(form, page) else {
			return;
		};
		if let Some(state) = self.form_mut(form) {
			state.values.insert((page_index, field), text.to_owned());
		}
		hooks.on_change();
		hooks.invalidate(page, self.field_rect(page, field));
	}

	fn form_focused_annot(&mut self, form: Handle) -> Option<(u32, Handle)> {
		let (page_index, field) = self.form_mut(form)?.focus?;
		Some((page_index, self.annotation(form, page_index, field)))
	}

	fn form_kill_focus(&mut self, form: Handle, hooks: &mut dyn FormHooks) -> bool {
		let Some(state) = self.form_mut(form) else {
			return false;
		};
		if state.focus.take().is_none() {
			return false;
		}
		hooks.on_focus_change(None, -1);
		true
	}

	fn form_document_open_action(&mut self, form: Handle, hooks: &mut dyn FormHooks) {
		let Some(Object::Form(state)) = self.objects.get(&form) else {
			return;
		};
		let Some(action) = self.document(state.document).and_then(|document| document.fixture.open_action.clone()) else {
			return;
		};
		match action {
			FixtureAction::GoTo { page } => hooks.do_goto_action(i32::try_from(page).unwrap_or(-1), 1, &[]),
			FixtureAction::Uri(uri) => hooks.do_uri_action(&uri),
			FixtureAction::Named(name) => hooks.do_named_action(&name),
			FixtureAction::StartTimer { elapse_ms } => {
				let timer_id = hooks.set_timer(elapse_ms);
				if timer_id != 0 {
					if let Some(state) = self.form_mut(form) {
						state.timers.push(timer_id);
					}
				}
			}
			FixtureAction::RemoteGoTo(_) | FixtureAction::Launch(_) => {}
		}
	}

	fn form_fire_timer(&mut self, form: Handle, timer_id: i32, hooks: &mut dyn FormHooks) {
		let Some(state) = self.form_mut(form) else {
			return;
		};
		if !state.timers.contains(&timer_id) {
			return;
		}
		state.ticks += 1;
		let now = hooks.local_time().unwrap_or_else(|| calendar(self.now()));
		tracing::trace!(timer_id, hour = now.hour, minute = now.minute, "memory.timer_tick");
		hooks.on_change();
	}
}
