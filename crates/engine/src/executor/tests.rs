use std::collections::BTreeMap;
use std::time::Duration;

use pdfhost_proto::{
	ActionType, CallbackCall, CallbackReply, CallbackSlot, CallbackSlots, DocumentSource, Event, InstanceId, LoadError, NativeFailure,
	PageSelector, PdfError, RectF, RefKind, Reference, RenderArea, RenderStatus, Request, Response, SaveTarget,
};
use pretty_assertions::assert_eq;

use super::{CallbackHost, DetachedHost, Executor};
use crate::memory::{
	FixtureAction, FixtureBookmark, FixtureDocument, FixturePage, FixtureSecurity, FixtureSignature, FixtureStructElement,
	MemoryEngine,
};

/// Records everything the executor sends to the caller.
#[derive(Default)]
struct RecordingHost {
	calls: Vec<CallbackCall>,
	armed: Vec<(Reference, i32, Duration)>,
	disarmed: Vec<(Reference, i32)>,
	events: Vec<Event>,
	pauses: Vec<bool>,
	next_timer: i32,
}

impl CallbackHost for RecordingHost {
	fn invoke(&mut self, call: CallbackCall) -> Option<CallbackReply> {
		let reply = match &call {
			CallbackCall::SetTimer { .. } => {
				self.next_timer += 1;
				CallbackReply::TimerId(self.next_timer)
			}
			CallbackCall::GetLocalTime { .. } => CallbackReply::LocalTime(None),
			CallbackCall::NeedToPauseNow { .. } => CallbackReply::Pause(if self.pauses.is_empty() {
				false
			} else {
				self.pauses.remove(0)
			}),
			_ => CallbackReply::Unit,
		};
		self.calls.push(call);
		Some(reply)
	}

	fn arm_timer(&mut self, form: Reference, timer_id: i32, interval: Duration) {
		self.armed.push((form, timer_id, interval));
	}

	fn disarm_timer(&mut self, form: Reference, timer_id: i32) {
		self.disarmed.push((form, timer_id));
	}

	fn notify(&mut self, event: Event) {
		self.events.push(event);
	}
}

fn executor() -> Executor<MemoryEngine> {
	Executor::new(MemoryEngine::new(), InstanceId(7))
}

fn run(executor: &mut Executor<MemoryEngine>, request: Request) -> Result<Response, PdfError> {
	executor.execute(request, &mut DetachedHost)
}

fn open(executor: &mut Executor<MemoryEngine>, fixture: &FixtureDocument) -> Reference {
	let request = Request::OpenDocument {
		source: DocumentSource::Bytes(fixture.to_bytes()),
		password: None,
	};
	match run(executor, request) {
		Ok(Response::Document(document)) => document,
		other => panic!("open failed: {other:?}"),
	}
}

fn load_page(executor: &mut Executor<MemoryEngine>, document: Reference, index: u32) -> Reference {
	match run(executor, Request::LoadPage { document, index }) {
		Ok(Response::Page(page)) => page,
		other => panic!("load failed: {other:?}"),
	}
}

fn bitmap(executor: &mut Executor<MemoryEngine>) -> Reference {
	match run(
		executor,
		Request::CreateBitmap {
			width: 4,
			height: 4,
			alpha: true,
		},
	) {
		Ok(Response::Bitmap { bitmap, .. }) => bitmap,
		other => panic!("bitmap failed: {other:?}"),
	}
}

fn form(executor: &mut Executor<MemoryEngine>, document: Reference, callbacks: CallbackSlots) -> Reference {
	match run(executor, Request::InitFormFillEnvironment { document, callbacks }) {
		Ok(Response::FormHandle(form)) => form,
		other => panic!("form fill failed: {other:?}"),
	}
}

fn start(page: Reference, bitmap: Reference, pause: bool) -> Request {
	Request::RenderPageBitmapStart {
		bitmap,
		page: page.into(),
		area: RenderArea {
			start_x: 0,
			start_y: 0,
			size_x: 4,
			size_y: 4,
			rotate: 0,
		},
		flags: 0,
		pause,
	}
}

#[test]
fn closing_a_document_invalidates_its_pages() {
	let mut executor = executor();
	let document = open(&mut executor, &FixtureDocument::with_pages(3));
	assert_eq!(run(&mut executor, Request::GetPageCount { document }), Ok(Response::PageCount(3)));
	let page = load_page(&mut executor, document, 1);

	assert_eq!(run(&mut executor, Request::CloseDocument { document }), Ok(Response::Done));
	assert_eq!(
		run(&mut executor, Request::GetPageRotation { page: page.into() }),
		Err(PdfError::StaleReference { kind: RefKind::Page })
	);
	assert_eq!(
		run(&mut executor, Request::GetPageCount { document }),
		Err(PdfError::StaleReference { kind: RefKind::Document })
	);
	assert!(executor.refs().is_empty());
	assert_eq!(executor.engine().live_objects(), 0);
}

#[test]
fn password_protected_documents() {
	let fixture = FixtureDocument::with_pages(1).secured(FixtureSecurity {
		user_password: Some("test123".to_owned()),
		owner_password: Some("test123".to_owned()),
		permissions: 0xFFFF_F0C4,
		revision: 3,
	});
	let mut executor = executor();

	let error = run(
		&mut executor,
		Request::OpenDocument {
			source: DocumentSource::Bytes(fixture.to_bytes()),
			password: None,
		},
	)
	.unwrap_err();
	assert!(error.is_password());
	assert_eq!(error.to_string(), "4: invalid password");

	let Ok(Response::Document(document)) = run(
		&mut executor,
		Request::OpenDocument {
			source: DocumentSource::Bytes(fixture.to_bytes()),
			password: Some("test123".to_owned()),
		},
	) else {
		panic!("correct password rejected");
	};
	let Ok(Response::DocPermissions(permissions)) = run(&mut executor, Request::GetDocPermissions { document }) else {
		panic!("no permissions");
	};
	assert_eq!(permissions.bits, 0xFFFF_FFFC);
	assert!(permissions.print_document && permissions.modify_contents && permissions.assemble_document);
	assert_eq!(
		run(&mut executor, Request::GetSecurityHandlerRevision { document }),
		Ok(Response::SecurityHandlerRevision(3))
	);
}

#[test]
fn garbage_is_an_incorrect_format() {
	let mut executor = executor();
	let result = run(
		&mut executor,
		Request::OpenDocument {
			source: DocumentSource::Bytes(b"not a pdf".to_vec()),
			password: None,
		},
	);
	assert_eq!(result, Err(PdfError::Load(LoadError::Format)));
	assert_eq!(result.unwrap_err().to_string(), "3: incorrect format");
}

#[test]
fn progressive_render_lifecycle() {
	let mut executor = executor();
	let document = open(&mut executor, &FixtureDocument::with_pages(1));
	let page = load_page(&mut executor, document, 0);
	let bitmap = bitmap(&mut executor);
	let mut host = RecordingHost {
		pauses: vec![true],
		..RecordingHost::default()
	};

	assert_eq!(
		executor.execute(start(page, bitmap, true), &mut host),
		Ok(Response::RenderStatus(RenderStatus::ToBeContinued))
	);
	assert_eq!(host.calls, vec![CallbackCall::NeedToPauseNow { page }]);

	assert_eq!(
		executor.execute(start(page, bitmap, true), &mut host),
		Err(PdfError::InvalidState(
			"progressive render already started for this page, close it first".into()
		))
	);
	assert_eq!(
		executor.execute(Request::RenderPageContinue { page: page.into(), pause: true }, &mut host),
		Ok(Response::RenderStatus(RenderStatus::Done))
	);
	assert_eq!(run(&mut executor, Request::RenderPageClose { page: page.into() }), Ok(Response::Done));
	assert_eq!(
		run(&mut executor, Request::RenderPageContinue { page: page.into(), pause: false }),
		Err(PdfError::InvalidState("progressive render not started for this page".into()))
	);

	let Ok(Response::BitmapBuffer { info, data }) = run(&mut executor, Request::GetBitmapBuffer { bitmap }) else {
		panic!("no buffer");
	};
	assert_eq!(info.stride, 16);
	assert_eq!(data.len(), 64);
}

#[test]
fn unregistered_pause_never_calls_back() {
	let mut executor = executor();
	let document = open(&mut executor, &FixtureDocument::with_pages(1));
	let page = load_page(&mut executor, document, 0);
	let bitmap = bitmap(&mut executor);
	let mut host = RecordingHost::default();

	assert_eq!(
		executor.execute(start(page, bitmap, false), &mut host),
		Ok(Response::RenderStatus(RenderStatus::Done))
	);
	assert!(host.calls.is_empty());
}

#[test]
fn closing_a_page_mid_render_releases_the_render() {
	let mut executor = executor();
	let document = open(&mut executor, &FixtureDocument::with_pages(1));
	let page = load_page(&mut executor, document, 0);
	let bitmap = bitmap(&mut executor);
	let mut host = RecordingHost {
		pauses: vec![true],
		..RecordingHost::default()
	};
	executor.execute(start(page, bitmap, true), &mut host).unwrap();

	assert_eq!(run(&mut executor, Request::ClosePage { page }), Ok(Response::Done));
	assert_eq!(
		run(&mut executor, Request::RenderPageClose { page: page.into() }),
		Err(PdfError::StaleReference { kind: RefKind::Page })
	);
}

#[test]
fn missing_arguments_are_reported_by_kind() {
	let mut executor = executor();
	assert_eq!(
		run(&mut executor, Request::GetPageCount { document: Reference::nil(RefKind::Document) })
			.unwrap_err()
			.to_string(),
		"document not given"
	);
	assert_eq!(
		run(&mut executor, Request::GetBookmarkTitle { bookmark: Reference::nil(RefKind::Bookmark) })
			.unwrap_err()
			.to_string(),
		"bookmark not given"
	);
	assert_eq!(
		run(&mut executor, Request::GetPageSize { page: PageSelector::default() })
			.unwrap_err()
			.to_string(),
		"either page reference or index should be given"
	);
	assert_eq!(
		run(&mut executor, Request::GetPageSize { page: Reference::nil(RefKind::Page).into() })
			.unwrap_err()
			.to_string(),
		"page reference can't be empty"
	);
}

#[test]
fn references_are_scoped_to_their_instance_and_kind() {
	let mut executor = executor();
	let document = open(&mut executor, &FixtureDocument::with_pages(1));
	let foreign = Reference::new(RefKind::Document, document.id, InstanceId(8));
	assert_eq!(
		run(&mut executor, Request::GetPageCount { document: foreign }),
		Err(PdfError::StaleReference { kind: RefKind::Document })
	);
	let mistyped = Reference::new(RefKind::Page, document.id, document.instance);
	assert_eq!(
		run(&mut executor, Request::GetPageRotation { page: mistyped.into() }),
		Err(PdfError::StaleReference { kind: RefKind::Page })
	);
}

#[test]
fn pages_addressed_by_index_are_cached() {
	let fixture = FixtureDocument::default().page(FixturePage {
		width: 200.0,
		height: 100.0,
		..FixturePage::default()
	});
	let mut executor = executor();
	let document = open(&mut executor, &fixture);
	let selector = PageSelector::index(document, 0);

	let Ok(Response::PageSize(size)) = run(&mut executor, Request::GetPageSize { page: selector }) else {
		panic!("no size");
	};
	assert_eq!((size.width, size.height), (200.0, 100.0));
	let live = executor.refs().len();
	run(&mut executor, Request::GetPageRotation { page: selector }).unwrap();
	assert_eq!(executor.refs().len(), live);

	assert_eq!(
		run(&mut executor, Request::GetPageSize { page: PageSelector::index(document, 5) }),
		Err(PdfError::Load(LoadError::Page))
	);
}

#[test]
fn save_respects_the_size_limit() {
	let mut executor = executor();
	let document = open(&mut executor, &FixtureDocument::with_pages(2));
	let save = |max_size, target| Request::SaveAsCopy {
		document,
		flags: 0,
		version: None,
		target,
		max_size,
	};

	let error = run(&mut executor, save(Some(8), SaveTarget::Bytes)).unwrap_err();
	assert!(matches!(error, PdfError::MaxSizeExceeded { limit: 8, .. }));
	assert_eq!(error.to_string(), "PDF image would exceed maximum filesize");

	let Ok(Response::Saved(outcome)) = run(&mut executor, save(None, SaveTarget::Bytes)) else {
		panic!("save failed");
	};
	let bytes = outcome.bytes.unwrap();
	assert_eq!(outcome.size, bytes.len() as u64);
	assert_eq!(FixtureDocument::from_bytes(&bytes).unwrap().pages.len(), 2);

	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("copy.pdf");
	let Ok(Response::Saved(outcome)) = run(&mut executor, save(None, SaveTarget::Path(path.clone()))) else {
		panic!("save to path failed");
	};
	assert_eq!(outcome.path.as_deref(), Some(path.as_path()));
	assert_eq!(std::fs::metadata(&path).unwrap().len(), outcome.size);
}

#[test]
fn failed_save_writes_nothing() {
	let fixture = FixtureDocument {
		save_fails: true,
		..FixtureDocument::with_pages(1)
	};
	let mut executor = executor();
	let document = open(&mut executor, &fixture);
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("never.pdf");
	let result = run(
		&mut executor,
		Request::SaveAsCopy {
			document,
			flags: 0,
			version: None,
			target: SaveTarget::Path(path.clone()),
			max_size: None,
		},
	);
	assert_eq!(result.unwrap_err().to_string(), "save of document failed");
	assert!(!path.exists());
}

#[test]
fn native_failures_carry_fixed_messages() {
	let fixture = FixtureDocument::with_pages(1).page(FixturePage::default().element(FixtureStructElement {
		kind: "P".to_owned(),
		attributes: vec![BTreeMap::from([("Lang".to_owned(), "en".to_owned())])],
	}));
	let mut executor = executor();
	let document = open(&mut executor, &fixture);
	let source = open(&mut executor, &FixtureDocument::with_pages(2));

	let import = Request::ImportPages {
		destination: document,
		source,
		page_range: Some("3-9".to_owned()),
		index: 0,
	};
	assert_eq!(run(&mut executor, import), Err(NativeFailure::ImportPages.into()));

	let clip = Request::TransformWithClip {
		page: PageSelector::index(document, 0),
		matrix: None,
		clip: None,
	};
	assert_eq!(
		run(&mut executor, clip).unwrap_err().to_string(),
		"could not apply clip transform"
	);

	let Ok(Response::StructTree(tree)) = run(&mut executor, Request::GetStructTree { page: PageSelector::index(document, 1) })
	else {
		panic!("no struct tree");
	};
	let Ok(Response::StructElement(Some(element))) = run(&mut executor, Request::GetStructChild { struct_tree: tree, index: 0 })
	else {
		panic!("no element");
	};
	assert_eq!(
		run(&mut executor, Request::GetStructElementType { struct_element: element }),
		Ok(Response::Text(Some("P".to_owned())))
	);
	let Ok(Response::StructElementAttribute(attribute)) = run(
		&mut executor,
		Request::GetStructElementAttribute {
			struct_element: element,
			index: 0,
		},
	) else {
		panic!("no attribute");
	};
	assert_eq!(
		run(
			&mut executor,
			Request::GetStructAttributeValue {
				attribute,
				name: "Lang".to_owned()
			}
		),
		Ok(Response::Text(Some("en".to_owned())))
	);
	assert_eq!(
		run(
			&mut executor,
			Request::GetStructElementAttribute {
				struct_element: element,
				index: 1
			}
		)
		.unwrap_err()
		.to_string(),
		"could not get attribute"
	);

	assert_eq!(run(&mut executor, Request::CloseStructTree { struct_tree: tree }), Ok(Response::Done));
	assert_eq!(
		run(&mut executor, Request::GetStructElementType { struct_element: element }),
		Err(PdfError::StaleReference {
			kind: RefKind::StructElement
		})
	);
}

#[test]
fn signatures_expose_raw_contents() {
	let fixture = FixtureDocument::with_pages(1).signature(FixtureSignature {
		contents: vec![0x30, 0x82, 0x01, 0x0A],
		reason: Some("approved".to_owned()),
	});
	let mut executor = executor();
	let document = open(&mut executor, &fixture);

	assert_eq!(run(&mut executor, Request::GetSignatureCount { document }), Ok(Response::Count(1)));
	let Ok(Response::Signature(signature)) = run(&mut executor, Request::GetSignatureObject { document, index: 0 }) else {
		panic!("no signature");
	};
	assert_eq!(
		run(&mut executor, Request::GetSignatureContents { signature }),
		Ok(Response::Blob(vec![0x30, 0x82, 0x01, 0x0A]))
	);
	assert_eq!(
		run(&mut executor, Request::GetSignatureReason { signature }),
		Ok(Response::Text(Some("approved".to_owned())))
	);
	assert_eq!(
		run(&mut executor, Request::GetSignatureObject { document, index: 3 })
			.unwrap_err()
			.to_string(),
		"could not get signature object"
	);
}

#[test]
fn bookmarks_resolve_to_destinations() {
	let fixture = FixtureDocument::with_pages(3)
		.bookmark(FixtureBookmark {
			title: "Intro".to_owned(),
			action: Some(FixtureAction::GoTo { page: 2 }),
			children: vec![FixtureBookmark {
				title: "Details".to_owned(),
				..FixtureBookmark::default()
			}],
		})
		.bookmark(FixtureBookmark {
			title: "Site".to_owned(),
			action: Some(FixtureAction::Uri("https://example.org".to_owned())),
			children: Vec::new(),
		});
	let mut executor = executor();
	let document = open(&mut executor, &fixture);

	let Ok(Response::Bookmark(Some(first))) = run(&mut executor, Request::GetFirstBookmark { document, parent: None }) else {
		panic!("no bookmark");
	};
	assert_eq!(
		run(&mut executor, Request::GetFirstBookmark { document, parent: None }),
		Ok(Response::Bookmark(Some(first)))
	);
	assert_eq!(
		run(&mut executor, Request::GetBookmarkTitle { bookmark: first }),
		Ok(Response::Text(Some("Intro".to_owned())))
	);
	let Ok(Response::Bookmark(Some(child))) = run(
		&mut executor,
		Request::GetFirstBookmark {
			document,
			parent: Some(first),
		},
	) else {
		panic!("no child");
	};
	assert_eq!(
		run(&mut executor, Request::GetBookmarkTitle { bookmark: child }),
		Ok(Response::Text(Some("Details".to_owned())))
	);

	let Ok(Response::Action(Some(action))) = run(&mut executor, Request::GetBookmarkAction { bookmark: first }) else {
		panic!("no action");
	};
	assert_eq!(run(&mut executor, Request::GetActionType { action }), Ok(Response::ActionType(ActionType::GoTo)));
	let Ok(Response::Dest(Some(dest))) = run(&mut executor, Request::GetActionDest { document, action }) else {
		panic!("no dest");
	};
	assert_eq!(run(&mut executor, Request::GetDestPageIndex { document, dest }), Ok(Response::PageIndex(Some(2))));

	let Ok(Response::Bookmark(Some(second))) = run(&mut executor, Request::GetNextBookmark { document, bookmark: first }) else {
		panic!("no sibling");
	};
	let Ok(Response::Action(Some(uri))) = run(&mut executor, Request::GetBookmarkAction { bookmark: second }) else {
		panic!("no uri action");
	};
	assert_eq!(
		run(&mut executor, Request::GetActionUriPath { document, action: uri }),
		Ok(Response::Text(Some("https://example.org".to_owned())))
	);
	assert_eq!(
		run(&mut executor, Request::GetNextBookmark { document, bookmark: second }),
		Ok(Response::Bookmark(None))
	);
}

#[test]
fn form_callbacks_respect_registration() {
	let fixture = FixtureDocument::default().page(FixturePage::default().field(
		"name",
		RectF {
			left: 10.0,
			top: 50.0,
			right: 100.0,
			bottom: 10.0,
		},
		"Ada",
	));
	let mut executor = executor();
	let document = open(&mut executor, &fixture);
	let page = load_page(&mut executor, document, 0);
	let form = form(&mut executor, document, CallbackSlots::FOCUS_CHANGE | CallbackSlots::ON_CHANGE);
	let mut host = RecordingHost::default();

	let click = Request::FormOnLButtonDown {
		form_handle: form,
		page: page.into(),
		modifier: 0,
		x: 20.0,
		y: 20.0,
	};
	assert_eq!(executor.execute(click, &mut host), Ok(Response::Handled(true)));
	let typed = Request::FormOnChar {
		form_handle: form,
		page: page.into(),
		character: u32::from('!'),
		modifier: 0,
	};
	assert_eq!(executor.execute(typed, &mut host), Ok(Response::Handled(true)));

	let slots: Vec<_> = host.calls.iter().map(CallbackCall::slot).collect();
	assert_eq!(slots, vec![CallbackSlot::FocusChange, CallbackSlot::OnChange]);
	let Some(CallbackCall::FocusChange { focus, .. }) = host.calls.first() else {
		panic!("no focus change");
	};
	let annotation = focus.annotation.unwrap();
	assert_eq!(annotation.kind, RefKind::Annotation);
	assert_eq!(focus.page_index, 0);

	assert_eq!(
		run(
			&mut executor,
			Request::FormGetFocusedText {
				form_handle: form,
				page: page.into()
			}
		),
		Ok(Response::Text(Some("Ada!".to_owned())))
	);
	let Ok(Response::FocusedAnnotation(Some(focused))) = run(&mut executor, Request::FormGetFocusedAnnot { form_handle: form })
	else {
		panic!("nothing focused");
	};
	assert_eq!(focused.annotation, annotation);
}

#[test]
fn open_action_timers_are_armed_and_disarmed() {
	let fixture = FixtureDocument::with_pages(1).open_action(FixtureAction::StartTimer { elapse_ms: 50 });
	let mut executor = executor();
	let document = open(&mut executor, &fixture);
	let form = form(&mut executor, document, CallbackSlots::SET_TIMER | CallbackSlots::ON_CHANGE);
	let mut host = RecordingHost::default();

	executor
		.execute(Request::FormDoDocumentOpenAction { form_handle: form }, &mut host)
		.unwrap();
	assert_eq!(host.armed, vec![(form, 1, Duration::from_millis(50))]);

	executor
		.execute(
			Request::FormFireTimer {
				form_handle: form,
				timer_id: 1,
			},
			&mut host,
		)
		.unwrap();
	assert!(host.calls.contains(&CallbackCall::OnChange { form }));

	assert_eq!(run(&mut executor, Request::CloseDocument { document }), Ok(Response::Done));
	assert!(executor.refs().is_empty());

	let mut host = RecordingHost::default();
	let document = open(&mut executor, &fixture);
	let form = self::form(&mut executor, document, CallbackSlots::SET_TIMER);
	executor
		.execute(Request::FormDoDocumentOpenAction { form_handle: form }, &mut host)
		.unwrap();
	executor
		.execute(Request::ExitFormFillEnvironment { form_handle: form }, &mut host)
		.unwrap();
	assert_eq!(host.disarmed, vec![(form, 1)]);
	assert_eq!(host.events, vec![Event::FormClosed { form }]);
}

#[test]
fn timers_without_a_set_timer_hook_are_never_armed() {
	let fixture = FixtureDocument::with_pages(1).open_action(FixtureAction::StartTimer { elapse_ms: 5 });
	let mut executor = executor();
	let document = open(&mut executor, &fixture);
	let form = form(&mut executor, document, CallbackSlots::empty());
	let mut host = RecordingHost::default();

	executor
		.execute(Request::FormDoDocumentOpenAction { form_handle: form }, &mut host)
		.unwrap();
	assert!(host.calls.is_empty());
	assert!(host.armed.is_empty());
}

#[test]
fn close_all_releases_every_native_object() {
	let mut executor = executor();
	let document = open(&mut executor, &FixtureDocument::with_pages(2));
	load_page(&mut executor, document, 0);
	bitmap(&mut executor);
	form(&mut executor, document, CallbackSlots::empty());

	let mut host = RecordingHost::default();
	assert_eq!(executor.close_all(&mut host), 4);
	assert!(executor.refs().is_empty());
	assert_eq!(executor.engine().live_objects(), 0);
	assert_eq!(host.events.len(), 1);
}
