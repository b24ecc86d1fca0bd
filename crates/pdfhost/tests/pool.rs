use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pdfhost::{
	DocumentSource, Error, InProcessLauncher, Instance, InstanceId, InstanceState, LaunchOptions, LeasePolicy, Mode, PageSelector,
	PdfError, Pool, PoolConfig, PoolStats, RefKind, Reference, RenderArea, RenderStatus, Request, Response, SaveOptions, SaveOutput,
};
use pdfhost_engine::{Fault, FixtureDocument, FixturePage, FixtureSecurity, MemoryEngine};
use pdfhost_proto::CallbackSlots;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

fn pool_with(config: PoolConfig) -> Pool {
	Pool::from_config(config, MemoryEngine::new).unwrap()
}

fn pool(mode: Mode, max_instances: usize) -> Pool {
	pool_with(PoolConfig {
		mode,
		max_instances,
		..PoolConfig::default()
	})
}

fn fixture(pages: usize) -> DocumentSource {
	DocumentSource::Bytes(FixtureDocument::with_pages(pages).to_bytes())
}

fn area() -> RenderArea {
	RenderArea {
		size_x: 4,
		size_y: 4,
		..RenderArea::default()
	}
}

async fn bitmap(lease: &pdfhost::Lease) -> Reference {
	let response = lease
		.execute(Request::CreateBitmap {
			width: 4,
			height: 4,
			alpha: true,
		})
		.await
		.unwrap();
	let Response::Bitmap { bitmap, .. } = response else {
		panic!("expected a bitmap, got {response:?}");
	};
	bitmap
}

async fn wait_for_waiters(pool: &Pool, waiting: usize) {
	for _ in 0..200 {
		if pool.stats().waiting == waiting {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	panic!("expected {waiting} waiters, stats are {:?}", pool.stats());
}

#[tokio::test]
async fn acquire_is_bounded_and_times_out_without_leaking() {
	let pool = pool(Mode::InProcess, 1);
	let lease = pool.acquire().await.unwrap();

	let error = pool
		.acquire_with(&CancellationToken::new(), Some(Duration::from_millis(50)))
		.await
		.unwrap_err();
	assert!(matches!(error, Error::AcquireTimeout));
	assert_eq!(
		pool.stats(),
		PoolStats {
			live: 1,
			idle: 0,
			busy: 1,
			starting: 0,
			waiting: 0,
		}
	);

	let first = lease.id();
	drop(lease);
	let again = pool
		.acquire_with(&CancellationToken::new(), Some(Duration::from_millis(50)))
		.await
		.unwrap();
	assert_eq!(again.id(), first);
}

#[tokio::test]
async fn leased_instances_stay_busy_between_calls() {
	let pool = pool(Mode::InProcess, 1);
	let lease = pool.acquire().await.unwrap();
	assert_eq!(lease.state(), InstanceState::Busy);
	lease.ping().await.unwrap();
	assert_eq!(lease.state(), InstanceState::Busy);

	let first = lease.id();
	lease.release();
	let stats = pool.stats();
	assert_eq!((stats.idle, stats.busy), (1, 0));

	let again = pool.acquire().await.unwrap();
	assert_eq!(again.id(), first);
	assert_eq!(again.state(), InstanceState::Busy);
}

#[tokio::test]
async fn instances_outside_a_pool_are_ready_between_calls() {
	let launcher = InProcessLauncher::new(MemoryEngine::new);
	let options = LaunchOptions {
		call_timeout: None,
		handshake_timeout: Duration::from_secs(5),
	};
	let instance = Instance::start(&launcher, options).await.unwrap();
	assert_eq!(instance.state(), InstanceState::Ready);
	instance.ping().await.unwrap();
	assert_eq!(instance.state(), InstanceState::Ready);
	instance.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquirers_never_exceed_the_bound() {
	const BOUND: usize = 3;
	let pool = pool(Mode::InProcess, BOUND);
	let holders = Arc::new(Mutex::new(HashSet::new()));
	let peak_holders = Arc::new(AtomicUsize::new(0));
	let peak_live = Arc::new(AtomicUsize::new(0));

	let mut tasks = Vec::new();
	for _ in 0..12 {
		let pool = pool.clone();
		let holders = Arc::clone(&holders);
		let peak_holders = Arc::clone(&peak_holders);
		let peak_live = Arc::clone(&peak_live);
		tasks.push(tokio::spawn(async move {
			let lease = pool.acquire().await.unwrap();
			{
				let mut holders = holders.lock();
				assert!(holders.insert(lease.id()), "{} leased twice", lease.id());
				peak_holders.fetch_max(holders.len(), Ordering::SeqCst);
			}
			peak_live.fetch_max(pool.stats().live, Ordering::SeqCst);
			lease.ping().await.unwrap();
			tokio::time::sleep(Duration::from_millis(10)).await;
			holders.lock().remove(&lease.id());
		}));
	}
	for task in tasks {
		task.await.unwrap();
	}

	assert!(peak_holders.load(Ordering::SeqCst) <= BOUND);
	assert!(peak_live.load(Ordering::SeqCst) <= BOUND);
	let stats = pool.stats();
	assert!(stats.live <= BOUND, "{stats:?}");
	assert_eq!((stats.busy, stats.waiting), (0, 0));
}

#[tokio::test]
async fn cancelled_acquire_does_not_leak_a_slot() {
	let pool = pool(Mode::InProcess, 1);
	let lease = pool.acquire().await.unwrap();

	let cancel = CancellationToken::new();
	let waiter = {
		let pool = pool.clone();
		let cancel = cancel.clone();
		tokio::spawn(async move { pool.acquire_with(&cancel, None).await.map(|lease| lease.id()) })
	};
	wait_for_waiters(&pool, 1).await;
	cancel.cancel();
	assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));

	drop(lease);
	let stats = pool.stats();
	assert_eq!((stats.live, stats.idle, stats.waiting), (1, 1, 0));
}

#[tokio::test]
async fn returned_instances_go_to_waiters_in_order() {
	let pool = pool(Mode::InProcess, 1);
	let lease = pool.acquire().await.unwrap();
	let order = Arc::new(Mutex::new(Vec::new()));

	let mut waiters = Vec::new();
	for (position, name) in ["first", "second"].into_iter().enumerate() {
		let waiter_pool = pool.clone();
		let order = Arc::clone(&order);
		waiters.push(tokio::spawn(async move {
			let lease = waiter_pool.acquire().await.unwrap();
			order.lock().push(name);
			lease.id()
		}));
		wait_for_waiters(&pool, position + 1).await;
	}

	let id = lease.id();
	drop(lease);
	for waiter in waiters {
		assert_eq!(waiter.await.unwrap(), id);
	}
	assert_eq!(*order.lock(), vec!["first", "second"]);
}

async fn open_count_close(mode: Mode) {
	let pool = pool(mode, 1);
	let lease = pool.acquire().await.unwrap();

	let document = lease.open_document(fixture(3), None).await.unwrap();
	assert_eq!(document.instance, lease.id());
	assert_eq!(lease.page_count(document).await.unwrap(), 3);
	lease.close_document(document).await.unwrap();

	let error = lease.page_count(document).await.unwrap_err();
	assert!(matches!(
		error,
		Error::Pdf(PdfError::StaleReference {
			kind: RefKind::Document
		})
	));
	pool.close().await;
}

#[tokio::test]
async fn open_count_close_in_process() {
	open_count_close(Mode::InProcess).await;
}

#[tokio::test]
async fn open_count_close_sandboxed() {
	open_count_close(Mode::Sandbox).await;
}

#[tokio::test]
async fn wrong_password_is_distinguished_and_owner_password_unlocks_everything() {
	let pool = pool(Mode::Sandbox, 1);
	let lease = pool.acquire().await.unwrap();
	let secured = FixtureDocument::with_pages(1).secured(FixtureSecurity {
		user_password: Some("user".into()),
		owner_password: Some("owner".into()),
		permissions: 1 << 2,
		revision: 3,
	});
	let source = DocumentSource::Bytes(secured.to_bytes());

	let error = lease.open_document(source.clone(), Some("wrong")).await.unwrap_err();
	assert!(error.is_password());
	assert_eq!(error.to_string(), "4: invalid password");

	let document = lease.open_document(source.clone(), Some("owner")).await.unwrap();
	assert_eq!(lease.permissions(document).await.unwrap().bits, 0xFFFF_FFFC);

	let document = lease.open_document(source, Some("user")).await.unwrap();
	let permissions = lease.permissions(document).await.unwrap();
	assert!(permissions.print_document);
	assert!(!permissions.modify_contents);
}

#[tokio::test]
async fn references_are_bound_to_their_instance() {
	let pool = pool(Mode::InProcess, 2);
	let first = pool.acquire().await.unwrap();
	let second = pool.acquire().await.unwrap();
	assert_ne!(first.id(), second.id());

	let document = first.open_document(fixture(1), None).await.unwrap();
	let error = second.page_count(document).await.unwrap_err();
	assert!(matches!(
		error,
		Error::Pdf(PdfError::StaleReference {
			kind: RefKind::Document
		})
	));
	assert_eq!(first.page_count(document).await.unwrap(), 1);
}

async fn panicking_engine_is_never_handed_out_again(mode: Mode) {
	let pool = pool(mode, 1);
	let lease = pool.acquire().await.unwrap();
	let faulty = FixtureDocument::with_pages(0).page(FixturePage::default().fault(Fault::Panic));
	let document = lease
		.open_document(DocumentSource::Bytes(faulty.to_bytes()), None)
		.await
		.unwrap();
	let bitmap = bitmap(&lease).await;

	let error = lease
		.execute(Request::RenderPageBitmap {
			bitmap,
			page: PageSelector::index(document, 0),
			area: area(),
			flags: 0,
		})
		.await
		.unwrap_err();
	assert!(matches!(error, Error::WorkerDied(_)), "{error:?}");
	assert!(error.is_fatal());
	assert_eq!(lease.state(), InstanceState::Dead);
	assert!(matches!(lease.page_count(document).await, Err(Error::WorkerDied(_))));

	let dead = lease.id();
	drop(lease);
	let replacement = pool.acquire().await.unwrap();
	assert_ne!(replacement.id(), dead);
	assert_eq!(replacement.state(), InstanceState::Busy);
	assert_eq!(pool.stats().live, 1);
}

#[tokio::test]
async fn panicking_engine_in_process() {
	panicking_engine_is_never_handed_out_again(Mode::InProcess).await;
}

#[tokio::test]
async fn panicking_engine_sandboxed() {
	panicking_engine_is_never_handed_out_again(Mode::Sandbox).await;
}

#[tokio::test]
async fn instances_are_recycled_after_their_operation_limit() {
	let pool = pool_with(PoolConfig {
		max_operations: Some(2),
		..PoolConfig::default()
	});

	let lease = pool.acquire().await.unwrap();
	lease.ping().await.unwrap();
	let first = lease.id();
	drop(lease);

	let lease = pool.acquire().await.unwrap();
	assert_eq!(lease.id(), first);
	lease.ping().await.unwrap();
	assert_eq!(lease.operations(), 2);
	drop(lease);

	let lease = pool.acquire().await.unwrap();
	assert_ne!(lease.id(), first);
}

#[tokio::test]
async fn progressive_render_with_a_pause_predicate() {
	let pool = pool(Mode::InProcess, 1);
	let lease = pool.acquire().await.unwrap();
	let document = lease.open_document(fixture(1), None).await.unwrap();
	let page = lease.load_page(document, 0).await.unwrap();
	let bitmap = bitmap(&lease).await;

	let status = lease
		.render_start(bitmap, page.into(), area(), 0, Some(Box::new(|| true)))
		.await
		.unwrap();
	assert_eq!(status, RenderStatus::ToBeContinued);

	let status = lease.render_continue(page.into(), Some(Box::new(|| true))).await.unwrap();
	assert_eq!(status, RenderStatus::Done);
	lease.render_close(page.into()).await.unwrap();

	let error = lease.render_continue(page.into(), None).await.unwrap_err();
	assert!(matches!(error, Error::Pdf(PdfError::InvalidState(_))));
}

#[tokio::test]
async fn save_to_writer_path_and_size_limit() {
	let pool = pool(Mode::Sandbox, 1);
	let lease = pool.acquire().await.unwrap();
	let document = lease.open_document(fixture(2), None).await.unwrap();

	let mut buffer = Vec::new();
	let outcome = lease
		.save(document, SaveOptions::default(), SaveOutput::Writer(&mut buffer))
		.await
		.unwrap();
	assert_eq!(outcome.size, buffer.len() as u64);
	assert_eq!(FixtureDocument::from_bytes(&buffer).unwrap().pages.len(), 2);

	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("copy.pdf");
	let outcome = lease
		.save(document, SaveOptions::default(), SaveOutput::Path(path.clone()))
		.await
		.unwrap();
	assert_eq!(outcome.path.as_deref(), Some(path.as_path()));
	assert_eq!(std::fs::read(&path).unwrap().len() as u64, outcome.size);

	let limited = SaveOptions {
		max_size: Some(4),
		..SaveOptions::default()
	};
	let error = lease.save(document, limited, SaveOutput::Bytes).await.unwrap_err();
	assert!(matches!(error, Error::Pdf(PdfError::MaxSizeExceeded { limit: 4, .. })));
	assert_eq!(error.to_string(), "PDF image would exceed maximum filesize");
}

#[tokio::test]
async fn per_call_policy_routes_by_reference() {
	let pool = pool_with(PoolConfig {
		policy: LeasePolicy::PerCall,
		max_instances: 2,
		..PoolConfig::default()
	});

	let response = pool
		.execute(Request::OpenDocument {
			source: fixture(4),
			password: None,
		})
		.await
		.unwrap();
	let Response::Document(document) = response else {
		panic!("expected a document, got {response:?}");
	};
	assert_eq!(
		pool.execute(Request::GetPageCount { document }).await.unwrap(),
		Response::PageCount(4)
	);

	let foreign = Reference::new(RefKind::Document, 1, InstanceId(u64::MAX));
	let error = pool.execute(Request::GetPageCount { document: foreign }).await.unwrap_err();
	assert!(matches!(
		error,
		Error::Pdf(PdfError::StaleReference {
			kind: RefKind::Document
		})
	));
}

#[tokio::test]
async fn per_call_policy_rejects_callbacks_and_leases() {
	let pool = pool_with(PoolConfig {
		policy: LeasePolicy::PerCall,
		..PoolConfig::default()
	});
	assert!(matches!(pool.acquire().await, Err(Error::Capability(_))));

	let document = Reference::new(RefKind::Document, 1, InstanceId(1));
	let error = pool
		.execute(Request::InitFormFillEnvironment {
			document,
			callbacks: CallbackSlots::ON_CHANGE,
		})
		.await
		.unwrap_err();
	assert!(matches!(error, Error::Capability(_)));

	let error = pool
		.execute(Request::RenderPageContinue {
			page: PageSelector::index(document, 0),
			pause: true,
		})
		.await
		.unwrap_err();
	assert!(matches!(error, Error::Capability(_)));
	assert_eq!(pool.stats().live, 0);
}

#[tokio::test]
async fn warm_starts_the_minimum_and_close_rejects_new_leases() {
	let pool = pool_with(PoolConfig {
		max_instances: 3,
		min_instances: 2,
		..PoolConfig::default()
	});
	pool.warm().await.unwrap();
	let stats = pool.stats();
	assert_eq!((stats.live, stats.idle), (2, 2));

	pool.close().await;
	assert_eq!(pool.stats().idle, 0);
	assert!(matches!(pool.acquire().await, Err(Error::PoolClosed)));
}

#[tokio::test]
async fn leased_instances_close_when_returned_to_a_closed_pool() {
	let pool = pool(Mode::Sandbox, 1);
	let lease = pool.acquire().await.unwrap();
	pool.close().await;
	assert_eq!(pool.stats().busy, 1);

	assert_eq!(lease.page_count(lease.open_document(fixture(1), None).await.unwrap()).await.unwrap(), 1);
	drop(lease);
	assert_eq!(pool.stats().live, 0);
}

#[tokio::test]
async fn global_hooks_are_rejected_outside_in_process_mode() {
	let pool = pool(Mode::Sandbox, 1);
	let error = pool.install_global_hooks(Default::default()).unwrap_err();
	assert!(matches!(error, Error::Capability(_)));
	assert!(matches!(pool.uninstall_global_hooks(), Err(Error::Capability(_))));
}
