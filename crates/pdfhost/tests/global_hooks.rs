//! Global hooks are process-wide, so they get a test binary of their own.

use std::sync::Arc;

use parking_lot::Mutex;
use pdfhost::{DocumentSource, Error, Mode, Pool, PoolConfig, Request, Response, SaveOptions, SaveOutput, WorkerConfig};
use pdfhost_engine::{FixtureDocument, GlobalHooks, MemoryEngine};
use pretty_assertions::assert_eq;

fn pool(mode: Mode) -> Pool {
	Pool::from_config(
		PoolConfig {
			mode,
			worker: WorkerConfig {
				program: "pdfhost-worker".into(),
				..WorkerConfig::default()
			},
			..PoolConfig::default()
		},
		MemoryEngine::new,
	)
	.unwrap()
}

#[tokio::test]
async fn hooks_reach_live_and_future_instances_until_removed() {
	let pool = pool(Mode::InProcess);
	let lease = pool.acquire().await.unwrap();

	let reported = Arc::new(Mutex::new(Vec::new()));
	pool.install_global_hooks(GlobalHooks {
		time: Some(Arc::new(|| 42)),
		unsupported: Some({
			let reported = Arc::clone(&reported);
			Arc::new(move |feature| reported.lock().push(feature))
		}),
	})
	.unwrap();

	let mut fixture = FixtureDocument::with_pages(1);
	fixture.unsupported_features = vec![3, 9];
	let document = lease
		.open_document(DocumentSource::Bytes(fixture.to_bytes()), None)
		.await
		.unwrap();
	assert_eq!(*reported.lock(), vec![3, 9]);

	let saved = lease
		.save(document, SaveOptions::default(), SaveOutput::Bytes)
		.await
		.unwrap()
		.bytes
		.unwrap();
	let reopened = lease.open_document(DocumentSource::Bytes(saved), None).await.unwrap();
	let stamp = lease
		.execute(Request::GetMetaText {
			document: reopened,
			tag: "ModDate".to_owned(),
		})
		.await
		.unwrap();
	assert_eq!(stamp, Response::Text(Some("D:42".to_owned())));

	pool.uninstall_global_hooks().unwrap();
	reported.lock().clear();
	lease
		.open_document(DocumentSource::Bytes(fixture.to_bytes()), None)
		.await
		.unwrap();
	assert!(reported.lock().is_empty());
	drop(lease);
	pool.close().await;
}

#[tokio::test]
async fn isolated_modes_refuse_global_hooks() {
	let pool = pool(Mode::Process);
	assert!(matches!(pool.install_global_hooks(GlobalHooks::default()), Err(Error::Capability(_))));
	assert!(matches!(pool.uninstall_global_hooks(), Err(Error::Capability(_))));
}
