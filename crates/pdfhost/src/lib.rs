//! Pooled access to a single-threaded PDF engine.
//!
//! The engine behind [`pdfhost_engine::PdfEngine`] is not reentrant and keeps
//! process-wide state, so every engine context lives inside an [`Instance`]
//! that serves one request at a time. A [`Pool`] multiplexes many callers onto
//! a bounded set of instances in one of three [`Mode`]s:
//!
//! - `in_process`: engines share the caller's process behind one native lock.
//! - `sandbox`: each engine runs on its own isolated thread.
//! - `process`: each engine is a `pdfhost-worker` child process.
//!
//! Callers never see native handles; they hold [`Reference`]s minted by the
//! instance that owns the object, and a reference used after its object (or
//! instance) is gone fails with a stale-reference error.
//!
//! ```no_run
//! # async fn demo() -> pdfhost::Result<()> {
//! use pdfhost::{DocumentSource, Pool, PoolConfig};
//! use pdfhost_engine::MemoryEngine;
//!
//! let pool = Pool::from_config(PoolConfig::default(), MemoryEngine::new)?;
//! let lease = pool.acquire().await?;
//! let document = lease.open_document(DocumentSource::Path("report.pdf".into()), None).await?;
//! let pages = lease.page_count(document).await?;
//! lease.close_document(document).await?;
//! # let _ = pages;
//! # Ok(())
//! # }
//! ```

// Used only by the worker binary.
use clap as _;
use tracing_subscriber as _;

pub mod broker;
pub mod config;
pub mod error;
mod host;
pub mod instance;
pub mod pool;
pub mod spawn;
pub mod transport;
pub mod worker;

pub use broker::{CallbackBroker, CallbackError, CallbackFailure, CallbackResult, FormCallbacks, PausePredicate};
pub use config::{ConfigError, LeasePolicy, Mode, PoolConfig, WorkerConfig};
pub use error::{Error, Result};
pub use instance::{Instance, InstanceState, SaveOptions, SaveOutput};
pub use pdfhost_proto::{
	DocPermissions, DocumentSource, InstanceId, PageSelector, PdfError, RefKind, Reference, RenderArea, RenderStatus, Request,
	Response, SaveOutcome,
};
pub use pool::{Lease, Pool, PoolStats};
pub use transport::{InProcessLauncher, LaunchOptions, Launcher, ProcessLauncher, SandboxLauncher, Transport};
