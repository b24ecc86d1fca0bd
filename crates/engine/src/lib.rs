//! Engine side of the PDF host.
//!
//! Everything here runs on the thread that owns a native engine: the
//! [`PdfEngine`] boundary, the per-instance [`RefTable`] and the [`Executor`]
//! that serves protocol requests against both. [`MemoryEngine`] is a complete
//! engine over fixture documents, used by the worker binary and the tests.

pub mod executor;
pub mod memory;
pub mod native;
pub mod refs;

pub use executor::{CallbackHost, DetachedHost, Executor};
pub use memory::{
	Fault, FixtureAction, FixtureBookmark, FixtureDocument, FixtureField, FixturePage, FixtureSecurity, FixtureSignature,
	FixtureStructElement, MemoryEngine, OWNER_PERMISSIONS,
};
pub use native::{DocumentData, EngineFactory, FormHooks, GlobalHooks, Handle, NoHooks, PdfEngine, TimeSource, UnsupportedHandler};
pub use refs::{RefTable, Released};
