//! Errors produced while serving a request.
//!
//! These cross process boundaries unchanged, so callers see the same message in
//! every transport mode.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reference::RefKind;

/// Failure reported by the engine while opening a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LoadError {
	/// Unspecified engine failure.
	#[error("1: unknown error")]
	Unknown,
	/// The file could not be found or read.
	#[error("2: unable to read file")]
	File,
	/// The data is not a document the engine understands.
	#[error("3: incorrect format")]
	Format,
	/// A password is required or the given one is wrong.
	#[error("4: invalid password")]
	Password,
	/// Unsupported security scheme.
	#[error("5: invalid encryption")]
	Security,
	/// The page could not be found or loaded.
	#[error("6: incorrect page")]
	Page,
}

/// An engine operation that reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NativeFailure {
	/// Copying pages between documents failed.
	#[error("import of pages failed")]
	ImportPages,
	/// A structure attribute object could not be obtained.
	#[error("could not get attribute")]
	Attribute,
	/// The transform and clip could not be applied.
	#[error("could not apply clip transform")]
	ClipTransform,
	/// The document could not be serialized.
	#[error("save of document failed")]
	Save,
	/// The bitmap could not be allocated.
	#[error("could not create bitmap")]
	CreateBitmap,
	/// The form-fill environment could not be created.
	#[error("could not init form fill environment")]
	FormFillEnvironment,
	/// The page has no structure tree.
	#[error("could not load struct tree")]
	StructTree,
	/// The structure element does not exist.
	#[error("could not load struct element")]
	StructElement,
	/// The signature does not exist.
	#[error("could not get signature object")]
	Signature,
}

/// Error returned by an instance for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PdfError {
	/// A required argument was missing or malformed.
	#[error("{0}")]
	Argument(String),
	/// The reference was closed, never existed, or belongs to another instance.
	#[error("could not find {kind} handle, perhaps the {kind} was already closed or you tried to share {kind}s between instances")]
	StaleReference {
		/// Kind the operation expected.
		kind: RefKind,
	},
	/// The document could not be opened.
	#[error(transparent)]
	Load(#[from] LoadError),
	/// An engine operation reported failure.
	#[error(transparent)]
	Native(#[from] NativeFailure),
	/// The call is not valid in the current session state.
	#[error("{0}")]
	InvalidState(String),
	/// The output would exceed the caller's size limit; nothing was written.
	#[error("PDF image would exceed maximum filesize")]
	MaxSizeExceeded {
		/// Caller limit.
		limit: u64,
		/// Size the output would have had.
		actual: u64,
	},
	/// The engine does not support the operation.
	#[error("{0}")]
	Unsupported(String),
	/// Reading or writing a file on the engine host failed.
	#[error("{0}")]
	Io(String),
}

impl PdfError {
	/// `"<kind> not given"`.
	pub fn not_given(kind: RefKind) -> Self {
		Self::Argument(format!("{kind} not given"))
	}

	/// Returns true when a document could not be opened because of its password.
	pub fn is_password(&self) -> bool {
		matches!(self, Self::Load(LoadError::Password))
	}
}

impl From<std::io::Error> for PdfError {
	fn from(error: std::io::Error) -> Self {
		Self::Io(error.to_string())
	}
}
