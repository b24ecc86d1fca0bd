//! Documents understood by [`MemoryEngine`](super::MemoryEngine).
//!
//! A fixture is a JSON description of a document behind a `%PDF-MEMORY` header.
//! Tests and demos build them with the chained setters below.

use std::collections::BTreeMap;

use pdfhost_proto::{LoadError, RectF};
use serde::{Deserialize, Serialize};

/// Header every fixture file starts with.
pub const FIXTURE_MAGIC: &[u8] = b"%PDF-MEMORY\n";

/// A whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureDocument {
	/// File version, e.g. 17 for 1.7.
	pub version: Option<i32>,
	/// Pages in order.
	pub pages: Vec<FixturePage>,
	/// Encryption, absent for unprotected documents.
	pub security: Option<FixtureSecurity>,
	/// Info dictionary.
	pub metadata: BTreeMap<String, String>,
	/// Top level outline entries.
	pub bookmarks: Vec<FixtureBookmark>,
	/// Signature objects.
	pub signatures: Vec<FixtureSignature>,
	/// Action run by the form-fill environment on open.
	pub open_action: Option<FixtureAction>,
	/// Feature codes reported to the unsupported-feature handler on load.
	pub unsupported_features: Vec<i32>,
	/// Makes every save fail.
	pub save_fails: bool,
}

/// One page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixturePage {
	/// Width in points.
	pub width: f32,
	/// Height in points.
	pub height: f32,
	/// Rotation in quarter turns.
	pub rotation: i32,
	/// Number of steps a progressive render takes.
	pub render_steps: u32,
	/// Fault triggered when the page is rendered.
	pub fault: Option<Fault>,
	/// Top level structure elements.
	pub structure: Vec<FixtureStructElement>,
	/// Interactive text fields.
	pub fields: Vec<FixtureField>,
}

impl Default for FixturePage {
	fn default() -> Self {
		Self {
			width: 612.0,
			height: 792.0,
			rotation: 0,
			render_steps: 2,
			fault: None,
			structure: Vec::new(),
			fields: Vec::new(),
		}
	}
}

/// Passwords and permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureSecurity {
	/// Password needed to open the document; none allows opening without one.
	pub user_password: Option<String>,
	/// Password granting every permission.
	pub owner_password: Option<String>,
	/// Permission word reported when opened with the user password.
	pub permissions: u32,
	/// Standard security handler revision.
	pub revision: i32,
}

/// An outline entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureBookmark {
	/// Display title.
	pub title: String,
	/// Action run when the entry is activated.
	pub action: Option<FixtureAction>,
	/// Nested entries.
	pub children: Vec<FixtureBookmark>,
}

/// Something a bookmark or the open action does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixtureAction {
	/// Go to a page of this document.
	GoTo {
		/// Zero-based page index.
		page: u32,
	},
	/// Go to another document.
	RemoteGoTo(String),
	/// Open a URI.
	Uri(String),
	/// Launch a file.
	Launch(String),
	/// Run a named action.
	Named(String),
	/// Script that starts a periodic timer.
	StartTimer {
		/// Interval in milliseconds.
		elapse_ms: u32,
	},
}

/// A signature object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureSignature {
	/// Raw contents, typically DER.
	pub contents: Vec<u8>,
	/// Signing reason.
	pub reason: Option<String>,
}

/// A structure element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureStructElement {
	/// Element type such as `P`.
	pub kind: String,
	/// Attribute objects.
	pub attributes: Vec<BTreeMap<String, String>>,
}

/// A text field widget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureField {
	/// Field name.
	pub name: String,
	/// Widget area in page space.
	pub rect: RectF,
	/// Initial value.
	pub value: String,
}

/// Failure injected into a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fault {
	/// Panic inside the engine.
	Panic,
	/// Abort the whole process.
	Abort,
	/// Block for a while.
	Hang {
		/// Milliseconds to block.
		millis: u64,
	},
}

impl FixtureDocument {
	/// A document with `pages` default pages.
	#[must_use]
	pub fn with_pages(pages: usize) -> Self {
		Self {
			version: Some(17),
			pages: vec![FixturePage::default(); pages],
			..Self::default()
		}
	}

	/// Appends a page.
	#[must_use]
	pub fn page(mut self, page: FixturePage) -> Self {
		self.pages.push(page);
		self
	}

	/// Encrypts the document.
	#[must_use]
	pub fn secured(mut self, security: FixtureSecurity) -> Self {
		self.security = Some(security);
		self
	}

	/// Sets an info dictionary entry.
	#[must_use]
	pub fn meta(mut self, tag: &str, value: &str) -> Self {
		self.metadata.insert(tag.to_owned(), value.to_owned());
		self
	}

	/// Appends a top level bookmark.
	#[must_use]
	pub fn bookmark(mut self, bookmark: FixtureBookmark) -> Self {
		self.bookmarks.push(bookmark);
		self
	}

	/// Appends a signature.
	#[must_use]
	pub fn signature(mut self, signature: FixtureSignature) -> Self {
		self.signatures.push(signature);
		self
	}

	/// Sets the open action.
	#[must_use]
	pub fn open_action(mut self, action: FixtureAction) -> Self {
		self.open_action = Some(action);
		self
	}

	/// Encodes the fixture as file bytes.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut bytes = FIXTURE_MAGIC.to_vec();
		// Serializing plain data into a Vec cannot fail.
		let _ = serde_json::to_writer(&mut bytes, self);
		bytes
	}

	/// Decodes file bytes.
	///
	/// # Errors
	///
	/// [`LoadError::Format`] if the header or body is not a fixture.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
		let body = bytes.strip_prefix(FIXTURE_MAGIC).ok_or(LoadError::Format)?;
		serde_json::from_slice(body).map_err(|error| {
			tracing::debug!(%error, "memory.fixture_rejected");
			LoadError::Format
		})
	}
}

impl FixturePage {
	/// Adds a text field.
	#[must_use]
	pub fn field(mut self, name: &str, rect: RectF, value: &str) -> Self {
		self.fields.push(FixtureField {
			name: name.to_owned(),
			rect,
			value: value.to_owned(),
		});
		self
	}

	/// Adds a structure element.
	#[must_use]
	pub fn element(mut self, element: FixtureStructElement) -> Self {
		self.structure.push(element);
		self
	}

	/// Injects a render fault.
	#[must_use]
	pub fn fault(mut self, fault: Fault) -> Self {
		self.fault = Some(fault);
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fixtures_survive_encoding() {
		let fixture = FixtureDocument::with_pages(2)
			.meta("Title", "Sample")
			.open_action(FixtureAction::StartTimer { elapse_ms: 5 });
		assert_eq!(FixtureDocument::from_bytes(&fixture.to_bytes()), Ok(fixture));
	}

	#[test]
	fn foreign_bytes_are_not_a_fixture() {
		assert_eq!(FixtureDocument::from_bytes(b"%PDF-1.7\n"), Err(LoadError::Format));
		assert_eq!(FixtureDocument::from_bytes(b"%PDF-MEMORY\n{broken"), Err(LoadError::Format));
	}
}
