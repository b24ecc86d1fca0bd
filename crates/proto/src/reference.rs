//! Opaque handles that stand in for native pointers.
//!
//! A [`Reference`] is only meaningful on the instance that minted it. Native
//! pointers never leave an engine host; callers hold `(kind, id, instance)`
//! triples that the owning host resolves through its reference table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one running instance.
///
/// Allocated from a process-wide monotonic clock and never reused, so a reference
/// minted by a dead instance can never resolve against its replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "instance-{}", self.0)
	}
}

/// Kind of native object a [`Reference`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum RefKind {
	/// An open document.
	#[default]
	Document,
	/// A loaded page of a document.
	Page,
	/// A bitmap render target.
	Bitmap,
	/// An outline entry.
	Bookmark,
	/// An action attached to a bookmark or link.
	Action,
	/// A destination inside a document.
	Dest,
	/// A form-fill environment bound to a document.
	FormHandle,
	/// An annotation reported by a form-fill environment.
	Annotation,
	/// A digital signature object.
	Signature,
	/// The structure tree of a page.
	StructTree,
	/// An element of a structure tree.
	StructElement,
	/// An attribute object of a structure element.
	StructElementAttribute,
}

impl RefKind {
	/// Number of kinds.
	pub const COUNT: usize = 12;

	/// Every kind, in declaration order.
	pub const ALL: [RefKind; Self::COUNT] = [
		RefKind::Document,
		RefKind::Page,
		RefKind::Bitmap,
		RefKind::Bookmark,
		RefKind::Action,
		RefKind::Dest,
		RefKind::FormHandle,
		RefKind::Annotation,
		RefKind::Signature,
		RefKind::StructTree,
		RefKind::StructElement,
		RefKind::StructElementAttribute,
	];

	/// Name used in error messages.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Document => "document",
			Self::Page => "page",
			Self::Bitmap => "bitmap",
			Self::Bookmark => "bookmark",
			Self::Action => "action",
			Self::Dest => "dest",
			Self::FormHandle => "formHandle",
			Self::Annotation => "annotation",
			Self::Signature => "signature",
			Self::StructTree => "structTree",
			Self::StructElement => "structElement",
			Self::StructElementAttribute => "structElementAttribute",
		}
	}

	/// Position of this kind in [`RefKind::ALL`].
	pub const fn index(self) -> usize {
		self as usize
	}
}

impl fmt::Display for RefKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Opaque handle to a native object owned by one instance.
///
/// The zero value (`id == 0`) means "not given".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Reference {
	/// Kind of the referenced object.
	pub kind: RefKind,
	/// Identifier, unique per `(instance, kind)`, starting at 1.
	pub id: u64,
	/// Instance that minted this reference.
	pub instance: InstanceId,
}

impl Reference {
	/// Creates a reference.
	pub const fn new(kind: RefKind, id: u64, instance: InstanceId) -> Self {
		Self { kind, id, instance }
	}

	/// The zero value of `kind`.
	pub const fn nil(kind: RefKind) -> Self {
		Self {
			kind,
			id: 0,
			instance: InstanceId(0),
		}
	}

	/// Returns true for the zero value.
	pub const fn is_nil(&self) -> bool {
		self.id == 0
	}
}

impl fmt::Display for Reference {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}#{}@{}", self.kind, self.id, self.instance.0)
	}
}

/// A page addressed by document and zero-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageIndex {
	/// Owning document.
	pub document: Reference,
	/// Zero-based page index.
	pub index: u32,
}

/// Dual page addressing: exactly one of the two fields must be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageSelector {
	/// A page previously loaded with an explicit load call.
	pub by_reference: Option<Reference>,
	/// A page loaded on demand from a document.
	pub by_index: Option<PageIndex>,
}

impl PageSelector {
	/// Selects a loaded page.
	pub const fn reference(page: Reference) -> Self {
		Self {
			by_reference: Some(page),
			by_index: None,
		}
	}

	/// Selects page `index` of `document`.
	pub const fn index(document: Reference, index: u32) -> Self {
		Self {
			by_reference: None,
			by_index: Some(PageIndex { document, index }),
		}
	}

	/// The reference that decides which instance owns this page.
	pub fn owner(&self) -> Option<Reference> {
		self.by_reference.or(self.by_index.map(|page| page.document))
	}
}

impl From<Reference> for PageSelector {
	fn from(page: Reference) -> Self {
		Self::reference(page)
	}
}
