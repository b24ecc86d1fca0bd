//! Per-instance table mapping [`Reference`]s to native handles.

use pdfhost_proto::{InstanceId, PdfError, RefKind, Reference};
use rustc_hash::FxHashMap;

use crate::native::Handle;

/// A reference removed from the table together with its native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Released {
	/// The invalidated reference.
	pub reference: Reference,
	/// The native handle it stood for.
	pub native: Handle,
}

#[derive(Debug)]
struct Entry {
	native: Handle,
	parent: Option<Reference>,
	children: Vec<Reference>,
}

/// Maps the references one instance minted to native handles.
///
/// IDs are allocated per kind from 1 upward and never reused. Each entry
/// remembers its parent so closing a document invalidates everything obtained
/// from it.
#[derive(Debug)]
pub struct RefTable {
	instance: InstanceId,
	next: [u64; RefKind::COUNT],
	entries: FxHashMap<Reference, Entry>,
	by_native: FxHashMap<(RefKind, Handle), Reference>,
}

impl RefTable {
	/// Creates an empty table for `instance`.
	pub fn new(instance: InstanceId) -> Self {
		Self {
			instance,
			next: [1; RefKind::COUNT],
			entries: FxHashMap::default(),
			by_native: FxHashMap::default(),
		}
	}

	/// Instance the references belong to.
	pub fn instance(&self) -> InstanceId {
		self.instance
	}

	/// Number of live references.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Returns true if no reference is live.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Returns true if `reference` is live in this table.
	pub fn contains(&self, reference: &Reference) -> bool {
		reference.instance == self.instance && self.entries.contains_key(reference)
	}

	/// Mints a root reference for `native`.
	pub fn alloc(&mut self, kind: RefKind, native: Handle) -> Reference {
		self.insert(kind, native, None)
	}

	/// Mints a reference whose lifetime is bounded by `parent`.
	///
	/// `parent` must be live; callers resolve it first.
	pub fn alloc_child(&mut self, kind: RefKind, native: Handle, parent: Reference) -> Reference {
		debug_assert!(self.entries.contains_key(&parent), "parent {parent} is not live");
		self.insert(kind, native, Some(parent))
	}

	fn insert(&mut self, kind: RefKind, native: Handle, parent: Option<Reference>) -> Reference {
		if let Some(existing) = self.by_native.get(&(kind, native)) {
			return *existing;
		}

		let slot = &mut self.next[kind.index()];
		let reference = Reference::new(kind, *slot, self.instance);
		*slot += 1;

		let parent = parent.filter(|parent| self.entries.contains_key(parent));
		if let Some(parent) = parent
			&& let Some(entry) = self.entries.get_mut(&parent)
		{
			entry.children.push(reference);
		}
		self.entries.insert(
			reference,
			Entry {
				native,
				parent,
				children: Vec::new(),
			},
		);
		self.by_native.insert((kind, native), reference);
		reference
	}

	/// Resolves `reference`, which must be of `expected` kind.
	///
	/// # Errors
	///
	/// `"<kind> not given"` for the zero value; a stale-reference error if the
	/// reference has another kind, belongs to another instance, or is no longer live.
	pub fn resolve(&self, reference: Reference, expected: RefKind) -> Result<Handle, PdfError> {
		if reference.is_nil() {
			return Err(PdfError::not_given(expected));
		}
		if reference.kind != expected || reference.instance != self.instance {
			return Err(PdfError::StaleReference { kind: expected });
		}
		self.entries
			.get(&reference)
			.map(|entry| entry.native)
			.ok_or(PdfError::StaleReference { kind: expected })
	}

	/// Parent of a live reference.
	pub fn parent(&self, reference: &Reference) -> Option<Reference> {
		self.entries.get(reference).and_then(|entry| entry.parent)
	}

	/// Live reference minted for `native`, if any.
	pub fn find(&self, kind: RefKind, native: Handle) -> Option<Reference> {
		self.by_native.get(&(kind, native)).copied()
	}

	/// Invalidates `reference` and everything obtained from it.
	///
	/// Returns the removed entries children first, so natives can be released in a
	/// safe order. Returns nothing if the reference is not live.
	pub fn invalidate(&mut self, reference: Reference) -> Vec<Released> {
		let mut released = Vec::new();
		if let Some(parent) = self.parent(&reference)
			&& let Some(entry) = self.entries.get_mut(&parent)
		{
			entry.children.retain(|child| *child != reference);
		}
		self.remove_tree(reference, &mut released);
		released
	}

	/// Invalidates every live reference, children first.
	pub fn clear(&mut self) -> Vec<Released> {
		let mut roots: Vec<Reference> = self
			.entries
			.iter()
			.filter(|(_, entry)| entry.parent.is_none())
			.map(|(reference, _)| *reference)
			.collect();
		roots.sort_by_key(|reference| (reference.kind, reference.id));

		let mut released = Vec::with_capacity(self.entries.len());
		for root in roots {
			self.remove_tree(root, &mut released);
		}
		released
	}

	fn remove_tree(&mut self, reference: Reference, released: &mut Vec<Released>) {
		let Some(entry) = self.entries.remove(&reference) else {
			return;
		};
		for child in entry.children {
			self.remove_tree(child, released);
		}
		if self.by_native.get(&(reference.kind, entry.native)) == Some(&reference) {
			self.by_native.remove(&(reference.kind, entry.native));
		}
		released.push(Released {
			reference,
			native: entry.native,
		});
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use proptest::prelude::*;

	use super::*;

	const HERE: InstanceId = InstanceId(1);

	#[test]
	fn ids_are_monotonic_per_kind() {
		let mut table = RefTable::new(HERE);
		let a = table.alloc(RefKind::Document, Handle(10));
		let b = table.alloc(RefKind::Document, Handle(11));
		let page = table.alloc_child(RefKind::Page, Handle(12), a);
		assert_eq!((a.id, b.id, page.id), (1, 2, 1));

		table.invalidate(a);
		let c = table.alloc(RefKind::Document, Handle(10));
		assert_eq!(c.id, 3);
	}

	#[test]
	fn same_native_resolves_to_same_reference() {
		let mut table = RefTable::new(HERE);
		let document = table.alloc(RefKind::Document, Handle(1));
		let first = table.alloc_child(RefKind::Action, Handle(5), document);
		let second = table.alloc_child(RefKind::Action, Handle(5), document);
		assert_eq!(first, second);
		assert_eq!(table.find(RefKind::Action, Handle(5)), Some(first));
	}

	#[test]
	fn nil_reference_is_not_given() {
		let table = RefTable::new(HERE);
		let error = table.resolve(Reference::nil(RefKind::Document), RefKind::Document).unwrap_err();
		assert_eq!(error.to_string(), "document not given");
		let error = table.resolve(Reference::default(), RefKind::Signature).unwrap_err();
		assert_eq!(error.to_string(), "signature not given");
	}

	#[test]
	fn foreign_and_mistyped_references_are_stale() {
		let mut table = RefTable::new(HERE);
		let other = RefTable::new(InstanceId(2));
		let document = table.alloc(RefKind::Document, Handle(1));

		assert_eq!(
			other.resolve(document, RefKind::Document),
			Err(PdfError::StaleReference { kind: RefKind::Document })
		);
		assert_eq!(table.resolve(document, RefKind::Page), Err(PdfError::StaleReference { kind: RefKind::Page }));
		assert_eq!(table.resolve(document, RefKind::Document), Ok(Handle(1)));
	}

	#[test]
	fn closing_a_document_cascades_children_first() {
		let mut table = RefTable::new(HERE);
		let document = table.alloc(RefKind::Document, Handle(1));
		let page = table.alloc_child(RefKind::Page, Handle(2), document);
		let tree = table.alloc_child(RefKind::StructTree, Handle(3), page);
		let form = table.alloc_child(RefKind::FormHandle, Handle(4), document);
		let annotation = table.alloc_child(RefKind::Annotation, Handle(5), form);
		let bitmap = table.alloc(RefKind::Bitmap, Handle(6));

		let released: Vec<Reference> = table.invalidate(document).into_iter().map(|r| r.reference).collect();
		assert_eq!(released, vec![tree, page, annotation, form, document]);

		for (reference, kind) in [
			(document, RefKind::Document),
			(page, RefKind::Page),
			(tree, RefKind::StructTree),
			(form, RefKind::FormHandle),
			(annotation, RefKind::Annotation),
		] {
			assert_eq!(table.resolve(reference, kind), Err(PdfError::StaleReference { kind }));
		}
		assert_eq!(table.resolve(bitmap, RefKind::Bitmap), Ok(Handle(6)));
		assert!(table.invalidate(document).is_empty());
	}

	#[test]
	fn closing_a_child_detaches_it_from_its_parent() {
		let mut table = RefTable::new(HERE);
		let document = table.alloc(RefKind::Document, Handle(1));
		let page = table.alloc_child(RefKind::Page, Handle(2), document);
		assert_eq!(table.invalidate(page).len(), 1);
		assert_eq!(table.invalidate(document).len(), 1);
		assert!(table.is_empty());
	}

	#[test]
	fn clear_invalidates_every_kind() {
		let mut table = RefTable::new(HERE);
		let document = table.alloc(RefKind::Document, Handle(100));
		let mut minted = vec![document];
		for (offset, kind) in RefKind::ALL.iter().skip(1).enumerate() {
			minted.push(table.alloc_child(*kind, Handle(offset as u64), document));
		}

		let released = table.clear();
		assert_eq!(released.len(), RefKind::COUNT);
		assert_eq!(released.last().map(|r| r.reference), Some(document));
		for reference in minted {
			assert_eq!(
				table.resolve(reference, reference.kind),
				Err(PdfError::StaleReference { kind: reference.kind })
			);
		}
	}

	proptest! {
		#[test]
		fn live_references_resolve_and_dead_ones_never_do(ops in prop::collection::vec((0u8..3, 0usize..12), 1..64)) {
			let mut table = RefTable::new(HERE);
			let mut live: Vec<Reference> = Vec::new();
			let mut dead: Vec<Reference> = Vec::new();
			let mut native = 0u64;

			for (op, pick) in ops {
				match op {
					0 => {
						native += 1;
						live.push(table.alloc(RefKind::ALL[pick], Handle(native)));
					}
					1 if !live.is_empty() => {
						let reference = live.remove(pick % live.len());
						let released = table.invalidate(reference);
						prop_assert_eq!(released.len(), 1);
						dead.push(reference);
					}
					_ => {}
				}
			}

			for reference in &live {
				prop_assert!(table.resolve(*reference, reference.kind).is_ok());
			}
			for reference in &dead {
				prop_assert!(table.resolve(*reference, reference.kind).is_err());
			}
			let mut ids: Vec<(RefKind, u64)> = live.iter().map(|r| (r.kind, r.id)).collect();
			ids.sort();
			ids.dedup();
			prop_assert_eq!(ids.len(), live.len());
		}
	}
}
