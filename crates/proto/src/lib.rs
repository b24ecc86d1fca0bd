//! Shared wire types for pdfhost instances.
//!
//! This crate defines everything that crosses the boundary between a caller and an
//! engine host: opaque [`Reference`]s, the [`Request`]/[`Response`] envelope, the
//! reverse callback messages, the error taxonomy, and the length-prefixed postcard
//! frame codec used on worker pipes.

#![warn(missing_docs)]

pub mod callback;
pub mod error;
pub mod frame;
pub mod reference;
pub mod request;
pub mod response;

pub use callback::{
	CallbackCall, CallbackReply, CallbackSlot, CallbackSlots, Event, FocusChange, GoToAction, Invalidation, LocalTime,
};
pub use error::{LoadError, NativeFailure, PdfError};
pub use frame::{CallbackId, FrameError, IpcFrame, MAX_FRAME_LEN, PROTOCOL_VERSION, RequestId, read_frame, write_frame};
pub use reference::{InstanceId, PageIndex, PageSelector, RefKind, Reference};
pub use request::{DocumentSource, Matrix, RectF, RenderArea, Request, SaveTarget};
pub use response::{
	ActionType, BitmapInfo, DocPermissions, FocusedAnnotation, PageSize, RenderStatus, Response, SaveOutcome,
};
