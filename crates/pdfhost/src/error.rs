//! Caller-side errors.

use std::time::Duration;

use pdfhost_proto::{FrameError, InstanceId, PdfError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by pools, instances and transports.
#[derive(Debug, Error)]
pub enum Error {
	/// The instance served the request and reported failure.
	#[error(transparent)]
	Pdf(#[from] PdfError),

	/// The worker died while a request was outstanding or before one was sent.
	#[error("worker died: {0}")]
	WorkerDied(String),

	/// A call did not complete within the call timeout.
	#[error("call timed out after {0:?}")]
	Timeout(Duration),

	/// No instance became available within the acquire timeout.
	#[error("timed out waiting for an idle instance")]
	AcquireTimeout,

	/// The caller cancelled a wait.
	#[error("cancelled")]
	Cancelled,

	/// The pool was closed.
	#[error("pool is closed")]
	PoolClosed,

	/// The instance was closed by its owner.
	#[error("instance is closed")]
	InstanceClosed,

	/// The instance a reference belongs to is no longer part of the pool.
	#[error("{0} is gone")]
	InstanceGone(InstanceId),

	/// The operation is not available in the current mode.
	#[error("{0}")]
	Capability(String),

	/// The worker failed to start.
	#[error("handshake failed: {0}")]
	Handshake(String),

	/// The peer violated the frame protocol.
	#[error("protocol violation: {0}")]
	Protocol(String),

	/// A request got a response of the wrong shape.
	#[error("{request} returned unexpected {response}")]
	UnexpectedResponse {
		/// Request name.
		request: &'static str,
		/// Response name.
		response: &'static str,
	},

	/// Frame encoding or transport I/O failed.
	#[error(transparent)]
	Frame(#[from] FrameError),

	/// Invalid configuration.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// Writing caller-side output failed.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// Returns true when the instance that produced this error can no longer serve requests.
	pub fn is_fatal(&self) -> bool {
		matches!(self, Self::WorkerDied(_) | Self::Timeout(_) | Self::Frame(_) | Self::Protocol(_))
	}

	/// Returns true when a document could not be opened because of its password.
	pub fn is_password(&self) -> bool {
		matches!(self, Self::Pdf(error) if error.is_password())
	}

	/// The instance-reported error, if this is one.
	pub fn as_pdf(&self) -> Option<&PdfError> {
		match self {
			Self::Pdf(error) => Some(error),
			_ => None,
		}
	}
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use pdfhost_proto::LoadError;

	use super::*;

	#[test]
	fn password_errors_are_distinguishable() {
		let error = Error::from(PdfError::Load(LoadError::Password));
		assert!(error.is_password());
		assert!(!error.is_fatal());
		assert_eq!(error.to_string(), "4: invalid password");
		assert!(!Error::from(PdfError::Load(LoadError::Format)).is_password());
	}

	#[test]
	fn transport_failures_are_fatal() {
		assert!(Error::WorkerDied("exit status 134".into()).is_fatal());
		assert!(Error::Timeout(Duration::from_secs(1)).is_fatal());
		assert!(!Error::AcquireTimeout.is_fatal());
		assert!(!Error::Capability("no".into()).is_fatal());
	}
}
