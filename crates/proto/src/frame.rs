//! Length-prefixed binary framing for engine host pipes.
//!
//! Each frame is a little-endian `u32` byte length followed by a postcard encoding
//! of one [`IpcFrame`]. Binary payloads travel as raw byte vectors inside the
//! frame, so no text escaping is involved.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::callback::{CallbackCall, CallbackReply, Event};
use crate::error::PdfError;
use crate::reference::InstanceId;
use crate::request::Request;
use crate::response::Response;

/// Version of the frame protocol; caller and host must agree.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame body in bytes.
pub const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

/// Correlates a request with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Correlates a callback with its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackId(pub u64);

/// Everything that travels on an engine host channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IpcFrame {
	/// Caller to host: first frame on a worker pipe.
	Hello {
		/// Caller protocol version.
		protocol: u32,
		/// Identity the host mints references under.
		instance: InstanceId,
	},
	/// Host to caller: the engine context is up.
	Ready {
		/// Host protocol version.
		protocol: u32,
		/// Engine name for diagnostics.
		engine: String,
	},
	/// Caller to host: run one request.
	Request {
		/// Correlation id.
		id: RequestId,
		/// The call.
		request: Request,
	},
	/// Host to caller: outcome of a request.
	Response {
		/// Correlation id of the request.
		id: RequestId,
		/// The outcome.
		result: Result<Response, PdfError>,
	},
	/// Host to caller: nested callback while a request runs.
	Callback {
		/// Correlation id.
		id: CallbackId,
		/// The call.
		call: CallbackCall,
	},
	/// Caller to host: answer to a callback.
	CallbackReply {
		/// Correlation id of the callback.
		id: CallbackId,
		/// The answer.
		reply: CallbackReply,
	},
	/// Host to caller: unsolicited notification.
	Event(Event),
	/// Caller to host: release everything and exit.
	Shutdown,
}

/// Failure to move a frame across a pipe.
#[derive(Debug, Error)]
pub enum FrameError {
	/// The pipe failed.
	#[error("frame I/O failed: {0}")]
	Io(#[from] std::io::Error),
	/// The frame body could not be encoded or decoded.
	#[error("frame codec failed: {0}")]
	Codec(#[from] postcard::Error),
	/// The frame exceeds [`MAX_FRAME_LEN`].
	#[error("frame of {0} bytes exceeds the frame limit")]
	TooLarge(u64),
}

/// Writes one frame and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &IpcFrame) -> Result<(), FrameError>
where
	W: AsyncWrite + Unpin,
{
	let body = postcard::to_allocvec(frame)?;
	let len = u32::try_from(body.len())
		.ok()
		.filter(|len| *len <= MAX_FRAME_LEN)
		.ok_or(FrameError::TooLarge(body.len() as u64))?;
	writer.write_u32_le(len).await?;
	writer.write_all(&body).await?;
	writer.flush().await?;
	Ok(())
}

/// Reads one frame; `None` on a clean end of stream at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<IpcFrame>, FrameError>
where
	R: AsyncRead + Unpin,
{
	let len = match reader.read_u32_le().await {
		Ok(len) => len,
		Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
		Err(error) => return Err(error.into()),
	};
	if len > MAX_FRAME_LEN {
		return Err(FrameError::TooLarge(u64::from(len)));
	}
	let mut body = vec![0u8; len as usize];
	reader.read_exact(&mut body).await?;
	Ok(Some(postcard::from_bytes(&body)?))
}
