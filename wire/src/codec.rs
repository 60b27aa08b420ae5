//! Line-delimited JSON framing shared by the parent and the worker.
//!
//! Exactly one JSON object per line, separated by a single `\n`. No inner
//! length prefix: the codec scans for the separator the same way
//! `tokio_util::codec::LinesCodec` does, but decodes straight into `T`
//! instead of handing back a raw `String`.

use std::marker::PhantomData;

use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

/// Default frame ceiling: 16 MiB, matching the reference implementation.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame exceeded the maximum size of {limit} bytes")]
    TooLarge { limit: usize },
    /// The line was not syntactically valid JSON at all.
    #[error("malformed json: {0}")]
    Syntax(serde_json::Error),
    /// The line was valid JSON but did not match the expected envelope shape
    /// (e.g. a request missing `id`/`method`/`params`, or wrong field types).
    #[error("invalid envelope: {0}")]
    Schema(serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A `Decoder`/`Encoder` pair framing `T` as one compact JSON object per line.
///
/// Shared, generic over the message type, so the same codec drives both the
/// request stream (parent -> worker) and the response stream (worker ->
/// parent) -- each side just instantiates it with the type it reads.
pub struct FrameCodec<T> {
    max_frame_size: usize,
    _marker: PhantomData<T>,
}

impl<T> FrameCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for FrameCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

// `#[derive(Clone)]` would require `T: Clone`, which we don't need -- the
// codec itself carries no data keyed on T.
impl<T> Clone for FrameCodec<T> {
    fn clone(&self) -> Self {
        Self {
            max_frame_size: self.max_frame_size,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Decoder for FrameCodec<T> {
    type Item = T;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, FrameError> {
        let Some(newline_at) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > self.max_frame_size {
                return Err(FrameError::TooLarge {
                    limit: self.max_frame_size,
                });
            }
            return Ok(None);
        };

        if newline_at > self.max_frame_size {
            return Err(FrameError::TooLarge {
                limit: self.max_frame_size,
            });
        }

        let mut line = src.split_to(newline_at + 1);
        line.truncate(line.len() - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }

        // Parse in two passes so a caller can tell a syntactically broken
        // frame (-32700, CODE_PARSE_ERROR) apart from one that is valid JSON
        // but the wrong shape for this envelope (-32600, CODE_INVALID_REQUEST).
        let raw: serde_json::Value =
            serde_json::from_slice(&line).map_err(FrameError::Syntax)?;
        let value = serde_json::from_value(raw).map_err(FrameError::Schema)?;
        Ok(Some(value))
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec<T> {
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), FrameError> {
        let json = serde_json::to_vec(&item).map_err(FrameError::Syntax)?;
        if json.len() > self.max_frame_size {
            return Err(FrameError::TooLarge {
                limit: self.max_frame_size,
            });
        }
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
