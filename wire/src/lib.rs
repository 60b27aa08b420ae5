//! Wire protocol shared by the `sqlite-bridge` client and worker: frame
//! codec, request/response envelopes, and the tagged [`Value`] type.

pub mod codec;
pub mod message;
pub mod value;

pub use codec::{FrameCodec, FrameError, DEFAULT_MAX_FRAME_SIZE};
pub use message::{
    Method, Outcome, QueryParams, QueryResult, Request, RequestId, Response, RpcError, Row,
    CODE_INVALID_REQUEST, CODE_METHOD_NOT_ALLOWED, CODE_PARSE_ERROR,
};
pub use value::{needs_blob_encoding, Value};
