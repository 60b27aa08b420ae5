//! The worker's serial RPC loop: read a frame, dispatch it, write the reply.

use futures::{SinkExt, StreamExt};
use sqlite_bridge_wire::{
    FrameCodec, FrameError, Request, Response, RpcError, CODE_INVALID_REQUEST, CODE_PARSE_ERROR,
};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::dispatch::{dispatch, Dispatched};
use crate::engine::Engine;
use crate::transport::{BoxedRead, BoxedWrite};

/// Runs until the input stream closes (exit code 0) or a framing failure
/// forces a terminal error frame and shutdown (exit code 1).
pub async fn serve(read: BoxedRead, write: BoxedWrite) -> i32 {
    let mut reader = FramedRead::new(read, FrameCodec::<Request>::new());
    let mut writer = FramedWrite::new(write, FrameCodec::<Response>::new());
    let mut engine = Engine::new();

    loop {
        let frame = match reader.next().await {
            None => {
                tracing::debug!("input stream closed, shutting down");
                return 0;
            }
            Some(Ok(req)) => req,
            Some(Err(err)) => {
                tracing::error!(%err, "malformed frame, terminating");
                // Malformed JSON is a parse error (-32700); valid JSON that
                // doesn't fit the request envelope -- or an oversized frame
                // -- is a framing/protocol error (-32600).
                let code = match &err {
                    FrameError::Syntax(_) => CODE_PARSE_ERROR,
                    FrameError::Schema(_) | FrameError::TooLarge { .. } | FrameError::Io(_) => {
                        CODE_INVALID_REQUEST
                    }
                };
                let _ = writer
                    .send(Response::terminal(RpcError::with_code(
                        err.to_string(),
                        code,
                    )))
                    .await;
                return 1;
            }
        };

        match dispatch(&mut engine, frame) {
            Dispatched::Reply(resp) => {
                if writer.send(resp).await.is_err() {
                    tracing::error!("failed to write response, terminating");
                    return 1;
                }
            }
            Dispatched::Fatal(err) => {
                tracing::error!(%err, "malformed request envelope, terminating");
                let _ = writer.send(Response::terminal(err)).await;
                return 1;
            }
        }
    }
}
