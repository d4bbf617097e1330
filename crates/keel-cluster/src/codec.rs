use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::ClusterResult;

/// Upper bound on a single wire frame. Control-plane messages are small;
/// the bound exists to reject garbage from a confused peer early.
const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// The wire framing: length-prefixed, self-describing JSON payloads.
/// Unknown fields are ignored on decode, which keeps the protocol
/// forward compatible.
pub fn new_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

pub fn encode<M: Serialize>(message: &M) -> ClusterResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

pub fn decode<M: DeserializeOwned>(frame: &BytesMut) -> ClusterResult<M> {
    Ok(serde_json::from_slice(frame)?)
}
