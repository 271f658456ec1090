//! Shared NDJSON stream adaptor for streaming endpoints.

use crate::codec::NdJsonDecoder;
use crate::error::{DockerError, Result, StreamError};
use crate::transport::StreamSession;
use futures_util::stream::{unfold, Stream};
use serde::de::DeserializeOwned;
use std::pin::Pin;

struct NdJsonState {
    session: StreamSession,
    decoder: NdJsonDecoder,
    infinite: bool,
    finished: bool,
}

/// Turn a streaming session into a sequence of decoded NDJSON values.
///
/// Values come out in daemon write order; nothing is reordered or
/// deduplicated. For `infinite` streams (event subscriptions, followed
/// logs) any end of input, clean or not, is a mid-stream disconnect and
/// fails the sequence with `StreamError::Disconnected`; finite streams
/// end cleanly on the chunked terminator, flagging a truncated trailing
/// line as a codec error.
pub(crate) fn ndjson_stream<T>(
    session: StreamSession,
    infinite: bool,
) -> Pin<Box<dyn Stream<Item = Result<T>> + Send>>
where
    T: DeserializeOwned + Send + 'static,
{
    let state = NdJsonState {
        session,
        decoder: NdJsonDecoder::new(),
        infinite,
        finished: false,
    };
    Box::pin(unfold(state, |mut st| async move {
        if st.finished {
            return None;
        }
        loop {
            match st.decoder.next_value::<T>() {
                Ok(Some(value)) => return Some((Ok(value), st)),
                Ok(None) => {}
                Err(e) => {
                    st.finished = true;
                    return Some((Err(DockerError::Codec(e)), st));
                }
            }
            match st.session.next_chunk().await {
                Ok(Some(chunk)) => st.decoder.feed(&chunk),
                Ok(None) => {
                    st.finished = true;
                    if st.infinite {
                        return Some((Err(DockerError::Stream(StreamError::Disconnected)), st));
                    }
                    if let Err(e) = st.decoder.finish() {
                        return Some((Err(DockerError::Codec(e)), st));
                    }
                    return None;
                }
                Err(_) => {
                    st.finished = true;
                    return Some((Err(DockerError::Stream(StreamError::Disconnected)), st));
                }
            }
        }
    }))
}
