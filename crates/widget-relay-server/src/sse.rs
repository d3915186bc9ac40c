//! SSE framing and response assembly.

use crate::session_table::SessionGuard;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use tokio::sync::mpsc;

/// Frame one named SSE event.
pub fn event_chunk(event: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {data}\n\n"))
}

/// Frame one protocol reply as the default `message` event.
pub fn message_chunk(json: &str) -> Bytes {
    event_chunk("message", json)
}

/// Body stream for one session: the endpoint prelude, then every queued
/// event until the sender side closes or the client disconnects.
///
/// The stream owns the session's teardown guard; axum drops the body when
/// the connection goes away, which runs the guard.
pub fn session_event_stream(
    prelude: Bytes,
    mut events_rx: mpsc::Receiver<Bytes>,
    guard: SessionGuard,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let _guard = guard;
        yield Ok::<Bytes, Infallible>(prelude);
        while let Some(chunk) = events_rx.recv().await {
            yield Ok(chunk);
        }
    }
}

/// Wrap a byte stream as a long-lived `text/event-stream` response.
pub fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    (headers, Body::from_stream(stream)).into_response()
}
