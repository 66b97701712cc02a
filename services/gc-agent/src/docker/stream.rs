//! Incremental decoding of the `/events` stream.
//!
//! The daemon writes one JSON object per line and flushes at arbitrary
//! chunk boundaries, so lines are reassembled before decoding.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::stream::{self, Stream, StreamExt};
use imagegc_events::{EventError, EventMessage, RuntimeEvent};
use tracing::debug;

use crate::runtime::{EventStream, RuntimeError};

/// Splits a byte stream into newline-terminated lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
}

impl LineDecoder {
    /// Feed a chunk; returns every line it completes, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            lines.push(line.freeze());
        }
        lines
    }

    /// Flush a trailing line that was never terminated.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }
}

/// Decode a raw `/events` body into runtime events.
///
/// Blank lines are skipped. A line that fails to decode yields an error
/// item and the stream continues; a transport error ends the stream.
pub fn decode_event_stream<S, E>(body: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let lines = stream::unfold(
        (Box::pin(body), LineDecoder::default(), false),
        |(mut body, mut decoder, done)| async move {
            if done {
                return None;
            }
            match body.next().await {
                Some(Ok(chunk)) => {
                    let lines: Vec<_> = decoder.push(&chunk).into_iter().map(Ok).collect();
                    Some((lines, (body, decoder, false)))
                }
                Some(Err(e)) => {
                    let err = RuntimeError::Transport(format!("event stream: {e}"));
                    Some((vec![Err(err)], (body, decoder, true)))
                }
                None => {
                    let rest: Vec<_> = decoder.finish().into_iter().map(Ok).collect();
                    Some((rest, (body, decoder, true)))
                }
            }
        },
    )
    .flat_map(stream::iter);

    lines
        .filter_map(|line| async move {
            match line {
                Ok(line) => decode_line(&line),
                Err(e) => Some(Err(e)),
            }
        })
        .boxed()
}

fn decode_line(line: &[u8]) -> Option<Result<RuntimeEvent, RuntimeError>> {
    match EventMessage::from_json_line(line) {
        Ok(message) => {
            let event = message.into_runtime_event(Utc::now());
            debug!(kind = %event.kind, resource = %event.resource_ref, "Runtime event");
            Some(Ok(event))
        }
        Err(EventError::Empty) => None,
        Err(e) => Some(Err(RuntimeError::InvalidResponse(e.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagegc_events::EventKind;

    const DESTROY: &str = r#"{"Type":"container","Action":"destroy","Actor":{"ID":"c1","Attributes":{"image":"nginx:1.27"}},"time":1700000000,"timeNano":1700000000000000000}"#;
    const START: &str = r#"{"Type":"container","Action":"start","Actor":{"ID":"c2","Attributes":{"image":"redis:7"}}}"#;

    #[test]
    fn test_line_decoder_reassembles_chunks() {
        let mut decoder = LineDecoder::default();

        assert!(decoder.push(b"{\"a\":").is_empty());
        let lines = decoder.push(b"1}\r\n{\"b\":2}\n{\"c\"");
        assert_eq!(lines, vec![Bytes::from_static(b"{\"a\":1}"), Bytes::from_static(b"{\"b\":2}")]);

        assert_eq!(decoder.finish(), Some(Bytes::from_static(b"{\"c\"")));
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn test_decode_split_stream() {
        let payload = format!("{DESTROY}\n\n{START}\n");
        let (first, second) = payload.split_at(40);
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::copy_from_slice(first.as_bytes())),
            Ok(Bytes::copy_from_slice(second.as_bytes())),
        ];

        let events: Vec<_> = decode_event_stream(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);

        let destroy = events[0].as_ref().unwrap();
        assert!(destroy.is_container_destroyed());
        assert_eq!(destroy.resource_ref, "c1");
        assert_eq!(destroy.image_ref.as_deref(), Some("nginx:1.27"));

        let start = events[1].as_ref().unwrap();
        assert_eq!(start.kind, EventKind::ContainerStarted);
    }

    #[tokio::test]
    async fn test_bad_line_yields_error_and_continues() {
        let payload = format!("not json\n{DESTROY}");
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![Ok(Bytes::from(payload))];

        let events: Vec<_> = decode_event_stream(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Err(RuntimeError::InvalidResponse(_))));
        assert!(events[1].as_ref().unwrap().is_container_destroyed());
    }

    #[tokio::test]
    async fn test_transport_error_ends_stream() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from(format!("{START}\n"))),
            Err(std::io::Error::other("reset")),
            Ok(Bytes::from(format!("{DESTROY}\n"))),
        ];

        let events: Vec<_> = decode_event_stream(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(RuntimeError::Transport(_))));
    }
}
