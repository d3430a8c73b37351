use std::collections::VecDeque;
use std::fmt::Display;

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::frame::{parse_frame, FrameDecoder};

/// Body of a downstream HTTP response.
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>;

/// Lazy, finite, non-restartable sequence of records read from an SSE body.
///
/// Malformed frames are logged and skipped. Bytes left in the buffer when the
/// body ends never form a record.
pub struct SseRelay<S> {
    inner: S,
    decoder: FrameDecoder,
    ready: VecDeque<Value>,
    last: Option<Value>,
    malformed: usize,
    done: bool,
}

impl<S, E> SseRelay<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            last: None,
            malformed: 0,
            done: false,
        }
    }

    /// Next complete record, or `None` once the body has ended.
    ///
    /// A transport error ends the relay after being returned once.
    pub async fn next_record(&mut self) -> Option<Result<Value>> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                self.last = Some(record.clone());
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => self.absorb(&chunk),
                Some(Err(e)) => {
                    self.done = true;
                    warn!(error = %e, "SSE transport failed");
                    return Some(Err(RelayError::Transport(e.to_string())));
                }
                None => {
                    self.done = true;
                    if self.decoder.buffered_len() > 0 {
                        debug!(
                            bytes = self.decoder.buffered_len(),
                            "Discarding incomplete trailing frame"
                        );
                    }
                }
            }
        }
    }

    fn absorb(&mut self, chunk: &[u8]) {
        for frame in self.decoder.push(chunk) {
            match parse_frame(&frame) {
                Ok(Some(record)) => self.ready.push_back(record),
                Ok(None) => {}
                Err(e) => {
                    self.malformed += 1;
                    warn!(
                        error = %e,
                        frame = %String::from_utf8_lossy(&frame),
                        "Dropping malformed SSE frame"
                    );
                }
            }
        }
    }

    /// Reads to the end, handing each record to `on_record`, and returns the
    /// last record seen.
    pub async fn drain<F>(mut self, mut on_record: F) -> Result<Option<Value>>
    where
        F: FnMut(&Value),
    {
        while let Some(record) = self.next_record().await {
            on_record(&record?);
        }
        Ok(self.last)
    }

    /// Adapts the relay into a `Stream` of records.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> {
        futures::stream::unfold(self, |mut relay| async move {
            relay.next_record().await.map(|record| (record, relay))
        })
    }
}

impl SseRelay<ByteStream> {
    /// POSTs `body` as JSON and relays the `text/event-stream` response.
    pub async fn post<B: serde::Serialize + ?Sized>(
        client: &reqwest::Client,
        url: &str,
        body: &B,
    ) -> Result<Self> {
        debug!(url = %url, "Opening downstream event stream");

        let response = client
            .post(url)
            .header("Accept", "text/event-stream")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Self::new(response.bytes_stream().boxed()))
    }
}

impl<S> SseRelay<S> {
    /// Most recent record handed out so far.
    pub fn last_record(&self) -> Option<&Value> {
        self.last.as_ref()
    }

    pub fn into_last_record(self) -> Option<Value> {
        self.last
    }

    /// Frames dropped because they could not be parsed.
    pub fn malformed_frames(&self) -> usize {
        self.malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Chunk = std::result::Result<Bytes, std::io::Error>;

    fn chunks(parts: &[&'static str]) -> futures::stream::Iter<std::vec::IntoIter<Chunk>> {
        let items: Vec<Chunk> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        futures::stream::iter(items)
    }

    #[tokio::test]
    async fn test_records_across_chunk_boundaries() {
        let mut relay = SseRelay::new(chunks(&[
            "data: {\"n\"",
            ":1}\n",
            "\ndata: {\"n\":2}\n\nda",
            "ta: {\"n\":3}\n\n",
        ]));

        let mut seen = Vec::new();
        while let Some(record) = relay.next_record().await {
            seen.push(record.unwrap()["n"].as_i64().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(relay.last_record(), Some(&json!({"n": 3})));
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_stop_stream() {
        let mut relay = SseRelay::new(chunks(&[
            "data: {\"n\":1}\n\ndata: {oops\n\ndata: {\"n\":2}\n\n",
        ]));

        let mut count = 0;
        while let Some(record) = relay.next_record().await {
            record.unwrap();
            count += 1;
        }
        assert_eq!(count, 2);
        assert_eq!(relay.malformed_frames(), 1);
    }

    #[tokio::test]
    async fn test_trailing_partial_frame_is_never_emitted() {
        let relay = SseRelay::new(chunks(&["data: {\"n\":1}\n\ndata: {\"n\":2}"]));
        let last = relay.drain(|_| {}).await.unwrap();
        assert_eq!(last, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_drain_returns_last_record() {
        let relay = SseRelay::new(chunks(&[
            "data: {\"type\":\"progress\"}\n\n",
            "data: {\"type\":\"complete\",\"targetPath\":\"/w\"}\n\n",
        ]));

        let mut seen = 0;
        let last = relay.drain(|_| seen += 1).await.unwrap();
        assert_eq!(seen, 2);
        assert_eq!(last.unwrap()["targetPath"], "/w");
    }

    #[tokio::test]
    async fn test_empty_body_yields_nothing() {
        let relay = SseRelay::new(chunks(&[]));
        assert_eq!(relay.drain(|_| {}).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transport_error_ends_relay() {
        let items: Vec<Chunk> = vec![
            Ok(Bytes::from_static(b"data: {\"n\":1}\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"data: {\"n\":2}\n\n")),
        ];
        let mut relay = SseRelay::new(futures::stream::iter(items));

        assert!(relay.next_record().await.unwrap().is_ok());
        assert!(matches!(
            relay.next_record().await,
            Some(Err(RelayError::Transport(_)))
        ));
        assert!(relay.next_record().await.is_none());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let relay = SseRelay::new(chunks(&["data: 1\n\ndata: 2\n\n"]));
        let values: Vec<Value> = relay
            .into_stream()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![json!(1), json!(2)]);
    }
}
