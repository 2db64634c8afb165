//! Observe transports: how a client opens a stream of frames.
//!
//! The HTTP transport issues `GET <resource>` with an `Observe` header and
//! reads newline-delimited JSON envelopes from the response body.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::ObserveError;

/// Request header that turns a plain GET into an observe request.
pub const OBSERVE_HEADER: &str = "observe";

/// Media type of an observation stream.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Longest frame accepted from a peer. A line that grows past this
/// without a line break ends the session.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

const FRAME_BUFFER: usize = 64;

/// Raw frames of one observe session. The channel closes when the stream
/// ends; a transport error is delivered as the last item.
pub type FrameReceiver = mpsc::Receiver<Result<String, ObserveError>>;

/// Opens observe sessions against one target.
pub trait ObserveTransport: Send + Sync + 'static {
    /// Sends the observe request and returns the frame stream once the
    /// peer has answered.
    fn subscribe(&self) -> BoxFuture<'_, Result<FrameReceiver, ObserveError>>;

    /// When `true`, a session only counts as established once the snapshot
    /// frame has been received.
    fn confirmable(&self) -> bool {
        true
    }
}

/// Where and how to observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserveTarget {
    pub base_url: String,
    pub resource: String,
    pub confirmable: bool,
}

impl ObserveTarget {
    pub fn url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if self.resource.starts_with('/') {
            format!("{base}{}", self.resource)
        } else {
            format!("{base}/{}", self.resource)
        }
    }
}

/// Observe transport over HTTP streaming responses.
#[derive(Debug, Clone)]
pub struct HttpObserveTransport {
    client: reqwest::Client,
    target: ObserveTarget,
}

impl HttpObserveTransport {
    /// Builds a transport whose TCP connect is bounded by `connect_timeout`.
    /// The body itself is unbounded in time.
    pub fn new(target: ObserveTarget, connect_timeout: Duration) -> Result<Self, ObserveError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ObserveError::TransportUnavailable(e.to_string()))?;
        Ok(Self { client, target })
    }

    pub fn target(&self) -> &ObserveTarget {
        &self.target
    }
}

impl ObserveTransport for HttpObserveTransport {
    fn subscribe(&self) -> BoxFuture<'_, Result<FrameReceiver, ObserveError>> {
        Box::pin(async move {
            let url = self.target.url();
            let response = self
                .client
                .get(&url)
                .header(OBSERVE_HEADER, "0")
                .header(reqwest::header::ACCEPT, NDJSON_CONTENT_TYPE)
                .send()
                .await
                .map_err(|e| ObserveError::TransportUnavailable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(ObserveError::TransportUnavailable(format!(
                    "observe request to {url} rejected with status {status}"
                )));
            }

            tracing::debug!(%url, "observe request accepted");
            let (tx, rx) = mpsc::channel(FRAME_BUFFER);
            tokio::spawn(pump_frames(response.bytes_stream(), tx));
            Ok(rx)
        })
    }

    fn confirmable(&self) -> bool {
        self.target.confirmable
    }
}

/// Splits a byte stream into lines and forwards each non-empty one.
///
/// Stops early when the receiver is dropped, and with a
/// `TransportUnavailable` item when a line exceeds [`MAX_FRAME_BYTES`].
pub(crate) async fn pump_frames<S, B, E>(stream: S, tx: mpsc::Sender<Result<String, ObserveError>>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut pending: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx
                    .send(Err(ObserveError::TransportUnavailable(e.to_string())))
                    .await;
                return;
            }
        };
        pending.extend_from_slice(chunk.as_ref());

        while let Some(newline) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=newline).collect();
            if !forward_line(&line, &tx).await {
                return;
            }
        }

        if pending.len() > MAX_FRAME_BYTES {
            tracing::warn!(
                buffered = pending.len(),
                limit = MAX_FRAME_BYTES,
                "observe frame too long; dropping session"
            );
            let _ = tx
                .send(Err(ObserveError::TransportUnavailable(format!(
                    "frame exceeds {MAX_FRAME_BYTES} bytes without a line break"
                ))))
                .await;
            return;
        }
    }

    if !pending.is_empty() {
        forward_line(&pending, &tx).await;
    }
}

async fn forward_line(line: &[u8], tx: &mpsc::Sender<Result<String, ObserveError>>) -> bool {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return true;
    }
    tx.send(Ok(text.to_string())).await.is_ok()
}
