// Upstream relay - forwards the normalized payload and streams the reply back

use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;

use crate::config::AppConfig;
use crate::proxy::OutboundPayload;

/// Upstream error bodies are read up to this many bytes.
pub const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Connection refused, DNS failure, timeout before a status arrived.
    #[error("Error connecting to upstream API: {0}")]
    Unreachable(#[source] reqwest::Error),

    /// Upstream answered with something other than 200.
    #[error("Upstream error {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// One shared connection pool for every request.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;

        Ok(Self {
            url: url.into(),
            api_key: api_key.into(),
            http_client,
        })
    }

    pub fn from_config(config: &AppConfig) -> reqwest::Result<Self> {
        Self::new(
            config.upstream_url.clone(),
            config.upstream_api_key.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// POST the payload and hand back the body as a live byte stream.
    ///
    /// Nothing is streamed unless upstream answered 200; for any other status
    /// the body (capped at [`MAX_ERROR_BODY_BYTES`]) is returned as
    /// [`RelayError::Status`].
    pub async fn relay(&self, payload: &OutboundPayload) -> Result<RelayStream, RelayError> {
        tracing::debug!("Relaying model {} to {}", payload.model, self.url);

        let response = self
            .http_client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Connection error: {}", e);
                RelayError::Unreachable(e)
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = read_error_body(response).await;
            tracing::error!("Upstream Error {}: {}", status, body);
            return Err(RelayError::Status { status, body });
        }

        Ok(RelayStream::new(response))
    }
}

async fn read_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Failed to read upstream error body: {}", e);
                break;
            }
        };
        let room = MAX_ERROR_BODY_BYTES - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            tracing::warn!("Upstream error body truncated to {} bytes", MAX_ERROR_BODY_BYTES);
            break;
        }
        body.extend_from_slice(&chunk);
    }

    String::from_utf8_lossy(&body).into_owned()
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Single-pass stream of upstream chunks, forwarded as received.
///
/// Dropping it drops the upstream response and frees its connection.
pub struct RelayStream {
    inner: ByteStream,
    chunks: usize,
    finished: bool,
}

impl RelayStream {
    fn new(response: reqwest::Response) -> Self {
        Self::from_stream(response.bytes_stream())
    }

    pub(crate) fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
            chunks: 0,
            finished: false,
        }
    }

    /// Adapt into the `io::Error` stream `axum::body::Body::from_stream` wants.
    pub fn into_io_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
        self.map_err(std::io::Error::other)
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, reqwest::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        let next = self.inner.as_mut().poll_next(cx);
        match &next {
            Poll::Ready(Some(Ok(chunk))) => {
                self.chunks += 1;
                tracing::trace!("{}", String::from_utf8_lossy(chunk));
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!("Upstream stream aborted after {} chunks: {}", self.chunks, e);
                self.finished = true;
            }
            Poll::Ready(None) => {
                tracing::debug!("Upstream stream finished after {} chunks", self.chunks);
                self.finished = true;
            }
            Poll::Pending => {}
        }
        next
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                "Caller went away after {} chunks, releasing upstream connection",
                self.chunks
            );
        }
    }
}
