//! Outbound HTTP for the byte proxy.
//!
//! `ureq` is blocking, so every request runs on tokio's blocking pool. Media
//! downloads are pumped through a one-slot channel in fixed-size chunks: the
//! blocking task owns the upstream response for its whole lifetime and drops
//! it as soon as the transfer ends, fails, or the client goes away.

use std::{
    collections::BTreeMap,
    io::{self, Read},
    time::Duration,
};

use axum::body::Bytes;
use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::{self, JoinHandle},
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Upper bound on a single forwarded chunk.
pub const STREAM_CHUNK_SIZE: usize = 8 * 1024;
pub const DEFAULT_IMAGE_TYPE: &str = "image/jpeg";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream body exceeds {0} bytes")]
    TooLarge(u64),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("fetch task failed: {0}")]
    Join(String),
}

impl From<ureq::Error> for FetchError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => Self::Status(code),
            ureq::Error::Transport(transport) => Self::Transport(transport.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct FetchedImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// How a streamed transfer ended. The byte counts are what reached the
/// channel before the transfer stopped.
#[derive(Debug)]
pub enum TransferOutcome {
    Complete(u64),
    ClientGone(u64),
    UpstreamFailed(io::Error),
}

/// An open upstream transfer. `body` yields chunks of at most
/// [`STREAM_CHUNK_SIZE`] bytes and ends with an `Err` item when the upstream
/// breaks off, so the response is aborted rather than silently truncated.
pub struct MediaStream {
    pub content_length: Option<u64>,
    pub body: ReceiverStream<io::Result<Bytes>>,
    pub transfer: JoinHandle<TransferOutcome>,
}

#[derive(Clone)]
pub struct Fetcher {
    agent: ureq::Agent,
    max_image_bytes: u64,
}

impl Fetcher {
    pub fn new(user_agent: &str, connect_timeout: Duration, max_image_bytes: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(user_agent)
            .timeout_connect(connect_timeout)
            .build();
        Self {
            agent,
            max_image_bytes,
        }
    }

    /// Blocking single GET, fully buffered. Anything but a 200 is reported as
    /// [`FetchError::Status`].
    pub fn fetch_image(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let response = self.agent.get(url).call()?;
        if response.status() != 200 {
            return Err(FetchError::Status(response.status()));
        }
        let content_type = response
            .header("content-type")
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_IMAGE_TYPE)
            .to_string();

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.max_image_bytes + 1)
            .read_to_end(&mut bytes)?;
        if bytes.len() as u64 > self.max_image_bytes {
            return Err(FetchError::TooLarge(self.max_image_bytes));
        }
        Ok(FetchedImage {
            content_type,
            bytes,
        })
    }

    pub async fn image(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let fetcher = self.clone();
        let url = url.to_owned();
        task::spawn_blocking(move || fetcher.fetch_image(&url))
            .await
            .map_err(|err| FetchError::Join(err.to_string()))?
    }

    /// Connects to `url` and, once the upstream answered with a success
    /// status, hands back a chunked body. The status check happens before
    /// any byte is forwarded so failures still map to an error response.
    pub async fn open_stream(
        &self,
        url: &str,
        headers: BTreeMap<String, String>,
    ) -> Result<MediaStream, FetchError> {
        let agent = self.agent.clone();
        let url = url.to_owned();
        let response = task::spawn_blocking(move || -> Result<ureq::Response, FetchError> {
            let mut request = agent.get(&url);
            for (name, value) in &headers {
                request = request.set(name, value);
            }
            Ok(request.call()?)
        })
        .await
        .map_err(|err| FetchError::Join(err.to_string()))??;

        let content_length = response
            .header("content-length")
            .and_then(|value| value.trim().parse::<u64>().ok());

        let (sender, receiver) = mpsc::channel(1);
        let transfer = task::spawn_blocking(move || {
            let outcome = pump(response, sender);
            match &outcome {
                TransferOutcome::Complete(total) => {
                    debug!(bytes = total, "upstream transfer complete");
                }
                TransferOutcome::ClientGone(total) => {
                    debug!(bytes = total, "client disconnected; upstream transfer aborted");
                }
                TransferOutcome::UpstreamFailed(err) => {
                    warn!(error = %err, "upstream transfer failed");
                }
            }
            outcome
        });

        Ok(MediaStream {
            content_length,
            body: ReceiverStream::new(receiver),
            transfer,
        })
    }
}

/// Copies the upstream body into the channel one chunk at a time. Returning,
/// for any reason, drops both the upstream response and the sender.
fn pump(response: ureq::Response, sender: mpsc::Sender<io::Result<Bytes>>) -> TransferOutcome {
    let mut upstream = response.into_reader();
    let mut buf = [0u8; STREAM_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let read = match upstream.read(&mut buf) {
            Ok(0) => return TransferOutcome::Complete(total),
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                // Forward the failure so the response body errors out.
                let forwarded = io::Error::new(err.kind(), err.to_string());
                if sender.blocking_send(Err(forwarded)).is_err() {
                    return TransferOutcome::ClientGone(total);
                }
                return TransferOutcome::UpstreamFailed(err);
            }
        };
        if sender
            .blocking_send(Ok(Bytes::copy_from_slice(&buf[..read])))
            .is_err()
        {
            return TransferOutcome::ClientGone(total);
        }
        total += read as u64;
    }
}
