//! Meeting place backed by an HTTP rendezvous server.
//!
//! Each message is POSTed to `{base}/{hex(tag)}`. The server answers `200` with the peer's message once both have arrived, `204`/`202` while it is still waiting for the peer, and `409` once the tag has been used by two other messages.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::{debug, info, warn, Span};

use crate::errors::PandaError;
use crate::meeting_place::{MeetingPlace, Shutdown};

/// DEFAULT_PADDING is the message size used by the HTTP rendezvous servers
pub const DEFAULT_PADDING: usize = 1 << 15;

pub struct HttpMeetingPlace {
    client: Client,
    base: String,
    padding: usize,
    poll_interval: Duration,
}

impl HttpMeetingPlace {
    pub fn new(base: &str, padding: usize, poll_interval: Duration) -> Result<Self, PandaError> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            padding,
            poll_interval,
        })
    }

    fn url(&self, tag: &[u8; 32]) -> String {
        format!("{}/{}", self.base, hex::encode(tag))
    }

    /// attempt posts once; Ok(None) means the peer hasn't posted yet
    fn attempt(&self, url: &str, message: &[u8]) -> Result<Option<Vec<u8>>, PandaError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(message.to_vec())
            .send()?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.bytes()?.to_vec())),
            StatusCode::NO_CONTENT | StatusCode::ACCEPTED => Ok(None),
            StatusCode::CONFLICT => Err(PandaError::TagInUse),
            status => {
                warn!(%status, "unexpected meeting place response");
                Ok(None)
            }
        }
    }
}

impl MeetingPlace for HttpMeetingPlace {
    fn padding(&self) -> usize {
        self.padding
    }

    fn exchange(&self, log: &Span, tag: &[u8; 32], message: &[u8], shutdown: &Shutdown) -> Result<Vec<u8>, PandaError> {
        let _entered = log.enter();
        let url = self.url(tag);
        loop {
            if shutdown.is_requested() {
                return Err(PandaError::ShutdownRequested);
            }
            match self.attempt(&url, message) {
                Ok(Some(reply)) => {
                    info!(len = reply.len(), "meeting place returned peer's message");
                    return Ok(reply);
                }
                Ok(None) => debug!("peer not yet at meeting place"),
                Err(PandaError::Transport(error)) => warn!("meeting place request failed, will retry: {error}"),
                Err(error) => return Err(error),
            }
            if shutdown.wait_timeout(self.poll_interval) {
                return Err(PandaError::ShutdownRequested);
            }
        }
    }
}
