//! Client configuration for the `panda` binary.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::derive::StretchPolicy;
use crate::http::DEFAULT_PADDING;

/// Default seconds between polls of the meeting place while the peer is absent.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Configuration for running key exchanges against an HTTP meeting place.
///
/// Every field has a default, so a config file only needs the fields it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the rendezvous server.
    pub server_url: Option<String>,

    /// Fixed size of every message at the meeting place. Both sides must agree.
    pub padding: usize,

    /// Seconds between polls while waiting for the peer.
    pub poll_interval_secs: u64,

    /// Where the password stretch runs.
    pub stretch: StretchPolicy,

    /// Skip stretching for weak secrets. Never set this outside tests.
    pub insecure_fast_derivation: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            padding: DEFAULT_PADDING,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            stretch: StretchPolicy::default(),
            insecure_fast_derivation: false,
        }
    }
}

impl ClientConfig {
    /// load reads a JSON config file
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.padding, 1 << 15);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.stretch, StretchPolicy::Auto);
        assert!(!config.insecure_fast_derivation);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("panda.json");
        fs::write(&path, r#"{"server_url": "https://panda.example", "stretch": "subprocess"}"#).unwrap();
        let config = ClientConfig::load(&path).unwrap();
        assert_eq!(config.server_url.as_deref(), Some("https://panda.example"));
        assert_eq!(config.stretch, StretchPolicy::Subprocess);
        assert_eq!(config.padding, DEFAULT_PADDING);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(serde_json::from_str::<ClientConfig>(r#"{"stretch": "gpu"}"#).is_err());
    }
}
