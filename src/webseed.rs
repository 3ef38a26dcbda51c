//! Web seeding (BEP-19).
//!
//! When no tracker is usable the session can fetch the payload from
//! `url-list` web seeds: one HTTP range request per piece, validated
//! against the expected status and exact length, then fed block-by-block
//! through the normal assembly path so hashing still applies.
//!
//! Only the single-file URL layout is supported: the torrent name is
//! appended to the base URL unless it is already present.

use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

/// Errors from a web-seed fetch.
#[derive(Debug, Error)]
pub enum WebSeedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0} for piece {1}")]
    BadStatus(StatusCode, u32),

    #[error("piece {piece}: expected {expected} bytes, got {actual}")]
    BadLength {
        piece: u32,
        expected: u32,
        actual: usize,
    },
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches pieces from one web-seed base URL.
pub struct WebSeedClient {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebSeedClient {
    /// Builds a client for `base`, appending `name` per the single-file
    /// layout when the base does not already end with it.
    pub fn new(base: &str, name: &str) -> Result<Self, WebSeedError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: build_url(base, name),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches the piece at `offset` of length `length` with a range GET.
    /// The response must be `200` or `206` and exactly `length` bytes.
    pub fn fetch_piece(&self, piece: u32, offset: u64, length: u32) -> Result<Bytes, WebSeedError> {
        let range = format!("bytes={}-{}", offset, offset + u64::from(length) - 1);
        debug!(url = %self.url, piece, %range, "web seed fetch");

        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, range)
            .send()?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(WebSeedError::BadStatus(status, piece));
        }

        let body = response.bytes()?;
        if body.len() != length as usize {
            return Err(WebSeedError::BadLength {
                piece,
                expected: length,
                actual: body.len(),
            });
        }
        Ok(body)
    }
}

fn build_url(base: &str, name: &str) -> String {
    if base.is_empty() || base.ends_with(name) {
        return base.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_layouts() {
        assert_eq!(build_url("http://s.test", "file.bin"), "http://s.test/file.bin");
        assert_eq!(build_url("http://s.test/", "file.bin"), "http://s.test/file.bin");
        assert_eq!(
            build_url("http://s.test/file.bin", "file.bin"),
            "http://s.test/file.bin"
        );
        assert_eq!(build_url("", "file.bin"), "");
    }
}
