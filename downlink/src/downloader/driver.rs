//! Network driver abstraction for testability.
//!
//! [`NetworkDriver`] is the seam between the downloader and the actual
//! transport. Production code uses [`HttpNetworkDriver`] (blocking reqwest
//! with rustls); tests use [`MockNetworkDriver`], which serves scripted
//! bodies or failures per URL suffix so every branch of the failure
//! taxonomy can be exercised without a server.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Default request timeout. DNS resolution alone can take 15 seconds, so
/// this must stay comfortably above that.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);

/// A successfully opened response body.
pub struct NetworkResponse {
    /// Content length as reported by the server, if any.
    pub content_length: Option<u64>,
    /// The streaming response body.
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for NetworkResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkResponse")
            .field("content_length", &self.content_length)
            .field("body", &"<dyn Read + Send>")
            .finish()
    }
}

/// Trait for opening a streaming fetch of a URL.
pub trait NetworkDriver: Send + Sync {
    /// Open `url` for reading.
    ///
    /// # Errors
    ///
    /// Failures are classified into the network error taxonomy:
    /// [`Error::NetworkMalformedUrl`], [`Error::NetworkUnreachable`],
    /// [`Error::NetworkTimeout`] or [`Error::NetworkHttpStatus`].
    fn fetch(&self, url: &str) -> Result<NetworkResponse>;
}

// =============================================================================
// Production driver
// =============================================================================

/// Production driver using a blocking reqwest client.
#[derive(Debug)]
pub struct HttpNetworkDriver {
    client: reqwest::blocking::Client,
}

impl HttpNetworkDriver {
    /// Create a driver with the default timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a driver with a custom request timeout.
    ///
    /// The timeout covers the whole request including body reads, so a
    /// stalled transfer surfaces as [`Error::NetworkTimeout`] mid-stream.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::NetworkUnreachable(format!("building HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn classify(err: reqwest::Error, url: &str) -> Error {
        if err.is_timeout() {
            Error::NetworkTimeout(url.to_string())
        } else if err.is_builder() {
            Error::NetworkMalformedUrl(format!("{}: {}", url, err))
        } else {
            Error::NetworkUnreachable(format!("{}: {}", url, err))
        }
    }
}

impl NetworkDriver for HttpNetworkDriver {
    fn fetch(&self, url: &str) -> Result<NetworkResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Self::classify(e, url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::NetworkHttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(NetworkResponse {
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}

// =============================================================================
// Scripted mock driver
// =============================================================================

/// What the mock serves for a URL.
#[derive(Debug, Clone)]
enum Script {
    /// Serve these bytes as the body.
    Body(Vec<u8>),
    /// Fail the fetch with this error.
    Fail(Error),
    /// Open successfully, then fail the body read after `valid` bytes.
    FailMidStream { valid: Vec<u8>, error: Error },
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, Script>,
    fetched: Vec<String>,
}

/// Scripted driver for tests. Clones share the same script table.
///
/// Scripts are keyed by URL suffix, so tests can register by content id
/// without caring about the URL base or a trailing `?crc=` query.
#[derive(Debug, Clone, Default)]
pub struct MockNetworkDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockNetworkDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for URLs ending in `suffix`.
    pub fn serve(&self, suffix: &str, body: &[u8]) {
        self.state
            .lock()
            .scripts
            .insert(suffix.to_string(), Script::Body(body.to_vec()));
    }

    /// Fail fetches of URLs ending in `suffix` with `error`.
    pub fn fail(&self, suffix: &str, error: Error) {
        self.state
            .lock()
            .scripts
            .insert(suffix.to_string(), Script::Fail(error));
    }

    /// Serve `valid` bytes for URLs ending in `suffix`, then fail the body
    /// read with `error`.
    pub fn fail_mid_stream(&self, suffix: &str, valid: &[u8], error: Error) {
        self.state.lock().scripts.insert(
            suffix.to_string(),
            Script::FailMidStream {
                valid: valid.to_vec(),
                error,
            },
        );
    }

    /// URLs fetched so far, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.state.lock().fetched.clone()
    }
}

impl NetworkDriver for MockNetworkDriver {
    fn fetch(&self, url: &str) -> Result<NetworkResponse> {
        let script = {
            let mut state = self.state.lock();
            state.fetched.push(url.to_string());
            state
                .scripts
                .iter()
                .find(|(suffix, _)| {
                    url.ends_with(suffix.as_str()) || url.contains(&format!("{}?", suffix))
                })
                .map(|(_, script)| script.clone())
        };

        match script {
            Some(Script::Body(bytes)) => Ok(NetworkResponse {
                content_length: Some(bytes.len() as u64),
                body: Box::new(std::io::Cursor::new(bytes)),
            }),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::FailMidStream { valid, error }) => Ok(NetworkResponse {
                content_length: None,
                body: Box::new(FailingReader {
                    valid: std::io::Cursor::new(valid),
                    error: Some(error),
                }),
            }),
            None => Err(Error::NetworkHttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        }
    }
}

/// Reader that yields its valid bytes, then errors.
struct FailingReader {
    valid: std::io::Cursor<Vec<u8>>,
    error: Option<Error>,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.valid.read(buf)?;
        if n > 0 {
            return Ok(n);
        }
        match self.error.take() {
            Some(err) => Err(std::io::Error::other(err.to_string())),
            // Error already delivered; behave like EOF on further reads.
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_mock_serves_scripted_body() {
        let driver = MockNetworkDriver::new();
        driver.serve("/a", b"payload");

        let mut response = driver.fetch("http://cdn.example/content/a").unwrap();
        assert_eq!(response.content_length, Some(7));

        let mut body = Vec::new();
        response.body.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"payload");
    }

    #[test]
    fn test_mock_unscripted_is_404() {
        let driver = MockNetworkDriver::new();
        let err = driver.fetch("http://cdn.example/missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkHttpStatus);
    }

    #[test]
    fn test_mock_scripted_failure() {
        let driver = MockNetworkDriver::new();
        driver.fail("/a", Error::NetworkTimeout("scripted".to_string()));

        let err = driver.fetch("http://cdn.example/a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkTimeout);
    }

    #[test]
    fn test_mock_fail_mid_stream() {
        let driver = MockNetworkDriver::new();
        driver.fail_mid_stream(
            "/a",
            b"part",
            Error::NetworkUnreachable("reset".to_string()),
        );

        let mut response = driver.fetch("http://cdn.example/a").unwrap();
        let mut body = Vec::new();
        assert!(response.body.read_to_end(&mut body).is_err());
        assert_eq!(body, b"part");
    }

    #[test]
    fn test_mock_records_fetches() {
        let driver = MockNetworkDriver::new();
        driver.serve("/a", b"x");
        let _ = driver.fetch("http://cdn.example/a");
        let _ = driver.fetch("http://cdn.example/b");

        assert_eq!(
            driver.fetched(),
            vec![
                "http://cdn.example/a".to_string(),
                "http://cdn.example/b".to_string()
            ]
        );
    }
}
