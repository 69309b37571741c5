//! HTTP downloads with reqwest.

use crate::error::HostToolError;
use async_trait::async_trait;
use convergence::{CollaboratorError, FileFetcher};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Per-request timeout; the caller's poll budget bounds the retries
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Saves HTTP(S) responses to local files.
#[derive(Debug, Clone)]
pub struct HttpFileFetcher {
    client: Client,
}

impl HttpFileFetcher {
    /// Fetcher with certificate verification and a 30s request timeout
    pub fn new() -> Result<Self, HostToolError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }

    /// GET `url` and write the body to `dest`
    ///
    /// Non-2xx answers are errors and leave `dest` untouched.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<u64, HostToolError> {
        debug!(%url, "Downloading");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        tokio::fs::write(dest, &body).await?;

        let size = u64::try_from(body.len()).unwrap_or(u64::MAX);
        info!(%url, dest = %dest.display(), bytes = size, "Downloaded");
        Ok(size)
    }
}

#[async_trait]
impl FileFetcher for HttpFileFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, CollaboratorError> {
        Ok(self.download(url, dest).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}/elemental/registration/abc")
    }

    #[tokio::test]
    async fn test_download_writes_body() {
        let url = serve_once("200 OK", "elemental:\n  registration:\n    url: x\n").await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("install-config.yaml");

        let size = HttpFileFetcher::new().unwrap().download(&url, &dest).await.unwrap();

        assert_eq!(size, 38);
        let saved = std::fs::read_to_string(&dest).unwrap();
        assert!(saved.starts_with("elemental:"));
    }

    #[tokio::test]
    async fn test_error_status_is_an_error() {
        let url = serve_once("404 Not Found", "not found").await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("install-config.yaml");

        let err = HttpFileFetcher::new().unwrap().download(&url, &dest).await.unwrap_err();

        assert!(matches!(err, HostToolError::Http(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_invalid_url_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HttpFileFetcher::new().unwrap();
        assert!(fetcher.fetch("not a url", &dir.path().join("x")).await.is_err());
    }
}
