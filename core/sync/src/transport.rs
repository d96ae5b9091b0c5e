//! Upload transport: the seam between the sync engine and the server.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use url::Url;

use loantrack_common::{Error, Result};

use crate::queue::{QueuedDocument, QueuedForm};

/// Delivers queued entries to the server.
///
/// Implementations must be safe to call from the sync engine's task. A
/// returned error leaves the entry pending; the engine records the message.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &str;

    /// Upload one captured document.
    async fn upload_document(&self, document: &QueuedDocument) -> Result<()>;

    /// Upload one submitted form.
    async fn upload_form(&self, form: &QueuedForm) -> Result<()>;
}

/// Header carrying the original file name of an uploaded document.
pub const FILE_NAME_HEADER: &str = "x-file-name";

/// HTTP transport posting entries to a REST endpoint.
///
/// Documents go to `{endpoint}/applications/{application_id}/documents` as
/// raw bodies; forms go to `{endpoint}/forms` as JSON.
pub struct HttpTransport {
    http: Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Create a transport for the given base endpoint.
    pub fn new(endpoint: Url) -> Result<Self> {
        Self::with_timeout(endpoint, Duration::from_secs(60))
    }

    /// Create a transport whose requests give up after `timeout`.
    pub fn with_timeout(endpoint: Url, timeout: Duration) -> Result<Self> {
        if endpoint.cannot_be_a_base() {
            return Err(Error::InvalidInput(format!(
                "Upload endpoint cannot be a base URL: {}",
                endpoint
            )));
        }
        let http = Client::builder()
            .user_agent("LoanTrack/0.1")
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, endpoint })
    }

    /// Base endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("Invalid upload endpoint: {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check_response(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

/// Map a non-success status to an error: server-side failures are
/// transient, everything else is a rejection.
pub fn classify_status(status: StatusCode, body: &str) -> Error {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Error::Network(format!("Server error: {} {}", status, body).trim_end().to_string())
    } else if status == StatusCode::CONFLICT {
        Error::Conflict(format!("Upload conflict: {} {}", status, body).trim_end().to_string())
    } else {
        Error::Rejected(format!("Upload rejected: {} {}", status, body).trim_end().to_string())
    }
}

/// Resolve a document's local file reference to a path.
///
/// Accepts `file://` URLs and plain paths.
pub fn local_path(uri: &str) -> Result<PathBuf> {
    if uri.starts_with("file:") {
        let url = Url::parse(uri)
            .map_err(|e| Error::InvalidInput(format!("Invalid file URI {}: {}", uri, e)))?;
        url.to_file_path()
            .map_err(|_| Error::InvalidInput(format!("Not a local file URI: {}", uri)))
    } else if uri.trim().is_empty() {
        Err(Error::InvalidInput("Document URI is empty".to_string()))
    } else {
        Ok(PathBuf::from(uri))
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload_document(&self, document: &QueuedDocument) -> Result<()> {
        let path = local_path(&document.uri)?;
        let data = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("Document file missing: {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;

        let url = self.url(&["applications", document.application_id.as_str(), "documents"])?;
        debug!("Uploading document {} ({} bytes) to {}", document.id, data.len(), url);

        let response = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, document.kind.content_type())
            .header(FILE_NAME_HEADER, document.name.as_str())
            .header("x-entry-id", document.id.as_str())
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload document: {}", e)))?;

        Self::check_response(response).await
    }

    async fn upload_form(&self, form: &QueuedForm) -> Result<()> {
        let url = self.url(&["forms"])?;
        debug!("Uploading form {} to {}", form.id, url);

        let body = serde_json::json!({
            "id": form.id,
            "applicationId": form.application_id,
            "formData": form.form_data,
            "createdAt": form.created_at,
        });

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload form: {}", e)))?;

        Self::check_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "missing field"),
            Error::Rejected(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::CONFLICT, ""),
            Error::Conflict(_)
        ));
    }

    #[test]
    fn test_local_path() {
        assert_eq!(
            local_path("file:///tmp/id.pdf").unwrap(),
            PathBuf::from("/tmp/id.pdf")
        );
        assert_eq!(local_path("/tmp/a.jpg").unwrap(), PathBuf::from("/tmp/a.jpg"));
        assert!(local_path("").is_err());
        assert!(local_path("file://remote-host/a.jpg").is_err());
    }

    #[test]
    fn test_url_building() {
        let transport = HttpTransport::new(Url::parse("https://api.example.com/v1/").unwrap()).unwrap();
        assert_eq!(
            transport.url(&["applications", "app 1", "documents"]).unwrap().as_str(),
            "https://api.example.com/v1/applications/app%201/documents"
        );
        assert_eq!(
            transport.url(&["forms"]).unwrap().as_str(),
            "https://api.example.com/v1/forms"
        );
    }

    #[test]
    fn test_rejects_non_base_endpoint() {
        assert!(HttpTransport::new(Url::parse("mailto:ops@example.com").unwrap()).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let transport = HttpTransport::new(Url::parse("http://127.0.0.1:9").unwrap()).unwrap();
        let document = QueuedDocument::new(
            loantrack_common::MediaKind::Image,
            "/nonexistent/loantrack/photo.jpg",
            "photo.jpg",
            1,
            loantrack_common::ApplicationId::new("app-1").unwrap(),
        );
        assert!(matches!(
            transport.upload_document(&document).await,
            Err(Error::NotFound(_))
        ));
    }
}
