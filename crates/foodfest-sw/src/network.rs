//! Where cache misses and precache fetches go.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use foodfest_common::{FoodFestError, Result};
use http::{header, HeaderValue, Method, StatusCode};
use reqwest::Client;
use tracing::{debug, trace};
use url::Url;

use crate::request::{Request, Response};

/// A source of live responses.
#[async_trait]
pub trait Network: Send + Sync {
    /// Fetch a request. Transport failures are errors; HTTP error statuses
    /// are returned as responses.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// HTTP network configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// User agent string.
    pub user_agent: String,
    /// Per-request timeout. `None` leaves the client default in place.
    pub timeout: Option<Duration>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("foodfest-sw/{}", env!("CARGO_PKG_VERSION")),
            timeout: None,
        }
    }
}

/// Network backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: Client,
}

impl HttpNetwork {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut builder = Client::builder().user_agent(&config.user_agent);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| FoodFestError::network_with_source("failed to build HTTP client", e))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        debug!(url = %request.url, method = %request.method, "fetching from network");

        let response = self
            .client
            .request(request.method.clone(), request.url.clone())
            .send()
            .await
            .map_err(|e| {
                FoodFestError::network_with_source(format!("request to {} failed", request.url), e)
            })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await.map_err(|e| {
            FoodFestError::network_with_source(format!("reading body of {url} failed"), e)
        })?;

        trace!(url = %url, status = %status, body_len = body.len(), "response received");

        Ok(Response {
            url,
            status,
            headers,
            body,
        })
    }
}

/// Serves requests from a local build output directory.
///
/// A request for `<scope>dist/app.bundle.js` reads `<root>/dist/app.bundle.js`.
/// Directory requests map to `index.html`. Missing files become 404 responses.
#[derive(Debug, Clone)]
pub struct SiteDirectory {
    root: PathBuf,
    scope: Url,
}

impl SiteDirectory {
    pub fn new(root: impl Into<PathBuf>, scope: Url) -> Self {
        Self {
            root: root.into(),
            scope,
        }
    }

    /// Map a URL onto a file under the root.
    fn file_for(&self, url: &Url) -> Result<PathBuf> {
        let outside = || FoodFestError::network(format!("{url} is outside {}", self.scope));

        if url.origin() != self.scope.origin() {
            return Err(outside());
        }
        let relative = url
            .path()
            .strip_prefix(self.scope.path())
            .ok_or_else(outside)?;
        let decoded = urlencoding::decode(relative)
            .map_err(|e| FoodFestError::network_with_source(format!("bad path in {url}"), e))?;

        let mut path = self.root.clone();
        for component in Path::new(decoded.as_ref()).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }
        if decoded.is_empty() || decoded.ends_with('/') {
            path.push("index.html");
        }
        Ok(path)
    }
}

#[async_trait]
impl Network for SiteDirectory {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        if request.method != Method::GET && request.method != Method::HEAD {
            return Ok(Response::new(
                request.url.clone(),
                StatusCode::METHOD_NOT_ALLOWED,
                bytes::Bytes::new(),
            ));
        }

        let path = self.file_for(&request.url)?;
        trace!(url = %request.url, path = %path.display(), "reading site file");

        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "site file not found");
                return Ok(Response::new(
                    request.url.clone(),
                    StatusCode::NOT_FOUND,
                    bytes::Bytes::new(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let mime = mime_guess::from_path(&path).first_or_octet_stream();
        let content_type = HeaderValue::from_str(mime.as_ref())
            .map_err(|e| FoodFestError::network_with_source("bad content type", e))?;

        let body = if request.method == Method::HEAD {
            Vec::new()
        } else {
            body
        };

        Ok(Response::new(request.url.clone(), StatusCode::OK, body)
            .with_header(header::CONTENT_TYPE, content_type))
    }
}
