//! Generic HTTP storage provider.
//!
//! Objects live at `base_url/<path>` and are read with `GET`, written with
//! `PUT` and removed with `DELETE`. Servers that speak WebDAV can copy and
//! move natively with `COPY`/`MOVE`; anything answering those verbs with
//! 405 or 501 gets the streamed fallback instead.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::any::Any;
use tracing::debug;
use url::Url;

use conduit_common::{Error, ObjectPath, Result, TransferOptions};

use crate::provider::{Backend, Metadata, Provider};
use crate::stream::StreamObject;

/// Construction options for [`HttpProvider`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Base URL objects are resolved against.
    pub base_url: String,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: Option<String>,
}

/// HTTP storage provider.
///
/// Transfer options: `path` (required).
pub struct HttpProvider {
    base: Url,
    token: Option<String>,
    http: Client,
}

impl HttpProvider {
    /// Create a provider rooted at `base_url`.
    ///
    /// # Errors
    /// - `Construction` if the URL is invalid or cannot carry a path
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Construction(format!("Invalid base_url '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::Construction(format!(
                "base_url '{}' cannot carry object paths",
                base_url
            )));
        }

        let http = Client::builder()
            .user_agent(concat!("conduit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Construction(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { base, token, http })
    }

    /// Absolute URL for an object path.
    pub fn url_for(&self, path: &ObjectPath) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("Cannot extend {}", self.base)))?
            .pop_if_empty()
            .extend(path.components());
        Ok(url)
    }

    fn object_url(&self, options: &TransferOptions) -> Result<(ObjectPath, Url)> {
        let path = options.path()?;
        if path.is_root() {
            return Err(Error::InvalidInput("Object path cannot be root".to_string()));
        }
        let url = self.url_for(&path)?;
        Ok((path, url))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    fn same_origin<'a>(&self, other: &'a dyn Provider) -> Option<&'a HttpProvider> {
        other
            .as_any()
            .downcast_ref::<HttpProvider>()
            .filter(|peer| peer.base.origin() == self.base.origin())
    }

    fn metadata_from(
        path: &ObjectPath,
        url: &Url,
        response: &Response,
        size: Option<u64>,
        content_type: String,
    ) -> Metadata {
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());

        Metadata {
            id: url.to_string(),
            name: path.name().unwrap_or("/").to_string(),
            size,
            content_type,
            modified: Utc::now(),
            etag,
            provider_data: Some(serde_json::json!({
                "status": response.status().as_u16(),
            })),
        }
    }

    /// Native COPY/MOVE on a WebDAV-capable server.
    async fn dav_transfer(
        &self,
        verb: &'static str,
        dest: &dyn Provider,
        source_options: &TransferOptions,
        dest_options: &TransferOptions,
    ) -> Result<Metadata> {
        let peer = self
            .same_origin(dest)
            .ok_or_else(|| Error::Unsupported(format!("{} across origins", verb)))?;
        let (_, from_url) = self.object_url(source_options)?;
        let (to, to_url) = peer.object_url(dest_options)?;

        let method = Method::from_bytes(verb.as_bytes())
            .map_err(|e| Error::Transfer(format!("Invalid method {}: {}", verb, e)))?;
        let destination = HeaderValue::from_str(to_url.as_str())
            .map_err(|e| Error::InvalidInput(format!("Invalid destination URL: {}", e)))?;

        let response = self
            .request(method, from_url)
            .header("Destination", destination)
            .header("Overwrite", "T")
            .send()
            .await
            .map_err(|e| Error::Transfer(format!("Failed to send {}: {}", verb, e)))?;

        if matches!(
            response.status(),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
        ) {
            return Err(Error::Unsupported(format!(
                "server answered {} with {}",
                verb,
                response.status()
            )));
        }

        let response = check_status(response).await?;
        debug!("{} {} -> {} complete", verb, self.base, to_url);
        Ok(Self::metadata_from(
            &to,
            &to_url,
            &response,
            None,
            crate::stream::DEFAULT_CONTENT_TYPE.to_string(),
        ))
    }
}

impl Backend for HttpProvider {
    type Config = HttpConfig;

    fn from_config(config: Self::Config) -> Result<Self> {
        Self::new(&config.base_url, config.token)
    }
}

/// Map a non-success status onto the error taxonomy.
pub fn status_error(status: StatusCode, body: &str) -> Error {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{} - {}", status, body)
    };

    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Error::NotFound(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::PermissionDenied(detail),
        _ => Error::Transfer(detail),
    }
}

/// Pass successful responses through; turn everything else into an error.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn download(&self, options: &TransferOptions) -> Result<StreamObject> {
        let (_, url) = self.object_url(options)?;

        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| Error::Transfer(format!("Failed to start download: {}", e)))?;

        Ok(StreamObject::from_response(check_status(response).await?))
    }

    async fn upload(&self, obj: StreamObject, options: &TransferOptions) -> Result<Metadata> {
        let (path, url) = self.object_url(options)?;
        let StreamObject {
            content,
            size,
            content_type,
        } = obj;

        let mut request = self
            .request(Method::PUT, url.clone())
            .header(CONTENT_TYPE, content_type.as_str());
        if let Some(size) = size {
            request = request.header(CONTENT_LENGTH, size);
        }

        let response = request
            .body(Body::wrap_stream(content))
            .send()
            .await
            .map_err(|e| Error::Transfer(format!("Failed to upload: {}", e)))?;

        let response = check_status(response).await?;
        Ok(Self::metadata_from(&path, &url, &response, size, content_type))
    }

    async fn delete(&self, options: &TransferOptions) -> Result<()> {
        let (_, url) = self.object_url(options)?;

        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(|e| Error::Transfer(format!("Failed to delete: {}", e)))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(()),
            _ => check_status(response).await.map(|_| ()),
        }
    }

    fn can_intra_copy(&self, other: &dyn Provider) -> bool {
        self.same_origin(other).is_some()
    }

    fn can_intra_move(&self, other: &dyn Provider) -> bool {
        self.same_origin(other).is_some()
    }

    async fn intra_copy(
        &self,
        dest: &dyn Provider,
        source_options: &TransferOptions,
        dest_options: &TransferOptions,
    ) -> Result<Metadata> {
        self.dav_transfer("COPY", dest, source_options, dest_options).await
    }

    async fn intra_move(
        &self,
        dest: &dyn Provider,
        source_options: &TransferOptions,
        dest_options: &TransferOptions,
    ) -> Result<Metadata> {
        self.dav_transfer("MOVE", dest, source_options, dest_options).await
    }
}
