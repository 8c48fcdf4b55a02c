use std::sync::Arc;

use reqwest::multipart::Form;
use reqwest::{RequestBuilder, Response};

use serde::Serialize;
use serde::de::DeserializeOwned;

use serde_json::Value;

use tracing::debug;

use crate::api_error::{ErrorField, normalize};
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};

fn slash_end(s: &str) -> &str {
    if s.len() > 1 && s.ends_with('/') {
        &s[..s.len() - 1]
    } else {
        s
    }
}

fn slash_start(s: &str) -> &str {
    if s.len() > 1 && s.starts_with('/') {
        &s[1..]
    } else {
        s
    }
}

fn slash_start_end(s: &str) -> &str {
    slash_start(slash_end(s))
}

// Joins a root path and a relative path into an absolute path.
pub(crate) fn join_path(root: &str, path: &str) -> String {
    let root = slash_start_end(root);
    let path = slash_start_end(path);
    if root.is_empty() || root == "/" {
        format!("/{path}")
    } else {
        format!("/{root}/{path}")
    }
}

// Maps an HTTP endpoint to the matching WebSocket one.
pub(crate) fn websocket_endpoint(endpoint: &str) -> Result<String> {
    if let Some(rest) = endpoint.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        Err(Error::new(
            ErrorKind::Configuration,
            format!("Endpoint `{endpoint}` is neither http nor https"),
        ))
    }
}

/// The HTTP transport shared by all resource handles.
///
/// Cloning a [`Transport`] is cheap: the underlying connection pool and
/// settings are shared.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
    endpoint: Arc<str>,
    access_token: Option<Arc<str>>,
    error_fields: Arc<[ErrorField]>,
}

impl Transport {
    /// Creates a [`Transport`] from a [`Config`].
    ///
    /// # Errors
    ///
    /// Fails when the endpoint is not a valid `http` or `https` URL or
    /// when the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self> {
        let url = reqwest::Url::parse(&config.endpoint).map_err(|e| {
            Error::new(
                ErrorKind::Configuration,
                format!("Invalid endpoint `{}`: {e}", config.endpoint),
            )
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::new(
                ErrorKind::Configuration,
                format!("Unsupported endpoint scheme `{}`", url.scheme()),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint: Arc::from(slash_end(url.as_str())),
            access_token: config.access_token.as_deref().map(Arc::from),
            error_fields: Arc::from(config.error_fields.as_ref()),
        })
    }

    /// Returns the endpoint, without a trailing slash.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, slash_start(path))
    }

    /// Sends a `GET` request and parses the JSON response.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success statuses and undecodable
    /// bodies.
    pub async fn get<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.send(self.http.get(self.url(path))).await?;
        parse(response).await
    }

    /// Sends a `GET` request with query parameters and parses the JSON
    /// response.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success statuses and undecodable
    /// bodies.
    pub async fn get_query<T, Q>(&self, path: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let response = self
            .send(self.http.get(self.url(path)).query(query))
            .await?;
        parse(response).await
    }

    /// Sends a `GET` request with query parameters and returns the raw
    /// response body.
    ///
    /// # Errors
    ///
    /// Fails on transport errors and non-success statuses.
    pub async fn get_text<Q>(&self, path: &str, query: &Q) -> Result<String>
    where
        Q: Serialize + ?Sized,
    {
        let response = self
            .send(self.http.get(self.url(path)).query(query))
            .await?;
        Ok(response.text().await?)
    }

    /// Sends a `POST` request with a JSON body and parses the JSON
    /// response.
    ///
    /// An empty response body is parsed as `null`, hence as `()` or
    /// [`None`].
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success statuses and undecodable
    /// bodies.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(self.http.post(self.url(path)).json(body)).await?;
        parse(response).await
    }

    /// Sends a `POST` request without a body, discarding the response.
    ///
    /// # Errors
    ///
    /// Fails on transport errors and non-success statuses.
    pub async fn post_empty(&self, path: &str) -> Result<()> {
        self.send(self.http.post(self.url(path))).await?;
        Ok(())
    }

    /// Sends a `POST` request with a multipart body and parses the JSON
    /// response.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-success statuses and undecodable
    /// bodies.
    pub async fn post_multipart<T>(&self, path: &str, form: Form) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .send(self.http.post(self.url(path)).multipart(form))
            .await?;
        parse(response).await
    }

    /// Sends a `DELETE` request, discarding the response.
    ///
    /// # Errors
    ///
    /// Fails on transport errors and non-success statuses.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.http.delete(self.url(path))).await?;
        Ok(())
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        debug!("{} answered {status}", response.url().path());

        if status.is_success() {
            return Ok(response);
        }

        // An unreadable body falls back to the status text.
        let body = response.text().await.unwrap_or_default();
        Err(normalize(status, &body, &self.error_fields))
    }
}

async fn parse<T>(response: Response) -> Result<T>
where
    T: DeserializeOwned,
{
    let body = response.bytes().await?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    Ok(serde_json::from_slice(&body)?)
}
