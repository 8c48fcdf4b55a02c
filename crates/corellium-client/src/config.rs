use std::borrow::Cow;
use std::time::Duration;

use crate::api_error::{DEFAULT_ERROR_FIELDS, ErrorField};

/// Default API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://app.corellium.com/";

/// Environment variable overriding the endpoint.
pub const ENDPOINT_VARIABLE: &str = "CORELLIUM_ENDPOINT";

/// Environment variable holding the access token.
pub const TOKEN_VARIABLE: &str = "CORELLIUM_API_TOKEN";

// REST root, versioned paths are appended to it.
const DEFAULT_API_ROOT: &str = "/api";

// Assessment service root.
const DEFAULT_MATRIX_ROOT: &str = "/api/v1/services/matrix";

// Maximum time allotted to a single HTTP request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub(crate) endpoint: String,
    pub(crate) access_token: Option<String>,
    pub(crate) api_root: Cow<'static, str>,
    pub(crate) matrix_root: Cow<'static, str>,
    pub(crate) request_timeout: Duration,
    pub(crate) error_fields: Cow<'static, [ErrorField]>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Creates a [`Config`] pointing to the default endpoint, without an
    /// access token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            access_token: None,
            api_root: Cow::Borrowed(DEFAULT_API_ROOT),
            matrix_root: Cow::Borrowed(DEFAULT_MATRIX_ROOT),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            error_fields: Cow::Borrowed(DEFAULT_ERROR_FIELDS),
        }
    }

    /// Creates a [`Config`] from the process environment.
    ///
    /// The endpoint is read from `CORELLIUM_ENDPOINT`, falling back to the
    /// default one, and the access token from `CORELLIUM_API_TOKEN`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let config = Self::new();
        let config = match non_empty(ENDPOINT_VARIABLE) {
            Some(endpoint) => config.endpoint(endpoint),
            None => config,
        };
        match non_empty(TOKEN_VARIABLE) {
            Some(token) => config.access_token(token),
            None => config,
        }
    }

    /// Sets the API endpoint.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the bearer token sent along with every request.
    #[must_use]
    pub fn access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    /// Sets the REST root path.
    #[must_use]
    pub fn api_root(mut self, api_root: impl Into<Cow<'static, str>>) -> Self {
        self.api_root = api_root.into();
        self
    }

    /// Sets the assessment service root path.
    #[must_use]
    pub fn matrix_root(mut self, matrix_root: impl Into<Cow<'static, str>>) -> Self {
        self.matrix_root = matrix_root.into();
        self
    }

    /// Sets the maximum time allotted to a single HTTP request.
    #[must_use]
    pub const fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Sets the order in which error bodies are searched for a message.
    #[must_use]
    pub fn error_fields(mut self, error_fields: impl Into<Cow<'static, [ErrorField]>>) -> Self {
        self.error_fields = error_fields.into();
        self
    }

    /// Returns the API endpoint.
    #[must_use]
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint
    }
}
