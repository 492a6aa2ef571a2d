//! Request construction for the uplod API
//!
//! Every API call starts as a [`CallOptions`], which is either a bare path or
//! a full [`RequestOptions`] record. [`build_request`] normalizes both forms
//! into one [`PreparedRequest`] bound to the caller's [`ConnectionPool`].

use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use std::time::Duration;

/// User agent sent with every request; uplod refuses requests without it
/// unless started with `--disable-api-security`.
pub const UPLO_USER_AGENT: &str = "Uplo-Agent";

/// Timeout applied when the caller does not set one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Structured options for a single API call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// API path, e.g. `/gateway`
    pub path: String,
    /// HTTP method (defaults to GET)
    pub method: Method,
    /// Query string parameters, sent in order
    pub query: Vec<(String, String)>,
    /// Optional JSON request body
    pub body: Option<serde_json::Value>,
    /// Per-call timeout; [`DEFAULT_TIMEOUT`] when unset
    pub timeout: Option<Duration>,
    /// API password for daemons started with `--authenticate-api=true`
    pub api_password: Option<String>,
}

impl RequestOptions {
    /// Create options for a GET request to `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: Method::GET,
            query: Vec::new(),
            body: None,
            timeout: None,
            api_password: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn api_password(mut self, password: impl Into<String>) -> Self {
        self.api_password = Some(password.into());
        self
    }
}

/// Options accepted by [`call`](crate::client::call): a path shorthand or a
/// structured record.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOptions {
    Path(String),
    Options(RequestOptions),
}

impl From<&str> for CallOptions {
    fn from(path: &str) -> Self {
        CallOptions::Path(path.to_string())
    }
}

impl From<String> for CallOptions {
    fn from(path: String) -> Self {
        CallOptions::Path(path)
    }
}

impl From<&String> for CallOptions {
    fn from(path: &String) -> Self {
        CallOptions::Path(path.clone())
    }
}

impl From<RequestOptions> for CallOptions {
    fn from(options: RequestOptions) -> Self {
        CallOptions::Options(options)
    }
}

impl CallOptions {
    fn into_options(self) -> RequestOptions {
        match self {
            CallOptions::Path(path) => RequestOptions::new(path),
            CallOptions::Options(options) => options,
        }
    }
}

/// A fully resolved request, ready to be executed against the pool.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// Fully-qualified URL, `http://<address><path>`
    pub url: String,
    pub method: Method,
    /// Responses are parsed as JSON; always true
    pub json: bool,
    pub timeout: Duration,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Pool the request will be issued on
    pub pool: ConnectionPool,
}

impl PreparedRequest {
    /// `host:port` the request is addressed to; the pool's per-target key.
    pub fn target(&self) -> &str {
        let rest = self.url.strip_prefix("http://").unwrap_or(&self.url);
        match rest.find('/') {
            Some(idx) => &rest[..idx],
            None => rest,
        }
    }
}

/// Build the request for `options` against the daemon at `address`.
///
/// # Arguments
/// * `pool` - Connection pool the request will be issued on
/// * `address` - `host:port` of the uplod API
/// * `options` - Path shorthand or structured request options
///
/// # Errors
/// `Error::InvalidParameter` if the Authorization header cannot be built
pub fn build_request(
    pool: &ConnectionPool,
    address: &str,
    options: impl Into<CallOptions>,
) -> Result<PreparedRequest> {
    let options = options.into().into_options();

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(UPLO_USER_AGENT));
    if let Some(password) = &options.api_password {
        headers.insert(AUTHORIZATION, basic_auth(password)?);
    }

    Ok(PreparedRequest {
        url: format!("http://{}{}", address, options.path),
        method: options.method,
        json: true,
        timeout: options.timeout.unwrap_or(DEFAULT_TIMEOUT),
        headers,
        query: options.query,
        body: options.body,
        pool: pool.clone(),
    })
}

/// `Basic` credentials with an empty user name, marked sensitive.
fn basic_auth(password: &str) -> Result<HeaderValue> {
    let credentials = base64::engine::general_purpose::STANDARD.encode(format!(":{}", password));
    let mut value = HeaderValue::from_str(&format!("Basic {}", credentials))
        .map_err(|e| Error::InvalidParameter(format!("Invalid Authorization header: {}", e)))?;
    value.set_sensitive(true);
    Ok(value)
}
