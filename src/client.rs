//! Client for the uplod HTTP API
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::request::{build_request, CallOptions, PreparedRequest, RequestOptions};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;

/// Path requested to decide whether the API is up
pub const LIVENESS_PATH: &str = "/gateway";

/// Timeout of the liveness check (10 minutes)
pub const LIVENESS_TIMEOUT: Duration = Duration::from_millis(600_000);

/// Make one call to the uplod API at `address`.
///
/// Resolves with the parsed response body for a 2xx status. A non-2xx reply
/// becomes [`Error::Api`] carrying the body; a transport failure becomes
/// [`Error::Connection`] (or [`Error::Timeout`] if the deadline passed while
/// waiting for a pooled socket). Calls are never retried.
///
/// # Arguments
/// * `pool` - Connection pool to issue the request on
/// * `address` - `host:port` of the uplod API
/// * `options` - A path (e.g. `"/gateway"`) or [`RequestOptions`]
pub async fn call(
    pool: &ConnectionPool,
    address: &str,
    options: impl Into<CallOptions>,
) -> Result<serde_json::Value> {
    execute(build_request(pool, address, options)?).await
}

/// Like [`call`], deserializing a successful body into `T`.
pub async fn call_as<T: DeserializeOwned>(
    pool: &ConnectionPool,
    address: &str,
    options: impl Into<CallOptions>,
) -> Result<T> {
    let body = call(pool, address, options).await?;
    Ok(serde_json::from_value(body)?)
}

/// Issue a prepared request on its pool.
///
/// The request's timeout covers the whole call, including time spent queued
/// behind the pool's socket ceiling.
pub async fn execute(request: PreparedRequest) -> Result<serde_json::Value> {
    let deadline = Instant::now() + request.timeout;

    let _permit = tokio::time::timeout_at(deadline, request.pool.checkout(request.target()))
        .await
        .map_err(|_| Error::Timeout(request.timeout))??;

    let remaining = deadline.saturating_duration_since(Instant::now());
    let mut builder = request
        .pool
        .http()
        .request(request.method.clone(), &request.url)
        .headers(request.headers.clone())
        .timeout(remaining);
    if !request.query.is_empty() {
        builder = builder.query(&request.query);
    }
    if let Some(ref body) = request.body {
        builder = builder.json(body);
    }

    let response = builder.send().await?;
    let status = response.status();
    let text = response.text().await?;
    tracing::debug!("{} {} -> {}", request.method, request.url, status);

    let body = parse_body(&text);
    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

/// Check whether the uplod API at `address` answers.
///
/// This only reports API reachability: a uplod process that is still loading
/// its modules reports `false`. Errors are never returned.
pub async fn is_running(pool: &ConnectionPool, address: &str) -> bool {
    is_running_within(pool, address, LIVENESS_TIMEOUT).await
}

/// Like [`is_running`], but gives up after `timeout` instead of
/// [`LIVENESS_TIMEOUT`]. Suited to polling a daemon that is starting up.
pub async fn is_running_within(pool: &ConnectionPool, address: &str, timeout: Duration) -> bool {
    let options = RequestOptions::new(LIVENESS_PATH).timeout(timeout);
    match call(pool, address, options).await {
        Ok(_) => true,
        Err(e) => {
            tracing::debug!("uplod at {} is not reachable: {}", address, e);
            false
        }
    }
}

/// Connect to a running uplod at `address`.
///
/// Fails with [`Error::CouldNotConnect`] when the API does not answer.
pub async fn connect(pool: &ConnectionPool, address: impl Into<String>) -> Result<UplodClient> {
    UplodClient::connect(pool, address).await
}

fn parse_body(text: &str) -> serde_json::Value {
    if text.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

/// Handle bound to one uplod API address.
///
/// Obtained from [`UplodClient::connect`], which only succeeds once the API
/// has answered a liveness check.
#[derive(Debug, Clone)]
pub struct UplodClient {
    address: String,
    pool: ConnectionPool,
}

impl UplodClient {
    /// Check `address` and return a handle bound to it.
    ///
    /// # Example
    /// ```no_run
    /// use uplo_sdk::client::UplodClient;
    /// use uplo_sdk::pool::ConnectionPool;
    ///
    /// # async fn example() -> uplo_sdk::Result<()> {
    /// let pool = ConnectionPool::with_defaults()?;
    /// let uplod = UplodClient::connect(&pool, "localhost:8480").await?;
    /// let gateway = uplod.call("/gateway").await?;
    /// println!("{}", gateway);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(pool: &ConnectionPool, address: impl Into<String>) -> Result<Self> {
        let address = address.into();
        if !is_running(pool, &address).await {
            tracing::warn!("Could not connect to uplod at {}", address);
            return Err(Error::CouldNotConnect);
        }
        Ok(Self {
            address,
            pool: pool.clone(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Call the API at this handle's address. See [`call`].
    pub async fn call(&self, options: impl Into<CallOptions>) -> Result<serde_json::Value> {
        call(&self.pool, &self.address, options).await
    }

    /// Call the API and deserialize the response into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, options: impl Into<CallOptions>) -> Result<T> {
        call_as(&self.pool, &self.address, options).await
    }

    /// Check the API again; the result is never cached.
    pub async fn is_running(&self) -> bool {
        is_running(&self.pool, &self.address).await
    }
}
