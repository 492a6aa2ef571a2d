//! # Uplo SDK
//!
//! A Rust SDK for starting and talking to a Uplo daemon (`uplod`).
//!
//! This SDK provides:
//! - Launching uplod with default flags and logging its output to a file
//! - Readiness checks against the daemon's API
//! - JSON HTTP calls over a shared, bounded connection pool
//! - Exact uplocoin <-> hastings conversion
//!
//! ## Features
//!
//! - **Connection Pool**: One keep-alive pool per application, with a hard
//!   ceiling on concurrent sockets per daemon address
//! - **Client**: `call`, `is_running` and `connect` against any `host:port`
//! - **Launcher**: Merges caller settings over uplod's defaults and pipes
//!   stdout/stderr into `uplod-output.log`
//! - **Units**: Arbitrary-precision conversion that never drifts and never
//!   prints exponents
//!
//! ## Example
//!
//! ```no_run
//! use uplo_sdk::client::UplodClient;
//! use uplo_sdk::pool::ConnectionPool;
//! use uplo_sdk::request::RequestOptions;
//! use uplo_sdk::units::hastings_to_uplocoins;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // One pool for the whole application
//! let pool = ConnectionPool::with_defaults()?;
//!
//! // Connect to a running uplod
//! let uplod = UplodClient::connect(&pool, "localhost:8480").await?;
//!
//! // Query the wallet
//! let wallet = uplod.call("/wallet").await?;
//! let balance = hastings_to_uplocoins(wallet["confirmeduplocoinbalance"].as_str().unwrap_or("0"))?;
//! println!("Balance: {} UC", balance);
//!
//! // Structured options
//! let files = uplod
//!     .call(RequestOptions::new("/renter/files").query("cached", true))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod launch;
pub mod pool;
pub mod request;
pub mod units;

pub use error::{Error, Result};

/// Re-export the entry points
pub use client::{call, call_as, connect, is_running, is_running_within, UplodClient};
pub use launch::{launch, LaunchSettings, SettingValue, UplodProcess};
pub use pool::{ConnectionPool, PoolConfig};
pub use request::{build_request, CallOptions, RequestOptions};

/// Re-export unit conversion functions
pub use units::{hastings_to_uplocoins, uplocoins_to_hastings, Amount};
