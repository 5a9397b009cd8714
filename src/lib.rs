//! `restkit` is a blocking REST request layer: fluent request descriptions, bounded retries with
//! jittered backoff, transparent gzip, and an OAuth2 password-grant token cache.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use restkit::prelude::{RestClient, TokenCache, TokenEndpoint};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RestClient::builder()
//!         .base_url("https://api.example.com")
//!         .read_timeout(Duration::from_secs(3))
//!         .try_build()?;
//!
//!     let tokens = TokenCache::new(
//!         TokenEndpoint::new("https://idp.example.com/token", "my-app")
//!             .credentials("jane", "secret"),
//!     );
//!
//!     let users: Vec<User> = client
//!         .get()
//!         .add_url_segment("v1/users")
//!         .add_query_param("page", "2")
//!         .authenticated_by(&tokens)
//!         .retry_short()
//!         .execute_list()?;
//!
//!     println!("fetched {} users", users.len());
//!     Ok(())
//! }
//! ```
//!
//! # Failure Convention
//!
//! Every terminal call returns [`Result`]. A `2xx` response whose body is empty where a value was
//! required counts as a failed attempt and is retried; once the attempts run out it surfaces as
//! [`ErrorCode::EmptyResponse`]. Decode failures are returned immediately.

mod client;
mod config;
mod content_encoding;
mod decode;
mod error;
mod request_spec;
mod retry;
mod token;
mod transport;
mod util;

pub use crate::client::{RequestAuthenticator, RequestBuilder, RestClient, RestClientBuilder};
pub use crate::config::{BasicCredentials, ClientConfig};
pub use crate::content_encoding::GzipTransport;
pub use crate::decode::{Decoded, ResponseShape, ScalarKind, decode, decode_json};
pub use crate::error::{Error, ErrorCategory, ErrorCode, TransportErrorKind};
pub use crate::request_spec::{RequestBody, RequestSpec};
pub use crate::retry::{CancellationToken, RetryExecutor, RetryMode, RetryPolicy};
pub use crate::token::{Clock, SystemClock, TokenCache, TokenEndpoint, TokenSnapshot};
pub use crate::transport::{Transport, TransportRequest, TransportResponse, UreqTransport};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        CancellationToken, Decoded, Error, ErrorCategory, ErrorCode, RequestAuthenticator,
        ResponseShape, RestClient, RetryMode, RetryPolicy, ScalarKind, TokenCache, TokenEndpoint,
    };
}

#[cfg(test)]
mod tests;
