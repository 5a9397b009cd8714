use std::sync::Arc;

use http::{HeaderMap, Method};

use crate::config::ClientConfig;
use crate::content_encoding::GzipTransport;
use crate::retry::CancellationToken;
use crate::transport::Transport;

mod builder;
mod execute;
mod request;

pub use request::RequestBuilder;

/// Blocking REST client. Cheap to clone; clones share the transport and its connection pool.
#[derive(Clone)]
pub struct RestClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    transport: GzipTransport<Arc<dyn Transport>>,
}

pub struct RestClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
}

/// Adds credentials to a request immediately before it is executed.
///
/// Runs on every `execute*` call, so an authenticator can refresh what it injects between calls.
pub trait RequestAuthenticator: Send + Sync {
    fn authorize(&self, client: &RestClient, headers: &mut HeaderMap) -> crate::Result<()>;

    /// Same as [`RequestAuthenticator::authorize`], with the caller's cancellation token for
    /// authenticators that make network calls of their own.
    fn authorize_cancellable(
        &self,
        client: &RestClient,
        headers: &mut HeaderMap,
        _cancellation: Option<&CancellationToken>,
    ) -> crate::Result<()> {
        self.authorize(client, headers)
    }
}

impl<T> RequestAuthenticator for Arc<T>
where
    T: RequestAuthenticator + ?Sized,
{
    fn authorize(&self, client: &RestClient, headers: &mut HeaderMap) -> crate::Result<()> {
        (**self).authorize(client, headers)
    }

    fn authorize_cancellable(
        &self,
        client: &RestClient,
        headers: &mut HeaderMap,
        cancellation: Option<&CancellationToken>,
    ) -> crate::Result<()> {
        (**self).authorize_cancellable(client, headers, cancellation)
    }
}

impl RestClient {
    pub fn builder() -> RestClientBuilder {
        RestClientBuilder::new()
    }

    /// Client with default configuration over the `ureq` transport.
    pub fn new() -> crate::Result<Self> {
        Self::builder().try_build()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Starts a request. When a base URL is configured it becomes the first URL segment.
    pub fn request(&self, method: Method) -> RequestBuilder<'_> {
        let mut builder = self.request_without_base(method);
        if let Some(base_url) = self.inner.config.base_url.as_deref() {
            builder = builder.add_url_segment(base_url);
        }
        builder
    }

    pub fn get(&self) -> RequestBuilder<'_> {
        self.request(Method::GET)
    }

    pub fn post(&self) -> RequestBuilder<'_> {
        self.request(Method::POST)
    }

    pub fn put(&self) -> RequestBuilder<'_> {
        self.request(Method::PUT)
    }

    pub fn delete(&self) -> RequestBuilder<'_> {
        self.request(Method::DELETE)
    }

    pub(crate) fn request_without_base(&self, method: Method) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, self.inner.config.default_retry_mode)
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        &self.inner.transport
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestClient")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
