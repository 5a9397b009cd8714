use std::sync::Arc;
use std::time::Duration;

use crate::config::{BasicCredentials, ClientConfig};
use crate::content_encoding::GzipTransport;
use crate::retry::RetryMode;
use crate::transport::{Transport, UreqTransport};

use super::{ClientInner, RestClient, RestClientBuilder};

impl RestClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            transport: None,
        }
    }

    /// Replaces every setting with `config`.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.config = self.config.with_connect_timeout(connect_timeout);
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.config = self.config.with_read_timeout(read_timeout);
        self
    }

    pub fn write_timeout(mut self, write_timeout: Duration) -> Self {
        self.config = self.config.with_write_timeout(write_timeout);
        self
    }

    pub fn basic_auth(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.config = self
            .config
            .with_basic_auth(BasicCredentials::new(user_name, password));
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.config = self
            .config
            .with_max_response_body_bytes(max_response_body_bytes);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config = self.config.with_user_agent(user_agent);
        self
    }

    pub fn default_retry_mode(mut self, retry_mode: RetryMode) -> Self {
        self.config = self.config.with_default_retry_mode(retry_mode);
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config = self.config.with_base_url(base_url);
        self
    }

    /// Installs a custom transport in place of the `ureq` default.
    ///
    /// The gzip layer still wraps it. Timeouts and basic credentials from the config are only
    /// honoured by the default transport.
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn try_build(self) -> crate::Result<RestClient> {
        if let Some(base_url) = self.config.base_url.as_deref()
            && url::Url::parse(base_url).is_err()
        {
            return Err(crate::error::Error::InvalidUri {
                uri: base_url.to_owned(),
            });
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(UreqTransport::new(&self.config)?),
        };
        let transport = GzipTransport::new(transport, self.config.max_response_body_bytes);

        Ok(RestClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                transport,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::error::ErrorCode;
    use crate::retry::RetryMode;

    use super::RestClient;

    #[test]
    fn builder_applies_settings_to_config() {
        let client = RestClient::builder()
            .connect_timeout(Duration::from_millis(1500))
            .read_timeout(Duration::from_millis(2500))
            .basic_auth("svc", "secret")
            .default_retry_mode(RetryMode::Short)
            .base_url("https://api.example.com/v1")
            .try_build()
            .expect("client builds");

        let config = client.config();
        assert_eq!(config.connect_timeout, Duration::from_millis(1500));
        assert_eq!(config.read_timeout, Duration::from_millis(2500));
        assert_eq!(config.write_timeout, Duration::from_millis(10_000));
        assert_eq!(config.default_retry_mode, RetryMode::Short);
        assert_eq!(
            config.basic_auth.as_ref().map(|credentials| credentials.user_name.as_str()),
            Some("svc")
        );
        assert!(!format!("{client:?}").contains("secret"));
    }

    #[test]
    fn relative_base_url_is_rejected() {
        let error = RestClient::builder()
            .base_url("api.example.com")
            .try_build()
            .expect_err("base url without scheme");
        assert_eq!(error.code(), ErrorCode::InvalidUri);
    }
}
