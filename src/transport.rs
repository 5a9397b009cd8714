use std::io::Read;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{AUTHORIZATION, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use tracing::debug;

use crate::config::{BasicCredentials, ClientConfig};
use crate::error::{Error, TransportErrorKind};
use crate::util::redact_uri_for_logs;

/// One outgoing HTTP exchange as seen by a [`Transport`].
#[derive(Clone, Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub(crate) fn redacted_uri(&self) -> String {
        redact_uri_for_logs(&self.uri)
    }
}

#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Executes exactly one request. Retry, compression and auth live above this seam.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &TransportRequest) -> crate::Result<TransportResponse>;
}

impl<T> Transport for std::sync::Arc<T>
where
    T: Transport + ?Sized,
{
    fn execute(&self, request: &TransportRequest) -> crate::Result<TransportResponse> {
        (**self).execute(request)
    }
}

/// Blocking transport backed by a pooled `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
    basic_auth: Option<HeaderValue>,
    timeouts: PhaseTimeouts,
    max_response_body_bytes: usize,
}

#[derive(Clone, Copy, Debug)]
struct PhaseTimeouts {
    connect: Duration,
    write: Duration,
    read: Duration,
}

impl PhaseTimeouts {
    /// The configured limit for the phase `ureq` reports as timed out.
    fn for_phase(&self, phase: ureq::Timeout) -> Duration {
        match phase {
            ureq::Timeout::Resolve | ureq::Timeout::Connect => self.connect,
            ureq::Timeout::SendRequest | ureq::Timeout::SendBody | ureq::Timeout::Await100 => {
                self.write
            }
            _ => self.read,
        }
    }
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UreqTransport")
            .field("basic_auth", &self.basic_auth.is_some())
            .field("timeouts", &self.timeouts)
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish()
    }
}

impl UreqTransport {
    pub fn new(config: &ClientConfig) -> crate::Result<Self> {
        let agent_config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .user_agent(config.user_agent.as_str())
            .timeout_connect(Some(config.connect_timeout))
            .timeout_send_request(Some(config.write_timeout))
            .timeout_send_body(Some(config.write_timeout))
            .timeout_recv_response(Some(config.read_timeout))
            .timeout_recv_body(Some(config.read_timeout))
            .build();
        let basic_auth = config
            .basic_auth
            .as_ref()
            .map(basic_authorization_value)
            .transpose()?;

        Ok(Self {
            agent: agent_config.new_agent(),
            basic_auth,
            timeouts: PhaseTimeouts {
                connect: config.connect_timeout,
                write: config.write_timeout,
                read: config.read_timeout,
            },
            max_response_body_bytes: config.max_response_body_bytes.max(1),
        })
    }

    fn run_once(
        &self,
        request: &TransportRequest,
        authorization: Option<&HeaderValue>,
    ) -> crate::Result<TransportResponse> {
        let mut builder = ureq::http::Request::builder()
            .method(request.method.clone())
            .uri(request.uri.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        let outgoing = builder
            .body(request.body.to_vec())
            .map_err(|source| Error::RequestBuild { source })?;

        let mut response = self
            .agent
            .run(outgoing)
            .map_err(|source| map_ureq_error(source, request, self.timeouts))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = read_all_body_limited(&mut response, self.max_response_body_bytes).map_err(
            |error| match error {
                ReadBodyError::TooLarge { actual_bytes } => Error::ResponseBodyTooLarge {
                    limit_bytes: self.max_response_body_bytes,
                    actual_bytes,
                    method: request.method.clone(),
                    uri: request.redacted_uri(),
                },
                ReadBodyError::Read(source) => Error::ReadBody {
                    source: Box::new(source),
                },
            },
        )?;
        Ok(TransportResponse::new(status, headers, body))
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &TransportRequest) -> crate::Result<TransportResponse> {
        let response = self.run_once(request, None)?;
        if response.status != StatusCode::UNAUTHORIZED
            || request.headers.contains_key(AUTHORIZATION)
        {
            return Ok(response);
        }
        let Some(basic_auth) = &self.basic_auth else {
            return Ok(response);
        };
        debug!(
            method = %request.method,
            uri = %request.redacted_uri(),
            "answering 401 challenge with basic credentials"
        );
        self.run_once(request, Some(basic_auth))
    }
}

fn basic_authorization_value(credentials: &BasicCredentials) -> crate::Result<HeaderValue> {
    let encoded = STANDARD.encode(format!(
        "{}:{}",
        credentials.user_name, credentials.password
    ));
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}")).map_err(|source| {
        Error::InvalidHeaderValue {
            name: AUTHORIZATION.as_str().to_owned(),
            source,
        }
    })?;
    value.set_sensitive(true);
    Ok(value)
}

fn map_ureq_error(
    source: ureq::Error,
    request: &TransportRequest,
    timeouts: PhaseTimeouts,
) -> Error {
    match source {
        ureq::Error::Timeout(phase) => Error::Timeout {
            timeout_ms: timeouts.for_phase(phase).as_millis(),
            method: request.method.clone(),
            uri: request.redacted_uri(),
        },
        other => Error::Transport {
            kind: classify_ureq_transport_error(&other),
            method: request.method.clone(),
            uri: request.redacted_uri(),
            source: Box::new(other),
        },
    }
}

pub(crate) fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) | ureq::Error::Rustls(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(source) => match source.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportErrorKind::Read
            }
            std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
            _ => TransportErrorKind::Other,
        },
        _ => TransportErrorKind::Other,
    }
}

enum ReadBodyError {
    Read(std::io::Error),
    TooLarge { actual_bytes: usize },
}

fn read_all_body_limited(
    response: &mut ureq::http::Response<ureq::Body>,
    max_bytes: usize,
) -> Result<Bytes, ReadBodyError> {
    let mut reader = response.body_mut().as_reader();
    let mut collected = Vec::new();
    let mut chunk = [0_u8; 8192];

    loop {
        let read = reader.read(&mut chunk).map_err(ReadBodyError::Read)?;
        if read == 0 {
            break;
        }
        let total_len = collected.len().saturating_add(read);
        if total_len > max_bytes {
            return Err(ReadBodyError::TooLarge {
                actual_bytes: total_len,
            });
        }
        collected.extend_from_slice(&chunk[..read]);
    }

    Ok(Bytes::from(collected))
}
