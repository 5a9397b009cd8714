use http::Method;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Coarse failure class a caller can branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The request description or client configuration is unusable.
    Config,
    /// Connection, I/O or non-success HTTP status. Retried per policy.
    Transport,
    /// The body does not match the declared response shape. Never retried.
    Decode,
    /// Token acquisition failed.
    Auth,
    /// The caller asked to stop.
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    SerializeJson,
    RequestBuild,
    Transport,
    Timeout,
    ReadBody,
    ResponseBodyTooLarge,
    HttpStatus,
    EmptyResponse,
    DecodeContentEncoding,
    EncodeContentEncoding,
    Deserialize,
    DecodeScalar,
    UnexpectedShape,
    MissingCredentials,
    TokenEndpoint,
    InvalidTokenResponse,
    TokenRefreshFailed,
    Cancelled,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::SerializeJson => "serialize_json",
            Self::RequestBuild => "request_build",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::ReadBody => "read_body",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::HttpStatus => "http_status",
            Self::EmptyResponse => "empty_response",
            Self::DecodeContentEncoding => "decode_content_encoding",
            Self::EncodeContentEncoding => "encode_content_encoding",
            Self::Deserialize => "deserialize",
            Self::DecodeScalar => "decode_scalar",
            Self::UnexpectedShape => "unexpected_shape",
            Self::MissingCredentials => "missing_credentials",
            Self::TokenEndpoint => "token_endpoint",
            Self::InvalidTokenResponse => "invalid_token_response",
            Self::TokenRefreshFailed => "token_refresh_failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::InvalidUri
            | Self::InvalidHeaderName
            | Self::InvalidHeaderValue
            | Self::SerializeJson
            | Self::RequestBuild => ErrorCategory::Config,
            Self::Transport
            | Self::Timeout
            | Self::ReadBody
            | Self::ResponseBodyTooLarge
            | Self::HttpStatus
            | Self::EmptyResponse
            | Self::DecodeContentEncoding
            | Self::EncodeContentEncoding => ErrorCategory::Transport,
            Self::Deserialize | Self::DecodeScalar | Self::UnexpectedShape => {
                ErrorCategory::Decode
            }
            Self::MissingCredentials
            | Self::TokenEndpoint
            | Self::InvalidTokenResponse
            | Self::TokenRefreshFailed => ErrorCategory::Auth,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error(
        "response body too large ({actual_bytes} bytes > {limit_bytes} bytes) for {method} {uri}"
    )]
    ResponseBodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
        method: Method,
        uri: String,
    },
    #[error("http status error {status} for {method} {uri}: {body}")]
    HttpStatus {
        status: u16,
        method: Method,
        uri: String,
        body: String,
    },
    #[error("http call to {method} {uri} returned no usable body")]
    EmptyResponse { method: Method, uri: String },
    #[error("failed to decode response content-encoding {encoding} for {method} {uri}: {message}")]
    DecodeContentEncoding {
        encoding: String,
        method: Method,
        uri: String,
        message: String,
    },
    #[error("failed to gzip request body for {method} {uri}: {source}")]
    EncodeContentEncoding {
        method: Method,
        uri: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("failed to decode response as {expected}: {body}")]
    DecodeScalar { expected: &'static str, body: String },
    #[error("response is not a {expected}: {body}")]
    UnexpectedShape { expected: &'static str, body: String },
    #[error("token endpoint credentials are incomplete: {field} is missing")]
    MissingCredentials { field: &'static str },
    #[error("token endpoint request failed: {source}")]
    TokenEndpoint {
        #[source]
        source: Box<Error>,
    },
    #[error("invalid token response: {message}")]
    InvalidTokenResponse { message: String },
    #[error("token refresh failed in a concurrent call: {message}")]
    TokenRefreshFailed { message: String },
    #[error("request cancelled for {method} {uri}")]
    Cancelled { method: Method, uri: String },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::HttpStatus { .. } => ErrorCode::HttpStatus,
            Self::EmptyResponse { .. } => ErrorCode::EmptyResponse,
            Self::DecodeContentEncoding { .. } => ErrorCode::DecodeContentEncoding,
            Self::EncodeContentEncoding { .. } => ErrorCode::EncodeContentEncoding,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::DecodeScalar { .. } => ErrorCode::DecodeScalar,
            Self::UnexpectedShape { .. } => ErrorCode::UnexpectedShape,
            Self::MissingCredentials { .. } => ErrorCode::MissingCredentials,
            Self::TokenEndpoint { .. } => ErrorCode::TokenEndpoint,
            Self::InvalidTokenResponse { .. } => ErrorCode::InvalidTokenResponse,
            Self::TokenRefreshFailed { .. } => ErrorCode::TokenRefreshFailed,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
        }
    }

    pub const fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// Body encode/decode failures of the content-encoding layer are deterministic, so only the
    /// I/O and status failures qualify.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Timeout { .. }
                | Self::ReadBody { .. }
                | Self::HttpStatus { .. }
                | Self::EmptyResponse { .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::TokenEndpoint { source } => source.status(),
            _ => None,
        }
    }
}
