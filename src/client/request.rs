use bytes::Bytes;
use http::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::decode::{Decoded, ResponseShape, ScalarKind, decode, decode_json};
use crate::error::Error;
use crate::request_spec::{RequestSpec, SpecParts};
use crate::retry::{CancellationToken, RetryMode, RetryPolicy};
use crate::util::redact_uri_for_logs;

use super::{RequestAuthenticator, RestClient};

const FORM_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";

/// Fluent request description bound to a [`RestClient`].
///
/// Every setter consumes and returns the builder. Cloning it keeps the accumulated description,
/// so one builder can be executed several times.
#[derive(Clone)]
pub struct RequestBuilder<'a> {
    client: &'a RestClient,
    method: Method,
    parts: SpecParts,
    retry_policy: Option<RetryPolicy>,
    authenticator: Option<&'a dyn RequestAuthenticator>,
    cancellation: Option<CancellationToken>,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a RestClient, method: Method, retry_mode: RetryMode) -> Self {
        let mut parts = SpecParts::default();
        parts.set_retry_mode(retry_mode);
        Self {
            client,
            method,
            parts,
            retry_policy: None,
            authenticator: None,
            cancellation: None,
        }
    }

    /// Appends a path part with leading and trailing `/` removed. `None` is ignored; an empty
    /// part is kept and shows up as an empty path segment.
    pub fn add_url_segment<'s>(mut self, part: impl Into<Option<&'s str>>) -> Self {
        self.parts.add_url_segment(part.into());
        self
    }

    /// Sets a header unless either side is `None`. A repeated name replaces the earlier value.
    pub fn add_header<'k, 'v>(
        mut self,
        key: impl Into<Option<&'k str>>,
        value: impl Into<Option<&'v str>>,
    ) -> Self {
        self.parts.add_header(key.into(), value.into());
        self
    }

    /// Sets a query parameter unless either side is `None`. Leading and trailing `&`/`?` are
    /// removed before both sides are percent-encoded.
    pub fn add_query_param<'k, 'v>(
        mut self,
        key: impl Into<Option<&'k str>>,
        value: impl Into<Option<&'v str>>,
    ) -> Self {
        self.parts.add_query_param(key.into(), value.into());
        self
    }

    pub fn response_shape(mut self, shape: ResponseShape) -> Self {
        self.parts.set_shape(shape);
        self
    }

    pub fn expect_raw(self) -> Self {
        self.response_shape(ResponseShape::Raw)
    }

    pub fn expect_scalar(self, kind: ScalarKind) -> Self {
        self.response_shape(ResponseShape::Scalar(kind))
    }

    pub fn expect_structured(self) -> Self {
        self.response_shape(ResponseShape::Structured)
    }

    pub fn expect_list(self) -> Self {
        self.response_shape(ResponseShape::List)
    }

    pub fn retry_short(self) -> Self {
        self.retry_mode(RetryMode::Short)
    }

    pub fn retry_enduring(self) -> Self {
        self.retry_mode(RetryMode::Enduring)
    }

    pub fn retry_mode(mut self, retry_mode: RetryMode) -> Self {
        self.parts.set_retry_mode(retry_mode);
        self.retry_policy = None;
        self
    }

    /// Overrides the policy derived from the retry mode.
    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    /// Text body. Replaces any earlier body, binary included.
    pub fn body(mut self, text: impl Into<String>) -> Self {
        self.parts.set_text_body(text.into());
        self
    }

    /// Binary body, sent as `application/octet-stream` unless a media type is set.
    pub fn body_bytes(mut self, bytes: impl Into<Bytes>) -> Self {
        self.parts.set_binary_body(bytes.into());
        self
    }

    pub fn json<T>(mut self, value: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let text =
            serde_json::to_string(value).map_err(|source| Error::SerializeJson { source })?;
        self.parts.set_text_body(text);
        Ok(self)
    }

    /// `application/x-www-form-urlencoded` text body.
    pub fn form<'p, I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'p str, &'p str)>,
    {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in pairs {
            serializer.append_pair(key, value);
        }
        self.parts.set_text_body(serializer.finish());
        self.parts.set_media_type(FORM_MEDIA_TYPE.to_owned());
        self
    }

    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.parts.set_media_type(media_type.into());
        self
    }

    /// Gzip the request body on the wire.
    pub fn compress_body(mut self) -> Self {
        self.parts.set_compress_body(true);
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn authenticated_by(mut self, authenticator: &'a dyn RequestAuthenticator) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Freezes the description without sending anything.
    pub fn build(&self) -> crate::Result<RequestSpec> {
        self.parts.freeze(self.method.clone())
    }

    /// Sends the request and decodes the body into the declared [`ResponseShape`].
    pub fn execute(self) -> crate::Result<Decoded> {
        let shape = self.parts.shape();
        self.run(move |text| {
            let decoded = decode(text, shape)?;
            Ok((!decoded.is_absent()).then_some(decoded))
        })
    }

    /// Body text as received. An empty body is a valid result here.
    pub fn execute_text(self) -> crate::Result<String> {
        self.expect_raw().run(|text| Ok(Some(text.to_owned())))
    }

    /// Like [`RequestBuilder::execute_text`], but a blank body is a failed attempt.
    pub(crate) fn execute_required_text(self) -> crate::Result<String> {
        self.expect_raw().run(|text| {
            Ok((!text.trim().is_empty()).then(|| text.to_owned()))
        })
    }

    pub fn execute_json<T>(self) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        self.expect_structured().run(decode_json::<T>)
    }

    pub fn execute_list<T>(self) -> crate::Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        self.expect_list().run(decode_json::<Vec<T>>)
    }

    pub fn execute_bool(self) -> crate::Result<bool> {
        self.execute_scalar(ScalarKind::Boolean, Decoded::as_bool)
    }

    pub fn execute_i64(self) -> crate::Result<i64> {
        self.execute_scalar(ScalarKind::Integer, Decoded::as_i64)
    }

    pub fn execute_f64(self) -> crate::Result<f64> {
        self.execute_scalar(ScalarKind::Float, Decoded::as_f64)
    }

    fn execute_scalar<T>(
        self,
        kind: ScalarKind,
        extract: fn(&Decoded) -> Option<T>,
    ) -> crate::Result<T> {
        let shape = ResponseShape::Scalar(kind);
        self.response_shape(shape)
            .run(move |text| decode(text, shape).map(|decoded| extract(&decoded)))
    }

    fn run<T, F>(self, decode_body: F) -> crate::Result<T>
    where
        F: FnMut(&str) -> crate::Result<Option<T>>,
    {
        let spec = self.build()?;
        let retry_policy = self
            .retry_policy
            .unwrap_or_else(|| spec.retry_mode().policy());
        self.client.execute_spec(
            &spec,
            retry_policy,
            self.authenticator,
            self.cancellation,
            decode_body,
        )
    }
}

impl std::fmt::Debug for RequestBuilder<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &redact_uri_for_logs(&self.parts.assembled_url()))
            .field("authenticated", &self.authenticator.is_some())
            .finish_non_exhaustive()
    }
}
