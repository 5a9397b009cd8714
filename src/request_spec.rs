use std::collections::BTreeMap;

use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method};

use crate::decode::ResponseShape;
use crate::error::Error;
use crate::retry::RetryMode;
use crate::util::{
    build_query_string, encode_component, join_segments, parse_header_name, parse_header_value,
    trim_query_component, trim_url_segment,
};

const DEFAULT_TEXT_MEDIA_TYPE: &str = "application/json";
const DEFAULT_BINARY_MEDIA_TYPE: &str = "application/octet-stream";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestBody {
    Text(String),
    Binary(Bytes),
}

impl RequestBody {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    fn default_media_type(&self) -> &'static str {
        match self {
            Self::Text(_) => DEFAULT_TEXT_MEDIA_TYPE,
            Self::Binary(_) => DEFAULT_BINARY_MEDIA_TYPE,
        }
    }
}

/// Frozen request description handed to the executor.
#[derive(Clone, Debug)]
pub struct RequestSpec {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<RequestBody>,
    shape: ResponseShape,
    retry_mode: RetryMode,
}

impl RequestSpec {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Caller headers plus the derived `Content-Type` and, for bodies marked for compression,
    /// `Content-Encoding: gzip`.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    pub fn retry_mode(&self) -> RetryMode {
        self.retry_mode
    }

    pub(crate) fn body_bytes(&self) -> Bytes {
        match &self.body {
            Some(RequestBody::Text(text)) => Bytes::from(text.clone()),
            Some(RequestBody::Binary(bytes)) => bytes.clone(),
            None => Bytes::new(),
        }
    }
}

/// Mutable accumulator behind the fluent builder.
#[derive(Clone, Debug, Default)]
pub(crate) struct SpecParts {
    segments: Vec<String>,
    headers: BTreeMap<String, (String, String)>,
    params: BTreeMap<String, String>,
    body: Option<RequestBody>,
    media_type: Option<String>,
    compress_body: bool,
    shape: ResponseShape,
    retry_mode: RetryMode,
}

impl SpecParts {
    pub(crate) fn add_url_segment(&mut self, part: Option<&str>) {
        if let Some(part) = part {
            self.segments.push(trim_url_segment(part).to_owned());
        }
    }

    pub(crate) fn add_header(&mut self, key: Option<&str>, value: Option<&str>) {
        if let (Some(key), Some(value)) = (key, value) {
            self.headers.insert(
                key.to_ascii_lowercase(),
                (key.to_owned(), value.to_owned()),
            );
        }
    }

    pub(crate) fn add_query_param(&mut self, key: Option<&str>, value: Option<&str>) {
        if let (Some(key), Some(value)) = (key, value) {
            self.params.insert(
                encode_component(trim_query_component(key)),
                encode_component(trim_query_component(value)),
            );
        }
    }

    pub(crate) fn set_text_body(&mut self, text: String) {
        self.body = Some(RequestBody::Text(text));
    }

    pub(crate) fn set_binary_body(&mut self, bytes: Bytes) {
        self.body = Some(RequestBody::Binary(bytes));
    }

    pub(crate) fn set_media_type(&mut self, media_type: String) {
        self.media_type = Some(media_type);
    }

    pub(crate) fn set_compress_body(&mut self, compress_body: bool) {
        self.compress_body = compress_body;
    }

    pub(crate) fn set_shape(&mut self, shape: ResponseShape) {
        self.shape = shape;
    }

    pub(crate) fn set_retry_mode(&mut self, retry_mode: RetryMode) {
        self.retry_mode = retry_mode;
    }

    pub(crate) fn shape(&self) -> ResponseShape {
        self.shape
    }

    pub(crate) fn assembled_url(&self) -> String {
        let mut url = join_segments(self.segments.iter().map(String::as_str));
        let pairs = self
            .params
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()));
        if let Some(query) = build_query_string(pairs) {
            url.push('?');
            url.push_str(&query);
        }
        url
    }

    pub(crate) fn freeze(&self, method: Method) -> Result<RequestSpec, Error> {
        let url = self.assembled_url();
        if url::Url::parse(&url).is_err() {
            return Err(Error::InvalidUri { uri: url });
        }

        let mut headers = HeaderMap::new();
        for (name, value) in self.headers.values() {
            let name = parse_header_name(name)?;
            let value = parse_header_value(name.as_str(), value)?;
            headers.insert(name, value);
        }

        if let Some(body) = &self.body {
            if !headers.contains_key(CONTENT_TYPE) {
                let media_type = self
                    .media_type
                    .as_deref()
                    .unwrap_or_else(|| body.default_media_type());
                headers.insert(
                    CONTENT_TYPE,
                    parse_header_value(CONTENT_TYPE.as_str(), media_type)?,
                );
            }
            if self.compress_body {
                headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            }
        }

        Ok(RequestSpec {
            method,
            url,
            headers,
            body: self.body.clone(),
            shape: self.shape,
            retry_mode: self.retry_mode,
        })
    }
}
