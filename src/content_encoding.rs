//! Transparent gzip for request and response bodies.
//!
//! [`GzipTransport`] wraps any [`Transport`]: it advertises `Accept-Encoding: gzip`, compresses
//! bodies the caller marked with `Content-Encoding: gzip`, and hands back decoded response bodies
//! with the `Content-Encoding` and `Content-Length` headers removed.

use std::io::{self, Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue};
use http::{HeaderMap, Method, StatusCode};

use crate::error::Error;
use crate::transport::{Transport, TransportRequest, TransportResponse};

#[derive(Debug)]
pub(crate) enum DecodeContentEncodingError {
    Decode { encoding: String, message: String },
    TooLarge { actual_bytes: usize },
}

fn read_to_end_limited<R: Read>(
    reader: &mut R,
    encoding: &str,
    max_bytes: usize,
) -> Result<Vec<u8>, DecodeContentEncodingError> {
    let mut decoded = Vec::new();
    let mut chunk = [0_u8; 8 * 1024];

    loop {
        let read = reader.read(&mut chunk).map_err(|error: io::Error| {
            DecodeContentEncodingError::Decode {
                encoding: encoding.to_owned(),
                message: error.to_string(),
            }
        })?;
        if read == 0 {
            break;
        }
        let next_size = decoded.len().saturating_add(read);
        if next_size > max_bytes {
            return Err(DecodeContentEncodingError::TooLarge {
                actual_bytes: next_size,
            });
        }
        decoded.extend_from_slice(&chunk[..read]);
    }

    Ok(decoded)
}

pub(crate) fn should_decode_content_encoded_body(
    method: &Method,
    status: StatusCode,
    body_len: usize,
) -> bool {
    if body_len == 0 {
        return false;
    }
    if *method == Method::HEAD {
        return false;
    }
    if status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return false;
    }
    true
}

pub(crate) fn decode_content_encoded_body_limited(
    mut body: Bytes,
    headers: &HeaderMap,
    max_bytes: usize,
) -> Result<Bytes, DecodeContentEncodingError> {
    let max_bytes = max_bytes.max(1);
    let Some(content_encoding) = headers.get(CONTENT_ENCODING) else {
        return Ok(body);
    };
    let content_encoding =
        content_encoding
            .to_str()
            .map_err(|error| DecodeContentEncodingError::Decode {
                encoding: "content-encoding".to_owned(),
                message: error.to_string(),
            })?;
    let mut encodings = content_encoding
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>();

    while let Some(encoding) = encodings.pop() {
        let decoded = match encoding.to_ascii_lowercase().as_str() {
            "identity" => {
                if body.len() > max_bytes {
                    return Err(DecodeContentEncodingError::TooLarge {
                        actual_bytes: body.len(),
                    });
                }
                body.to_vec()
            }
            "gzip" | "x-gzip" => {
                let mut decoder = flate2::read::GzDecoder::new(body.as_ref());
                read_to_end_limited(&mut decoder, encoding, max_bytes)?
            }
            "deflate" => {
                let mut decoder = flate2::read::ZlibDecoder::new(body.as_ref());
                read_to_end_limited(&mut decoder, encoding, max_bytes)?
            }
            other => {
                return Err(DecodeContentEncodingError::Decode {
                    encoding: other.to_owned(),
                    message: "unsupported content-encoding".to_owned(),
                });
            }
        };
        body = Bytes::from(decoded);
    }

    Ok(body)
}

pub(crate) fn gzip_encode(body: &[u8]) -> io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder.write_all(body)?;
    encoder.finish().map(Bytes::from)
}

fn is_marked_for_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("gzip"))
}

fn is_gzip_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value.split(',').map(str::trim).any(|encoding| {
                encoding.eq_ignore_ascii_case("gzip") || encoding.eq_ignore_ascii_case("x-gzip")
            })
        })
}

/// Rewrites an outgoing request: advertise gzip and compress a marked body.
///
/// The compressed length is only known after encoding, so any caller-supplied
/// `Content-Length` is dropped and left to the transport.
pub(crate) fn prepare_request(request: &TransportRequest) -> crate::Result<TransportRequest> {
    let marked = is_marked_for_gzip(&request.headers);
    let compress = marked && !request.body.is_empty();
    if request.headers.contains_key(ACCEPT_ENCODING) && !marked {
        return Ok(request.clone());
    }

    let mut prepared = request.clone();
    if !prepared.headers.contains_key(ACCEPT_ENCODING) {
        prepared
            .headers
            .insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    }
    if compress {
        prepared.body = gzip_encode(&request.body).map_err(|source| {
            Error::EncodeContentEncoding {
                method: request.method.clone(),
                uri: request.redacted_uri(),
                source,
            }
        })?;
        prepared.headers.remove(CONTENT_LENGTH);
    } else if marked {
        prepared.headers.remove(CONTENT_ENCODING);
    }
    Ok(prepared)
}

pub(crate) fn decode_response(
    request: &TransportRequest,
    mut response: TransportResponse,
    max_bytes: usize,
) -> crate::Result<TransportResponse> {
    if !response.headers.contains_key(CONTENT_ENCODING) {
        return Ok(response);
    }
    if !should_decode_content_encoded_body(&request.method, response.status, response.body.len())
    {
        if is_gzip_encoded(&response.headers) {
            response.headers.remove(CONTENT_ENCODING);
            response.headers.remove(CONTENT_LENGTH);
        }
        return Ok(response);
    }

    response.body = decode_content_encoded_body_limited(response.body, &response.headers, max_bytes)
        .map_err(|error| match error {
            DecodeContentEncodingError::Decode { encoding, message } => {
                Error::DecodeContentEncoding {
                    encoding,
                    message,
                    method: request.method.clone(),
                    uri: request.redacted_uri(),
                }
            }
            DecodeContentEncodingError::TooLarge { actual_bytes } => Error::ResponseBodyTooLarge {
                limit_bytes: max_bytes,
                actual_bytes,
                method: request.method.clone(),
                uri: request.redacted_uri(),
            },
        })?;
    response.headers.remove(CONTENT_ENCODING);
    response.headers.remove(CONTENT_LENGTH);
    Ok(response)
}

pub struct GzipTransport<T> {
    inner: T,
    max_decoded_bytes: usize,
}

impl<T> GzipTransport<T> {
    pub fn new(inner: T, max_decoded_bytes: usize) -> Self {
        Self {
            inner,
            max_decoded_bytes: max_decoded_bytes.max(1),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T> Transport for GzipTransport<T>
where
    T: Transport,
{
    fn execute(&self, request: &TransportRequest) -> crate::Result<TransportResponse> {
        let prepared = prepare_request(request)?;
        let response = self.inner.execute(&prepared)?;
        decode_response(request, response, self.max_decoded_bytes)
    }
}
