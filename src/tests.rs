use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use http::header::{
    ACCEPT_ENCODING, AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue,
};
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::{RequestAuthenticator, RestClient};
use crate::decode::{Decoded, ScalarKind};
use crate::error::{Error, ErrorCategory, ErrorCode, TransportErrorKind};
use crate::retry::{CancellationToken, RetryMode, RetryPolicy};
use crate::token::{TokenCache, TokenEndpoint};
use crate::transport::{Transport, TransportRequest, TransportResponse};

enum Scripted {
    Respond(StatusCode, HeaderMap, Bytes),
    Refuse,
}

#[derive(Default)]
struct RecordingTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl RecordingTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn respond(self: &Arc<Self>, status: u16, body: &str) -> Arc<Self> {
        self.respond_with(status, HeaderMap::new(), Bytes::copy_from_slice(body.as_bytes()))
    }

    fn respond_with(self: &Arc<Self>, status: u16, headers: HeaderMap, body: Bytes) -> Arc<Self> {
        let status = StatusCode::from_u16(status).expect("valid status");
        self.script
            .lock()
            .expect("lock script")
            .push_back(Scripted::Respond(status, headers, body));
        Arc::clone(self)
    }

    fn refuse(self: &Arc<Self>) -> Arc<Self> {
        self.script
            .lock()
            .expect("lock script")
            .push_back(Scripted::Refuse);
        Arc::clone(self)
    }

    fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().expect("lock requests").clone()
    }

    fn served(&self) -> usize {
        self.requests.lock().expect("lock requests").len()
    }
}

impl Transport for RecordingTransport {
    fn execute(&self, request: &TransportRequest) -> crate::Result<TransportResponse> {
        self.requests
            .lock()
            .expect("lock requests")
            .push(request.clone());
        let next = self.script.lock().expect("lock script").pop_front();
        match next {
            Some(Scripted::Respond(status, headers, body)) => {
                Ok(TransportResponse::new(status, headers, body))
            }
            Some(Scripted::Refuse) | None => Err(Error::Transport {
                kind: TransportErrorKind::Connect,
                method: request.method.clone(),
                uri: request.redacted_uri(),
                source: "connection refused".into(),
            }),
        }
    }
}

fn client(transport: &Arc<RecordingTransport>) -> RestClient {
    RestClient::builder()
        .transport(Arc::clone(transport))
        .try_build()
        .expect("client builds")
}

fn fast_retries(attempts: usize) -> RetryPolicy {
    RetryPolicy::enduring()
        .max_attempts(attempts)
        .backoff_cap(Duration::from_millis(1))
        .jitter(Duration::ZERO)
}

fn gzip(bytes: &[u8]) -> Bytes {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("write gzip fixture");
    Bytes::from(encoder.finish().expect("finish gzip fixture"))
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
struct Item {
    id: u32,
    name: String,
}

#[test]
fn assembled_request_reaches_the_transport() {
    let transport = RecordingTransport::new().respond(200, "ok");
    let client = client(&transport);

    let text = client
        .get()
        .add_url_segment("https://api.example.com/")
        .add_url_segment("/v1/")
        .add_url_segment(None::<&str>)
        .add_url_segment("items")
        .add_query_param("&page", "2?")
        .add_query_param("q", "red shoes")
        .add_query_param("ignored", None::<&str>)
        .add_header("X-Tenant", "acme")
        .add_header("X-Missing", None::<&str>)
        .execute_text()
        .expect("request succeeds");
    assert_eq!(text, "ok");

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, Method::GET);
    assert_eq!(
        request.uri,
        "https://api.example.com/v1/items?page=2&q=red+shoes"
    );
    assert_eq!(request.headers["x-tenant"], "acme");
    assert!(!request.headers.contains_key("x-missing"));
    assert_eq!(request.headers[ACCEPT_ENCODING], "gzip");
    assert!(request.body.is_empty());
}

#[test]
fn base_url_is_the_first_segment() {
    let transport = RecordingTransport::new().respond(200, "");
    let client = RestClient::builder()
        .base_url("https://api.example.com/v2/")
        .transport(Arc::clone(&transport))
        .try_build()
        .expect("client builds");

    client
        .delete()
        .add_url_segment("items")
        .add_url_segment("42")
        .execute_text()
        .expect("delete succeeds");
    let request = &transport.requests()[0];
    assert_eq!(request.method, Method::DELETE);
    assert_eq!(request.uri, "https://api.example.com/v2/items/42");
}

#[test]
fn trailing_empty_segment_keeps_a_trailing_slash() {
    let transport = RecordingTransport::new().respond(200, "");
    client(&transport)
        .get()
        .add_url_segment("https://api.example.com")
        .add_url_segment("users")
        .add_url_segment("")
        .execute_text()
        .expect("request succeeds");
    assert_eq!(transport.requests()[0].uri, "https://api.example.com/users/");
}

#[test]
fn json_body_round_trips_through_typed_decoding() {
    let transport = RecordingTransport::new().respond(201, r#"{"id":7,"name":"widget"}"#);
    let client = client(&transport);

    let created: Item = client
        .post()
        .add_url_segment("https://api.example.com/items")
        .json(&json!({"name": "widget"}))
        .expect("serializable body")
        .execute_json()
        .expect("created item");
    assert_eq!(
        created,
        Item {
            id: 7,
            name: "widget".to_owned()
        }
    );

    let request = &transport.requests()[0];
    assert_eq!(request.headers[CONTENT_TYPE], "application/json");
    assert_eq!(request.body, Bytes::from_static(br#"{"name":"widget"}"#));
}

#[test]
fn binary_body_defaults_to_octet_stream_and_form_sets_its_media_type() {
    let transport = RecordingTransport::new().respond(200, "").respond(200, "");
    let client = client(&transport);

    client
        .put()
        .add_url_segment("https://api.example.com/blobs/1")
        .body("ignored text")
        .body_bytes(vec![0_u8, 1, 2])
        .execute_text()
        .expect("upload succeeds");
    client
        .post()
        .add_url_segment("https://api.example.com/login")
        .form([("user", "jane doe"), ("next", "/home")])
        .execute_text()
        .expect("form post succeeds");

    let requests = transport.requests();
    assert_eq!(requests[0].headers[CONTENT_TYPE], "application/octet-stream");
    assert_eq!(requests[0].body, Bytes::from_static(&[0, 1, 2]));
    assert_eq!(
        requests[1].headers[CONTENT_TYPE],
        "application/x-www-form-urlencoded"
    );
    assert_eq!(requests[1].body, Bytes::from_static(b"user=jane+doe&next=%2Fhome"));
}

#[test]
fn list_and_scalar_terminals_decode_their_shapes() {
    let transport = RecordingTransport::new()
        .respond(200, r#"[{"id":1,"name":"a"},{"id":2,"name":"b"}]"#)
        .respond(200, "True")
        .respond(200, " 42 ")
        .respond(200, "2.5");
    let client = client(&transport);
    let url = "https://api.example.com/values";

    let items: Vec<Item> = client
        .get()
        .add_url_segment(url)
        .execute_list()
        .expect("list");
    assert_eq!(items.len(), 2);
    assert!(client.get().add_url_segment(url).execute_bool().expect("bool"));
    assert_eq!(client.get().add_url_segment(url).execute_i64().expect("int"), 42);
    assert_eq!(client.get().add_url_segment(url).execute_f64().expect("float"), 2.5);
}

#[test]
fn execute_decodes_into_the_declared_shape() {
    let transport = RecordingTransport::new()
        .respond(200, r#"{"status":"up"}"#)
        .respond(200, "17");
    let client = client(&transport);
    let url = "https://api.example.com/health";

    let decoded = client
        .get()
        .add_url_segment(url)
        .expect_structured()
        .execute()
        .expect("structured");
    assert_eq!(decoded.into_json(), Some(json!({"status": "up"})));

    let decoded = client
        .get()
        .add_url_segment(url)
        .expect_scalar(ScalarKind::Integer)
        .execute()
        .expect("integer");
    assert_eq!(decoded, Decoded::Integer(17));
}

#[test]
fn server_errors_are_retried_under_the_short_policy() {
    let transport = RecordingTransport::new()
        .respond(503, "busy")
        .respond(200, r#"{"id":1,"name":"a"}"#);
    let item: Item = client(&transport)
        .get()
        .add_url_segment("https://api.example.com/items/1")
        .retry_short()
        .execute_json()
        .expect("second attempt succeeds");
    assert_eq!(item.id, 1);
    assert_eq!(transport.served(), 2);
}

#[test]
fn default_once_policy_surfaces_the_status_error() {
    let transport = RecordingTransport::new().respond(404, "no such item");
    let error = client(&transport)
        .get()
        .add_url_segment("https://api.example.com/items/9")
        .execute_text()
        .expect_err("not found");
    assert_eq!(error.code(), ErrorCode::HttpStatus);
    assert_eq!(error.status(), Some(404));
    assert_eq!(error.category(), ErrorCategory::Transport);
    assert_eq!(transport.served(), 1);
}

#[test]
fn client_default_retry_mode_applies_to_new_requests() {
    let transport = RecordingTransport::new().refuse().respond(200, "ok");
    let client = RestClient::builder()
        .default_retry_mode(RetryMode::Short)
        .transport(Arc::clone(&transport))
        .try_build()
        .expect("client builds");
    let text = client
        .get()
        .add_url_segment("https://api.example.com/")
        .execute_text()
        .expect("retried after refusal");
    assert_eq!(text, "ok");
    assert_eq!(transport.served(), 2);
}

#[test]
fn empty_success_body_is_retried_then_reported() {
    let transport = RecordingTransport::new()
        .respond(200, "")
        .respond(200, "")
        .respond(200, "");
    let error = client(&transport)
        .get()
        .add_url_segment("https://api.example.com/items")
        .retry_policy(fast_retries(3))
        .execute_json::<Item>()
        .expect_err("never a usable body");
    assert_eq!(error.code(), ErrorCode::EmptyResponse);
    assert_eq!(transport.served(), 3);
}

#[test]
fn empty_body_is_a_valid_text_result() {
    let transport = RecordingTransport::new().respond(204, "");
    let text = client(&transport)
        .delete()
        .add_url_segment("https://api.example.com/items/1")
        .retry_enduring()
        .execute_text()
        .expect("no content");
    assert!(text.is_empty());
    assert_eq!(transport.served(), 1);
}

#[test]
fn decode_failures_are_not_retried() {
    let transport = RecordingTransport::new()
        .respond(200, "<html>oops</html>")
        .respond(200, r#"{"id":1,"name":"a"}"#);
    let error = client(&transport)
        .get()
        .add_url_segment("https://api.example.com/items/1")
        .retry_policy(fast_retries(3))
        .execute_json::<Item>()
        .expect_err("html is not an item");
    assert_eq!(error.category(), ErrorCategory::Decode);
    assert_eq!(transport.served(), 1);
}

#[test]
fn gzip_responses_are_decoded_transparently() {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static("999"));
    let transport = RecordingTransport::new().respond_with(
        200,
        headers,
        gzip(br#"{"id":3,"name":"zipped"}"#),
    );
    let item: Item = client(&transport)
        .get()
        .add_url_segment("https://api.example.com/items/3")
        .execute_json()
        .expect("decoded item");
    assert_eq!(item.name, "zipped");
}

#[test]
fn compressed_request_bodies_are_gzipped_on_the_wire() {
    let transport = RecordingTransport::new().respond(200, "");
    client(&transport)
        .post()
        .add_url_segment("https://api.example.com/bulk")
        .body(r#"{"rows":[1,2,3]}"#)
        .compress_body()
        .execute_text()
        .expect("upload succeeds");

    let request = &transport.requests()[0];
    assert_eq!(request.headers[CONTENT_ENCODING], "gzip");
    assert_eq!(request.headers[CONTENT_TYPE], "application/json");
    let mut decoder = flate2::read::GzDecoder::new(request.body.as_ref());
    let mut plain = String::new();
    decoder
        .read_to_string(&mut plain)
        .expect("gzip request body");
    assert_eq!(plain, r#"{"rows":[1,2,3]}"#);
}

#[test]
fn invalid_url_fails_before_sending() {
    let transport = RecordingTransport::new();
    let error = client(&transport)
        .get()
        .add_url_segment("users")
        .execute_text()
        .expect_err("relative url");
    assert_eq!(error.code(), ErrorCode::InvalidUri);
    assert_eq!(error.category(), ErrorCategory::Config);
    assert_eq!(transport.served(), 0);
}

struct CountingAuthenticator {
    calls: Mutex<u32>,
}

impl RequestAuthenticator for CountingAuthenticator {
    fn authorize(&self, _client: &RestClient, headers: &mut HeaderMap) -> crate::Result<()> {
        let mut calls = self.calls.lock().expect("lock calls");
        *calls += 1;
        let value = HeaderValue::from_str(&format!("Bearer token-{calls}")).expect("header");
        headers.insert(AUTHORIZATION, value);
        Ok(())
    }
}

#[test]
fn authentication_runs_on_every_execute() {
    let transport = RecordingTransport::new().respond(200, "a").respond(200, "b");
    let client = client(&transport);
    let authenticator = CountingAuthenticator {
        calls: Mutex::new(0),
    };

    let builder = client
        .get()
        .add_url_segment("https://api.example.com/me")
        .authenticated_by(&authenticator);
    builder.clone().execute_text().expect("first call");
    builder.execute_text().expect("second call");

    let requests = transport.requests();
    assert_eq!(requests[0].headers[AUTHORIZATION], "Bearer token-1");
    assert_eq!(requests[1].headers[AUTHORIZATION], "Bearer token-2");
}

struct FailingAuthenticator;

impl RequestAuthenticator for FailingAuthenticator {
    fn authorize(&self, _client: &RestClient, _headers: &mut HeaderMap) -> crate::Result<()> {
        Err(Error::MissingCredentials { field: "password" })
    }
}

#[test]
fn authentication_failure_skips_the_call() {
    let transport = RecordingTransport::new().respond(200, "unused");
    let error = client(&transport)
        .get()
        .add_url_segment("https://api.example.com/me")
        .authenticated_by(&FailingAuthenticator)
        .execute_text()
        .expect_err("auth fails");
    assert_eq!(error.category(), ErrorCategory::Auth);
    assert_eq!(transport.served(), 0);
}

#[test]
fn cancelled_request_is_not_sent() {
    let transport = RecordingTransport::new().respond(200, "unused");
    let token = CancellationToken::new();
    token.cancel();
    let error = client(&transport)
        .get()
        .add_url_segment("https://api.example.com/slow")
        .cancellation(token)
        .execute_text()
        .expect_err("cancelled");
    assert_eq!(error.code(), ErrorCode::Cancelled);
    assert_eq!(transport.served(), 0);
}

#[test]
fn cancelled_request_skips_the_token_endpoint() {
    let transport = RecordingTransport::new()
        .respond(200, r#"{"access_token":"tok","expires_in":60}"#)
        .respond(200, "unused");
    let tokens = TokenCache::new(
        TokenEndpoint::new("https://idp.example.com/token", "app").credentials("jane", "pw"),
    );
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let error = client(&transport)
        .get()
        .add_url_segment("https://api.example.com/me")
        .authenticated_by(&tokens)
        .cancellation(cancellation)
        .execute_text()
        .expect_err("cancelled");
    assert_eq!(error.code(), ErrorCode::Cancelled);
    assert_eq!(transport.served(), 0);
    assert!(tokens.snapshot().is_none());
}

#[test]
fn build_exposes_the_frozen_spec() {
    let transport = RecordingTransport::new();
    let client = client(&transport);
    let spec = client
        .post()
        .add_url_segment("https://api.example.com/items")
        .body("{}")
        .retry_enduring()
        .build()
        .expect("valid spec");
    assert_eq!(*spec.method(), Method::POST);
    assert_eq!(spec.url(), "https://api.example.com/items");
    assert_eq!(spec.retry_mode(), RetryMode::Enduring);
    assert_eq!(spec.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(transport.served(), 0);
}
