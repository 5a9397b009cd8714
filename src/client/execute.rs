use tracing::debug;

use crate::error::Error;
use crate::request_spec::RequestSpec;
use crate::retry::{CancellationToken, RetryExecutor, RetryPolicy};
use crate::transport::{TransportRequest, TransportResponse};
use crate::util::{redact_uri_for_logs, truncate_body};

use super::{RequestAuthenticator, RestClient};

impl RestClient {
    /// Authorize once, then run transport, status check and decoding under the retry policy.
    pub(crate) fn execute_spec<T, F>(
        &self,
        spec: &RequestSpec,
        retry_policy: RetryPolicy,
        authenticator: Option<&dyn RequestAuthenticator>,
        cancellation: Option<CancellationToken>,
        mut decode_body: F,
    ) -> crate::Result<T>
    where
        F: FnMut(&str) -> crate::Result<Option<T>>,
    {
        if cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(Error::Cancelled {
                method: spec.method().clone(),
                uri: redact_uri_for_logs(spec.url()),
            });
        }

        let mut headers = spec.headers().clone();
        if let Some(authenticator) = authenticator {
            authenticator.authorize_cancellable(self, &mut headers, cancellation.as_ref())?;
        }

        let request = TransportRequest::new(spec.method().clone(), spec.url())
            .with_headers(headers)
            .with_body(spec.body_bytes());
        let redacted_uri = request.redacted_uri();
        debug!(
            method = %request.method,
            uri = %redacted_uri,
            max_attempts = retry_policy.max_attempts_value(),
            "executing http call"
        );

        RetryExecutor::new(retry_policy, request.method.clone(), redacted_uri)
            .cancellation(cancellation)
            .run(|| {
                let response = self.transport().execute(&request)?;
                let text = successful_body_text(&request, response)?;
                decode_body(&text)
            })
    }
}

fn successful_body_text(
    request: &TransportRequest,
    response: TransportResponse,
) -> crate::Result<String> {
    if !response.status.is_success() {
        return Err(Error::HttpStatus {
            status: response.status.as_u16(),
            method: request.method.clone(),
            uri: request.redacted_uri(),
            body: truncate_body(&response.body),
        });
    }
    Ok(response.text_lossy())
}
