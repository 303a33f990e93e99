//! Outbound protocol calls.
//!
//! [`ProtocolProxy`] turns a call name and its parameters into a signed URI
//! for one backend, performs it through a [`Transport`] and classifies the
//! outcome:
//!
//! - a `SUCCESS` document is returned as is
//! - a `FAILED` document becomes [`ProxyError::Remote`] with the backend's key
//!   and message untouched
//! - anything else (connection errors, non-2xx status, unparsable bodies,
//!   documents without a recognised return code, timeouts) becomes
//!   [`ProxyError::Transport`]

use crate::document::{self, DocumentError, Element, MESSAGE, MESSAGE_KEY, ROOT};
use crate::metrics_defs::{BACKEND_CALL_DURATION, BACKEND_CALL_FAILURES};
use crate::params::{CHECKSUM, Params};
use crate::signature::ChecksumAlgorithm;
use affinity::{Backend, BackendId};
use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use http::header::CONTENT_TYPE;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend answered with status {0}")]
    Status(StatusCode),

    #[error("malformed response: {0}")]
    Malformed(#[from] DocumentError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("backend reported {key}: {message}")]
    Remote { key: String, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("backend {0} has no usable API root")]
    InvalidEndpoint(BackendId),
}

impl ProxyError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProxyError::Remote { key, .. } if key == "notFound")
    }
}

/// A signed call ready to be sent to one backend.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolCall {
    pub call: String,
    pub uri: Url,
    /// Forwarded request body, e.g. a `create` presentation document
    pub body: Option<Bytes>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(&self, call: &ProtocolCall) -> Result<Element, TransportError>;
}

/// Performs calls over HTTP. Calls with a body are sent as `POST`.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(&self, call: &ProtocolCall) -> Result<Element, TransportError> {
        let request = match &call.body {
            Some(body) => self
                .client
                .post(call.uri.clone())
                .header(CONTENT_TYPE, "application/xml")
                .body(body.clone()),
            None => self.client.get(call.uri.clone()),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }

        let body = response.bytes().await?;
        Ok(document::parse(&body)?)
    }
}

pub struct ProtocolProxy {
    transport: Arc<dyn Transport>,
    checksum: ChecksumAlgorithm,
    timeout: Duration,
}

impl ProtocolProxy {
    pub fn new(
        transport: Arc<dyn Transport>,
        checksum: ChecksumAlgorithm,
        timeout: Duration,
    ) -> Self {
        ProtocolProxy {
            transport,
            checksum,
            timeout,
        }
    }

    /// Builds the signed URI for `call` on `backend`.
    ///
    /// Any inbound checksum in `params` is dropped; the call is re-signed with
    /// the backend's own secret.
    pub fn build_call(
        &self,
        backend: &Backend,
        call: &str,
        params: &Params,
        body: Option<Bytes>,
    ) -> Result<ProtocolCall, ProxyError> {
        let mut uri = backend.url.clone();
        uri.path_segments_mut()
            .map_err(|_| ProxyError::InvalidEndpoint(backend.id.clone()))?
            .pop_if_empty()
            .push(call);

        let query = params.without(&[CHECKSUM]).to_query_string();
        let checksum = self.checksum.checksum(call, &query, &backend.secret);
        if query.is_empty() {
            uri.set_query(Some(&format!("{CHECKSUM}={checksum}")));
        } else {
            uri.set_query(Some(&format!("{query}&{CHECKSUM}={checksum}")));
        }

        Ok(ProtocolCall {
            call: call.to_string(),
            uri,
            body,
        })
    }

    /// Performs `call` on `backend`, bounded by the configured timeout.
    pub async fn call(
        &self,
        backend: &Backend,
        call: &str,
        params: &Params,
        body: Option<Bytes>,
    ) -> Result<Element, ProxyError> {
        let protocol_call = self.build_call(backend, call, params, body)?;

        let start = Instant::now();
        let performed =
            tokio::time::timeout(self.timeout, self.transport.perform(&protocol_call)).await;
        let result = performed.unwrap_or(Err(TransportError::Timeout(self.timeout)));
        histogram!(
            BACKEND_CALL_DURATION,
            "call" => call.to_string(),
            "backend" => backend.id.clone()
        )
        .record(start.elapsed().as_secs_f64());

        let classified = result.and_then(classify);
        if let Err(e) = &classified {
            counter!(
                BACKEND_CALL_FAILURES,
                "call" => call.to_string(),
                "backend" => backend.id.clone()
            )
            .increment(1);
            tracing::warn!(backend = %backend.id, call, error = %e, "Backend call failed");
        }

        match classified? {
            Outcome::Success(document) => Ok(document),
            Outcome::Failed { key, message } => {
                tracing::debug!(
                    backend = %backend.id,
                    call,
                    key = %key,
                    "Backend returned failure"
                );
                Err(ProxyError::Remote { key, message })
            }
        }
    }
}

enum Outcome {
    Success(Element),
    Failed { key: String, message: String },
}

/// Only a `<response>` with a `SUCCESS` return code, or a `FAILED` one that
/// names its message key, is a protocol answer.
fn classify(document: Element) -> Result<Outcome, TransportError> {
    if document.name != ROOT {
        return Err(malformed(format!("unexpected root <{}>", document.name)));
    }
    if document.is_success() {
        return Ok(Outcome::Success(document));
    }
    if !document.is_failure() {
        return Err(malformed("missing or unknown returncode".to_string()));
    }
    match document.child_text(MESSAGE_KEY) {
        Some(key) if !key.is_empty() => Ok(Outcome::Failed {
            key: key.to_string(),
            message: document.child_text(MESSAGE).unwrap_or_default().to_string(),
        }),
        _ => Err(malformed("failure without messageKey".to_string())),
    }
}

fn malformed(reason: String) -> TransportError {
    TransportError::Malformed(DocumentError::Malformed(reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{ScriptedTransport, backend};
    use wiremock::matchers::{body_string, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn proxy(transport: Arc<dyn Transport>) -> ProtocolProxy {
        ProtocolProxy::new(transport, ChecksumAlgorithm::Sha256, Duration::from_secs(5))
    }

    #[test]
    fn test_build_call_signs_with_backend_secret() {
        let proxy = proxy(Arc::new(ScriptedTransport::new()));
        let backend = backend("bbb1");
        let params = Params::parse("meetingID=room+1&checksum=inbound&name=Daily");

        let call = proxy.build_call(&backend, "create", &params, None).unwrap();
        let expected = ChecksumAlgorithm::Sha256.checksum(
            "create",
            "meetingID=room+1&name=Daily",
            "bbb1-secret",
        );

        assert_eq!(call.uri.path(), "/bigbluebutton/api/create");
        assert_eq!(
            call.uri.query(),
            Some(format!("meetingID=room+1&name=Daily&checksum={expected}").as_str())
        );
    }

    #[test]
    fn test_build_call_without_params_or_trailing_slash() {
        let proxy = proxy(Arc::new(ScriptedTransport::new()));
        let backend = Backend::new(
            "bare",
            Url::parse("http://bare.test/bigbluebutton/api").unwrap(),
            "s",
        );

        let call = proxy
            .build_call(&backend, "getMeetings", &Params::default(), None)
            .unwrap();
        let expected = ChecksumAlgorithm::Sha256.checksum("getMeetings", "", "s");
        assert_eq!(
            call.uri.as_str(),
            format!("http://bare.test/bigbluebutton/api/getMeetings?checksum={expected}")
        );
    }

    #[tokio::test]
    async fn test_remote_failure_passes_through() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            "bbb1",
            "end",
            Element::failure("notFound", "We could not find a meeting with that meeting ID"),
        );
        let proxy = proxy(transport);

        let err = proxy
            .call(&backend("bbb1"), "end", &Params::parse("meetingID=m"), None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        match err {
            ProxyError::Remote { key, message } => {
                assert_eq!(key, "notFound");
                assert_eq!(message, "We could not find a meeting with that meeting ID");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_documents_are_transport_errors() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            "bbb1",
            "getMeetingInfo",
            Element::new("html").child_element(Element::with_text("body", "Maintenance")),
        );
        transport.respond(
            "bbb1",
            "isMeetingRunning",
            Element::new("response").child_element(Element::with_text("running", "true")),
        );
        transport.respond(
            "bbb1",
            "end",
            Element::new("response").child_element(Element::with_text("returncode", "FAILED")),
        );
        let proxy = proxy(transport);
        let params = Params::parse("meetingID=m");

        for call in ["getMeetingInfo", "isMeetingRunning", "end"] {
            let err = proxy
                .call(&backend("bbb1"), call, &params, None)
                .await
                .unwrap_err();
            assert!(
                matches!(err, ProxyError::Transport(TransportError::Malformed(_))),
                "{call}: {err:?}"
            );
            assert!(matches!(
                crate::errors::ApiError::from(err),
                crate::errors::ApiError::Internal(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_timeout_is_transport_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_after(
            "bbb1",
            "getMeetingInfo",
            Element::success(),
            Duration::from_secs(30),
        );
        let proxy =
            ProtocolProxy::new(transport, ChecksumAlgorithm::Sha256, Duration::from_millis(50));

        let err = proxy
            .call(&backend("bbb1"), "getMeetingInfo", &Params::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Transport(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_http_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bigbluebutton/api/getMeetingInfo"))
            .and(query_param("meetingID", "m1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<response><returncode>SUCCESS</returncode><meetingID>m1</meetingID></response>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/bigbluebutton/api/create"))
            .and(body_string("<modules/>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<response><returncode>SUCCESS</returncode></response>",
            ))
            .mount(&server)
            .await;
        Mock::given(path("/bigbluebutton/api/end"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(path("/bigbluebutton/api/getMeetings"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>"))
            .mount(&server)
            .await;

        let transport = Arc::new(HttpTransport::new(Duration::from_secs(5)).unwrap());
        let proxy = proxy(transport);
        let backend = Backend::new(
            "mock",
            Url::parse(&format!("{}/bigbluebutton/api/", server.uri())).unwrap(),
            "s",
        );
        let params = Params::parse("meetingID=m1");

        let doc = proxy.call(&backend, "getMeetingInfo", &params, None).await.unwrap();
        assert_eq!(doc.child_text("meetingID"), Some("m1"));

        proxy
            .call(&backend, "create", &params, Some(Bytes::from_static(b"<modules/>")))
            .await
            .unwrap();

        let err = proxy.call(&backend, "end", &params, None).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Transport(TransportError::Status(StatusCode::SERVICE_UNAVAILABLE))
        ));

        let err = proxy.call(&backend, "getMeetings", &params, None).await.unwrap_err();
        assert!(matches!(err, ProxyError::Transport(TransportError::Malformed(_))));
    }
}
