//! Inbound API surface.
//!
//! Requests for `/bigbluebutton/api/<call>` are checked by the
//! [`SignatureGuard`] and dispatched by call name. Every answer is an XML
//! document with HTTP status 200, failures included; `join` answers with a
//! redirect to the owning backend.

use crate::calls::{
    CREATE, END, GET_MEETING_INFO, GET_MEETINGS, GET_RECORDINGS, IS_MEETING_RUNNING, JOIN,
    PUBLISH_RECORDINGS, UPDATE_RECORDINGS,
};
use crate::config::Config;
use crate::document::Element;
use crate::errors::{ApiError, GatewayError};
use crate::fanout::FanOutAggregator;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::params::Params;
use crate::proxy::{ProtocolProxy, Transport};
use crate::recordings::{RecordingCatalog, RecordingOrchestrator};
use crate::sessions::{SessionRouter, SessionSettings};
use crate::signature::SignatureGuard;
use affinity::{Affinity, AffinityStore};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::service::Service;
use shared::http::{boxed, make_boxed_error_response, make_error_response};
use shared::{gauge, histogram};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

pub const API_ROOT: &str = "/bigbluebutton/api";
pub const API_VERSION: &str = "2.0";

const XML_CONTENT_TYPE: &str = "application/xml";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

const KNOWN_CALLS: &[&str] = &[
    GET_MEETING_INFO,
    IS_MEETING_RUNNING,
    GET_MEETINGS,
    CREATE,
    END,
    JOIN,
    GET_RECORDINGS,
    PUBLISH_RECORDINGS,
    UPDATE_RECORDINGS,
];

enum Reply {
    Document(Element),
    Redirect(Url),
}

pub struct Gateway {
    guard: SignatureGuard,
    sessions: SessionRouter,
    fanout: FanOutAggregator,
    recordings: RecordingOrchestrator,
    build: Option<String>,
}

impl Gateway {
    pub fn new(
        config: &Config,
        store: Arc<dyn AffinityStore>,
        transport: Arc<dyn Transport>,
        catalog: Arc<dyn RecordingCatalog>,
    ) -> Self {
        let affinity = Affinity::new(store);
        let proxy = Arc::new(ProtocolProxy::new(
            transport,
            config.outbound_checksum,
            Duration::from_secs(config.backend_timeout_secs),
        ));
        let settings = SessionSettings {
            duration_ceiling: config.duration_ceiling(),
        };

        Gateway {
            guard: SignatureGuard::new(config.secrets.clone()),
            sessions: SessionRouter::new(affinity.clone(), proxy.clone(), settings),
            fanout: FanOutAggregator::new(affinity, proxy, config.fan_out_policy),
            recordings: RecordingOrchestrator::new(catalog),
            build: config.build.clone(),
        }
    }

    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let Some(call) = api_call(request.uri().path()) else {
            return make_error_response(StatusCode::NOT_FOUND);
        };
        let call = call.to_string();

        let start = Instant::now();
        let reply = if call.is_empty() {
            Ok(Reply::Document(self.version()))
        } else {
            let (raw_params, body) = split_request(request);
            self.dispatch(&call, &raw_params, body).await
        };

        let outcome = match &reply {
            Ok(Reply::Document(document)) if document.is_success() => "success",
            Ok(Reply::Redirect(_)) => "redirect",
            _ => "failed",
        };
        let label = if call.is_empty() {
            "version"
        } else {
            KNOWN_CALLS
                .iter()
                .find(|known| **known == call)
                .copied()
                .unwrap_or("unknown")
        };
        histogram!(REQUEST_DURATION, "call" => label, "outcome" => outcome)
            .record(start.elapsed().as_secs_f64());

        match reply {
            Ok(Reply::Document(document)) => xml_response(&document),
            Ok(Reply::Redirect(url)) => redirect(&url),
            Err(e) => {
                tracing::debug!(call = %call, key = e.message_key(), "Request failed");
                xml_response(&e.to_document())
            }
        }
    }

    fn version(&self) -> Element {
        let mut document = Element::success()
            .child_element(Element::with_text("version", API_VERSION))
            .child_element(Element::with_text("apiVersion", API_VERSION));
        if let Some(build) = &self.build {
            document.push(Element::with_text("build", build.as_str()));
        }
        document
    }

    async fn dispatch(
        &self,
        call: &str,
        raw_params: &str,
        body: Option<Bytes>,
    ) -> Result<Reply, ApiError> {
        self.guard.verify(call, raw_params)?;
        let params = Params::parse(raw_params);

        let document = match call {
            GET_MEETING_INFO => self.sessions.info(&params).await?,
            IS_MEETING_RUNNING => self.sessions.is_running(&params).await?,
            GET_MEETINGS => self.fanout.list_all().await?,
            CREATE => self.sessions.create(&params, body).await?,
            END => self.sessions.end(&params).await?,
            JOIN => return Ok(Reply::Redirect(self.sessions.join(&params).await?)),
            GET_RECORDINGS => self.recordings.list(&params).await?,
            PUBLISH_RECORDINGS => self.recordings.publish(&params).await?,
            UPDATE_RECORDINGS => self.recordings.update_metadata(&params).await?,
            other => return Err(ApiError::UnsupportedRequest(other.to_string())),
        };
        Ok(Reply::Document(document))
    }
}

/// Call name for a path under the API root; empty for the root itself.
fn api_call(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(API_ROOT)?;
    if rest.is_empty() || rest == "/" {
        return Some("");
    }
    let call = rest.strip_prefix('/')?;
    (!call.contains('/')).then_some(call)
}

/// Splits a request into its raw parameter string and the body to forward.
///
/// A form-encoded `POST` without a query string carries its parameters in the
/// body; any other non-empty body is forwarded to the backend.
fn split_request(request: Request<Bytes>) -> (String, Option<Bytes>) {
    let (parts, body) = request.into_parts();
    let query = parts.uri.query().unwrap_or_default().to_string();

    let is_form = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(FORM_CONTENT_TYPE));

    if parts.method == Method::POST && query.is_empty() && is_form {
        return (String::from_utf8_lossy(&body).into_owned(), None);
    }

    let body = (!body.is_empty()).then_some(body);
    (query, body)
}

fn xml_response(document: &Element) -> Response<Bytes> {
    match document.to_xml() {
        Ok(xml) => {
            let mut response = Response::new(Bytes::from(xml));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, http::HeaderValue::from_static(XML_CONTENT_TYPE));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Could not render response document");
            make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn redirect(url: &Url) -> Response<Bytes> {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(LOCATION, url.as_str())
        .body(Bytes::new())
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Could not build redirect");
            make_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        })
}

/// Hyper service buffering each request body before handing it to the [`Gateway`].
pub struct GatewayService {
    gateway: Arc<Gateway>,
}

impl GatewayService {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        GatewayService { gateway }
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, request: Request<Incoming>) -> Self::Future {
        let gateway = self.gateway.clone();

        Box::pin(async move {
            let _inflight = InflightGuard::enter();
            let (parts, body) = request.into_parts();
            let response = match body.collect().await {
                Ok(collected) => {
                    let request = Request::from_parts(parts, collected.to_bytes());
                    gateway.handle(request).await.map(boxed)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Could not read request body");
                    make_boxed_error_response(StatusCode::BAD_REQUEST)
                }
            };
            Ok(response)
        })
    }
}

/// Counts a request as in flight until dropped, including when hyper drops
/// the response future of a disconnected client.
struct InflightGuard;

impl InflightGuard {
    fn enter() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}
