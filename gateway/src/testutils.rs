use crate::document::Element;
use crate::proxy::{ProtocolCall, Transport, TransportError};
use affinity::Backend;
use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Backend `id` at `http://{id}.test/bigbluebutton/api/` signed with `{id}-secret`.
pub fn backend(id: &str) -> Backend {
    Backend::new(
        id,
        Url::parse(&format!("http://{id}.test/bigbluebutton/api/")).unwrap(),
        format!("{id}-secret"),
    )
}

/// `getMeetings` style document listing `ids`.
pub fn meetings_document(ids: &[&str]) -> Element {
    let mut meetings = Element::new("meetings");
    for id in ids {
        meetings.push(
            Element::new("meeting").child_element(Element::with_text("meetingID", *id)),
        );
    }
    Element::success().child_element(meetings)
}

#[derive(Clone)]
enum Scripted {
    Respond(Element, Option<Duration>),
    Fail,
}

/// Transport answering from a script keyed by backend host and call name.
/// Unscripted calls fail with a 502.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<HashMap<(String, String), Scripted>>,
    calls: Mutex<Vec<ProtocolCall>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, backend_id: &str, call: &str, document: Element) {
        self.insert(backend_id, call, Scripted::Respond(document, None));
    }

    pub fn respond_after(&self, backend_id: &str, call: &str, document: Element, delay: Duration) {
        self.insert(backend_id, call, Scripted::Respond(document, Some(delay)));
    }

    pub fn fail(&self, backend_id: &str, call: &str) {
        self.insert(backend_id, call, Scripted::Fail);
    }

    /// Every call performed so far, in order.
    pub fn calls(&self) -> Vec<ProtocolCall> {
        self.calls.lock().clone()
    }

    fn insert(&self, backend_id: &str, call: &str, scripted: Scripted) {
        self.script
            .lock()
            .insert((format!("{backend_id}.test"), call.to_string()), scripted);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn perform(&self, call: &ProtocolCall) -> Result<Element, TransportError> {
        self.calls.lock().push(call.clone());

        let host = call.uri.host_str().unwrap_or_default().to_string();
        let scripted = self.script.lock().get(&(host, call.call.clone())).cloned();

        match scripted {
            Some(Scripted::Respond(document, delay)) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(document)
            }
            Some(Scripted::Fail) | None => Err(TransportError::Status(StatusCode::BAD_GATEWAY)),
        }
    }
}
