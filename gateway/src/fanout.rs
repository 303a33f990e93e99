//! Cluster-wide listing.
//!
//! `getMeetings` is sent to every known backend at once, including disabled
//! ones, since they may still host running sessions. Each backend's
//! `<meeting>` elements are appended to one `<meetings>` collection in
//! backend order, whatever order the answers arrive in.
//!
//! What happens when a backend fails is governed by [`FanOutPolicy`]: with
//! `FailFast` the whole listing fails and calls still in flight are
//! abandoned, with `BestEffort` the failed backend is logged and skipped.
//! A backend answering with a `FAILED` document counts as failed.

use crate::calls::GET_MEETINGS;
use crate::config::FanOutPolicy;
use crate::document::{Element, MESSAGE, MESSAGE_KEY};
use crate::errors::ApiError;
use crate::metrics_defs::FANOUT_BACKEND_FAILURES;
use crate::params::Params;
use crate::proxy::ProtocolProxy;
use affinity::Affinity;
use shared::counter;
use std::sync::Arc;
use tokio::task::JoinSet;

const MEETINGS: &str = "meetings";
const MEETING: &str = "meeting";

pub struct FanOutAggregator {
    affinity: Affinity,
    proxy: Arc<ProtocolProxy>,
    policy: FanOutPolicy,
}

impl FanOutAggregator {
    pub fn new(affinity: Affinity, proxy: Arc<ProtocolProxy>, policy: FanOutPolicy) -> Self {
        FanOutAggregator {
            affinity,
            proxy,
            policy,
        }
    }

    pub async fn list_all(&self) -> Result<Element, ApiError> {
        let backends = self.affinity.backends().await?;
        let mut fragments: Vec<Option<Vec<Element>>> = vec![None; backends.len()];

        let mut join_set = JoinSet::new();
        for (index, backend) in backends.into_iter().enumerate() {
            let proxy = self.proxy.clone();
            join_set.spawn(async move {
                let result = proxy
                    .call(&backend, GET_MEETINGS, &Params::default(), None)
                    .await;
                (index, backend.id, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (backend_id, error) = match joined {
                Ok((index, _, Ok(document))) => {
                    fragments[index] = Some(meetings_of(document));
                    continue;
                }
                Ok((_, backend_id, Err(e))) => (backend_id, e.to_string()),
                Err(e) => ("unknown".to_string(), format!("task failed: {e}")),
            };

            counter!(FANOUT_BACKEND_FAILURES, "policy" => policy_label(self.policy)).increment(1);
            match self.policy {
                // Dropping the set aborts the calls still in flight
                FanOutPolicy::FailFast => {
                    return Err(ApiError::Internal(format!(
                        "backend {backend_id} failed during cluster listing: {error}"
                    )));
                }
                FanOutPolicy::BestEffort => {
                    tracing::warn!(
                        backend = %backend_id,
                        error = %error,
                        "Skipping backend in cluster listing"
                    );
                }
            }
        }

        let mut meetings = Element::new(MEETINGS);
        for fragment in fragments.into_iter().flatten() {
            meetings.children.extend(fragment);
        }

        if meetings.children.is_empty() {
            return Ok(no_meetings());
        }
        Ok(Element::success().child_element(meetings))
    }
}

fn meetings_of(document: Element) -> Vec<Element> {
    document
        .children
        .into_iter()
        .find(|c| c.name == MEETINGS)
        .map(|m| m.children.into_iter().filter(|c| c.name == MEETING).collect())
        .unwrap_or_default()
}

fn no_meetings() -> Element {
    Element::success()
        .child_element(Element::new(MEETINGS))
        .child_element(Element::with_text(MESSAGE_KEY, "noMeetings"))
        .child_element(Element::with_text(
            MESSAGE,
            "no meetings were found on this server",
        ))
}

fn policy_label(policy: FanOutPolicy) -> &'static str {
    match policy {
        FanOutPolicy::FailFast => "fail_fast",
        FanOutPolicy::BestEffort => "best_effort",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::ChecksumAlgorithm;
    use crate::testutils::{ScriptedTransport, backend, meetings_document};
    use affinity::InMemoryAffinityStore;
    use std::time::Duration;

    fn aggregator(
        ids: &[&str],
        policy: FanOutPolicy,
    ) -> (Arc<ScriptedTransport>, Arc<InMemoryAffinityStore>, FanOutAggregator) {
        let store = Arc::new(InMemoryAffinityStore::with_backends(
            ids.iter().map(|id| backend(id)).collect::<Vec<_>>(),
        ));
        let transport = Arc::new(ScriptedTransport::new());
        let proxy = Arc::new(ProtocolProxy::new(
            transport.clone(),
            ChecksumAlgorithm::Sha256,
            Duration::from_secs(5),
        ));
        let aggregator = FanOutAggregator::new(Affinity::new(store.clone()), proxy, policy);
        (transport, store, aggregator)
    }

    fn meeting_ids(document: &Element) -> Vec<String> {
        document
            .child(MEETINGS)
            .unwrap()
            .children_named(MEETING)
            .map(|m| m.child_text("meetingID").unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_merges_in_backend_order() {
        let (transport, _store, aggregator) = aggregator(&["a", "b", "c"], FanOutPolicy::FailFast);
        transport.respond("a", GET_MEETINGS, meetings_document(&[]));
        // b answers last but still comes first in the listing
        transport.respond_after(
            "b",
            GET_MEETINGS,
            meetings_document(&["m1"]),
            Duration::from_millis(50),
        );
        transport.respond("c", GET_MEETINGS, meetings_document(&["m2", "m3"]));

        let listing = aggregator.list_all().await.unwrap();
        assert!(listing.is_success());
        assert_eq!(meeting_ids(&listing), vec!["m1", "m2", "m3"]);
        assert_eq!(listing.child_text(MESSAGE_KEY), None);
    }

    #[tokio::test]
    async fn test_all_empty_is_distinguished() {
        let (transport, _store, aggregator) = aggregator(&["a", "b"], FanOutPolicy::FailFast);
        transport.respond("a", GET_MEETINGS, meetings_document(&[]));
        // Backends report "nothing here" with a success document carrying a message key
        transport.respond(
            "b",
            GET_MEETINGS,
            meetings_document(&[]).child_element(Element::with_text(MESSAGE_KEY, "noMeetings")),
        );

        let listing = aggregator.list_all().await.unwrap();
        assert!(listing.is_success());
        assert_eq!(listing.child_text(MESSAGE_KEY), Some("noMeetings"));
        assert!(listing.child(MEETINGS).unwrap().children.is_empty());
    }

    #[tokio::test]
    async fn test_no_backends() {
        let (_transport, _store, aggregator) = aggregator(&[], FanOutPolicy::FailFast);
        let listing = aggregator.list_all().await.unwrap();
        assert_eq!(listing.child_text(MESSAGE_KEY), Some("noMeetings"));
    }

    #[tokio::test]
    async fn test_fail_fast_discards_partial_results() {
        let (transport, _store, aggregator) = aggregator(&["a", "b"], FanOutPolicy::FailFast);
        transport.respond("a", GET_MEETINGS, meetings_document(&["m1"]));
        transport.fail("b", GET_MEETINGS);

        let err = aggregator.list_all().await.unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
        assert_eq!(err.message_key(), "internalError");
    }

    #[tokio::test]
    async fn test_remote_failure_counts_as_backend_failure() {
        let (transport, _store, aggregator) = aggregator(&["a", "b"], FanOutPolicy::FailFast);
        transport.respond("a", GET_MEETINGS, meetings_document(&["m1"]));
        transport.respond("b", GET_MEETINGS, Element::failure("checksumError", "bad"));

        assert!(matches!(
            aggregator.list_all().await,
            Err(ApiError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_best_effort_skips_failed_backends() {
        let (transport, _store, aggregator) =
            aggregator(&["a", "b", "c"], FanOutPolicy::BestEffort);
        transport.respond("a", GET_MEETINGS, meetings_document(&["m1"]));
        transport.fail("b", GET_MEETINGS);
        transport.respond("c", GET_MEETINGS, meetings_document(&["m3"]));

        let listing = aggregator.list_all().await.unwrap();
        assert_eq!(meeting_ids(&listing), vec!["m1", "m3"]);

        // Nothing left after skipping failures is still "no meetings"
        transport.fail("a", GET_MEETINGS);
        transport.fail("c", GET_MEETINGS);
        let listing = aggregator.list_all().await.unwrap();
        assert_eq!(listing.child_text(MESSAGE_KEY), Some("noMeetings"));
    }

    #[tokio::test]
    async fn test_disabled_backends_are_queried() {
        let (transport, store, aggregator) = aggregator(&["a", "b"], FanOutPolicy::FailFast);
        store.set_available("b", false).unwrap();
        transport.respond("a", GET_MEETINGS, meetings_document(&[]));
        transport.respond("b", GET_MEETINGS, meetings_document(&["m9"]));

        let listing = aggregator.list_all().await.unwrap();
        assert_eq!(meeting_ids(&listing), vec!["m9"]);
    }
}
