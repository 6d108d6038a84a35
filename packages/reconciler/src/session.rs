//! Session controller: orchestrates one full reconciliation pass.
//!
//! One pass: create a session, seed markers for every tracked listing,
//! dispatch crawl work through the bounded executor (owners outer,
//! detail fetches inner, both retry-wrapped), then sweep whatever was
//! never reconfirmed. Per-item failures are recorded and the pass
//! completes normally; only an unobtainable owner list or a storage
//! failure outside the per-item path aborts it.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::ReconcilerConfig;
use crate::error::SessionError;
use crate::executor::BatchExecutor;
use crate::tracker::LivenessTracker;
use crate::traits::{ListingStore, SourceAdapter};
use crate::types::{
    ExternalId, ItemOutcome, OutcomeStatus, OutcomeSummary, OwnerRef, Session, SessionReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Seeding,
    Dispatching,
    Sweeping,
    Complete,
    Failed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Created => "created",
            SessionPhase::Seeding => "seeding",
            SessionPhase::Dispatching => "dispatching",
            SessionPhase::Sweeping => "sweeping",
            SessionPhase::Complete => "complete",
            SessionPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of dispatching one owner.
struct OwnerDispatch {
    outcomes: Vec<ItemOutcome>,
    enumeration_failed: bool,
}

pub struct SessionController<S, A> {
    store: Arc<S>,
    adapter: Arc<A>,
    config: ReconcilerConfig,
}

impl<S, A> SessionController<S, A>
where
    S: ListingStore,
    A: SourceAdapter,
{
    pub fn new(store: Arc<S>, adapter: Arc<A>, config: ReconcilerConfig) -> Self {
        Self {
            store,
            adapter,
            config,
        }
    }

    /// Run one complete reconciliation pass.
    pub async fn run(&self) -> Result<SessionReport, SessionError> {
        let session = self
            .store
            .create_session()
            .await
            .map_err(|e| self.fail(None, "creating session", e))?;
        self.enter(&session, SessionPhase::Created);

        let tracker = LivenessTracker::new(self.store.clone());

        // Seeding must fully complete before any dispatch work starts:
        // a marker has to exist before it can be marked or swept.
        self.enter(&session, SessionPhase::Seeding);
        let seeded = tracker
            .seed(&session, self.config.only_active_entities)
            .await
            .map_err(|e| self.fail(Some(&session), "seeding", e))?;

        self.enter(&session, SessionPhase::Dispatching);
        let owners = match self.adapter.list_known_owners().await {
            Ok(owners) => owners,
            Err(e) => {
                tracing::error!(session_id = %session.id, error = %e, "owner list unavailable, aborting pass");
                self.enter(&session, SessionPhase::Failed);
                return Err(SessionError::OwnerListUnavailable(e.to_string()));
            }
        };
        tracing::info!(session_id = %session.id, owners = owners.len(), "dispatching owners");

        let owner_executor = BatchExecutor::new(
            self.config.owner_concurrency_limit,
            self.config.inter_batch_delay(),
        );
        let dispatches = owner_executor
            .run(owners, |owner| self.process_owner(&session, &tracker, owner))
            .await;

        let mut outcomes = Vec::new();
        let mut owner_failures = 0usize;
        for dispatch in dispatches {
            if dispatch.enumeration_failed {
                owner_failures += 1;
            }
            outcomes.extend(dispatch.outcomes);
        }

        // Sweep only after every dispatch batch has fully settled.
        self.enter(&session, SessionPhase::Sweeping);
        let swept = tracker
            .sweep(&session)
            .await
            .map_err(|e| self.fail(Some(&session), "sweeping", e))?;
        outcomes.extend(swept);

        self.enter(&session, SessionPhase::Complete);
        let summary = OutcomeSummary::tally(&outcomes, owner_failures);
        tracing::info!(
            session_id = %session.id,
            success = summary.success,
            deactivated = summary.deactivated,
            errors = summary.errors,
            skipped = summary.skipped,
            owner_failures = summary.owner_failures,
            "reconciliation pass complete"
        );

        Ok(SessionReport {
            session,
            seeded,
            outcomes,
            summary,
        })
    }

    async fn process_owner(
        &self,
        session: &Session,
        tracker: &LivenessTracker<S>,
        owner: OwnerRef,
    ) -> OwnerDispatch {
        // Enumeration is a unit of work like any other: retried with
        // the same policy as detail fetches.
        let retry = self.config.retry_policy();
        let ids = match retry.attempt(|| self.adapter.enumerate_listings(&owner)).await {
            Ok(ids) => ids,
            Err(failure) => {
                tracing::warn!(
                    session_id = %session.id,
                    owner_id = %owner.id,
                    error = %failure,
                    "owner enumeration failed definitively, continuing pass"
                );
                return OwnerDispatch {
                    outcomes: Vec::new(),
                    enumeration_failed: true,
                };
            }
        };

        let ids = dedupe(ids);
        tracing::info!(
            session_id = %session.id,
            owner_id = %owner.id,
            listings = ids.len(),
            "enumerated owner"
        );

        // Enumeration is itself a sighting: mark every enumerated id
        // seen before the detail fetches start, so a per-item storage
        // hiccup later cannot feed a listing the source still lists to
        // the sweep. Confirmed absence goes through the immediate
        // deactivation path regardless of the marker.
        for id in &ids {
            if let Err(e) = tracker.mark_seen(session, id).await {
                tracing::warn!(
                    session_id = %session.id,
                    external_id = %id,
                    error = %e,
                    "failed to mark enumerated listing seen"
                );
            }
        }

        let item_executor = BatchExecutor::new(
            self.config.item_concurrency_limit,
            self.config.inter_batch_delay(),
        );
        let outcomes = item_executor
            .run(ids, |id| self.process_item(session, tracker, id))
            .await;

        OwnerDispatch {
            outcomes,
            enumeration_failed: false,
        }
    }

    async fn process_item(
        &self,
        session: &Session,
        tracker: &LivenessTracker<S>,
        id: ExternalId,
    ) -> ItemOutcome {
        let known = match self.store.find_listing(&id).await {
            Ok(known) => known,
            Err(e) => {
                tracing::error!(session_id = %session.id, external_id = %id, error = %e, "listing lookup failed");
                return ItemOutcome::new(id, OutcomeStatus::Error).with_detail(e.to_string());
            }
        };

        if let Some(listing) = &known {
            if !listing.active && self.config.only_active_entities {
                return ItemOutcome::new(id, OutcomeStatus::Skipped)
                    .with_detail("already inactive");
            }
        }

        let retry = self.config.retry_policy();
        match retry.attempt(|| self.adapter.fetch_listing_detail(&id)).await {
            Ok(detail) => {
                // The fetch itself is the reconfirmation: mark seen
                // before touching domain fields, so a field-write
                // failure cannot feed a present listing to the sweep.
                let write = async {
                    if known.is_some() {
                        tracker.mark_seen(session, &id).await?;
                        self.store.update_listing_fields(&detail).await
                    } else {
                        self.store.create_listing(&detail).await?;
                        tracker.mark_seen(session, &id).await
                    }
                };
                match write.await {
                    Ok(()) => ItemOutcome::new(id, OutcomeStatus::Success),
                    Err(e) => {
                        tracing::error!(session_id = %session.id, external_id = %id, error = %e, "persistence failed for item");
                        ItemOutcome::new(id, OutcomeStatus::Error).with_detail(e.to_string())
                    }
                }
            }
            Err(failure) => match known {
                Some(listing) => {
                    match tracker.deactivate_now(session, &listing, &failure).await {
                        Ok(true) => ItemOutcome::new(id, OutcomeStatus::Deactivated)
                            .with_detail(failure.to_string()),
                        Ok(false) => ItemOutcome::new(id, OutcomeStatus::Skipped)
                            .with_detail("already inactive"),
                        Err(e) => {
                            tracing::error!(session_id = %session.id, external_id = %id, error = %e, "deactivation failed");
                            ItemOutcome::new(id, OutcomeStatus::Error).with_detail(e.to_string())
                        }
                    }
                }
                // Enumerated but never stored and already gone again:
                // nothing to deactivate, nothing to create.
                None => ItemOutcome::new(id, OutcomeStatus::Skipped)
                    .with_detail("unknown listing, fetch failed definitively"),
            },
        }
    }

    fn enter(&self, session: &Session, phase: SessionPhase) {
        tracing::info!(session_id = %session.id, phase = %phase, "session phase");
    }

    fn fail(
        &self,
        session: Option<&Session>,
        phase: &'static str,
        err: anyhow::Error,
    ) -> SessionError {
        if let Some(session) = session {
            self.enter(session, SessionPhase::Failed);
        }
        tracing::error!(phase, error = %err, "session failed");
        SessionError::storage(phase, err)
    }
}

/// Order-preserving deduplication; first occurrence wins. A single
/// enumeration call may return the same id more than once.
fn dedupe(ids: Vec<ExternalId>) -> Vec<ExternalId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testing::ScriptedSource;

    fn fast_config() -> ReconcilerConfig {
        ReconcilerConfig {
            retry_delay_ms: 0,
            inter_batch_delay_ms: 0,
            ..ReconcilerConfig::default()
        }
    }

    #[test]
    fn dedupe_preserves_first_occurrence_order() {
        let ids = ["a", "b", "a", "c", "b"]
            .into_iter()
            .map(ExternalId::from)
            .collect();
        let deduped = dedupe(ids);
        assert_eq!(
            deduped,
            vec![
                ExternalId::from("a"),
                ExternalId::from("b"),
                ExternalId::from("c")
            ]
        );
    }

    #[tokio::test]
    async fn unavailable_owner_list_aborts_the_pass() {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(ScriptedSource::new().without_owner_list());
        let controller = SessionController::new(store, adapter, fast_config());

        let err = controller.run().await.unwrap_err();
        assert!(matches!(err, SessionError::OwnerListUnavailable(_)));
    }

    #[tokio::test]
    async fn an_aborted_pass_logs_the_failed_phase() {
        use std::io::Write;
        use std::sync::Mutex;

        #[derive(Clone, Default)]
        struct Sink(Arc<Mutex<Vec<u8>>>);

        impl Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Sink {
            type Writer = Sink;

            fn make_writer(&'a self) -> Self::Writer {
                self.clone()
            }
        }

        let sink = Sink::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(ScriptedSource::new().without_owner_list());
        let controller = SessionController::new(store, adapter, fast_config());
        controller.run().await.unwrap_err();

        let logs = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(
            logs.contains("phase=failed"),
            "expected a failed phase transition in: {logs}"
        );
    }

    #[tokio::test]
    async fn a_failed_owner_does_not_abort_the_pass() {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(
            ScriptedSource::new()
                .with_owner_listings("good", vec!["a"])
                .with_present("a", "good")
                .with_failing_owner("bad"),
        );
        let controller = SessionController::new(store, adapter.clone(), fast_config());

        let report = controller.run().await.unwrap();
        assert_eq!(report.summary.owner_failures, 1);
        assert_eq!(report.summary.success, 1);
        // Enumeration burned its full retry budget before giving up.
        assert_eq!(adapter.enumerate_attempts("bad"), 3);
        assert_eq!(adapter.enumerate_attempts("good"), 1);
    }

    #[tokio::test]
    async fn duplicate_enumeration_ids_are_fetched_once() {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(
            ScriptedSource::new()
                .with_owner_listings("o1", vec!["a", "a", "a"])
                .with_present("a", "o1"),
        );
        let controller = SessionController::new(store.clone(), adapter.clone(), fast_config());

        let report = controller.run().await.unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(adapter.fetch_attempts(&ExternalId::from("a")), 1);
    }
}
