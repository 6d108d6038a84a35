//! End-to-end reconciliation passes over scripted sources and the
//! in-memory store.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use reconciler::storage::MemoryStore;
use reconciler::testing::{ScriptedFetch, ScriptedSource};
use reconciler::{
    ExternalId, ListingDetail, ListingStore, LivenessTracker, OutcomeStatus, ReconcilerConfig,
    SeenMarker, Session, SessionController, SessionId,
};

fn fast_config() -> ReconcilerConfig {
    ReconcilerConfig {
        retry_delay_ms: 0,
        inter_batch_delay_ms: 0,
        ..ReconcilerConfig::default()
    }
}

async fn seed_listing(store: &MemoryStore, id: &str, owner: &str) {
    store
        .create_listing(&ScriptedSource::detail_for(id, owner))
        .await
        .unwrap();
}

#[tokio::test]
async fn scenario_flaky_listing_is_deactivated_with_prior_session_date() {
    let store = Arc::new(MemoryStore::new());
    for id in ["a", "b", "c"] {
        seed_listing(&store, id, "o1").await;
    }
    store.backdate_listing(&ExternalId::from("b"), Utc::now() - Duration::days(30));

    // A pass three days ago confirmed b.
    let prior = store.create_session_at(Utc::now() - Duration::days(3)).await;
    store.mark_seen(prior.id, &ExternalId::from("b")).await.unwrap();

    let adapter = Arc::new(
        ScriptedSource::new()
            .with_owner_listings("o1", vec!["a", "b", "c"])
            .with_present("a", "o1")
            .with_present("c", "o1")
            // Two transient failures, then an explicit gone: the whole
            // attempt budget burns and the failure becomes definitive.
            .with_fetch_script(
                "b",
                vec![
                    ScriptedFetch::Flaky("timeout".into()),
                    ScriptedFetch::Flaky("502".into()),
                    ScriptedFetch::Gone,
                ],
            ),
    );

    let controller = SessionController::new(store.clone(), adapter.clone(), fast_config());
    let report = controller.run().await.unwrap();

    // Three active listings were seeded before dispatch.
    assert_eq!(report.seeded, 3);

    // b burned its full attempt budget.
    assert_eq!(adapter.fetch_attempts(&ExternalId::from("b")), 3);

    let b = store.find_listing(&ExternalId::from("b")).await.unwrap().unwrap();
    assert!(!b.active);
    // last_seen is the prior session's date, not wall-clock now.
    assert_eq!(b.last_seen, Some(prior.created_at));
    assert_eq!(b.sell_time_days, Some(27));

    for id in ["a", "c"] {
        let listing = store.find_listing(&ExternalId::from(id)).await.unwrap().unwrap();
        assert!(listing.active, "{id} must stay active");
    }

    // The sweep found nothing left: a and c marked seen, b already
    // handled by the immediate path.
    let sweep_outcomes: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.detail.as_deref() == Some("unseen at sweep"))
        .collect();
    assert!(sweep_outcomes.is_empty());

    assert_eq!(report.summary.success, 2);
    assert_eq!(report.summary.deactivated, 1);
    assert_eq!(report.summary.errors, 0);
    assert_eq!(report.summary.skipped, 0);
}

#[tokio::test]
async fn scenario_mid_session_discovery_survives_the_sweep() {
    let store = Arc::new(MemoryStore::new());
    seed_listing(&store, "a", "o1").await;

    let adapter = Arc::new(
        ScriptedSource::new()
            .with_owner_listings("o1", vec!["a", "d"])
            .with_present("a", "o1")
            .with_present("d", "o1"),
    );

    let controller = SessionController::new(store.clone(), adapter, fast_config());
    let report = controller.run().await.unwrap();

    // Only a existed at seeding time.
    assert_eq!(report.seeded, 1);

    // d was created mid-session with its marker directly seen.
    let d = store.find_listing(&ExternalId::from("d")).await.unwrap().unwrap();
    assert!(d.active, "freshly discovered listing must not be swept");

    let marker = store
        .find_or_create_marker(report.session.id, &ExternalId::from("d"), false)
        .await
        .unwrap();
    assert!(marker.seen);

    assert_eq!(report.summary.success, 2);
    assert_eq!(report.summary.deactivated, 0);
}

#[tokio::test]
async fn unenumerated_listings_are_swept_with_the_session_timestamp() {
    let store = Arc::new(MemoryStore::new());
    for id in ["a", "gone"] {
        seed_listing(&store, id, "o1").await;
    }
    store.backdate_listing(&ExternalId::from("gone"), Utc::now() - Duration::days(10));

    // The source no longer lists "gone" at all.
    let adapter = Arc::new(
        ScriptedSource::new()
            .with_owner_listings("o1", vec!["a"])
            .with_present("a", "o1"),
    );

    let controller = SessionController::new(store.clone(), adapter.clone(), fast_config());
    let report = controller.run().await.unwrap();

    let swept = store.find_listing(&ExternalId::from("gone")).await.unwrap().unwrap();
    assert!(!swept.active);
    assert_eq!(swept.last_seen, Some(report.session.created_at));
    assert_eq!(swept.sell_time_days, Some(10));
    // Never fetched: the sweep, not the checker path, handled it.
    assert_eq!(adapter.fetch_attempts(&ExternalId::from("gone")), 0);

    assert_eq!(report.summary.success, 1);
    assert_eq!(report.summary.deactivated, 1);

    // Scenario C: a second sweep of the same session is a no-op.
    let tracker = LivenessTracker::new(store.clone());
    let again = tracker.sweep(&report.session).await.unwrap();
    assert!(again.is_empty());
    let swept_again = store.find_listing(&ExternalId::from("gone")).await.unwrap().unwrap();
    assert_eq!(swept_again.last_seen, Some(report.session.created_at));
}

#[tokio::test]
async fn never_confirmed_listing_falls_back_to_current_time() {
    let store = Arc::new(MemoryStore::new());
    seed_listing(&store, "x", "o1").await;

    let adapter = Arc::new(
        ScriptedSource::new()
            .with_owner_listings("o1", vec!["x"])
            .with_fetch_script("x", vec![ScriptedFetch::Gone]),
    );

    let before = Utc::now();
    let controller = SessionController::new(store.clone(), adapter, fast_config());
    let report = controller.run().await.unwrap();

    let x = store.find_listing(&ExternalId::from("x")).await.unwrap().unwrap();
    assert!(!x.active);
    let last_seen = x.last_seen.expect("last_seen must be set");
    assert!(last_seen >= before && last_seen <= Utc::now());
    assert_eq!(x.sell_time_days, Some(0));
    assert_eq!(report.summary.deactivated, 1);
}

// ============================================================================
// Persistence failures stay isolated to their item
// ============================================================================

/// Delegating store with injectable per-item faults: domain-field
/// updates for one id always fail, and the first lookup of one id
/// fails once.
struct FaultyStore {
    inner: Arc<MemoryStore>,
    fail_update_for: Option<ExternalId>,
    fail_read_once_for: Mutex<Option<ExternalId>>,
}

impl FaultyStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_update_for: None,
            fail_read_once_for: Mutex::new(None),
        }
    }

    fn failing_update(mut self, id: &str) -> Self {
        self.fail_update_for = Some(ExternalId::from(id));
        self
    }

    fn failing_read_once(mut self, id: &str) -> Self {
        self.fail_read_once_for = Mutex::new(Some(ExternalId::from(id)));
        self
    }
}

#[async_trait]
impl ListingStore for FaultyStore {
    async fn create_session(&self) -> Result<Session> {
        self.inner.create_session().await
    }

    async fn find_active_listings(&self) -> Result<Vec<reconciler::Listing>> {
        self.inner.find_active_listings().await
    }

    async fn find_all_listings(&self) -> Result<Vec<reconciler::Listing>> {
        self.inner.find_all_listings().await
    }

    async fn find_listing(&self, id: &ExternalId) -> Result<Option<reconciler::Listing>> {
        {
            let mut pending = self.fail_read_once_for.lock().unwrap();
            if pending.as_ref() == Some(id) {
                pending.take();
                anyhow::bail!("transient db read failure");
            }
        }
        self.inner.find_listing(id).await
    }

    async fn create_listing(&self, detail: &ListingDetail) -> Result<reconciler::Listing> {
        self.inner.create_listing(detail).await
    }

    async fn update_listing_fields(&self, detail: &ListingDetail) -> Result<()> {
        if self.fail_update_for.as_ref() == Some(&detail.external_id) {
            anyhow::bail!("disk full");
        }
        self.inner.update_listing_fields(detail).await
    }

    async fn deactivate_listing(
        &self,
        id: &ExternalId,
        last_seen: DateTime<Utc>,
        sell_time_days: i64,
    ) -> Result<bool> {
        self.inner.deactivate_listing(id, last_seen, sell_time_days).await
    }

    async fn find_or_create_marker(
        &self,
        session_id: SessionId,
        id: &ExternalId,
        seen: bool,
    ) -> Result<SeenMarker> {
        self.inner.find_or_create_marker(session_id, id, seen).await
    }

    async fn mark_seen(&self, session_id: SessionId, id: &ExternalId) -> Result<()> {
        self.inner.mark_seen(session_id, id).await
    }

    async fn find_unseen_markers(&self, session_id: SessionId) -> Result<Vec<ExternalId>> {
        self.inner.find_unseen_markers(session_id).await
    }

    async fn last_confirmed_at(
        &self,
        id: &ExternalId,
        excluding: SessionId,
    ) -> Result<Option<DateTime<Utc>>> {
        self.inner.last_confirmed_at(id, excluding).await
    }
}

#[tokio::test]
async fn a_persistence_failure_is_recorded_and_does_not_abort_the_batch() {
    let memory = Arc::new(MemoryStore::new());
    for id in ["a", "bad", "c"] {
        seed_listing(&memory, id, "o1").await;
    }
    let store = Arc::new(FaultyStore::new(memory.clone()).failing_update("bad"));

    let adapter = Arc::new(
        ScriptedSource::new()
            .with_owner_listings("o1", vec!["a", "bad", "c"])
            .with_present("a", "o1")
            .with_present("bad", "o1")
            .with_present("c", "o1"),
    );

    let controller = SessionController::new(store, adapter, fast_config());
    let report = controller.run().await.unwrap();

    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.success, 2);

    let bad_outcome = report
        .outcomes
        .iter()
        .find(|o| o.external_id == ExternalId::from("bad"))
        .unwrap();
    assert_eq!(bad_outcome.status, OutcomeStatus::Error);

    // The fetch reconfirmed the listing before the field write failed,
    // so the sweep must not deactivate it.
    assert_eq!(report.summary.deactivated, 0);
    let bad = memory.find_listing(&ExternalId::from("bad")).await.unwrap().unwrap();
    assert!(bad.active);
}

#[tokio::test]
async fn an_enumerated_listing_survives_a_failed_lookup() {
    let memory = Arc::new(MemoryStore::new());
    for id in ["a", "bad"] {
        seed_listing(&memory, id, "o1").await;
    }
    // The dispatch-time lookup of "bad" fails before any fetch runs.
    let store = Arc::new(FaultyStore::new(memory.clone()).failing_read_once("bad"));

    let adapter = Arc::new(
        ScriptedSource::new()
            .with_owner_listings("o1", vec!["a", "bad"])
            .with_present("a", "o1")
            .with_present("bad", "o1"),
    );

    let controller = SessionController::new(store, adapter, fast_config());
    let report = controller.run().await.unwrap();

    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.success, 1);

    // Enumeration already reconfirmed "bad": the lookup error stays an
    // error, it never becomes a sweep deactivation.
    assert_eq!(report.summary.deactivated, 0);
    let bad = memory.find_listing(&ExternalId::from("bad")).await.unwrap().unwrap();
    assert!(bad.active, "a listing the source still lists must stay active");
}

#[tokio::test]
async fn a_sweep_time_lookup_failure_is_isolated_to_its_item() {
    let memory = Arc::new(MemoryStore::new());
    for id in ["a", "flaky", "gone"] {
        seed_listing(&memory, id, "o1").await;
    }
    // "flaky" and "gone" are no longer enumerated; the sweep's lookup
    // of "flaky" fails once.
    let store = Arc::new(FaultyStore::new(memory.clone()).failing_read_once("flaky"));

    let adapter = Arc::new(
        ScriptedSource::new()
            .with_owner_listings("o1", vec!["a"])
            .with_present("a", "o1"),
    );

    let controller = SessionController::new(store, adapter, fast_config());
    let report = controller.run().await.unwrap();

    // The failed row is recorded, the rest of the sweep still ran.
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.deactivated, 1);

    let flaky = memory.find_listing(&ExternalId::from("flaky")).await.unwrap().unwrap();
    assert!(flaky.active, "the failed item is left untouched");
    let gone = memory.find_listing(&ExternalId::from("gone")).await.unwrap().unwrap();
    assert!(!gone.active);
}
