//! Mark-and-sweep liveness tracker.
//!
//! Owns the per-session seeding, marking and sweeping of seen state,
//! and is the sole writer of a listing's `active`/`last_seen`/
//! `sell_time_days` fields. Within a session a listing moves
//! `UNSEEN → SEEN` on any reconfirmation, or `UNSEEN → DEACTIVATED`
//! either immediately (definitive fetch failure) or at sweep time
//! (expected but never reconfirmed).

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::retry::DefinitiveFailure;
use crate::traits::ListingStore;
use crate::types::{ExternalId, ItemOutcome, Listing, OutcomeStatus, Session};

/// Whole days between creation and last sighting, floored at zero.
pub fn sell_time_days(created_at: DateTime<Utc>, last_seen: DateTime<Utc>) -> i64 {
    (last_seen - created_at).num_days().max(0)
}

pub struct LivenessTracker<S> {
    store: Arc<S>,
}

impl<S> Clone for LivenessTracker<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: ListingStore> LivenessTracker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create one unseen marker per tracked listing. Must complete
    /// before any dispatch work starts: a marker has to exist before it
    /// can be marked or swept.
    pub async fn seed(&self, session: &Session, only_active: bool) -> Result<usize> {
        let listings = if only_active {
            self.store.find_active_listings().await
        } else {
            self.store.find_all_listings().await
        }
        .context("failed to load listings for seeding")?;

        for listing in &listings {
            self.store
                .find_or_create_marker(session.id, &listing.external_id, false)
                .await
                .with_context(|| format!("failed to seed marker for {}", listing.external_id))?;
        }

        tracing::info!(
            session_id = %session.id,
            seeded = listings.len(),
            "seeded seen markers"
        );
        Ok(listings.len())
    }

    /// Record that a listing was reconfirmed during this session.
    ///
    /// Idempotent; re-marking an already-seen marker is a no-op. A
    /// listing discovered after seeding gets its marker created
    /// directly with `seen = true` — freshly discovered means seen in
    /// the session that discovered it.
    pub async fn mark_seen(&self, session: &Session, id: &ExternalId) -> Result<()> {
        self.store
            .mark_seen(session.id, id)
            .await
            .with_context(|| format!("failed to mark {id} seen"))
    }

    /// Deactivate a listing on a definitive fetch failure, without
    /// waiting for the sweep.
    ///
    /// `last_seen` is taken from the most recent prior session in which
    /// the listing was actually confirmed — the failure is detected now,
    /// but the last real sighting was then. Falls back to the current
    /// time when no prior confirmation exists. Also flips the marker to
    /// seen so the sweep cannot process the listing a second time.
    ///
    /// Returns `false` when the listing was already inactive.
    pub async fn deactivate_now(
        &self,
        session: &Session,
        listing: &Listing,
        failure: &DefinitiveFailure,
    ) -> Result<bool> {
        if !listing.active {
            return Ok(false);
        }

        let last_seen = self
            .store
            .last_confirmed_at(&listing.external_id, session.id)
            .await
            .context("failed to resolve prior confirmation")?
            .unwrap_or_else(Utc::now);
        let sell_time = sell_time_days(listing.created_at, last_seen);

        let changed = self
            .store
            .deactivate_listing(&listing.external_id, last_seen, sell_time)
            .await
            .with_context(|| format!("failed to deactivate {}", listing.external_id))?;

        // Exclude this listing from the sweep's unseen scan.
        self.store
            .mark_seen(session.id, &listing.external_id)
            .await
            .context("failed to mark deactivated listing seen")?;

        tracing::info!(
            session_id = %session.id,
            external_id = %listing.external_id,
            last_seen = %last_seen,
            sell_time_days = sell_time,
            error = %failure,
            "deactivated listing after definitive failure"
        );
        Ok(changed)
    }

    /// Deactivate every listing whose marker is still unseen at session
    /// end, using the session's own timestamp as `last_seen` — the
    /// listing was expected but never reconfirmed this pass, so "now"
    /// is the best available estimate.
    ///
    /// Skips listings that are already inactive; running the sweep
    /// twice is a no-op the second time. A storage failure on one
    /// listing is recorded as an `Error` outcome for that item and the
    /// sweep moves on; only the marker query itself is fatal.
    pub async fn sweep(&self, session: &Session) -> Result<Vec<ItemOutcome>> {
        let unseen = self
            .store
            .find_unseen_markers(session.id)
            .await
            .context("failed to query unseen markers")?;

        let mut outcomes = Vec::new();
        for id in unseen {
            let listing = match self.store.find_listing(&id).await {
                Ok(Some(listing)) => listing,
                Ok(None) => {
                    tracing::warn!(external_id = %id, "marker without listing, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %session.id,
                        external_id = %id,
                        error = %e,
                        "listing lookup failed during sweep"
                    );
                    outcomes.push(
                        ItemOutcome::new(id, OutcomeStatus::Error).with_detail(e.to_string()),
                    );
                    continue;
                }
            };

            if !listing.active {
                continue;
            }

            let last_seen = session.created_at;
            let sell_time = sell_time_days(listing.created_at, last_seen);
            match self.store.deactivate_listing(&id, last_seen, sell_time).await {
                Ok(true) => outcomes.push(
                    ItemOutcome::new(id, OutcomeStatus::Deactivated)
                        .with_detail("unseen at sweep"),
                ),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        session_id = %session.id,
                        external_id = %id,
                        error = %e,
                        "deactivation failed during sweep"
                    );
                    outcomes.push(
                        ItemOutcome::new(id, OutcomeStatus::Error).with_detail(e.to_string()),
                    );
                }
            }
        }

        let deactivated = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Deactivated)
            .count();
        tracing::info!(
            session_id = %session.id,
            deactivated,
            "sweep completed"
        );
        Ok(outcomes)
    }
}
