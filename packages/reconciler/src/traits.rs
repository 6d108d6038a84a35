//! Trait seams consumed by the reconciliation engine.
//!
//! The engine owns no wire protocol and parses no markup: it talks to
//! the outside world exclusively through these two traits.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AttemptError;
use crate::types::{ExternalId, Listing, ListingDetail, OwnerRef, SeenMarker, Session, SessionId};

// ============================================================================
// SOURCE ADAPTER: enumeration and detail fetches against the crawled site
// ============================================================================

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// All sellers whose listings should be enumerated this pass.
    ///
    /// Failure here is session-fatal; there is nothing to dispatch.
    async fn list_known_owners(&self) -> Result<Vec<OwnerRef>>;

    /// External ids currently listed by one owner. May contain
    /// duplicates; callers deduplicate before dispatch.
    async fn enumerate_listings(&self, owner: &OwnerRef) -> Result<Vec<ExternalId>, AttemptError>;

    /// Fetch the detail of a single listing. The tri-state result:
    /// `Ok(detail)` = present, `Err(NotPresent)` = the source answered
    /// and the listing is gone, `Err(Transient)` = try again.
    async fn fetch_listing_detail(&self, id: &ExternalId)
        -> Result<ListingDetail, AttemptError>;
}

// ============================================================================
// LISTING STORE: persistence for sessions, listings and seen markers
// ============================================================================

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Create and persist a new session row.
    async fn create_session(&self) -> Result<Session>;

    /// All listings with `active = true`.
    async fn find_active_listings(&self) -> Result<Vec<Listing>>;

    /// Every stored listing regardless of liveness.
    async fn find_all_listings(&self) -> Result<Vec<Listing>>;

    async fn find_listing(&self, id: &ExternalId) -> Result<Option<Listing>>;

    /// Create a new listing from a fetched detail. Starts active.
    async fn create_listing(&self, detail: &ListingDetail) -> Result<Listing>;

    /// Update the domain fields of an existing listing. Leaves the
    /// liveness fields untouched.
    async fn update_listing_fields(&self, detail: &ListingDetail) -> Result<()>;

    /// Move a listing to inactive, recording `last_seen` and the
    /// computed sell time. Returns `false` when the listing was already
    /// inactive (the write is skipped).
    async fn deactivate_listing(
        &self,
        id: &ExternalId,
        last_seen: DateTime<Utc>,
        sell_time_days: i64,
    ) -> Result<bool>;

    /// Fetch the marker for `(session, id)`, creating it with the given
    /// `seen` value when absent. An existing marker is returned as-is.
    async fn find_or_create_marker(
        &self,
        session_id: SessionId,
        id: &ExternalId,
        seen: bool,
    ) -> Result<SeenMarker>;

    /// Set the marker for `(session, id)` to `seen = true`, creating it
    /// when absent. Idempotent.
    async fn mark_seen(&self, session_id: SessionId, id: &ExternalId) -> Result<()>;

    /// External ids of all markers for this session still `seen = false`.
    async fn find_unseen_markers(&self, session_id: SessionId) -> Result<Vec<ExternalId>>;

    /// Timestamp of the most recent session, excluding the given one,
    /// in which this listing was marked seen. `None` when the listing
    /// has never been confirmed before.
    async fn last_confirmed_at(
        &self,
        id: &ExternalId,
        excluding: SessionId,
    ) -> Result<Option<DateTime<Utc>>>;
}
