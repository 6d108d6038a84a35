//! In-memory store for testing and development.
//!
//! Not suitable for production: data is lost on restart and writes are
//! serialized behind a single lock.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::traits::ListingStore;
use crate::types::{ExternalId, Listing, ListingDetail, SeenMarker, Session, SessionId};

#[derive(Default)]
struct Inner {
    sessions: Vec<Session>,
    listings: BTreeMap<ExternalId, Listing>,
    markers: BTreeMap<(SessionId, ExternalId), bool>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of markers across all sessions.
    pub fn marker_count(&self) -> usize {
        self.inner.read().unwrap().markers.len()
    }

    /// Create a session with an explicit timestamp. Test helper for
    /// shaping prior-session history.
    pub async fn create_session_at(&self, created_at: DateTime<Utc>) -> Session {
        let session = Session {
            id: SessionId::new(),
            created_at,
        };
        self.inner.write().unwrap().sessions.push(session.clone());
        session
    }

    /// Overwrite a listing's creation time. Test helper for sell-time
    /// assertions.
    pub fn backdate_listing(&self, id: &ExternalId, created_at: DateTime<Utc>) {
        let mut inner = self.inner.write().unwrap();
        if let Some(listing) = inner.listings.get_mut(id) {
            listing.created_at = created_at;
        }
    }
}

#[async_trait]
impl ListingStore for MemoryStore {
    async fn create_session(&self) -> Result<Session> {
        Ok(self.create_session_at(Utc::now()).await)
    }

    async fn find_active_listings(&self) -> Result<Vec<Listing>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .listings
            .values()
            .filter(|l| l.active)
            .cloned()
            .collect())
    }

    async fn find_all_listings(&self) -> Result<Vec<Listing>> {
        Ok(self.inner.read().unwrap().listings.values().cloned().collect())
    }

    async fn find_listing(&self, id: &ExternalId) -> Result<Option<Listing>> {
        Ok(self.inner.read().unwrap().listings.get(id).cloned())
    }

    async fn create_listing(&self, detail: &ListingDetail) -> Result<Listing> {
        let listing = Listing {
            external_id: detail.external_id.clone(),
            owner_id: detail.owner_id.clone(),
            title: detail.title.clone(),
            url: detail.url.clone(),
            price: detail.price,
            mileage: detail.mileage,
            active: true,
            last_seen: None,
            created_at: Utc::now(),
            sell_time_days: None,
        };
        let mut inner = self.inner.write().unwrap();
        let entry = inner
            .listings
            .entry(detail.external_id.clone())
            .or_insert_with(|| listing.clone());
        Ok(entry.clone())
    }

    async fn update_listing_fields(&self, detail: &ListingDetail) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if let Some(listing) = inner.listings.get_mut(&detail.external_id) {
            listing.owner_id = detail.owner_id.clone();
            listing.title = detail.title.clone();
            listing.url = detail.url.clone();
            listing.price = detail.price;
            listing.mileage = detail.mileage;
        }
        Ok(())
    }

    async fn deactivate_listing(
        &self,
        id: &ExternalId,
        last_seen: DateTime<Utc>,
        sell_time_days: i64,
    ) -> Result<bool> {
        let mut inner = self.inner.write().unwrap();
        match inner.listings.get_mut(id) {
            Some(listing) if listing.active => {
                listing.active = false;
                listing.last_seen = Some(last_seen);
                listing.sell_time_days = Some(sell_time_days);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_or_create_marker(
        &self,
        session_id: SessionId,
        id: &ExternalId,
        seen: bool,
    ) -> Result<SeenMarker> {
        let mut inner = self.inner.write().unwrap();
        let value = inner
            .markers
            .entry((session_id, id.clone()))
            .or_insert(seen);
        Ok(SeenMarker {
            session_id,
            external_id: id.clone(),
            seen: *value,
        })
    }

    async fn mark_seen(&self, session_id: SessionId, id: &ExternalId) -> Result<()> {
        self.inner
            .write()
            .unwrap()
            .markers
            .insert((session_id, id.clone()), true);
        Ok(())
    }

    async fn find_unseen_markers(&self, session_id: SessionId) -> Result<Vec<ExternalId>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .markers
            .iter()
            .filter(|((sid, _), seen)| *sid == session_id && !**seen)
            .map(|((_, id), _)| id.clone())
            .collect())
    }

    async fn last_confirmed_at(
        &self,
        id: &ExternalId,
        excluding: SessionId,
    ) -> Result<Option<DateTime<Utc>>> {
        let inner = self.inner.read().unwrap();
        let confirmed = inner
            .sessions
            .iter()
            .filter(|s| s.id != excluding)
            .filter(|s| inner.markers.get(&(s.id, id.clone())) == Some(&true))
            .map(|s| s.created_at)
            .max();
        Ok(confirmed)
    }
}
