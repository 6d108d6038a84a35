//! Test support: a scripted source adapter.
//!
//! Lets tests shape exactly what the source answers, attempt by
//! attempt, without any network. The in-memory counterpart of the
//! persistence seam lives in [`crate::storage::MemoryStore`].

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::error::AttemptError;
use crate::traits::SourceAdapter;
use crate::types::{ExternalId, ListingDetail, OwnerRef};

/// One scripted answer to a detail fetch.
#[derive(Debug, Clone)]
pub enum ScriptedFetch {
    /// The listing is present with this payload.
    Present(ListingDetail),
    /// The source answers and the listing is gone.
    Gone,
    /// A transient failure with the given message.
    Flaky(String),
}

enum OwnerScript {
    Ids(Vec<ExternalId>),
    Fail,
}

/// A [`SourceAdapter`] whose every answer is scripted.
///
/// Detail scripts are consumed front to back; the final entry repeats
/// once the script is exhausted, so a script of `[Flaky, Flaky, Gone]`
/// answers `Gone` to any further attempts. Unscripted ids answer with a
/// transient failure.
#[derive(Default)]
pub struct ScriptedSource {
    owners: RwLock<Vec<OwnerRef>>,
    owner_list_unavailable: RwLock<bool>,
    enumerations: RwLock<HashMap<String, OwnerScript>>,
    details: RwLock<HashMap<ExternalId, VecDeque<ScriptedFetch>>>,
    fetch_calls: RwLock<HashMap<ExternalId, u32>>,
    enumerate_calls: RwLock<HashMap<String, u32>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plausible detail payload for tests.
    pub fn detail_for(id: &str, owner: &str) -> ListingDetail {
        ListingDetail {
            external_id: ExternalId::from(id),
            owner_id: owner.to_string(),
            title: format!("listing {id}"),
            url: format!("https://source.test/listings/{id}"),
            price: Some(12_500),
            mileage: Some(120_000),
        }
    }

    /// Make `list_known_owners` fail.
    pub fn without_owner_list(self) -> Self {
        *self.owner_list_unavailable.write().unwrap() = true;
        self
    }

    /// Register an owner whose enumeration returns the given ids.
    pub fn with_owner_listings(self, owner_id: &str, ids: Vec<&str>) -> Self {
        self.owners.write().unwrap().push(OwnerRef {
            id: owner_id.to_string(),
            name: owner_id.to_string(),
        });
        self.enumerations.write().unwrap().insert(
            owner_id.to_string(),
            OwnerScript::Ids(ids.into_iter().map(ExternalId::from).collect()),
        );
        self
    }

    /// Register an owner whose enumeration always fails transiently.
    pub fn with_failing_owner(self, owner_id: &str) -> Self {
        self.owners.write().unwrap().push(OwnerRef {
            id: owner_id.to_string(),
            name: owner_id.to_string(),
        });
        self.enumerations
            .write()
            .unwrap()
            .insert(owner_id.to_string(), OwnerScript::Fail);
        self
    }

    /// Script a listing that is simply present.
    pub fn with_present(self, id: &str, owner: &str) -> Self {
        let detail = Self::detail_for(id, owner);
        self.with_fetch_script(id, vec![ScriptedFetch::Present(detail)])
    }

    /// Script a listing with an explicit payload.
    pub fn with_detail(self, detail: ListingDetail) -> Self {
        let id = detail.external_id.as_str().to_string();
        self.with_fetch_script(&id, vec![ScriptedFetch::Present(detail)])
    }

    /// Script the attempt-by-attempt answers for one listing.
    pub fn with_fetch_script(self, id: &str, script: Vec<ScriptedFetch>) -> Self {
        self.details
            .write()
            .unwrap()
            .insert(ExternalId::from(id), script.into());
        self
    }

    /// How many detail fetch attempts were made for this id.
    pub fn fetch_attempts(&self, id: &ExternalId) -> u32 {
        self.fetch_calls
            .read()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// How many enumeration attempts were made for this owner.
    pub fn enumerate_attempts(&self, owner_id: &str) -> u32 {
        self.enumerate_calls
            .read()
            .unwrap()
            .get(owner_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    async fn list_known_owners(&self) -> Result<Vec<OwnerRef>> {
        if *self.owner_list_unavailable.read().unwrap() {
            return Err(anyhow!("scripted owner list outage"));
        }
        Ok(self.owners.read().unwrap().clone())
    }

    async fn enumerate_listings(&self, owner: &OwnerRef) -> Result<Vec<ExternalId>, AttemptError> {
        *self
            .enumerate_calls
            .write()
            .unwrap()
            .entry(owner.id.clone())
            .or_insert(0) += 1;

        match self.enumerations.read().unwrap().get(&owner.id) {
            Some(OwnerScript::Ids(ids)) => Ok(ids.clone()),
            Some(OwnerScript::Fail) => {
                Err(AttemptError::transient("scripted enumeration failure"))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_listing_detail(
        &self,
        id: &ExternalId,
    ) -> Result<ListingDetail, AttemptError> {
        *self
            .fetch_calls
            .write()
            .unwrap()
            .entry(id.clone())
            .or_insert(0) += 1;

        let answer = {
            let mut details = self.details.write().unwrap();
            match details.get_mut(id) {
                Some(script) if script.len() > 1 => script.pop_front(),
                Some(script) => script.front().cloned(),
                None => None,
            }
        };

        match answer {
            Some(ScriptedFetch::Present(detail)) => Ok(detail),
            Some(ScriptedFetch::Gone) => Err(AttemptError::NotPresent),
            Some(ScriptedFetch::Flaky(message)) => Err(AttemptError::Transient(message)),
            None => Err(AttemptError::transient("unscripted listing")),
        }
    }
}
