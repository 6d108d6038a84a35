//! HTTP source adapter over a JSON listings API.
//!
//! Maps the wire into the engine's tri-state: 2xx with a body is
//! "present", 404/410 is "not present", everything else (timeouts,
//! connection failures, 5xx, 429 and any unexpected status) is
//! transient. Deliberately conservative: only an explicit gone status
//! ever counts toward deactivation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::error::AttemptError;
use crate::traits::SourceAdapter;
use crate::types::{ExternalId, ListingDetail, OwnerRef};

pub struct HttpSource {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct WireOwner {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireEnumeration {
    listing_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireListing {
    id: String,
    owner_id: String,
    title: String,
    url: String,
    #[serde(default)]
    price: Option<i64>,
    #[serde(default)]
    mileage: Option<i64>,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid source base url")?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AttemptError> {
        self.base_url
            .join(path)
            .map_err(|e| AttemptError::transient(format!("bad endpoint {path}: {e}")))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: Url,
    ) -> Result<T, AttemptError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(AttemptError::transient)?;

        match response.status() {
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| AttemptError::transient(format!("malformed response: {e}"))),
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(AttemptError::NotPresent),
            status => Err(AttemptError::transient(format!(
                "unexpected status {status} from {url}"
            ))),
        }
    }
}

#[async_trait]
impl SourceAdapter for HttpSource {
    async fn list_known_owners(&self) -> Result<Vec<OwnerRef>> {
        let url = self
            .base_url
            .join("owners")
            .context("bad owners endpoint")?;
        let owners: Vec<WireOwner> = self
            .client
            .get(url)
            .send()
            .await
            .context("owner list request failed")?
            .error_for_status()
            .context("owner list request rejected")?
            .json()
            .await
            .context("malformed owner list")?;

        Ok(owners
            .into_iter()
            .map(|o| OwnerRef {
                id: o.id,
                name: o.name,
            })
            .collect())
    }

    async fn enumerate_listings(&self, owner: &OwnerRef) -> Result<Vec<ExternalId>, AttemptError> {
        let url = self.endpoint(&format!("owners/{}/listings", owner.id))?;
        let enumeration: WireEnumeration = self.get_json(url).await?;
        Ok(enumeration
            .listing_ids
            .into_iter()
            .map(ExternalId)
            .collect())
    }

    async fn fetch_listing_detail(
        &self,
        id: &ExternalId,
    ) -> Result<ListingDetail, AttemptError> {
        let url = self.endpoint(&format!("listings/{id}"))?;
        let listing: WireListing = self.get_json(url).await?;
        Ok(ListingDetail {
            external_id: ExternalId(listing.id),
            owner_id: listing.owner_id,
            title: listing.title,
            url: listing.url,
            price: listing.price,
            mileage: listing.mileage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_must_parse() {
        assert!(HttpSource::new("https://source.test/api/").is_ok());
        assert!(HttpSource::new("not a url").is_err());
    }

    #[test]
    fn wire_listing_tolerates_missing_optionals() {
        let listing: WireListing = serde_json::from_str(
            r#"{"id":"lst-1","owner_id":"o1","title":"Sedan","url":"https://source.test/lst-1"}"#,
        )
        .unwrap();
        assert_eq!(listing.id, "lst-1");
        assert_eq!(listing.price, None);
        assert_eq!(listing.mileage, None);
    }
}
