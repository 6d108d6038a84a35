//! Postgres store backed by sqlx.
//!
//! Schema lives in `migrations/`. Deactivation guards on `active` in
//! SQL so that concurrent or repeated writes cannot rewrite the
//! transition fields of an already-inactive listing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::traits::ListingStore;
use crate::types::{ExternalId, Listing, ListingDetail, SeenMarker, Session, SessionId};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn listing_from_row(row: &sqlx::postgres::PgRow) -> Listing {
    Listing {
        external_id: ExternalId(row.get("external_id")),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        url: row.get("url"),
        price: row.get("price"),
        mileage: row.get("mileage"),
        active: row.get("active"),
        last_seen: row.get("last_seen"),
        created_at: row.get("created_at"),
        sell_time_days: row.get("sell_time_days"),
    }
}

const LISTING_COLUMNS: &str =
    "external_id, owner_id, title, url, price, mileage, active, last_seen, created_at, sell_time_days";

#[async_trait]
impl ListingStore for PostgresStore {
    async fn create_session(&self) -> Result<Session> {
        let session = Session {
            id: SessionId::new(),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO sessions (id, created_at) VALUES ($1, $2)")
            .bind(session.id.as_uuid())
            .bind(session.created_at)
            .execute(&self.pool)
            .await
            .context("failed to create session")?;
        Ok(session)
    }

    async fn find_active_listings(&self) -> Result<Vec<Listing>> {
        let rows = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE active ORDER BY external_id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to load active listings")?;
        Ok(rows.iter().map(listing_from_row).collect())
    }

    async fn find_all_listings(&self) -> Result<Vec<Listing>> {
        let rows = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings ORDER BY external_id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to load listings")?;
        Ok(rows.iter().map(listing_from_row).collect())
    }

    async fn find_listing(&self, id: &ExternalId) -> Result<Option<Listing>> {
        let row = sqlx::query(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE external_id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load listing {id}"))?;
        Ok(row.as_ref().map(listing_from_row))
    }

    async fn create_listing(&self, detail: &ListingDetail) -> Result<Listing> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO listings (external_id, owner_id, title, url, price, mileage, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, now())
            ON CONFLICT (external_id) DO NOTHING
            RETURNING {LISTING_COLUMNS}
            "#
        ))
        .bind(detail.external_id.as_str())
        .bind(&detail.owner_id)
        .bind(&detail.title)
        .bind(&detail.url)
        .bind(detail.price)
        .bind(detail.mileage)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to create listing {}", detail.external_id))?;

        match row {
            Some(row) => Ok(listing_from_row(&row)),
            // Lost the insert race; the existing row wins.
            None => self
                .find_listing(&detail.external_id)
                .await?
                .context("listing vanished between insert and read"),
        }
    }

    async fn update_listing_fields(&self, detail: &ListingDetail) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE listings
            SET owner_id = $2, title = $3, url = $4, price = $5, mileage = $6
            WHERE external_id = $1
            "#,
        )
        .bind(detail.external_id.as_str())
        .bind(&detail.owner_id)
        .bind(&detail.title)
        .bind(&detail.url)
        .bind(detail.price)
        .bind(detail.mileage)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update listing {}", detail.external_id))?;
        Ok(())
    }

    async fn deactivate_listing(
        &self,
        id: &ExternalId,
        last_seen: DateTime<Utc>,
        sell_time_days: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET active = FALSE, last_seen = $2, sell_time_days = $3
            WHERE external_id = $1 AND active
            "#,
        )
        .bind(id.as_str())
        .bind(last_seen)
        .bind(sell_time_days)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to deactivate listing {id}"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_or_create_marker(
        &self,
        session_id: SessionId,
        id: &ExternalId,
        seen: bool,
    ) -> Result<SeenMarker> {
        sqlx::query(
            r#"
            INSERT INTO seen_markers (session_id, external_id, seen)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id, external_id) DO NOTHING
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(id.as_str())
        .bind(seen)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert marker for {id}"))?;

        let row = sqlx::query(
            "SELECT seen FROM seen_markers WHERE session_id = $1 AND external_id = $2",
        )
        .bind(session_id.as_uuid())
        .bind(id.as_str())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to read marker for {id}"))?;

        Ok(SeenMarker {
            session_id,
            external_id: id.clone(),
            seen: row.get("seen"),
        })
    }

    async fn mark_seen(&self, session_id: SessionId, id: &ExternalId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO seen_markers (session_id, external_id, seen)
            VALUES ($1, $2, TRUE)
            ON CONFLICT (session_id, external_id) DO UPDATE SET seen = TRUE
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to mark {id} seen"))?;
        Ok(())
    }

    async fn find_unseen_markers(&self, session_id: SessionId) -> Result<Vec<ExternalId>> {
        let rows = sqlx::query(
            "SELECT external_id FROM seen_markers WHERE session_id = $1 AND NOT seen ORDER BY external_id",
        )
        .bind(session_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .context("failed to query unseen markers")?;
        Ok(rows
            .into_iter()
            .map(|row| ExternalId(row.get("external_id")))
            .collect())
    }

    async fn last_confirmed_at(
        &self,
        id: &ExternalId,
        excluding: SessionId,
    ) -> Result<Option<DateTime<Utc>>> {
        let confirmed: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT max(s.created_at)
            FROM seen_markers m
            JOIN sessions s ON s.id = m.session_id
            WHERE m.external_id = $1 AND m.seen AND m.session_id <> $2
            "#,
        )
        .bind(id.as_str())
        .bind(excluding.as_uuid())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to resolve prior confirmation for {id}"))?;
        Ok(confirmed)
    }
}
