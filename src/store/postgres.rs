//! # PostgreSQL Fetch Store
//!
//! SQLx implementation of [`FetchStore`] over the tables created by
//! `migrations/0001_fetch_resilience.sql`. Every write is a single-row statement;
//! no multi-row transactions are needed.

use super::{CacheCounts, CacheKey, FetchStore};
use crate::error::RelayResult;
use crate::identity::IdentityHash;
use crate::models::{
    AttemptWindow, CacheEntry, FetchAttempt, FetchLinkUpdate, NewCacheEntry, NewFetchAttempt,
    ProviderLink,
};
use crate::targets::FetchTarget;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const CACHE_COLUMNS: &str = r#"
    cache_entry_uuid, account_id, identity_hash, request_hash, request_key, targets,
    year_limit, from_date, to_date, subject_type, status_code, payload,
    fetched_at, expires_at, last_hit_at, hit_count
"#;

const ATTEMPT_COLUMNS: &str = r#"
    fetch_attempt_uuid, account_id, provider, identity_hash, request_hash, request_key,
    force_refresh, cached, status_code, ok, created_at
"#;

const LINK_COLUMNS: &str = r#"
    account_id, provider, linked, login_method, login_org_cd, step_data, cookie_data,
    last_linked_at, last_fetched_at, last_identity_hash, last_error_code,
    last_error_message, updated_at
"#;

#[derive(Debug, FromRow)]
struct CacheEntryRow {
    cache_entry_uuid: Uuid,
    account_id: String,
    identity_hash: String,
    request_hash: String,
    request_key: String,
    targets: Json<Vec<FetchTarget>>,
    year_limit: i32,
    from_date: Option<NaiveDate>,
    to_date: Option<NaiveDate>,
    subject_type: String,
    status_code: i32,
    payload: serde_json::Value,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_hit_at: Option<DateTime<Utc>>,
    hit_count: i64,
}

impl From<CacheEntryRow> for CacheEntry {
    fn from(row: CacheEntryRow) -> Self {
        CacheEntry {
            cache_entry_uuid: row.cache_entry_uuid,
            account_id: row.account_id,
            identity_hash: row.identity_hash,
            request_hash: row.request_hash,
            request_key: row.request_key,
            targets: row.targets.0,
            year_limit: row.year_limit,
            from_date: row.from_date,
            to_date: row.to_date,
            subject_type: row.subject_type,
            status_code: row.status_code,
            payload: row.payload,
            fetched_at: row.fetched_at,
            expires_at: row.expires_at,
            last_hit_at: row.last_hit_at,
            hit_count: row.hit_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgFetchStore {
    pool: PgPool,
}

impl PgFetchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and run the bundled migrations
    pub async fn connect(database_url: &str) -> RelayResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| crate::error::RelayError::Store(format!("migration failed: {e}")))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_latest_entry(
        &self,
        sql: &str,
        key: &CacheKey,
    ) -> RelayResult<Option<CacheEntry>> {
        let row = sqlx::query_as::<_, CacheEntryRow>(sql)
            .bind(&key.account_id)
            .bind(key.identity_hash.as_str())
            .bind(&key.request_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(CacheEntry::from))
    }
}

#[async_trait]
impl FetchStore for PgFetchStore {
    async fn insert_cache_entry(&self, entry: NewCacheEntry) -> RelayResult<CacheEntry> {
        let entry = entry.into_entry(Uuid::new_v4());
        let sql = format!(
            r#"
            INSERT INTO relay_fetch_cache ({CACHE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {CACHE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, CacheEntryRow>(&sql)
            .bind(entry.cache_entry_uuid)
            .bind(&entry.account_id)
            .bind(&entry.identity_hash)
            .bind(&entry.request_hash)
            .bind(&entry.request_key)
            .bind(Json(&entry.targets))
            .bind(entry.year_limit)
            .bind(entry.from_date)
            .bind(entry.to_date)
            .bind(&entry.subject_type)
            .bind(entry.status_code)
            .bind(&entry.payload)
            .bind(entry.fetched_at)
            .bind(entry.expires_at)
            .bind(entry.last_hit_at)
            .bind(entry.hit_count)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn find_valid_cache_entry(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> RelayResult<Option<CacheEntry>> {
        let sql = format!(
            r#"
            SELECT {CACHE_COLUMNS}
            FROM relay_fetch_cache
            WHERE account_id = $1 AND identity_hash = $2 AND request_hash = $3
              AND expires_at > $4
            ORDER BY fetched_at DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query_as::<_, CacheEntryRow>(&sql)
            .bind(&key.account_id)
            .bind(key.identity_hash.as_str())
            .bind(&key.request_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(CacheEntry::from))
    }

    async fn find_latest_cache_entry(&self, key: &CacheKey) -> RelayResult<Option<CacheEntry>> {
        let sql = format!(
            r#"
            SELECT {CACHE_COLUMNS}
            FROM relay_fetch_cache
            WHERE account_id = $1 AND identity_hash = $2 AND request_hash = $3
            ORDER BY fetched_at DESC
            LIMIT 1
            "#
        );
        self.fetch_latest_entry(&sql, key).await
    }

    async fn find_latest_shared_cache_entry(
        &self,
        key: &CacheKey,
    ) -> RelayResult<Option<CacheEntry>> {
        let sql = format!(
            r#"
            SELECT {CACHE_COLUMNS}
            FROM relay_fetch_cache
            WHERE account_id <> $1 AND identity_hash = $2 AND request_hash = $3
            ORDER BY fetched_at DESC
            LIMIT 1
            "#
        );
        self.fetch_latest_entry(&sql, key).await
    }

    async fn record_cache_hit(
        &self,
        cache_entry_uuid: Uuid,
        at: DateTime<Utc>,
    ) -> RelayResult<()> {
        sqlx::query(
            r#"
            UPDATE relay_fetch_cache
            SET hit_count = hit_count + 1,
                last_hit_at = GREATEST(COALESCE(last_hit_at, $2), $2)
            WHERE cache_entry_uuid = $1
            "#,
        )
        .bind(cache_entry_uuid)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_cache_entries(
        &self,
        account_id: &str,
        identity_hash: Option<&IdentityHash>,
        now: DateTime<Utc>,
    ) -> RelayResult<CacheCounts> {
        let (total, valid): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE expires_at > $3)
            FROM relay_fetch_cache
            WHERE account_id = $1 AND ($2::text IS NULL OR identity_hash = $2)
            "#,
        )
        .bind(account_id)
        .bind(identity_hash.map(IdentityHash::as_str))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(CacheCounts { total, valid })
    }

    async fn insert_attempt(&self, attempt: NewFetchAttempt) -> RelayResult<FetchAttempt> {
        let attempt = attempt.into_attempt(Uuid::new_v4());
        let sql = format!(
            r#"
            INSERT INTO relay_fetch_attempts ({ATTEMPT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, FetchAttempt>(&sql)
            .bind(attempt.fetch_attempt_uuid)
            .bind(&attempt.account_id)
            .bind(&attempt.provider)
            .bind(&attempt.identity_hash)
            .bind(&attempt.request_hash)
            .bind(&attempt.request_key)
            .bind(attempt.force_refresh)
            .bind(attempt.cached)
            .bind(attempt.status_code)
            .bind(attempt.ok)
            .bind(attempt.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn count_attempts(&self, window: &AttemptWindow) -> RelayResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM relay_fetch_attempts
            WHERE account_id = $1 AND NOT cached
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND (NOT $3 OR force_refresh)
            "#,
        )
        .bind(&window.account_id)
        .bind(window.since)
        .bind(window.force_refresh_only)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn earliest_attempt_at(
        &self,
        window: &AttemptWindow,
    ) -> RelayResult<Option<DateTime<Utc>>> {
        let earliest: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MIN(created_at)
            FROM relay_fetch_attempts
            WHERE account_id = $1 AND NOT cached
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND (NOT $3 OR force_refresh)
            "#,
        )
        .bind(&window.account_id)
        .bind(window.since)
        .bind(window.force_refresh_only)
        .fetch_one(&self.pool)
        .await?;
        Ok(earliest)
    }

    async fn latest_attempt_at(
        &self,
        window: &AttemptWindow,
    ) -> RelayResult<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT MAX(created_at)
            FROM relay_fetch_attempts
            WHERE account_id = $1 AND NOT cached
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND (NOT $3 OR force_refresh)
            "#,
        )
        .bind(&window.account_id)
        .bind(window.since)
        .bind(window.force_refresh_only)
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }

    async fn list_attempts(&self, account_id: &str, limit: i64) -> RelayResult<Vec<FetchAttempt>> {
        let sql = format!(
            r#"
            SELECT {ATTEMPT_COLUMNS}
            FROM relay_fetch_attempts
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        );
        let attempts = sqlx::query_as::<_, FetchAttempt>(&sql)
            .bind(account_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(attempts)
    }

    async fn find_provider_link(
        &self,
        account_id: &str,
        provider: &str,
    ) -> RelayResult<Option<ProviderLink>> {
        let sql = format!(
            r#"
            SELECT {LINK_COLUMNS}
            FROM relay_provider_links
            WHERE account_id = $1 AND provider = $2
            "#
        );
        let link = sqlx::query_as::<_, ProviderLink>(&sql)
            .bind(account_id)
            .bind(provider)
            .fetch_optional(&self.pool)
            .await?;
        Ok(link)
    }

    async fn upsert_provider_link(&self, link: ProviderLink) -> RelayResult<ProviderLink> {
        let sql = format!(
            r#"
            INSERT INTO relay_provider_links ({LINK_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (account_id, provider) DO UPDATE SET
                linked = EXCLUDED.linked,
                login_method = EXCLUDED.login_method,
                login_org_cd = EXCLUDED.login_org_cd,
                step_data = EXCLUDED.step_data,
                cookie_data = EXCLUDED.cookie_data,
                last_linked_at = EXCLUDED.last_linked_at,
                last_fetched_at = EXCLUDED.last_fetched_at,
                last_identity_hash = EXCLUDED.last_identity_hash,
                last_error_code = EXCLUDED.last_error_code,
                last_error_message = EXCLUDED.last_error_message,
                updated_at = EXCLUDED.updated_at
            RETURNING {LINK_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, ProviderLink>(&sql)
            .bind(&link.account_id)
            .bind(&link.provider)
            .bind(link.linked)
            .bind(&link.login_method)
            .bind(&link.login_org_cd)
            .bind(&link.step_data)
            .bind(&link.cookie_data)
            .bind(link.last_linked_at)
            .bind(link.last_fetched_at)
            .bind(&link.last_identity_hash)
            .bind(&link.last_error_code)
            .bind(&link.last_error_message)
            .bind(link.updated_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn apply_fetch_update(&self, update: &FetchLinkUpdate) -> RelayResult<ProviderLink> {
        let (error_code, error_message) = match &update.error {
            Some(error) => (Some(error.code.as_str()), Some(error.message.as_str())),
            None => (None, None),
        };
        let sql = format!(
            r#"
            INSERT INTO relay_provider_links (
                account_id, provider, linked, last_fetched_at, last_identity_hash,
                last_error_code, last_error_message, updated_at
            )
            VALUES ($1, $2, FALSE, $3, $4, $5, $6, $7)
            ON CONFLICT (account_id, provider) DO UPDATE SET
                last_fetched_at = COALESCE(EXCLUDED.last_fetched_at, relay_provider_links.last_fetched_at),
                last_identity_hash = EXCLUDED.last_identity_hash,
                last_error_code = EXCLUDED.last_error_code,
                last_error_message = EXCLUDED.last_error_message,
                updated_at = EXCLUDED.updated_at
            RETURNING {LINK_COLUMNS}
            "#
        );
        let stored = sqlx::query_as::<_, ProviderLink>(&sql)
            .bind(&update.account_id)
            .bind(&update.provider)
            .bind(update.fetched_at)
            .bind(&update.identity_hash)
            .bind(error_code)
            .bind(error_message)
            .bind(update.updated_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }
}
