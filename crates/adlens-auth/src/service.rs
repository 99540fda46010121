use std::sync::Arc;
use std::time::{Duration, Instant};

use adlens_common::{Error, Result};
use adlens_db::CredentialStore;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::exchange::{AccountDirectory, TokenExchanger};
use crate::locks::KeyedLocks;

/// Provider key for the single upstream ads platform.
const PROVIDER: &str = "ads";

/// Failures tolerated before the durable record is deactivated.
const MAX_CREDENTIAL_FAILURES: i64 = 5;

struct CachedAccounts {
    ids: Vec<String>,
    fetched_at: Instant,
}

/// Per-user credential resolution with a three-tier account lookup and a
/// single-flight refresh path.
///
/// Tier 1 is an in-process TTL cache, tier 2 the durable credential record,
/// tier 3 the upstream account-listing endpoint. Origin results are merged
/// into both tiers, never overwritten.
pub struct CredentialService {
    store: Arc<Mutex<CredentialStore>>,
    exchanger: Arc<dyn TokenExchanger>,
    directory: Arc<dyn AccountDirectory>,
    account_cache: DashMap<String, CachedAccounts>,
    account_ttl: Duration,
    /// One mutex per user so concurrent auth failures trigger exactly one
    /// refresh exchange; losers reuse the winner's token. Entries are evicted
    /// once the last holder releases.
    refresh_locks: KeyedLocks,
}

impl CredentialService {
    pub fn new(
        store: Arc<Mutex<CredentialStore>>,
        exchanger: Arc<dyn TokenExchanger>,
        directory: Arc<dyn AccountDirectory>,
        account_ttl: Duration,
    ) -> Self {
        Self {
            store,
            exchanger,
            directory,
            account_cache: DashMap::new(),
            account_ttl,
            refresh_locks: KeyedLocks::new(),
        }
    }

    /// Current access token for a user, from the durable record.
    pub async fn access_token(&self, user_id: &str) -> Result<String> {
        let store = self.store.lock().await;
        let record = store
            .active_record(user_id, PROVIDER)?
            .ok_or_else(|| Error::AuthRejected(format!("no credential on file for '{user_id}'")))?;
        Ok(record.access_token)
    }

    /// Resolve the account ids a user can act on.
    ///
    /// Tier 1 (TTL cache) → tier 2 (credential record) → tier 3 (origin).
    /// A successful origin call is written through to both tiers, merged
    /// with previously known ids.
    #[instrument(skip(self))]
    pub async fn resolve_accounts(&self, user_id: &str) -> Result<Vec<String>> {
        if let Some(cached) = self.account_cache.get(user_id)
            && cached.fetched_at.elapsed() < self.account_ttl
        {
            debug!("account ids served from ephemeral cache");
            return Ok(cached.ids.clone());
        }

        let record = {
            let store = self.store.lock().await;
            store.active_record(user_id, PROVIDER)?
        };
        let record = record.ok_or_else(|| {
            Error::AuthRejected(format!("no credential on file for '{user_id}'"))
        })?;

        if !record.account_ids.is_empty() {
            self.cache_accounts(user_id, record.account_ids.clone());
            return Ok(record.account_ids);
        }

        // Full miss: one origin call, then write-through with merge.
        let fetched = self.directory.list_accounts(&record.access_token).await?;
        info!("origin account listing returned {} ids", fetched.len());

        let merged = {
            let store = self.store.lock().await;
            store.merge_account_ids(user_id, PROVIDER, &fetched)?
        };
        self.cache_accounts(user_id, merged.clone());
        Ok(merged)
    }

    /// Exchange the refresh token for a new access credential, serialized
    /// per user. `stale_token` is the token the caller saw rejected: if the
    /// active record already differs, another caller won the race and its
    /// result is reused without a second exchange.
    #[instrument(skip(self, stale_token))]
    pub async fn refresh_access(&self, user_id: &str, stale_token: &str) -> Result<String> {
        let _guard = self.refresh_locks.acquire(user_id).await;

        let record = {
            let store = self.store.lock().await;
            store.active_record(user_id, PROVIDER)?
        };
        let record = record.ok_or_else(|| {
            Error::RefreshFailed(format!("no active credential for '{user_id}'"))
        })?;

        if record.access_token != stale_token {
            debug!("credential already refreshed by a concurrent caller, reusing");
            return Ok(record.access_token);
        }

        match self.exchanger.refresh(&record.refresh_token).await {
            Ok(refreshed) => {
                let store = self.store.lock().await;
                let superseded =
                    store.supersede(user_id, PROVIDER, &refreshed.access_token, refreshed.expires_at)?;
                info!("credential refreshed for user '{user_id}'");
                Ok(superseded.access_token)
            }
            Err(e) => {
                let deactivated = {
                    let store = self.store.lock().await;
                    store.record_failure(user_id, PROVIDER, MAX_CREDENTIAL_FAILURES)?
                };
                if deactivated {
                    warn!("credential for '{user_id}' deactivated after repeated refresh failures");
                    // Cached account ids must not outlive the credential that
                    // resolved them.
                    self.invalidate_accounts(user_id);
                }
                Err(Error::RefreshFailed(e.to_string()))
            }
        }
    }

    /// Account ids from the cache tiers only (ephemeral, then the durable
    /// record). Never calls the origin; an unknown user or an empty record
    /// yields an empty list. Used to enrich conversational context cheaply.
    pub async fn cached_accounts(&self, user_id: &str) -> Result<Vec<String>> {
        if let Some(cached) = self.account_cache.get(user_id)
            && cached.fetched_at.elapsed() < self.account_ttl
        {
            return Ok(cached.ids.clone());
        }

        let record = {
            let store = self.store.lock().await;
            store.active_record(user_id, PROVIDER)?
        };
        let Some(record) = record else {
            return Ok(Vec::new());
        };
        if !record.account_ids.is_empty() {
            self.cache_accounts(user_id, record.account_ids.clone());
        }
        Ok(record.account_ids)
    }

    /// Drop the ephemeral account cache for a user (e.g. after reconnect).
    pub fn invalidate_accounts(&self, user_id: &str) {
        self.account_cache.remove(user_id);
    }

    fn cache_accounts(&self, user_id: &str, ids: Vec<String>) {
        self.account_cache.insert(
            user_id.to_string(),
            CachedAccounts {
                ids,
                fetched_at: Instant::now(),
            },
        );
    }
}
