//! Reference-range resolution.
//!
//! Candidate rows for a code are filtered by tenant, sex, age, pregnancy and
//! effective window, then ranked. Successful lookups are cached per
//! `(code, qualifiers)` for a fixed TTL; misses are never cached so a later
//! bundle load is picked up on the next request.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::store::CatalogStore;
use super::CatalogError;
use crate::models::{ReferenceRange, Sex};

/// Patient qualifiers for a range lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RangeQuery {
    pub age: Option<u32>,
    /// `None` disables the sex filter.
    pub sex: Option<Sex>,
    pub pregnant: Option<bool>,
    pub tenant_id: Option<String>,
}

impl RangeQuery {
    fn admits(&self, range: &ReferenceRange) -> bool {
        let tenant_ok = match &range.tenant_id {
            None => true,
            Some(t) => self.tenant_id.as_deref() == Some(t.as_str()),
        };
        let sex_ok = match self.sex {
            None => true,
            Some(sex) => range.sex == sex || range.sex == Sex::Any,
        };
        tenant_ok && sex_ok && range.admits_age(self.age) && range.admits_pregnancy(self.pregnant)
    }

    /// Ranking key, higher is better: tenant-specific, exact sex match,
    /// latest `effective_from`, then newest row.
    fn rank(&self, range: &ReferenceRange) -> (bool, bool, DateTime<Utc>, i64) {
        let tenant_specific = range.tenant_id.is_some();
        let exact_sex = self.sex.is_some_and(|s| s != Sex::Any && range.sex == s);
        (tenant_specific, exact_sex, range.effective_from, range.id)
    }
}

/// Pick the best candidate for `code` at `now`, or `None` when nothing applies.
pub fn select_range<'a>(
    candidates: &'a [ReferenceRange],
    code: &str,
    query: &RangeQuery,
    now: DateTime<Utc>,
) -> Option<&'a ReferenceRange> {
    candidates
        .iter()
        .filter(|r| r.code == code && r.is_effective_at(now) && query.admits(r))
        .max_by_key(|r| query.rank(r))
}

type CacheKey = (String, RangeQuery);

/// TTL cache of resolved ranges.
pub struct RangeCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, (Instant, ReferenceRange)>>,
}

impl RangeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, code: &str, query: &RangeQuery) -> Option<ReferenceRange> {
        let entries = self.entries.read().ok()?;
        let (stored_at, range) = entries.get(&(code.to_string(), query.clone()))?;
        (stored_at.elapsed() < self.ttl).then(|| range.clone())
    }

    pub fn put(&self, code: &str, query: &RangeQuery, range: ReferenceRange) {
        if self.ttl.is_zero() {
            return;
        }
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
            entries.insert((code.to_string(), query.clone()), (Instant::now(), range));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ReferenceRangeResolver {
    store: Arc<CatalogStore>,
    cache: RangeCache,
}

impl ReferenceRangeResolver {
    pub fn new(store: Arc<CatalogStore>, ttl: Duration) -> Self {
        Self {
            store,
            cache: RangeCache::new(ttl),
        }
    }

    pub fn resolve(
        &self,
        code: &str,
        query: &RangeQuery,
    ) -> Result<Option<ReferenceRange>, CatalogError> {
        self.resolve_at(code, query, Utc::now())
    }

    pub fn resolve_at(
        &self,
        code: &str,
        query: &RangeQuery,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferenceRange>, CatalogError> {
        if let Some(hit) = self.cache.get(code, query) {
            return Ok(Some(hit));
        }
        let resolved = self.store.get_range_at(code, query, now)?;
        match &resolved {
            Some(range) => self.cache.put(code, query, range.clone()),
            None => tracing::debug!(code, "No reference range matched"),
        }
        Ok(resolved)
    }

    /// Drop every cached entry. Called after a bundle commit.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}
