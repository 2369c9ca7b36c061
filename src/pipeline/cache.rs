//! Fingerprint-keyed analysis result cache.
//!
//! Sits in front of the remote analysis call: a hit within the expiry
//! window skips the network entirely. Cache failures are logged and
//! swallowed — a broken cache degrades to "always miss", it never fails an
//! analysis.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::db::repository::analysis_cache;
use crate::db::{self, DatabaseError};
use crate::models::AnalysisResult;

use super::fingerprint::Fingerprint;

/// Entries older than this are treated as absent and evicted.
pub const CACHE_MAX_AGE_DAYS: i64 = 7;

/// Key-value store for analysis results.
///
/// Implementations absorb their own failures: `get` answers `None` and
/// `put` is fire-and-forget.
pub trait ResultCache: Send + Sync {
    fn get(&self, fingerprint: &Fingerprint) -> Option<AnalysisResult>;
    fn put(&self, fingerprint: &Fingerprint, result: &AnalysisResult);
}

// ═══════════════════════════════════════════════════════════
// SqliteResultCache
// ═══════════════════════════════════════════════════════════

/// Durable cache backed by the app database.
pub struct SqliteResultCache {
    conn: Mutex<Connection>,
    max_age: Duration,
}

impl SqliteResultCache {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(db::open_database(path)?))
    }

    pub fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::from_connection(db::open_memory_database()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            max_age: Duration::days(CACHE_MAX_AGE_DAYS),
        }
    }

    /// Sweep expired rows. Optional — reads evict lazily anyway.
    pub fn purge_expired(&self) -> Result<u64, DatabaseError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        analysis_cache::purge_expired(&conn, Utc::now(), self.max_age)
    }

    pub fn len(&self) -> u64 {
        self.conn
            .lock()
            .ok()
            .and_then(|conn| analysis_cache::count_entries(&conn).ok())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultCache for SqliteResultCache {
    fn get(&self, fingerprint: &Fingerprint) -> Option<AnalysisResult> {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(_) => return None,
        };
        match analysis_cache::get_cached_analysis(&conn, fingerprint.as_str(), Utc::now(), self.max_age)
        {
            Ok(Some(cached)) => {
                debug!(fingerprint = %fingerprint, "Result cache hit");
                Some(cached.result)
            }
            Ok(None) => {
                debug!(fingerprint = %fingerprint, "Result cache miss");
                None
            }
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "Cache read failed; treating as miss");
                None
            }
        }
    }

    fn put(&self, fingerprint: &Fingerprint, result: &AnalysisResult) {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(_) => return,
        };
        if let Err(e) =
            analysis_cache::upsert_cached_analysis(&conn, fingerprint.as_str(), result, Utc::now())
        {
            warn!(fingerprint = %fingerprint, error = %e, "Cache write failed; continuing");
        }
    }
}

// ═══════════════════════════════════════════════════════════
// MemoryResultCache
// ═══════════════════════════════════════════════════════════

/// In-memory cache with the same expiry semantics (tests, ephemeral runs).
pub struct MemoryResultCache {
    entries: Mutex<HashMap<String, (AnalysisResult, DateTime<Utc>)>>,
    max_age: Duration,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age: Duration::days(CACHE_MAX_AGE_DAYS),
        }
    }

    /// Insert with an explicit write time (expiry tests).
    pub fn put_at(&self, fingerprint: &Fingerprint, result: &AnalysisResult, at: DateTime<Utc>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(fingerprint.as_str().to_string(), (result.clone(), at));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache for MemoryResultCache {
    fn get(&self, fingerprint: &Fingerprint) -> Option<AnalysisResult> {
        let mut entries = self.entries.lock().ok()?;
        let (result, written) = entries.get(fingerprint.as_str())?.clone();
        if Utc::now() - written >= self.max_age {
            entries.remove(fingerprint.as_str());
            return None;
        }
        Some(result)
    }

    fn put(&self, fingerprint: &Fingerprint, result: &AnalysisResult) {
        self.put_at(fingerprint, result, Utc::now());
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
