use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::AnalysisResult;

/// A cached analysis row: result payload + write timestamp.
#[derive(Debug, Clone)]
pub struct CachedAnalysis {
    pub fingerprint: String,
    pub result: AnalysisResult,
    pub created_at: DateTime<Utc>,
}

/// Insert or replace the cached result for a fingerprint (last-write-wins).
pub fn upsert_cached_analysis(
    conn: &Connection,
    fingerprint: &str,
    result: &AnalysisResult,
    created_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let payload = serde_json::to_string(result)?;
    conn.execute(
        "INSERT INTO analysis_cache (fingerprint, result_json, created_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(fingerprint) DO UPDATE SET
           result_json = excluded.result_json,
           created_at = excluded.created_at",
        params![fingerprint, payload, created_at.to_rfc3339()],
    )?;
    Ok(())
}

/// Get a cached result younger than `max_age`, measured against `now`.
///
/// Expired rows are deleted on the spot (lazy eviction) and reported absent.
pub fn get_cached_analysis(
    conn: &Connection,
    fingerprint: &str,
    now: DateTime<Utc>,
    max_age: chrono::Duration,
) -> Result<Option<CachedAnalysis>, DatabaseError> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT result_json, created_at FROM analysis_cache WHERE fingerprint = ?1",
            params![fingerprint],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((payload, created_str)) = row else {
        return Ok(None);
    };

    let created_at = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    if now - created_at >= max_age {
        delete_cached_analysis(conn, fingerprint)?;
        return Ok(None);
    }

    let result: AnalysisResult = serde_json::from_str(&payload)?;
    Ok(Some(CachedAnalysis {
        fingerprint: fingerprint.to_string(),
        result,
        created_at,
    }))
}

/// Remove one cached entry.
pub fn delete_cached_analysis(conn: &Connection, fingerprint: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM analysis_cache WHERE fingerprint = ?1",
        params![fingerprint],
    )?;
    Ok(())
}

/// Delete every entry older than `max_age`. Returns the number removed.
/// Optional sweep — reads already evict lazily.
pub fn purge_expired(
    conn: &Connection,
    now: DateTime<Utc>,
    max_age: chrono::Duration,
) -> Result<u64, DatabaseError> {
    let cutoff = now - max_age;
    let affected = conn.execute(
        "DELETE FROM analysis_cache WHERE created_at <= ?1",
        params![cutoff.to_rfc3339()],
    )?;
    Ok(affected as u64)
}

/// Number of cached entries.
pub fn count_entries(conn: &Connection) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM analysis_cache", [], |row| row.get(0))?;
    Ok(count as u64)
}
