use crate::db::EnrollDb;
use crate::error::StoreError;
use crate::types::Term;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

/// Default freshness window for courses last seen without sections.
pub const STALE_AFTER_HOURS: i64 = 24;

/// Selects the course IDs of `term` that need scraping this cycle.
///
/// # Arguments
/// * `now` - Reference time for the freshness window
/// * `window` - How long a known-empty course is skipped
///
/// # Returns
/// IDs sorted ascending. A store failure ends the cycle.
pub fn select_stale_courses(
    db: &EnrollDb,
    term: Term,
    now: DateTime<Utc>,
    window: TimeDelta,
) -> Result<Vec<String>, StoreError> {
    let ids = db.stale_course_ids(term, now, window)?;
    info!(term = %term, stale = ids.len(), "Selected courses for refresh");
    Ok(ids)
}
