use crate::db::EnrollDb;
use crate::error::StoreError;
use crate::scrape::CourseScrape;
use crate::types::{SectionCacheEntry, Term};
use tracing::debug;

/// Builds the cache entry recorded for one scraped course.
///
/// A failed fetch counts as "no sections" so a persistently broken course is
/// only retried once the freshness window lapses; `last_fetch_succeeded`
/// keeps the two cases apart.
pub fn cache_entry(term: Term, scrape: &CourseScrape) -> SectionCacheEntry {
    SectionCacheEntry {
        course_id: scrape.course.course_id.clone(),
        term,
        last_seen: scrape.fetched_at,
        has_section: scrape.section_count() > 0,
        last_fetch_succeeded: scrape.outcome.is_ok(),
    }
}

/// Records the outcome of every attempted course, failed fetches included.
pub fn record_outcomes(
    db: &EnrollDb,
    term: Term,
    scrapes: &[CourseScrape],
) -> Result<usize, StoreError> {
    for scrape in scrapes {
        let entry = cache_entry(term, scrape);
        debug!(
            course_id = %entry.course_id,
            has_section = entry.has_section,
            fetch_ok = entry.last_fetch_succeeded,
            "Updating section cache"
        );
        db.upsert_section_cache(&entry)?;
    }
    Ok(scrapes.len())
}
