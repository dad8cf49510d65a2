use crate::db::EnrollDb;
use crate::error::{CycleError, StoreError};
use crate::scrape::{CourseHit, EnrollClient};
use crate::types::{CourseIdentity, Term};
use std::time::Instant;
use tracing::{info, warn};

/// Loads the course catalog of `term` from the bulk search into the store.
///
/// # Arguments
/// * `count` - Page size requested from the search, i.e. the most courses loaded
///
/// # Returns
/// Number of course identities written.
pub async fn initial_load(
    client: &EnrollClient,
    db: &EnrollDb,
    term: Term,
    count: usize,
) -> Result<usize, CycleError> {
    let start = Instant::now();
    let hits = client.search_courses(term, count).await?;
    info!(term = %term, hits = hits.len(), "Course search finished");

    let loaded = store_hits(db, term, hits)?;
    info!(
        term = %term,
        loaded,
        duration_ms = start.elapsed().as_millis() as u64,
        "Initial course load finished"
    );
    Ok(loaded)
}

/// Writes search hits as course identities, dropping hits without IDs.
pub fn store_hits(db: &EnrollDb, term: Term, hits: Vec<CourseHit>) -> Result<usize, StoreError> {
    let courses: Vec<CourseIdentity> = hits
        .into_iter()
        .filter_map(|hit| {
            if hit.course_id.is_empty() || hit.subject.subject_code.is_empty() {
                warn!(title = %hit.title, "Search hit without course or subject code");
                return None;
            }
            Some(CourseIdentity::from(hit))
        })
        .collect();

    db.upsert_courses(term, &courses)
}
