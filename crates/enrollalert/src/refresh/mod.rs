//! The refresh cycle: select stale courses, scrape them, record the outcomes
//! and persist sections, then run the alert pass.

mod cache;
mod initial;
mod staleness;
mod writer;

pub use cache::{cache_entry, record_outcomes};
pub use initial::{initial_load, store_hits};
pub use staleness::{select_stale_courses, STALE_AFTER_HOURS};
pub use writer::DedupWriter;

use crate::alert::{AlertNotifier, NotifyReport};
use crate::db::EnrollDb;
use crate::error::CycleError;
use crate::scrape::{section_records, ScrapePool, SectionSource};
use crate::types::Term;
use chrono::{TimeDelta, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Counters of one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub stale: usize,
    pub batches: usize,
    pub attempted: usize,
    pub failed: usize,
    pub sections_written: usize,
    pub duplicates_skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub refresh: RefreshReport,
    /// `None` when the alert pass was skipped
    pub notify: Option<NotifyReport>,
}

pub struct RefreshPipeline {
    db: Arc<EnrollDb>,
    pool: ScrapePool<dyn SectionSource>,
    batch_size: usize,
    stale_after: TimeDelta,
}

impl RefreshPipeline {
    pub fn new(
        db: Arc<EnrollDb>,
        source: Arc<dyn SectionSource>,
        workers: usize,
        batch_size: usize,
        stale_after: TimeDelta,
    ) -> Self {
        Self {
            db,
            pool: ScrapePool::new(source, workers),
            batch_size: batch_size.max(1),
            stale_after,
        }
    }

    /// Refreshes every stale course of `term` in batches of `batch_size`.
    ///
    /// Per-course fetch failures are counted, never returned. A store failure
    /// ends the pass; rows already written stay written. When `cancel` fires
    /// the batch in progress is still recorded, then the pass stops with
    /// [`CycleError::Cancelled`].
    pub async fn refresh(
        &self,
        term: Term,
        cancel: &CancellationToken,
        correlation_id: &str,
    ) -> Result<RefreshReport, CycleError> {
        let stale = select_stale_courses(&self.db, term, Utc::now(), self.stale_after)?;
        let mut report = RefreshReport {
            stale: stale.len(),
            ..RefreshReport::default()
        };
        let mut writer = DedupWriter::new();

        for (batch_no, ids) in stale.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(CycleError::Cancelled);
            }

            let courses = self.db.course_identities(term, ids)?;
            if courses.len() != ids.len() {
                warn!(
                    correlation_id = %correlation_id,
                    requested = ids.len(),
                    found = courses.len(),
                    "Some stale course IDs have no stored identity"
                );
            }

            let scrapes = self.pool.run(term, courses, cancel).await;
            record_outcomes(&self.db, term, &scrapes)?;

            for scrape in &scrapes {
                if let Ok(packages) = &scrape.outcome {
                    let sections = section_records(term, &scrape.course, packages, scrape.fetched_at);
                    report.sections_written += writer.write_all(&self.db, &sections)?;
                }
            }

            report.batches += 1;
            report.attempted += scrapes.len();
            report.failed += scrapes.iter().filter(|s| s.outcome.is_err()).count();

            info!(
                correlation_id = %correlation_id,
                batch = batch_no + 1,
                courses = ids.len(),
                attempted = scrapes.len(),
                written = writer.written(),
                "Batch finished"
            );
        }

        report.duplicates_skipped = writer.skipped();

        if cancel.is_cancelled() {
            return Err(CycleError::Cancelled);
        }
        Ok(report)
    }
}

/// Runs one full cycle: refresh, then (unless `alerts` is `None`) the alert pass.
///
/// # Arguments
/// * `alerts` - Alert pass to run after all batches; `None` skips notification
/// * `cancel` - Stops the cycle between batches and before the alert pass
pub async fn run_cycle(
    pipeline: &RefreshPipeline,
    alerts: Option<&AlertNotifier>,
    term: Term,
    cancel: &CancellationToken,
) -> Result<CycleReport, CycleError> {
    let correlation_id = generate_correlation_id();
    let start = Instant::now();
    info!(correlation_id = %correlation_id, term = %term, "Starting refresh cycle");

    let result = async {
        let refresh = pipeline.refresh(term, cancel, &correlation_id).await?;
        let notify = match alerts {
            Some(alerts) => Some(alerts.notify_matches(term).await?),
            None => None,
        };
        Ok::<_, CycleError>(CycleReport { refresh, notify })
    }
    .await;

    match &result {
        Ok(report) => info!(
            correlation_id = %correlation_id,
            stale = report.refresh.stale,
            attempted = report.refresh.attempted,
            failed = report.refresh.failed,
            sections = report.refresh.sections_written,
            notified = report.notify.as_ref().map_or(0, |n| n.sent),
            duration_ms = start.elapsed().as_millis() as u64,
            "Refresh cycle completed"
        ),
        Err(e) => error!(
            correlation_id = %correlation_id,
            error = %e,
            duration_ms = start.elapsed().as_millis() as u64,
            "Refresh cycle failed"
        ),
    }

    result
}

/// Generates a correlation ID for one cycle's log lines.
fn generate_correlation_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let random: u32 = rand::thread_rng().gen();
    format!("{:x}-{:08x}", timestamp & 0xFFFFFFFF, random)
}
