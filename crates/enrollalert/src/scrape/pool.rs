//! Fixed-size worker pool that fetches section data for a batch of courses.
//!
//! Courses are loaded into a closed queue before any worker starts. Each worker
//! takes one course at a time until the queue is empty and sends its outcome to
//! a single collector task, which owns the result list.

use super::client::SectionSource;
use super::types::EnrollmentPackage;
use crate::error::ScrapeError;
use crate::types::{CourseIdentity, Term};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one course fetch.
#[derive(Debug)]
pub struct CourseScrape {
    pub course: CourseIdentity,
    pub fetched_at: DateTime<Utc>,
    pub outcome: Result<Vec<EnrollmentPackage>, ScrapeError>,
}

impl CourseScrape {
    /// Number of sections returned, zero when the fetch failed
    pub fn section_count(&self) -> usize {
        match &self.outcome {
            Ok(packages) => packages.iter().map(|p| p.sections.len()).sum(),
            Err(_) => 0,
        }
    }
}

pub struct ScrapePool<S: ?Sized> {
    source: Arc<S>,
    workers: usize,
}

impl<S> ScrapePool<S>
where
    S: SectionSource + ?Sized + 'static,
{
    pub fn new(source: Arc<S>, workers: usize) -> Self {
        Self {
            source,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fetches every course in `courses` and returns once all workers are done.
    ///
    /// A failed fetch is logged and reported in its [`CourseScrape`]; it never
    /// stops the other workers and is not retried. After `cancel` fires no
    /// worker takes a new course, so the result may cover only a prefix of the
    /// batch. Requests already in flight run to completion (bounded by the
    /// HTTP client's own timeout).
    pub async fn run(
        &self,
        term: Term,
        courses: Vec<CourseIdentity>,
        cancel: &CancellationToken,
    ) -> Vec<CourseScrape> {
        let total = courses.len();

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        for course in courses {
            if job_tx.send(course).is_err() {
                break;
            }
        }
        drop(job_tx);
        let jobs = Arc::new(Mutex::new(job_rx));

        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<CourseScrape>();
        let collector = tokio::spawn(async move {
            let mut results = Vec::with_capacity(total);
            while let Some(scrape) = result_rx.recv().await {
                results.push(scrape);
            }
            results
        });

        let handles = (0..self.workers).map(|worker_id| {
            let jobs = Arc::clone(&jobs);
            let source = Arc::clone(&self.source);
            let results = result_tx.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        debug!(worker_id, "Worker stopping, cycle cancelled");
                        break;
                    }

                    let next = jobs.lock().await.recv().await;
                    let Some(course) = next else {
                        break;
                    };

                    let outcome = source.fetch_sections(term, &course).await;
                    match &outcome {
                        Ok(packages) => debug!(
                            worker_id,
                            course_id = %course.course_id,
                            packages = packages.len(),
                            "Fetched sections"
                        ),
                        Err(e) => warn!(
                            worker_id,
                            course_id = %course.course_id,
                            course_name = %course.course_name,
                            error = %e,
                            "Fetching sections failed, skipping course"
                        ),
                    }

                    let scrape = CourseScrape {
                        course,
                        fetched_at: Utc::now(),
                        outcome,
                    };
                    if results.send(scrape).is_err() {
                        break;
                    }
                }
            })
        });

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!(error = %e, "Scrape worker terminated abnormally");
            }
        }
        drop(result_tx);

        let results = match collector.await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "Scrape result collector terminated abnormally");
                Vec::new()
            }
        };

        let failed = results.iter().filter(|r| r.outcome.is_err()).count();
        info!(
            term = %term,
            courses = total,
            attempted = results.len(),
            failed,
            workers = self.workers,
            "Scrape batch finished"
        );

        results
    }
}
