//! HTTP client for the public enrollment search API.
//!
//! Two calls are used:
//! 1. POST /api/search/v1 lists every course of a term (initial load)
//! 2. GET /api/search/v1/enrollmentPackages/{term}/{subject}/{course} returns
//!    the sections and seat counters of one course

use super::types::{CourseHit, EnrollmentPackage, SearchRequest, SearchResponse};
use crate::error::ScrapeError;
use crate::types::{CourseIdentity, Term};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{ACCEPT, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

const SEARCH_PATH: &str = "/api/search/v1";
const PACKAGES_PATH: &str = "/api/search/v1/enrollmentPackages";

/// Browser identities rotated per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.2478.51",
];

/// Picks a user agent for a single request.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Anything that can produce the enrollment packages of one course.
///
/// The scrape pool is written against this trait so tests can drive it
/// without a network.
#[async_trait]
pub trait SectionSource: Send + Sync {
    async fn fetch_sections(
        &self,
        term: Term,
        course: &CourseIdentity,
    ) -> Result<Vec<EnrollmentPackage>, ScrapeError>;
}

/// Client for the enrollment search API.
pub struct EnrollClient {
    client: Client,
    base_url: Url,
}

impl EnrollClient {
    /// Creates a client against `base_url` (e.g. `https://public.enroll.wisc.edu`).
    ///
    /// # Arguments
    /// * `base_url` - Scheme and host of the public enrollment site
    /// * `timeout` - Upper bound for one whole request, body included
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ScrapeError> {
        let base_url = Url::parse(base_url)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| ScrapeError::Request {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, base_url })
    }

    /// Lists up to `count` courses offered in `term`.
    pub async fn search_courses(
        &self,
        term: Term,
        count: usize,
    ) -> Result<Vec<CourseHit>, ScrapeError> {
        let url = self.base_url.join(SEARCH_PATH)?;
        let referer = self.referer(&[("term", term.to_string()), ("closed", "true".to_string())])?;

        let request = self
            .client
            .post(url.clone())
            .json(&SearchRequest::courses_with_packages(term, count));

        let response: SearchResponse = self.send_json(request, &url, referer).await?;
        Ok(response.hits)
    }

    fn packages_url(&self, term: Term, course: &CourseIdentity) -> Result<Url, ScrapeError> {
        let path = format!(
            "{}/{}/{}/{}",
            PACKAGES_PATH, term, course.subject_id, course.course_id
        );
        Ok(self.base_url.join(&path)?)
    }

    /// Builds a search page URL, the page a visitor would have come from.
    fn referer(&self, query: &[(&str, String)]) -> Result<Url, ScrapeError> {
        let search = self.base_url.join("/search")?;
        Ok(Url::parse_with_params(search.as_str(), query)?)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &Url,
        referer: Url,
    ) -> Result<T, ScrapeError> {
        let origin = self.base_url.origin().ascii_serialization();
        let start = Instant::now();

        let response = request
            .header(USER_AGENT, random_user_agent())
            .header(ACCEPT, "application/json")
            .header(ORIGIN, origin)
            .header(REFERER, referer.as_str())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        debug!(
            url = %url,
            status = status.as_u16(),
            bytes = body.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Enrollment API response"
        );

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl SectionSource for EnrollClient {
    async fn fetch_sections(
        &self,
        term: Term,
        course: &CourseIdentity,
    ) -> Result<Vec<EnrollmentPackage>, ScrapeError> {
        let url = self.packages_url(term, course)?;
        let referer = self.referer(&[
            ("term", term.to_string()),
            ("subject", course.subject_id.clone()),
        ])?;

        let request = self.client.get(url.clone());
        self.send_json(request, &url, referer).await
    }
}
