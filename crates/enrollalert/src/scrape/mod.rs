/// Enrollment API access and the bounded scrape pool
mod client;
mod pool;
mod types;

pub use client::{random_user_agent, EnrollClient, SectionSource};
pub use pool::{CourseScrape, ScrapePool};
pub use types::*;

#[cfg(test)]
pub(crate) use pool::tests::{courses as fake_courses, FakeSource};
