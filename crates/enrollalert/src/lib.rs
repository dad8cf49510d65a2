//! Seat-availability refresh and alerting for a university enrollment system.
//!
//! A refresh cycle selects the courses due for a scrape, fetches their
//! sections with a fixed-size worker pool, records the outcome per course,
//! writes the sections, and finally notifies and removes every alert whose
//! section now satisfies it.

pub mod alert;
pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod refresh;
pub mod scrape;
pub mod server;
pub mod types;
