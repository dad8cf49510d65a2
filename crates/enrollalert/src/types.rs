//! Domain types shared by the refresh pipeline, the store and the HTTP surface.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static TERM_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}$").unwrap());

/// A numeric enrollment period identifier (e.g. `1262`).
///
/// Every pipeline operation takes the term explicitly; nothing reads a
/// process-wide "current term".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Term(u32);

#[derive(Debug, Error)]
#[error("invalid term {0:?}: expected a four digit term code")]
pub struct InvalidTerm(pub String);

impl Term {
    /// Returns the term as the integer stored in the database.
    pub fn code(&self) -> u32 {
        self.0
    }
}

/// Fall 2025, the term the service was first deployed for.
impl Default for Term {
    fn default() -> Self {
        Term(1262)
    }
}

impl FromStr for Term {
    type Err = InvalidTerm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !TERM_REGEX.is_match(trimmed) {
            return Err(InvalidTerm(s.to_string()));
        }
        trimmed
            .parse::<u32>()
            .map(Term)
            .map_err(|_| InvalidTerm(s.to_string()))
    }
}

impl TryFrom<String> for Term {
    type Error = InvalidTerm;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<u32> for Term {
    type Error = InvalidTerm;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        format!("{value:04}").parse()
    }
}

impl From<Term> for String {
    fn from(term: Term) -> Self {
        term.to_string()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Immutable reference data for one course, sourced by the initial load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseIdentity {
    pub course_id: String,
    pub subject_id: String,
    /// e.g. "COMP SCI 400"
    pub course_name: String,
    pub course_title: String,
}

/// Latest seat counts of one section in one term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub course_id: String,
    pub section_num: String,
    pub section_type: String,
    pub subject_id: String,
    pub course_name: String,
    pub course_title: String,
    pub capacity: i64,
    pub enrolled: i64,
    pub open_seats: i64,
    pub waitlist_capacity: i64,
    pub waitlist_open_spots: i64,
    pub professor_name: String,
    pub term: Term,
    pub last_updated: DateTime<Utc>,
}

impl SectionRecord {
    pub fn key(&self) -> SectionKey {
        SectionKey {
            course_id: self.course_id.clone(),
            section_num: self.section_num.clone(),
        }
    }
}

/// Identity of a section within a single term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionKey {
    pub course_id: String,
    pub section_num: String,
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.course_id, self.section_num)
    }
}

/// Result of the most recent scrape of one course in one term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionCacheEntry {
    pub course_id: String,
    pub term: Term,
    pub last_seen: DateTime<Utc>,
    /// False when the scrape returned no sections or failed outright.
    pub has_section: bool,
    /// Separates "confirmed empty" from "could not fetch".
    pub last_fetch_succeeded: bool,
}

/// Condition under which an alert fires.
///
/// Thresholds only exist on the two directional kinds, so a rule can never
/// carry a threshold it does not use (or lack one it needs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "alert_type", content = "seat_threshold", rename_all = "snake_case")]
pub enum AlertKind {
    /// Fires as soon as any seat is open.
    Any,
    /// Fires once open seats drop to the threshold or below.
    AtMost(u32),
    /// Fires once open seats reach the threshold or above.
    AtLeast(u32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidAlertKind {
    #[error("unknown alert type {0:?} (expected any, at_most or at_least)")]
    UnknownType(String),

    #[error("alert type {alert_type} requires a seat threshold")]
    MissingThreshold { alert_type: String },

    #[error("alert type any does not take a seat threshold")]
    UnexpectedThreshold,

    #[error("seat threshold must be at least 1, got {0}")]
    ThresholdOutOfRange(i64),
}

impl AlertKind {
    /// Rebuilds a kind from its stored `(alert_type, seat_threshold)` pair.
    pub fn from_parts(alert_type: &str, seat_threshold: Option<i64>) -> Result<Self, InvalidAlertKind> {
        let threshold = |t: Option<i64>| -> Result<u32, InvalidAlertKind> {
            let value = t.ok_or_else(|| InvalidAlertKind::MissingThreshold {
                alert_type: alert_type.to_string(),
            })?;
            if value < 1 {
                return Err(InvalidAlertKind::ThresholdOutOfRange(value));
            }
            u32::try_from(value).map_err(|_| InvalidAlertKind::ThresholdOutOfRange(value))
        };

        match alert_type {
            "any" if seat_threshold.is_some() => Err(InvalidAlertKind::UnexpectedThreshold),
            "any" => Ok(AlertKind::Any),
            "at_most" => Ok(AlertKind::AtMost(threshold(seat_threshold)?)),
            "at_least" => Ok(AlertKind::AtLeast(threshold(seat_threshold)?)),
            other => Err(InvalidAlertKind::UnknownType(other.to_string())),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AlertKind::Any => "any",
            AlertKind::AtMost(_) => "at_most",
            AlertKind::AtLeast(_) => "at_least",
        }
    }

    pub fn threshold(&self) -> Option<u32> {
        match self {
            AlertKind::Any => None,
            AlertKind::AtMost(t) | AlertKind::AtLeast(t) => Some(*t),
        }
    }

    /// Returns true if a section with `open_seats` open seats triggers this alert.
    pub fn is_satisfied_by(&self, open_seats: i64) -> bool {
        match *self {
            AlertKind::Any => open_seats > 0,
            AlertKind::AtMost(t) => open_seats <= i64::from(t),
            AlertKind::AtLeast(t) => open_seats >= i64::from(t),
        }
    }
}

/// A user's standing alert on one section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertRule {
    pub user_id: i64,
    pub course_id: String,
    pub section_num: String,
    #[serde(flatten)]
    pub kind: AlertKind,
}
