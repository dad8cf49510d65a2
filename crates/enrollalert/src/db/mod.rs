/// Relational store for course identities, seat data, the section cache and alerts

mod types;

pub use types::AlertCandidate;

use crate::error::StoreError;
use crate::types::{AlertKind, AlertRule, CourseIdentity, SectionCacheEntry, SectionRecord, Term};
use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_SQL: &str = include_str!("../../../../sql/init_enrollalert.sql");

const SECTION_COLUMNS: &str = "term, course_id, section_num, section_type, subject_id, course_name,
    course_title, capacity, enrolled, open_seats, waitlist_capacity, waitlist_open_spots,
    prof_name, last_updated";

pub struct EnrollDb {
    db: Mutex<Connection>,
}

impl EnrollDb {
    /// Opens (or creates) the database file and initializes the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(db_path)?)
    }

    /// Opens a private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Inserts course identities for a term, refreshing name and title of existing rows
    pub fn upsert_courses(&self, term: Term, courses: &[CourseIdentity]) -> Result<usize, StoreError> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO courses (course_id, subject_id, course_name, course_title, term)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (course_id, subject_id, term)
                 DO UPDATE SET course_name  = excluded.course_name,
                               course_title = excluded.course_title",
            )?;

            for course in courses {
                stmt.execute(params![
                    course.course_id,
                    course.subject_id,
                    course.course_name,
                    course.course_title,
                    term,
                ])?;
            }
        }

        tx.commit()?;
        Ok(courses.len())
    }

    /// Looks up course identities by ID, one row per course ID
    ///
    /// Cross-listed courses share a course ID under several subjects; the
    /// lowest subject ID is used to address the enrollment API.
    pub fn course_identities(
        &self,
        term: Term,
        course_ids: &[String],
    ) -> Result<Vec<CourseIdentity>, StoreError> {
        if course_ids.is_empty() {
            return Ok(Vec::new());
        }

        let db = self.conn()?;
        let placeholders = vec!["?"; course_ids.len()].join(", ");
        let sql = format!(
            "SELECT course_id, MIN(subject_id), course_name, course_title
             FROM courses
             WHERE term = ?1 AND course_id IN ({placeholders})
             GROUP BY course_id
             ORDER BY course_id"
        );

        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(course_ids.len() + 1);
        values.push(&term);
        values.extend(course_ids.iter().map(|id| id as &dyn ToSql));

        let mut stmt = db.prepare(&sql)?;
        let courses = stmt
            .query_map(values.as_slice(), |row| {
                Ok(CourseIdentity {
                    course_id: row.get(0)?,
                    subject_id: row.get(1)?,
                    course_name: row.get(2)?,
                    course_title: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(courses)
    }

    /// Returns the IDs of every course in `term` that is due for a scrape
    ///
    /// A course is due when it has no cache entry, when its last scrape did
    /// not confirm it empty, or when that confirmation is older than `window`.
    pub fn stale_course_ids(
        &self,
        term: Term,
        now: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<Vec<String>, StoreError> {
        let db = self.conn()?;
        let cutoff = now - window;

        // last_seen is compared as TEXT; every write stores chrono's UTC `%F %T%.f%:z`
        let mut stmt = db.prepare(
            "SELECT DISTINCT c.course_id
             FROM courses c
             LEFT JOIN course_section_cache cache
                    ON cache.course_id = c.course_id AND cache.term = c.term
             WHERE c.term = ?1
               AND (cache.course_id IS NULL
                    OR cache.has_section != 0
                    OR cache.last_seen < ?2)
             ORDER BY c.course_id",
        )?;

        let ids = stmt
            .query_map(params![term, cutoff], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        Ok(ids)
    }

    /// Overwrites the cache entry for `(course_id, term)`
    pub fn upsert_section_cache(&self, entry: &SectionCacheEntry) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO course_section_cache (course_id, term, last_seen, has_section, last_fetch_succeeded)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (course_id, term)
             DO UPDATE SET last_seen            = excluded.last_seen,
                           has_section          = excluded.has_section,
                           last_fetch_succeeded = excluded.last_fetch_succeeded",
            params![
                entry.course_id,
                entry.term,
                entry.last_seen,
                entry.has_section,
                entry.last_fetch_succeeded,
            ],
        )?;
        Ok(())
    }

    pub fn section_cache_entry(
        &self,
        term: Term,
        course_id: &str,
    ) -> Result<Option<SectionCacheEntry>, StoreError> {
        let db = self.conn()?;
        let entry = db
            .query_row(
                "SELECT course_id, term, last_seen, has_section, last_fetch_succeeded
                 FROM course_section_cache
                 WHERE term = ?1 AND course_id = ?2",
                params![term, course_id],
                |row| {
                    Ok(SectionCacheEntry {
                        course_id: row.get(0)?,
                        term: row.get(1)?,
                        last_seen: row.get(2)?,
                        has_section: row.get(3)?,
                        last_fetch_succeeded: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    /// Writes one section, overwriting every mutable field of an existing row
    ///
    /// `last_updated` never moves backwards.
    pub fn upsert_section(&self, section: &SectionRecord) -> Result<(), StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare_cached(&format!(
            "INSERT INTO course_sections ({SECTION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT (course_id, section_num, term)
             DO UPDATE SET
                section_type        = excluded.section_type,
                subject_id          = excluded.subject_id,
                course_name         = excluded.course_name,
                course_title        = excluded.course_title,
                capacity            = excluded.capacity,
                enrolled            = excluded.enrolled,
                open_seats          = excluded.open_seats,
                waitlist_capacity   = excluded.waitlist_capacity,
                waitlist_open_spots = excluded.waitlist_open_spots,
                prof_name           = excluded.prof_name,
                last_updated        = MAX(course_sections.last_updated, excluded.last_updated)"
        ))?;

        stmt.execute(params![
            section.term,
            section.course_id,
            section.section_num,
            section.section_type,
            section.subject_id,
            section.course_name,
            section.course_title,
            section.capacity,
            section.enrolled,
            section.open_seats,
            section.waitlist_capacity,
            section.waitlist_open_spots,
            section.professor_name,
            section.last_updated,
        ])?;
        Ok(())
    }

    /// Gets all stored sections of a course in a term
    pub fn sections_for_course(
        &self,
        term: Term,
        course_id: &str,
    ) -> Result<Vec<SectionRecord>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {SECTION_COLUMNS}
             FROM course_sections
             WHERE term = ?1 AND course_id = ?2
             ORDER BY section_num"
        ))?;

        let sections = stmt
            .query_map(params![term, course_id], section_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sections)
    }

    /// Returns the user ID for `email`, creating the user if needed
    pub fn upsert_user(&self, email: &str) -> Result<i64, StoreError> {
        let db = self.conn()?;
        let id = db.query_row(
            "INSERT INTO users (email) VALUES (?1)
             ON CONFLICT (email) DO UPDATE SET email = excluded.email
             RETURNING id",
            [email],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Creates an alert, or replaces the kind of the user's existing alert on that section
    pub fn upsert_alert(&self, rule: &AlertRule) -> Result<(), StoreError> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO user_courses (user_id, course_id, section_num, alert_type, seat_threshold)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_id, course_id, section_num)
             DO UPDATE SET alert_type     = excluded.alert_type,
                           seat_threshold = excluded.seat_threshold,
                           created_at     = datetime('now')",
            params![
                rule.user_id,
                rule.course_id,
                rule.section_num,
                rule.kind.type_name(),
                rule.kind.threshold(),
            ],
        )?;
        Ok(())
    }

    pub fn alerts_for_user(&self, user_id: i64) -> Result<Vec<AlertRule>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT user_id, course_id, section_num, alert_type, seat_threshold
             FROM user_courses
             WHERE user_id = ?1
             ORDER BY course_id, section_num",
        )?;

        let rules = stmt
            .query_map([user_id], |row| alert_rule_from_row(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    /// Joins standing alerts with the term's section data
    ///
    /// Every alert whose section has been scraped this term is returned;
    /// whether it fires is decided by [`AlertKind::is_satisfied_by`].
    pub fn alert_candidates(&self, term: Term) -> Result<Vec<AlertCandidate>, StoreError> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT uc.user_id, uc.course_id, uc.section_num, uc.alert_type, uc.seat_threshold,
                    u.email, cs.course_name, cs.open_seats
             FROM user_courses uc
             JOIN users u ON u.id = uc.user_id
             JOIN course_sections cs
                  ON cs.course_id   = uc.course_id
                 AND cs.section_num = uc.section_num
                 AND cs.term        = ?1
             ORDER BY uc.user_id, uc.course_id, uc.section_num",
        )?;

        let candidates = stmt
            .query_map([term], |row| {
                Ok(AlertCandidate {
                    rule: alert_rule_from_row(row, 0)?,
                    email: row.get(5)?,
                    course_name: row.get(6)?,
                    open_seats: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(candidates)
    }

    /// Deletes exactly the given rule, matching on every identifying column
    pub fn delete_alert(&self, rule: &AlertRule) -> Result<usize, StoreError> {
        let db = self.conn()?;
        let deleted = db.execute(
            "DELETE FROM user_courses
             WHERE user_id        = ?1
               AND course_id      = ?2
               AND section_num    = ?3
               AND alert_type     = ?4
               AND seat_threshold IS ?5",
            params![
                rule.user_id,
                rule.course_id,
                rule.section_num,
                rule.kind.type_name(),
                rule.kind.threshold(),
            ],
        )?;
        Ok(deleted)
    }
}

fn section_from_row(row: &Row<'_>) -> rusqlite::Result<SectionRecord> {
    Ok(SectionRecord {
        term: row.get(0)?,
        course_id: row.get(1)?,
        section_num: row.get(2)?,
        section_type: row.get(3)?,
        subject_id: row.get(4)?,
        course_name: row.get(5)?,
        course_title: row.get(6)?,
        capacity: row.get(7)?,
        enrolled: row.get(8)?,
        open_seats: row.get(9)?,
        waitlist_capacity: row.get(10)?,
        waitlist_open_spots: row.get(11)?,
        professor_name: row.get(12)?,
        last_updated: row.get(13)?,
    })
}

/// Reads `user_id, course_id, section_num, alert_type, seat_threshold` starting at `start`
fn alert_rule_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<AlertRule> {
    let alert_type: String = row.get(start + 3)?;
    let seat_threshold: Option<i64> = row.get(start + 4)?;
    let kind = AlertKind::from_parts(&alert_type, seat_threshold).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(start + 3, Type::Text, Box::new(e))
    })?;

    Ok(AlertRule {
        user_id: row.get(start)?,
        course_id: row.get(start + 1)?,
        section_num: row.get(start + 2)?,
        kind,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn term() -> Term {
        "1262".parse().unwrap()
    }

    pub(crate) fn course(course_id: &str, subject_id: &str, name: &str) -> CourseIdentity {
        CourseIdentity {
            course_id: course_id.to_string(),
            subject_id: subject_id.to_string(),
            course_name: name.to_string(),
            course_title: format!("{name} title"),
        }
    }

    pub(crate) fn section(course_id: &str, section_num: &str, open_seats: i64) -> SectionRecord {
        SectionRecord {
            course_id: course_id.to_string(),
            section_num: section_num.to_string(),
            section_type: "LEC".to_string(),
            subject_id: "266".to_string(),
            course_name: "COMP SCI 400".to_string(),
            course_title: "Programming III".to_string(),
            capacity: 100,
            enrolled: 100 - open_seats,
            open_seats,
            waitlist_capacity: 20,
            waitlist_open_spots: 20,
            professor_name: "Ada Lovelace".to_string(),
            term: term(),
            last_updated: Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_upsert_section_overwrites_counts() {
        let db = EnrollDb::open_in_memory().unwrap();

        let first = section("266-024795", "001", 3);
        db.upsert_section(&first).unwrap();

        let second = SectionRecord {
            open_seats: 9,
            last_updated: first.last_updated + TimeDelta::minutes(10),
            ..first.clone()
        };
        db.upsert_section(&second).unwrap();

        let stored = db.sections_for_course(term(), "266-024795").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].open_seats, 9);
        assert_eq!(stored[0].capacity, first.capacity);
        assert_eq!(stored[0].professor_name, first.professor_name);
        assert_eq!(stored[0].last_updated, second.last_updated);
    }

    #[test]
    fn test_last_updated_never_moves_backwards() {
        let db = EnrollDb::open_in_memory().unwrap();
        let newer = section("266-024795", "001", 3);
        let older = SectionRecord {
            open_seats: 1,
            last_updated: newer.last_updated - TimeDelta::hours(1),
            ..newer.clone()
        };

        db.upsert_section(&newer).unwrap();
        db.upsert_section(&older).unwrap();

        let stored = db.sections_for_course(term(), "266-024795").unwrap();
        assert_eq!(stored[0].open_seats, 1);
        assert_eq!(stored[0].last_updated, newer.last_updated);
    }

    #[test]
    fn test_sections_are_partitioned_by_term() {
        let db = EnrollDb::open_in_memory().unwrap();
        let fall = section("266-024795", "001", 3);
        let spring = SectionRecord {
            term: "1264".parse().unwrap(),
            open_seats: 0,
            ..fall.clone()
        };
        db.upsert_section(&fall).unwrap();
        db.upsert_section(&spring).unwrap();

        assert_eq!(db.sections_for_course(term(), "266-024795").unwrap()[0].open_seats, 3);
        assert_eq!(
            db.sections_for_course(spring.term, "266-024795").unwrap()[0].open_seats,
            0
        );
    }

    #[test]
    fn test_course_identities_one_row_per_course() {
        let db = EnrollDb::open_in_memory().unwrap();
        db.upsert_courses(
            term(),
            &[
                course("024795", "266", "COMP SCI 400"),
                course("024795", "268", "E C E 400"),
                course("011234", "600", "MATH 240"),
            ],
        )
        .unwrap();

        let ids = vec!["024795".to_string(), "011234".to_string(), "999999".to_string()];
        let found = db.course_identities(term(), &ids).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].course_id, "011234");
        assert_eq!(found[1].course_id, "024795");
        assert_eq!(found[1].subject_id, "266");
        assert_eq!(found[1].course_name, "COMP SCI 400");
    }

    #[test]
    fn test_upsert_courses_refreshes_names() {
        let db = EnrollDb::open_in_memory().unwrap();
        db.upsert_courses(term(), &[course("024795", "266", "COMP SCI 400")]).unwrap();
        db.upsert_courses(term(), &[course("024795", "266", "COMP SCI 400X")]).unwrap();

        let found = db.course_identities(term(), &["024795".to_string()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].course_name, "COMP SCI 400X");
    }

    #[test]
    fn test_section_cache_is_overwritten() {
        let db = EnrollDb::open_in_memory().unwrap();
        let seen = Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap();

        let mut entry = SectionCacheEntry {
            course_id: "024795".to_string(),
            term: term(),
            last_seen: seen,
            has_section: false,
            last_fetch_succeeded: false,
        };
        db.upsert_section_cache(&entry).unwrap();

        entry.has_section = true;
        entry.last_fetch_succeeded = true;
        entry.last_seen = seen + TimeDelta::hours(2);
        db.upsert_section_cache(&entry).unwrap();

        let stored = db.section_cache_entry(term(), "024795").unwrap().unwrap();
        assert_eq!(stored, entry);
    }

    #[test]
    fn test_delete_alert_matches_full_identity() {
        let db = EnrollDb::open_in_memory().unwrap();
        let alice = db.upsert_user("alice@wisc.edu").unwrap();
        let bob = db.upsert_user("bob@wisc.edu").unwrap();

        let alice_rule = AlertRule {
            user_id: alice,
            course_id: "024795".to_string(),
            section_num: "001".to_string(),
            kind: AlertKind::AtLeast(5),
        };
        let bob_rule = AlertRule {
            user_id: bob,
            ..alice_rule.clone()
        };
        db.upsert_alert(&alice_rule).unwrap();
        db.upsert_alert(&bob_rule).unwrap();

        // a stale view of alice's rule with another threshold must not delete it
        let stale = AlertRule {
            kind: AlertKind::AtLeast(2),
            ..alice_rule.clone()
        };
        assert_eq!(db.delete_alert(&stale).unwrap(), 0);

        assert_eq!(db.delete_alert(&alice_rule).unwrap(), 1);
        assert!(db.alerts_for_user(alice).unwrap().is_empty());
        assert_eq!(db.alerts_for_user(bob).unwrap(), vec![bob_rule]);
    }

    #[test]
    fn test_delete_any_alert_matches_null_threshold() {
        let db = EnrollDb::open_in_memory().unwrap();
        let user = db.upsert_user("carol@wisc.edu").unwrap();
        let rule = AlertRule {
            user_id: user,
            course_id: "024795".to_string(),
            section_num: "002".to_string(),
            kind: AlertKind::Any,
        };
        db.upsert_alert(&rule).unwrap();

        assert_eq!(db.delete_alert(&rule).unwrap(), 1);
    }

    #[test]
    fn test_upsert_user_is_idempotent() {
        let db = EnrollDb::open_in_memory().unwrap();
        let first = db.upsert_user("dave@wisc.edu").unwrap();
        let second = db.upsert_user("dave@wisc.edu").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_schema_rejects_threshold_on_any() {
        let db = EnrollDb::open_in_memory().unwrap();
        let user = db.upsert_user("erin@wisc.edu").unwrap();
        let conn = db.conn().unwrap();
        let result = conn.execute(
            "INSERT INTO user_courses (user_id, course_id, section_num, alert_type, seat_threshold)
             VALUES (?1, '024795', '001', 'any', 3)",
            [user],
        );
        assert!(result.is_err());
    }
}
