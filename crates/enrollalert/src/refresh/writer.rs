use crate::db::EnrollDb;
use crate::error::StoreError;
use crate::types::{SectionKey, SectionRecord};
use std::collections::HashSet;
use tracing::debug;

/// Upserts sections, writing each `(course_id, section_num)` at most once per cycle.
///
/// The first record seen for a key wins; later duplicates are skipped without
/// touching the store. One writer is used for a whole refresh cycle so the set
/// spans all batches.
#[derive(Debug, Default)]
pub struct DedupWriter {
    inserted: HashSet<SectionKey>,
    skipped: usize,
}

impl DedupWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `section` unless its key was already written this cycle.
    ///
    /// Returns whether a write was issued. Rows committed before an error stay
    /// committed.
    pub fn write(&mut self, db: &EnrollDb, section: &SectionRecord) -> Result<bool, StoreError> {
        let key = section.key();
        if self.inserted.contains(&key) {
            debug!(section = %key, "Skipping duplicate section");
            self.skipped += 1;
            return Ok(false);
        }

        db.upsert_section(section)?;
        self.inserted.insert(key);
        Ok(true)
    }

    pub fn write_all<'a, I>(&mut self, db: &EnrollDb, sections: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = &'a SectionRecord>,
    {
        let mut written = 0;
        for section in sections {
            if self.write(db, section)? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Number of distinct sections written so far
    pub fn written(&self) -> usize {
        self.inserted.len()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::section;

    #[test]
    fn test_duplicate_key_first_seen_wins() {
        let db = EnrollDb::open_in_memory().unwrap();
        let first = section("266-024795", "001", 4);
        let second = SectionRecord {
            open_seats: 11,
            ..first.clone()
        };

        let mut writer = DedupWriter::new();
        let written = writer.write_all(&db, [&first, &second]).unwrap();

        assert_eq!(written, 1);
        assert_eq!(writer.skipped(), 1);
        let stored = db.sections_for_course(first.term, "266-024795").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].open_seats, 4);
    }

    #[test]
    fn test_distinct_sections_all_written() {
        let db = EnrollDb::open_in_memory().unwrap();
        let sections = [
            section("266-024795", "001", 4),
            section("266-024795", "002", 0),
            section("266-024795", "311", 2),
        ];

        let mut writer = DedupWriter::new();
        assert_eq!(writer.write_all(&db, &sections).unwrap(), 3);
        assert_eq!(writer.written(), 3);
        assert_eq!(db.sections_for_course(sections[0].term, "266-024795").unwrap().len(), 3);
    }

    #[test]
    fn test_new_writer_writes_key_again() {
        let db = EnrollDb::open_in_memory().unwrap();
        let first = section("266-024795", "001", 4);
        let next_cycle = SectionRecord {
            open_seats: 9,
            ..first.clone()
        };

        DedupWriter::new().write(&db, &first).unwrap();
        assert!(DedupWriter::new().write(&db, &next_cycle).unwrap());

        let stored = db.sections_for_course(first.term, "266-024795").unwrap();
        assert_eq!(stored[0].open_seats, 9);
    }
}
