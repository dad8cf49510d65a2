//! Wire types of the public enrollment search API.

use crate::types::{CourseIdentity, SectionRecord, Term};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One enrollment package (a combination of lecture and companion sections).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EnrollmentPackage {
    #[serde(default)]
    pub sections: Vec<ApiSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSection {
    pub catalog_number: String,
    pub section_number: String,
    #[serde(rename = "type")]
    pub section_type: String,
    pub subject: ApiSubject,
    pub instructor: Option<ApiInstructor>,
    pub enrollment_status: ApiEnrollmentStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSubject {
    pub short_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiInstructor {
    pub name: ApiName,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiName {
    pub first: Option<String>,
    pub last: Option<String>,
}

/// Seat counters. Counters the API leaves out are read as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiEnrollmentStatus {
    pub capacity: Option<i64>,
    pub currently_enrolled: Option<i64>,
    pub open_seats: Option<i64>,
    pub open_waitlist_spots: Option<i64>,
    pub aggregate_waitlist_capacity: Option<i64>,
}

impl ApiSection {
    /// Instructor display name, `"first last"`, empty when unassigned
    pub fn professor_name(&self) -> String {
        let Some(instructor) = &self.instructor else {
            return String::new();
        };
        let first = instructor.name.first.as_deref().unwrap_or_default();
        let last = instructor.name.last.as_deref().unwrap_or_default();
        format!("{first} {last}").trim().to_string()
    }

    /// Converts the wire section into a record of `course` for `term`.
    ///
    /// Identity fields come from the stored course rather than the payload, so
    /// a cross-listed section is always filed under the subject it was
    /// requested with.
    pub fn to_record(
        &self,
        term: Term,
        course: &CourseIdentity,
        fetched_at: DateTime<Utc>,
    ) -> SectionRecord {
        let status = &self.enrollment_status;
        let course_name = if course.course_name.is_empty() {
            format!("{} {}", self.subject.short_description, self.catalog_number)
                .trim()
                .to_string()
        } else {
            course.course_name.clone()
        };

        SectionRecord {
            course_id: course.course_id.clone(),
            section_num: self.section_number.clone(),
            section_type: self.section_type.clone(),
            subject_id: course.subject_id.clone(),
            course_name,
            course_title: course.course_title.clone(),
            capacity: status.capacity.unwrap_or(0),
            enrolled: status.currently_enrolled.unwrap_or(0),
            open_seats: status.open_seats.unwrap_or(0),
            waitlist_capacity: status.aggregate_waitlist_capacity.unwrap_or(0),
            waitlist_open_spots: status.open_waitlist_spots.unwrap_or(0),
            professor_name: self.professor_name(),
            term,
            last_updated: fetched_at,
        }
    }
}

/// Flattens the packages of one course into section records.
///
/// A section shared by several packages appears once per package here;
/// collapsing those repeats is the writer's job.
pub fn section_records(
    term: Term,
    course: &CourseIdentity,
    packages: &[EnrollmentPackage],
    fetched_at: DateTime<Utc>,
) -> Vec<SectionRecord> {
    packages
        .iter()
        .flat_map(|p| p.sections.iter())
        .map(|s| s.to_record(term, course, fetched_at))
        .collect()
}

/// Request body of the bulk course search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub selected_term: String,
    pub query_string: String,
    pub page: u32,
    pub page_size: usize,
    pub sort_order: String,
    pub filters: Vec<serde_json::Value>,
}

impl SearchRequest {
    /// All courses of `term` that have at least one enrollment package
    pub fn courses_with_packages(term: Term, page_size: usize) -> Self {
        Self {
            selected_term: term.to_string(),
            query_string: "*".to_string(),
            page: 1,
            page_size,
            sort_order: "SCORE".to_string(),
            filters: vec![serde_json::json!({
                "has_child": {
                    "type": "enrollmentPackage",
                    "query": { "match_all": {} }
                }
            })],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchResponse {
    pub hits: Vec<CourseHit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourseHit {
    pub course_id: String,
    pub subject: HitSubject,
    pub catalog_number: String,
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HitSubject {
    pub subject_code: String,
    pub short_description: String,
}

impl From<CourseHit> for CourseIdentity {
    fn from(hit: CourseHit) -> Self {
        CourseIdentity {
            course_name: format!("{} {}", hit.subject.short_description, hit.catalog_number)
                .trim()
                .to_string(),
            course_id: hit.course_id,
            subject_id: hit.subject.subject_code,
            course_title: hit.title,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const PACKAGES: &str = r#"[
        {
            "id": "pkg-1",
            "sections": [
                {
                    "courseId": "024795",
                    "catalogNumber": "400",
                    "sectionNumber": "001",
                    "type": "LEC",
                    "subject": { "subjectCode": "266", "shortDescription": "COMP SCI" },
                    "instructor": { "name": { "first": "Ada", "last": "Lovelace" } },
                    "enrollmentStatus": {
                        "capacity": 120,
                        "currentlyEnrolled": 117,
                        "openSeats": 3,
                        "openWaitlistSpots": 10,
                        "aggregateWaitlistCapacity": 10
                    }
                },
                {
                    "courseId": "024795",
                    "catalogNumber": "400",
                    "sectionNumber": "311",
                    "type": "DIS",
                    "subject": { "subjectCode": "266", "shortDescription": "COMP SCI" },
                    "instructor": null,
                    "enrollmentStatus": { "capacity": 30, "currentlyEnrolled": 30 }
                }
            ]
        }
    ]"#;

    fn course() -> CourseIdentity {
        CourseIdentity {
            course_id: "024795".to_string(),
            subject_id: "266".to_string(),
            course_name: "COMP SCI 400".to_string(),
            course_title: "Programming III".to_string(),
        }
    }

    #[test]
    fn test_parse_packages_into_records() {
        let packages: Vec<EnrollmentPackage> = serde_json::from_str(PACKAGES).unwrap();
        let fetched_at = Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap();
        let term: Term = "1262".parse().unwrap();

        let records = section_records(term, &course(), &packages, fetched_at);
        assert_eq!(records.len(), 2);

        let lecture = &records[0];
        assert_eq!(lecture.section_num, "001");
        assert_eq!(lecture.open_seats, 3);
        assert_eq!(lecture.enrolled, 117);
        assert_eq!(lecture.waitlist_capacity, 10);
        assert_eq!(lecture.professor_name, "Ada Lovelace");
        assert_eq!(lecture.course_title, "Programming III");

        let discussion = &records[1];
        assert_eq!(discussion.section_type, "DIS");
        assert_eq!(discussion.open_seats, 0);
        assert_eq!(discussion.waitlist_open_spots, 0);
        assert_eq!(discussion.professor_name, "");
    }

    #[test]
    fn test_professor_name_with_missing_first_name() {
        let section = ApiSection {
            instructor: Some(ApiInstructor {
                name: ApiName {
                    first: None,
                    last: Some("Hopper".to_string()),
                },
            }),
            ..ApiSection::default()
        };
        assert_eq!(section.professor_name(), "Hopper");
    }

    #[test]
    fn test_search_request_shape() {
        let term: Term = "1262".parse().unwrap();
        let body = serde_json::to_value(SearchRequest::courses_with_packages(term, 50)).unwrap();
        assert_eq!(body["selectedTerm"], "1262");
        assert_eq!(body["pageSize"], 50);
        assert_eq!(body["filters"][0]["has_child"]["type"], "enrollmentPackage");
    }

    #[test]
    fn test_hit_becomes_course_identity() {
        let hit: CourseHit = serde_json::from_str(
            r#"{
                "courseId": "024795",
                "catalogNumber": "400",
                "title": "Programming III",
                "subject": { "subjectCode": "266", "shortDescription": "COMP SCI" }
            }"#,
        )
        .unwrap();

        let identity = CourseIdentity::from(hit);
        assert_eq!(identity.course_name, "COMP SCI 400");
        assert_eq!(identity.subject_id, "266");
    }
}
