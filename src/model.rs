use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// One graded course as reported by the portal.
///
/// `grade` stays a string because the portal mixes letter grades, numeric
/// scores and pass/fail marks in the same field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub course_name: String,
    pub grade: String,
    pub gpa: f64,
    pub credit: f64,
    pub term: String,
}

impl Course {
    pub fn key(&self) -> CourseKey {
        CourseKey {
            course_name: self.course_name.clone(),
            term: self.term.clone(),
        }
    }
}

/// Identity of a course across runs. Name plus term, so a course retaken in
/// a later term counts as a separate record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CourseKey {
    pub course_name: String,
    pub term: String,
}

impl Display for CourseKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.course_name, self.term)
    }
}

pub type CourseMap = BTreeMap<CourseKey, Course>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    New,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseChange {
    pub course: Course,
    pub kind: ChangeKind,
}

/// Compare a freshly fetched course list against the stored snapshot.
///
/// A fetched record lands in the delta when its identity is unknown, or when
/// the stored record differs in any field. Records identical to their stored
/// copy are skipped. Output order follows fetch order.
pub fn compute_delta(fetched: &[Course], stored: &CourseMap) -> Vec<CourseChange> {
    let mut changes = Vec::new();
    for course in fetched {
        match stored.get(&course.key()) {
            None => changes.push(CourseChange {
                course: course.clone(),
                kind: ChangeKind::New,
            }),
            Some(previous) if previous != course => changes.push(CourseChange {
                course: course.clone(),
                kind: ChangeKind::Updated,
            }),
            Some(_) => {}
        }
    }
    changes
}

/// Returns the first identity that appears twice in a fetched snapshot.
/// The portal reports one row per course per term; a duplicate means the
/// response was misparsed and the snapshot cannot be trusted.
pub fn find_duplicate(fetched: &[Course]) -> Option<CourseKey> {
    let mut seen = BTreeSet::new();
    for course in fetched {
        let key = course.key();
        if !seen.insert(key.clone()) {
            return Some(key);
        }
    }
    None
}
