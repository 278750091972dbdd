use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Course, CourseMap};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed serializing state: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Snapshot of tracked courses backed by a single JSON document, grouped
/// by term and then course name.
///
/// Saves replace the whole file through a temp-file rename, so an
/// interrupted run leaves either the old snapshot or the new one, never a
/// torn file. Load-then-save is not transactional against concurrent
/// writers; run one watcher per state file.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the stored snapshot. `Ok(None)` means no state file exists yet,
    /// which callers treat as a first run. A file that exists but does not
    /// parse is an error, never an empty map, so a damaged file cannot make
    /// every historical grade look new again.
    pub fn load(&self) -> Result<Option<CourseMap>, StateError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source: err,
                })
            }
        };
        let document: BTreeMap<String, BTreeMap<String, Course>> =
            serde_json::from_str(&raw).map_err(|source| StateError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        let mut courses = CourseMap::new();
        for term_records in document.into_values() {
            for course in term_records.into_values() {
                courses.insert(course.key(), course);
            }
        }
        debug!(path = %self.path.display(), courses = courses.len(), "loaded state");
        Ok(Some(courses))
    }

    /// Replace the stored snapshot with `courses`.
    ///
    /// Records nest under their term and course name; identity never has to
    /// be rendered into a single string, so names and terms may contain any
    /// text. Serializes to a sibling `.tmp` file and renames it over the
    /// target; a failure partway leaves the previous snapshot intact.
    pub fn save(&self, courses: &CourseMap) -> Result<(), StateError> {
        let mut document: BTreeMap<&str, BTreeMap<&str, &Course>> = BTreeMap::new();
        for course in courses.values() {
            document
                .entry(course.term.as_str())
                .or_default()
                .insert(course.course_name.as_str(), course);
        }
        let serialized = serde_json::to_string_pretty(&document).map_err(StateError::Serialize)?;

        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, serialized).map_err(|source| StateError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        if let Err(source) = fs::rename(&tmp_path, &self.path) {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                warn!(path = %tmp_path.display(), error = %cleanup, "failed removing temp state file");
            }
            return Err(StateError::Io {
                path: self.path.clone(),
                source,
            });
        }
        debug!(path = %self.path.display(), courses = courses.len(), "saved state");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Course;
    use tempfile::TempDir;

    fn course(name: &str, grade: &str, term: &str) -> Course {
        Course {
            course_name: name.to_string(),
            grade: grade.to_string(),
            gpa: 4.0,
            credit: 3.0,
            term: term.to_string(),
        }
    }

    fn map_of(courses: &[Course]) -> CourseMap {
        courses.iter().map(|c| (c.key(), c.clone())).collect()
    }

    #[test]
    fn absent_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn saved_snapshot_loads_back_identical() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let map = map_of(&[
            course("Algorithms", "A", "24-25-1"),
            course("Compilers", "B+", "24-25-2"),
        ]);
        store.save(&map).unwrap();
        let loaded = store.load().unwrap().expect("state file missing");
        assert_eq!(loaded, map);
    }

    #[test]
    fn identities_with_overlapping_text_stay_distinct() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        // Name/term pairs that read the same when run together.
        let map = map_of(&[
            course("Algo::Lab", "A", "24-25-1"),
            course("Algo", "B", "Lab::24-25-1"),
        ]);
        store.save(&map).unwrap();
        let loaded = store.load().unwrap().expect("state file missing");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded, map);
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(path.clone());
        store.save(&map_of(&[course("Algorithms", "A", "24-25-1")])).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error_and_left_in_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not valid json").unwrap();
        let store = StateStore::new(path.clone());
        let err = store.load().unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not valid json");
    }

    #[test]
    fn save_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("missing").join("state.json"));
        let err = store
            .save(&map_of(&[course("Algorithms", "A", "24-25-1")]))
            .unwrap_err();
        assert!(matches!(err, StateError::Io { .. }));
    }

    #[test]
    fn failed_save_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(path.clone());
        let original = map_of(&[course("Algorithms", "A", "24-25-1")]);
        store.save(&original).unwrap();

        // Block the temp path so the next save cannot write.
        fs::create_dir(dir.path().join("state.json.tmp")).unwrap();
        let err = store
            .save(&map_of(&[course("Compilers", "A", "24-25-2")]))
            .unwrap_err();
        assert!(matches!(err, StateError::Io { .. }));
        assert_eq!(store.load().unwrap().unwrap(), original);
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        store.save(&map_of(&[course("Algorithms", "B", "24-25-1")])).unwrap();
        let replacement = map_of(&[
            course("Algorithms", "A", "24-25-1"),
            course("Compilers", "A", "24-25-2"),
        ]);
        store.save(&replacement).unwrap();
        assert_eq!(store.load().unwrap().unwrap(), replacement);
    }
}
