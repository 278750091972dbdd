use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{compute_delta, find_duplicate, ChangeKind, CourseChange};
use crate::notify::Notifier;
use crate::portal::{GradeSource, SourceError};
use crate::store::{StateError, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Fetch,
    LoadState,
    SaveState,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("fetching grades failed: {0}")]
    Fetch(#[source] SourceError),
    #[error("loading stored state failed: {0}")]
    LoadState(#[source] StateError),
    #[error("saving state failed: {0}")]
    SaveState(#[source] StateError),
}

impl RunError {
    pub fn stage(&self) -> RunStage {
        match self {
            RunError::Fetch(_) => RunStage::Fetch,
            RunError::LoadState(_) => RunStage::LoadState,
            RunError::SaveState(_) => RunStage::SaveState,
        }
    }
}

/// Outcome of one completed cycle. Notification failures live here, not in
/// the error channel; an undeliverable change does not make the run fail.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub fetched: usize,
    pub changes: Vec<CourseChange>,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub tracked_after: usize,
    pub first_run: bool,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new_count(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| c.kind == ChangeKind::New)
            .count()
    }

    pub fn updated_count(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| c.kind == ChangeKind::Updated)
            .count()
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Drives one fetch, diff, notify, persist cycle over a grade source.
pub struct GradeWatcher {
    source: Box<dyn GradeSource>,
    store: StateStore,
    notifier: Option<Box<dyn Notifier>>,
    quiet_first_run: bool,
}

impl GradeWatcher {
    pub fn new(
        source: Box<dyn GradeSource>,
        store: StateStore,
        notifier: Option<Box<dyn Notifier>>,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
            quiet_first_run: false,
        }
    }

    /// When set, a run that finds no state file sends one summary message
    /// instead of a notification per already-graded course.
    pub fn with_quiet_first_run(mut self, quiet: bool) -> Self {
        self.quiet_first_run = quiet;
        self
    }

    /// Run one cycle.
    ///
    /// Fetch, load and save failures abort it with the failed stage
    /// attached and the stored snapshot untouched. Courses that vanish
    /// from the portal are kept; the snapshot only ever grows or updates.
    pub async fn run_once(&self) -> Result<RunReport, RunError> {
        let fetched = self.source.fetch_courses().await.map_err(RunError::Fetch)?;
        if let Some(key) = find_duplicate(&fetched) {
            return Err(RunError::Fetch(SourceError::DuplicateCourse(
                key.to_string(),
            )));
        }
        if fetched.is_empty() {
            warn!("portal returned no graded courses");
        }

        let stored = self.store.load().map_err(RunError::LoadState)?;
        let first_run = stored.is_none();
        let mut merged = stored.unwrap_or_default();

        let changes = compute_delta(&fetched, &merged);
        let (sent, failed) = self.notify_changes(&changes, first_run).await;

        for course in &fetched {
            merged.insert(course.key(), course.clone());
        }
        self.store.save(&merged).map_err(RunError::SaveState)?;

        let report = RunReport {
            fetched: fetched.len(),
            changes,
            notifications_sent: sent,
            notifications_failed: failed,
            tracked_after: merged.len(),
            first_run,
            finished_at: Utc::now(),
        };
        info!(
            fetched = report.fetched,
            new = report.new_count(),
            updated = report.updated_count(),
            sent = report.notifications_sent,
            failed = report.notifications_failed,
            tracked = report.tracked_after,
            "run finished"
        );
        Ok(report)
    }

    async fn notify_changes(&self, changes: &[CourseChange], first_run: bool) -> (usize, usize) {
        let Some(notifier) = &self.notifier else {
            if !changes.is_empty() {
                debug!(changes = changes.len(), "no notifier configured, changes recorded only");
            }
            return (0, 0);
        };
        if changes.is_empty() {
            return (0, 0);
        }
        if first_run && self.quiet_first_run {
            let body = format!("Now tracking {} graded courses.", changes.len());
            return if notifier.send("Grade tracking initialized", &body, None).await {
                (1, 0)
            } else {
                (0, 1)
            };
        }

        let mut sent = 0;
        let mut failed = 0;
        for change in changes {
            let (title, body) = notification_text(change);
            if notifier.send(&title, &body, Some(&change.course)).await {
                sent += 1;
            } else {
                warn!(course = %change.course.key(), "change notification not delivered");
                failed += 1;
            }
        }
        (sent, failed)
    }
}

fn notification_text(change: &CourseChange) -> (String, String) {
    let course = &change.course;
    let title = match change.kind {
        ChangeKind::New => format!("New grade: {}", course.course_name),
        ChangeKind::Updated => format!("Grade updated: {}", course.course_name),
    };
    let body = format!(
        "{} [{}]\nGrade: {}\nGPA: {}\nCredit: {}",
        course.course_name, course.term, course.grade, course.gpa, course.credit
    );
    (title, body)
}
