//! Submission state tracking
//!
//! Decides whether an assignment still needs a deliverable and performs the
//! attach + turn-in actions. The remote classroom is the only writer of
//! submission state; this module only reads it.
//!
//! The check and the later attach/turn-in are not atomic. Another client can
//! turn the work in between the two; a turn-in failure caused by that is
//! logged and reported, never retried.
//!
//! When the remote returns more than one record for the actor, the last one
//! is used (the most recently returned), not the first. A warning is logged.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Remote lifecycle state of a student submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
    New,
    Created,
    TurnedIn,
    Returned,
    #[serde(alias = "RECLAIMED")]
    ReclaimedByStudent,
    #[serde(other)]
    Unspecified,
}

impl SubmissionState {
    /// Work has been handed in (and possibly graded)
    pub fn is_submitted(&self) -> bool {
        matches!(self, SubmissionState::TurnedIn | SubmissionState::Returned)
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionState::New => "NEW",
            SubmissionState::Created => "CREATED",
            SubmissionState::TurnedIn => "TURNED_IN",
            SubmissionState::Returned => "RETURNED",
            SubmissionState::ReclaimedByStudent => "RECLAIMED_BY_STUDENT",
            SubmissionState::Unspecified => "SUBMISSION_STATE_UNSPECIFIED",
        };
        write!(f, "{}", s)
    }
}

/// Local read-only mirror of a remote submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    #[serde(rename = "id")]
    pub submission_id: String,
    #[serde(default = "default_state")]
    pub state: SubmissionState,
}

fn default_state() -> SubmissionState {
    SubmissionState::Unspecified
}

/// Reference to an uploaded artifact, as returned by artifact storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    /// Storage key of the artifact
    pub key: String,
    /// Location the classroom attachment points at
    pub url: String,
    pub title: String,
}

/// Remote classroom operations consumed by the tracker
#[async_trait]
pub trait ClassroomApi: Send + Sync {
    /// Submissions of the current actor for one assignment, in remote order
    async fn list_submissions(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<SubmissionRecord>>;

    async fn attach_file(
        &self,
        course_id: &str,
        assignment_id: &str,
        submission_id: &str,
        file: &FileReference,
    ) -> Result<()>;

    async fn turn_in(&self, course_id: &str, assignment_id: &str, submission_id: &str) -> Result<()>;
}

/// Outcome of `should_submit`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionDecision {
    pub proceed: bool,
    pub submission_id: Option<String>,
    /// State of the authoritative record, if one exists
    pub state: Option<SubmissionState>,
}

/// Outcome of the attach + turn-in action
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    TurnedIn,
    /// Decision said not to proceed; nothing was sent
    Skipped,
    AttachFailed(String),
    TurnInFailed(String),
}

pub struct SubmissionTracker {
    api: Arc<dyn ClassroomApi>,
    skip_if_submitted: bool,
}

impl SubmissionTracker {
    pub fn new(api: Arc<dyn ClassroomApi>, skip_if_submitted: bool) -> Self {
        Self {
            api,
            skip_if_submitted,
        }
    }

    /// Decide whether new work should be attached to this assignment
    pub async fn should_submit(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<SubmissionDecision> {
        let records = self.api.list_submissions(course_id, assignment_id).await?;

        // Last record wins, not the first
        let Some(record) = records.last() else {
            warn!(
                "No submission record for course={} assignment={}",
                course_id, assignment_id
            );
            return Ok(SubmissionDecision {
                proceed: false,
                submission_id: None,
                state: None,
            });
        };

        if records.len() > 1 {
            warn!(
                "{} submission records for assignment {}, using {}",
                records.len(),
                assignment_id,
                record.submission_id
            );
        }

        let proceed = !(self.skip_if_submitted && record.state.is_submitted());
        info!(
            "Submission {} is {} (proceed={})",
            record.submission_id, record.state, proceed
        );

        Ok(SubmissionDecision {
            proceed,
            submission_id: Some(record.submission_id.clone()),
            state: Some(record.state),
        })
    }

    /// Attach the artifact and turn the submission in, once.
    ///
    /// Failures are reported, not retried: repeating a turn-in is only safe
    /// after re-checking state.
    pub async fn submit(
        &self,
        course_id: &str,
        assignment_id: &str,
        decision: &SubmissionDecision,
        file: &FileReference,
    ) -> SubmitOutcome {
        let submission_id = match (&decision.submission_id, decision.proceed) {
            (Some(id), true) => id,
            _ => return SubmitOutcome::Skipped,
        };

        if let Err(e) = self
            .api
            .attach_file(course_id, assignment_id, submission_id, file)
            .await
        {
            error!("Failed to attach {} to {}: {:#}", file.key, submission_id, e);
            return SubmitOutcome::AttachFailed(format!("{:#}", e));
        }
        info!("Attached {} to submission {}", file.key, submission_id);

        if let Err(e) = self
            .api
            .turn_in(course_id, assignment_id, submission_id)
            .await
        {
            error!("Failed to turn in {}: {:#}", submission_id, e);
            return SubmitOutcome::TurnInFailed(format!("{:#}", e));
        }
        info!("Turned in submission {}", submission_id);

        SubmitOutcome::TurnedIn
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory classroom recording every write
    #[derive(Default)]
    pub(crate) struct FakeClassroom {
        pub records: Vec<SubmissionRecord>,
        pub fail_attach: bool,
        pub fail_turn_in: bool,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeClassroom {
        pub(crate) fn with_records(records: Vec<SubmissionRecord>) -> Self {
            Self {
                records,
                ..Default::default()
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ClassroomApi for FakeClassroom {
        async fn list_submissions(&self, _: &str, _: &str) -> Result<Vec<SubmissionRecord>> {
            self.calls.lock().unwrap().push("list".into());
            Ok(self.records.clone())
        }

        async fn attach_file(
            &self,
            _: &str,
            _: &str,
            submission_id: &str,
            file: &FileReference,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("attach {} {}", submission_id, file.key));
            if self.fail_attach {
                anyhow::bail!("attach rejected");
            }
            Ok(())
        }

        async fn turn_in(&self, _: &str, _: &str, submission_id: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("turn_in {}", submission_id));
            if self.fail_turn_in {
                anyhow::bail!("FAILED_PRECONDITION: already turned in");
            }
            Ok(())
        }
    }

    pub(crate) fn record(id: &str, state: SubmissionState) -> SubmissionRecord {
        SubmissionRecord {
            submission_id: id.into(),
            state,
        }
    }

    fn file() -> FileReference {
        FileReference {
            key: "reports/abc.md".into(),
            url: "http://minio/reports/abc.md".into(),
            title: "Lab_SOLUTION.md".into(),
        }
    }

    #[tokio::test]
    async fn test_turned_in_is_skipped() {
        let api = Arc::new(FakeClassroom::with_records(vec![record(
            "s1",
            SubmissionState::TurnedIn,
        )]));
        let tracker = SubmissionTracker::new(api, true);

        let decision = tracker.should_submit("c", "a").await.unwrap();
        assert!(!decision.proceed);
        assert_eq!(decision.submission_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn test_returned_is_skipped_but_reclaimed_proceeds() {
        let tracker = SubmissionTracker::new(
            Arc::new(FakeClassroom::with_records(vec![record(
                "s1",
                SubmissionState::Returned,
            )])),
            true,
        );
        assert!(!tracker.should_submit("c", "a").await.unwrap().proceed);

        let tracker = SubmissionTracker::new(
            Arc::new(FakeClassroom::with_records(vec![record(
                "s1",
                SubmissionState::ReclaimedByStudent,
            )])),
            true,
        );
        assert!(tracker.should_submit("c", "a").await.unwrap().proceed);
    }

    #[tokio::test]
    async fn test_turned_in_proceeds_without_skip_flag() {
        let tracker = SubmissionTracker::new(
            Arc::new(FakeClassroom::with_records(vec![record(
                "s1",
                SubmissionState::TurnedIn,
            )])),
            false,
        );
        let decision = tracker.should_submit("c", "a").await.unwrap();
        assert!(decision.proceed);
    }

    #[tokio::test]
    async fn test_no_records_never_fabricates_id() {
        let tracker = SubmissionTracker::new(Arc::new(FakeClassroom::default()), true);
        let decision = tracker.should_submit("c", "a").await.unwrap();
        assert!(!decision.proceed);
        assert_eq!(decision.submission_id, None);
        assert_eq!(decision.state, None);
    }

    #[tokio::test]
    async fn test_last_record_is_authoritative() {
        let tracker = SubmissionTracker::new(
            Arc::new(FakeClassroom::with_records(vec![
                record("old", SubmissionState::TurnedIn),
                record("new", SubmissionState::Created),
            ])),
            true,
        );
        let decision = tracker.should_submit("c", "a").await.unwrap();
        assert!(decision.proceed);
        assert_eq!(decision.submission_id.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_submit_attaches_then_turns_in() {
        let api = Arc::new(FakeClassroom::with_records(vec![record(
            "s9",
            SubmissionState::Created,
        )]));
        let tracker = SubmissionTracker::new(api.clone(), true);
        let decision = tracker.should_submit("c", "a").await.unwrap();

        let outcome = tracker.submit("c", "a", &decision, &file()).await;
        assert_eq!(outcome, SubmitOutcome::TurnedIn);
        assert_eq!(
            api.calls(),
            vec!["list", "attach s9 reports/abc.md", "turn_in s9"]
        );
    }

    #[tokio::test]
    async fn test_turn_in_failure_is_reported_once() {
        let api = Arc::new(FakeClassroom {
            records: vec![record("s9", SubmissionState::New)],
            fail_turn_in: true,
            ..Default::default()
        });
        let tracker = SubmissionTracker::new(api.clone(), true);
        let decision = tracker.should_submit("c", "a").await.unwrap();

        let outcome = tracker.submit("c", "a", &decision, &file()).await;
        assert!(matches!(outcome, SubmitOutcome::TurnInFailed(msg) if msg.contains("already turned in")));
        let turn_ins = api.calls().iter().filter(|c| c.starts_with("turn_in")).count();
        assert_eq!(turn_ins, 1);
    }

    #[tokio::test]
    async fn test_attach_failure_skips_turn_in() {
        let api = Arc::new(FakeClassroom {
            records: vec![record("s9", SubmissionState::New)],
            fail_attach: true,
            ..Default::default()
        });
        let tracker = SubmissionTracker::new(api.clone(), true);
        let decision = tracker.should_submit("c", "a").await.unwrap();

        let outcome = tracker.submit("c", "a", &decision, &file()).await;
        assert!(matches!(outcome, SubmitOutcome::AttachFailed(_)));
        assert!(!api.calls().iter().any(|c| c.starts_with("turn_in")));
    }

    #[tokio::test]
    async fn test_submit_skipped_when_not_proceeding() {
        let api = Arc::new(FakeClassroom::default());
        let tracker = SubmissionTracker::new(api.clone(), true);
        let decision = tracker.should_submit("c", "a").await.unwrap();

        assert_eq!(
            tracker.submit("c", "a", &decision, &file()).await,
            SubmitOutcome::Skipped
        );
        assert_eq!(api.calls(), vec!["list"]);
    }

    #[test]
    fn test_state_deserializes_remote_names() {
        let r: SubmissionRecord =
            serde_json::from_str(r#"{"id":"x","state":"RECLAIMED_BY_STUDENT"}"#).unwrap();
        assert_eq!(r.state, SubmissionState::ReclaimedByStudent);

        let r: SubmissionRecord = serde_json::from_str(r#"{"id":"x","state":"RECLAIMED"}"#).unwrap();
        assert_eq!(r.state, SubmissionState::ReclaimedByStudent);

        let r: SubmissionRecord = serde_json::from_str(r#"{"id":"x","state":"SOMETHING_NEW"}"#).unwrap();
        assert_eq!(r.state, SubmissionState::Unspecified);

        let r: SubmissionRecord = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert_eq!(r.state, SubmissionState::Unspecified);
    }
}
