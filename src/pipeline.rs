//! Assignment pipeline: check → execute → assemble → write → store → submit

use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::engine::{ExecutionEngine, ExecutionResult};
use crate::error::{HarnessError, HarnessResult};
use crate::report::{assemble, ReportDocument, ReportEntry, ReportLimits};
use crate::solution::AssignmentBundle;
use crate::storage::ArtifactStore;
use crate::submission::{FileReference, SubmissionDecision, SubmissionTracker, SubmitOutcome};

/// Remote assignment a report is delivered to
#[derive(Debug, Clone)]
pub struct SubmissionTarget {
    pub course_id: String,
    pub assignment_id: String,
}

/// What one pipeline invocation did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub title: String,
    pub executed: usize,
    pub succeeded: usize,
    pub report_path: Option<PathBuf>,
    pub artifact: Option<FileReference>,
    pub decision: Option<SubmissionDecision>,
    pub turned_in: bool,
    /// Attach or turn-in failure reported by the tracker
    pub submit_error: Option<String>,
}

impl RunSummary {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            executed: 0,
            succeeded: 0,
            report_path: None,
            artifact: None,
            decision: None,
            turned_in: false,
            submit_error: None,
        }
    }

    fn record_results(&mut self, results: &[ExecutionResult]) {
        self.executed = results.len();
        self.succeeded = results.iter().filter(|r| r.succeeded).count();
    }

    pub fn log(&self) {
        info!(
            "Summary for '{}': executed={} succeeded={} report={} turned_in={}",
            self.title,
            self.executed,
            self.succeeded,
            self.report_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.turned_in
        );
        if let Some(err) = &self.submit_error {
            warn!("Submission for '{}' not completed: {}", self.title, err);
        }
    }
}

pub struct Pipeline {
    engine: ExecutionEngine,
    limits: ReportLimits,
    output_dir: PathBuf,
}

impl Pipeline {
    pub fn new(engine: ExecutionEngine, limits: ReportLimits, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            limits,
            output_dir: output_dir.into(),
        }
    }

    /// Execute every problem of the bundle and assemble the report
    pub async fn build_report(
        &self,
        bundle: &AssignmentBundle,
    ) -> HarnessResult<(ReportDocument, Vec<ExecutionResult>)> {
        bundle.validate()?;

        let units = bundle.source_units();
        let results = self.engine.execute_batch(&units).await?;

        let mut entries = Vec::with_capacity(results.len());
        for ((unit, solved), result) in units.iter().zip(&bundle.problems).zip(&results) {
            if unit.identifier != result.identifier {
                return Err(HarnessError::InvalidInput(format!(
                    "result {} does not belong to {}",
                    result.identifier, unit.identifier
                )));
            }
            entries.push(ReportEntry {
                problem: solved.problem.clone(),
                solution: solved.solution.clone(),
                result: result.clone(),
            });
        }

        let document = assemble(&bundle.title, &bundle.language, entries);
        Ok((document, results))
    }

    /// Execute, assemble and write the report locally
    pub async fn report(&self, bundle: &AssignmentBundle) -> HarnessResult<RunSummary> {
        let (document, results) = self.build_report(bundle).await?;
        let path = document.write_to(&self.output_dir, &self.limits)?;

        let mut summary = RunSummary::new(&bundle.title);
        summary.record_results(&results);
        summary.report_path = Some(path);
        summary.log();
        Ok(summary)
    }

    /// Full delivery, gated by the submission tracker.
    ///
    /// Nothing is executed when the tracker says not to proceed.
    pub async fn submit(
        &self,
        bundle: &AssignmentBundle,
        target: &SubmissionTarget,
        tracker: &SubmissionTracker,
        store: &dyn ArtifactStore,
    ) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::new(&bundle.title);

        let decision = tracker
            .should_submit(&target.course_id, &target.assignment_id)
            .await
            .with_context(|| {
                format!(
                    "Failed to read submission state for coursework {}",
                    target.assignment_id
                )
            })?;

        if !decision.proceed {
            info!(
                "Skipping '{}': submission state {}",
                bundle.title,
                decision
                    .state
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "missing".to_string())
            );
            summary.decision = Some(decision);
            summary.log();
            return Ok(summary);
        }

        let (document, results) = self.build_report(bundle).await?;
        summary.record_results(&results);
        summary.report_path = Some(document.write_to(&self.output_dir, &self.limits)?);

        let artifact = document.to_artifact(&self.limits);
        let file = store
            .store(&artifact)
            .await
            .with_context(|| format!("Failed to store {}", artifact.file_name))?;

        match tracker
            .submit(&target.course_id, &target.assignment_id, &decision, &file)
            .await
        {
            SubmitOutcome::TurnedIn => summary.turned_in = true,
            SubmitOutcome::Skipped => {}
            SubmitOutcome::AttachFailed(msg) => {
                summary.submit_error = Some(format!("attach failed: {}", msg))
            }
            SubmitOutcome::TurnInFailed(msg) => {
                summary.submit_error = Some(format!("turn-in failed: {}", msg))
            }
        }

        summary.artifact = Some(file);
        summary.decision = Some(decision);
        summary.log();
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::languages::LanguageTable;
    use crate::runner::LocalRunner;
    use crate::storage::Artifact;
    use crate::submission::tests::{record, FakeClassroom};
    use crate::submission::SubmissionState;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    const SHELL_LANGUAGES: &str = r#"
[shell]
extension = "sh"
run_command = "sh {source}"
run_timeout_secs = 2
"#;

    #[derive(Default)]
    struct MemoryStore {
        stored: Mutex<Vec<Artifact>>,
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn store(&self, artifact: &Artifact) -> anyhow::Result<FileReference> {
            self.stored.lock().unwrap().push(artifact.clone());
            Ok(FileReference {
                key: artifact.key(),
                url: format!("memory://{}", artifact.key()),
                title: artifact.file_name.clone(),
            })
        }
    }

    fn pipeline(languages: &str, root: &Path) -> Pipeline {
        let engine = ExecutionEngine::new(
            Arc::new(LanguageTable::from_toml_str(languages).unwrap()),
            Arc::new(LocalRunner::new()),
            EngineConfig {
                workspace_root: Some(root.join("work")),
                max_parallel: 2,
            },
        );
        Pipeline::new(engine, ReportLimits::default(), root.join("solutions"))
    }

    fn shell_bundle() -> AssignmentBundle {
        AssignmentBundle::from_json(
            r#"{
                "title": "Shell Lab",
                "language": "shell",
                "problems": [
                    {"number": 1, "statement": "greet", "solution": {"code": "echo hi\n"}},
                    {"number": 2, "statement": "fail", "solution": {"code": "exit 4\n", "expected_output": "ok"}}
                ]
            }"#,
        )
        .unwrap()
    }

    fn tracker(api: Arc<FakeClassroom>) -> SubmissionTracker {
        SubmissionTracker::new(api, true)
    }

    fn target() -> SubmissionTarget {
        SubmissionTarget {
            course_id: "c1".into(),
            assignment_id: "a1".into(),
        }
    }

    #[tokio::test]
    async fn test_report_keeps_problem_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        let pipeline = pipeline(SHELL_LANGUAGES, dir.path());

        let (document, results) = tokio_test::assert_ok!(pipeline.build_report(&shell_bundle()).await);
        assert_eq!(results.len(), 2);
        assert_eq!(document.sections.len(), 2);
        assert_eq!(document.sections[0].result.stdout, "hi\n");
        assert!(document.sections[0].result.succeeded);
        assert!(document.sections[1].uses_fallback());
    }

    #[tokio::test]
    async fn test_report_writes_file_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        let pipeline = pipeline(SHELL_LANGUAGES, dir.path());

        let summary = tokio_test::assert_ok!(pipeline.report(&shell_bundle()).await);
        assert_eq!(summary.executed, 2);
        assert_eq!(summary.succeeded, 1);
        let path = summary.report_path.unwrap();
        assert_eq!(path, dir.path().join("solutions/Shell_Lab_SOLUTION.md"));
        assert!(std::fs::read_to_string(path).unwrap().contains("exit 4"));
    }

    #[tokio::test]
    async fn test_submit_turns_in_stored_report() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        let pipeline = pipeline(SHELL_LANGUAGES, dir.path());
        let api = Arc::new(FakeClassroom::with_records(vec![record(
            "s1",
            SubmissionState::Created,
        )]));
        let store = MemoryStore::default();

        let summary = pipeline
            .submit(&shell_bundle(), &target(), &tracker(api.clone()), &store)
            .await
            .unwrap();

        assert!(summary.turned_in);
        assert_eq!(summary.submit_error, None);
        let stored = store.stored.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].file_name, "Shell_Lab_SOLUTION.md");
        assert_eq!(
            api.calls(),
            vec![
                "list".to_string(),
                format!("attach s1 {}", stored[0].key()),
                "turn_in s1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_submitted_assignment_is_not_executed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        let pipeline = pipeline(SHELL_LANGUAGES, dir.path());
        let api = Arc::new(FakeClassroom::with_records(vec![record(
            "s1",
            SubmissionState::TurnedIn,
        )]));
        let store = MemoryStore::default();

        let summary = pipeline
            .submit(&shell_bundle(), &target(), &tracker(api.clone()), &store)
            .await
            .unwrap();

        assert!(!summary.turned_in);
        assert_eq!(summary.executed, 0);
        assert_eq!(summary.report_path, None);
        assert!(store.stored.lock().unwrap().is_empty());
        assert_eq!(api.calls(), vec!["list"]);
    }

    #[tokio::test]
    async fn test_turn_in_failure_lands_in_summary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        let pipeline = pipeline(SHELL_LANGUAGES, dir.path());
        let api = Arc::new(FakeClassroom {
            records: vec![record("s1", SubmissionState::New)],
            fail_turn_in: true,
            ..Default::default()
        });

        let summary = pipeline
            .submit(&shell_bundle(), &target(), &tracker(api), &MemoryStore::default())
            .await
            .unwrap();

        assert!(!summary.turned_in);
        assert!(summary.submit_error.unwrap().starts_with("turn-in failed"));
        assert!(summary.artifact.is_some());
    }

    #[tokio::test]
    async fn test_empty_bundle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(SHELL_LANGUAGES, dir.path());
        let bundle = AssignmentBundle {
            title: "Empty".into(),
            language: "shell".into(),
            problems: Vec::new(),
        };
        let err = tokio_test::assert_err!(pipeline.build_report(&bundle).await);
        assert!(matches!(err, HarnessError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_python_hello_end_to_end() {
        let available = std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        if !available {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("work")).unwrap();
        let engine = ExecutionEngine::new(
            Arc::new(LanguageTable::builtin().unwrap()),
            Arc::new(LocalRunner::new()),
            EngineConfig {
                workspace_root: Some(dir.path().join("work")),
                max_parallel: 1,
            },
        );
        let pipeline = Pipeline::new(engine, ReportLimits::default(), dir.path().join("out"));
        let bundle =
            AssignmentBundle::from_json(include_str!("../test-codes/hello_bundle.json")).unwrap();

        let (document, results) = pipeline.build_report(&bundle).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].succeeded);
        assert_eq!(results[0].stdout, "hello\n");
        assert_eq!(document.sections.len(), 1);
        assert_eq!(document.sections[0].result.stdout, "hello\n");
        assert!(document
            .render_body(&ReportLimits::default())
            .contains("```text\nhello\n```"));
    }
}
