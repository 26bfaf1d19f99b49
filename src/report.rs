//! Report assembly and rendering
//!
//! A report has one page per problem, in input order. Every problem gets a
//! section: the captured output when execution succeeded, otherwise a
//! labeled fallback. Truncation happens only while rendering and is always
//! marked.

use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::engine::ExecutionResult;
use crate::error::{HarnessError, HarnessResult};
use crate::solution::{Problem, SolutionCandidate};
use crate::storage::{sha256_hex, Artifact};

/// Separates pages in the rendered document
pub const PAGE_BREAK: &str = "\u{000C}\n";

const REPORT_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";

/// Rendering bounds for oversized content
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLimits {
    pub max_source_lines: usize,
    pub max_output_chars: usize,
    pub max_line_width: usize,
}

impl Default for ReportLimits {
    fn default() -> Self {
        Self {
            max_source_lines: 50,
            max_output_chars: 1000,
            max_line_width: 120,
        }
    }
}

/// One (problem, solution, result) tuple to assemble
#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub problem: Problem,
    pub solution: SolutionCandidate,
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSection {
    pub problem: Problem,
    pub source: String,
    pub explanation: Option<String>,
    pub result: ExecutionResult,
    /// Model-declared output shown when execution did not succeed
    pub fallback_output: Option<String>,
}

impl ReportSection {
    pub fn uses_fallback(&self) -> bool {
        !self.result.succeeded
    }
}

/// Immutable report built once from an ordered list of entries
#[derive(Debug, Clone)]
pub struct ReportDocument {
    pub title: String,
    pub language: String,
    pub sections: Vec<ReportSection>,
    /// The only non-deterministic part of the document
    pub generated_at: DateTime<Utc>,
}

/// Fold ordered entries into a document; section order equals input order
pub fn assemble(title: &str, language: &str, entries: Vec<ReportEntry>) -> ReportDocument {
    let sections = entries
        .into_iter()
        .map(|entry| ReportSection {
            problem: entry.problem,
            source: entry.solution.code,
            explanation: entry.solution.explanation,
            fallback_output: entry.solution.expected_output,
            result: entry.result,
        })
        .collect();

    ReportDocument {
        title: title.to_string(),
        language: language.to_string(),
        sections,
        generated_at: Utc::now(),
    }
}

impl ReportDocument {
    /// `<title with spaces replaced>_SOLUTION.md`, restricted to safe characters
    pub fn file_name(&self) -> String {
        let stem: String = self
            .title
            .trim()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let stem = if stem.is_empty() { "assignment".to_string() } else { stem };
        format!("{}_SOLUTION.md", stem)
    }

    /// Full document: header page with the timestamp, then the body
    pub fn render(&self, limits: &ReportLimits) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}", self.title);
        let _ = writeln!(out);
        let _ = writeln!(out, "SOLUTIONS");
        let _ = writeln!(out);
        let _ = writeln!(out, "- Language: {}", self.language.to_uppercase());
        let _ = writeln!(out, "- Total Questions: {}", self.sections.len());
        let _ = writeln!(out, "- Generated: {}", self.generated_at.format("%Y-%m-%d %H:%M UTC"));
        out.push_str(PAGE_BREAK);
        out.push_str(&self.render_body(limits));
        out
    }

    /// Deterministic part: identical input yields identical bytes
    pub fn render_body(&self, limits: &ReportLimits) -> String {
        self.sections
            .iter()
            .map(|section| render_section(section, limits))
            .collect::<Vec<_>>()
            .join(PAGE_BREAK)
    }

    /// Digest of the deterministic body, stable across runs
    pub fn content_digest(&self, limits: &ReportLimits) -> String {
        sha256_hex(self.render_body(limits).as_bytes())
    }

    pub fn to_artifact(&self, limits: &ReportLimits) -> Artifact {
        Artifact::new(
            self.file_name(),
            self.render(limits).into_bytes(),
            REPORT_CONTENT_TYPE,
            self.content_digest(limits),
        )
    }

    /// Write the rendered report into `dir`, creating it if needed
    pub fn write_to(&self, dir: &Path, limits: &ReportLimits) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(dir)
            .map_err(|e| HarnessError::filesystem(format!("creating {}", dir.display()), e))?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, self.render(limits))
            .map_err(|e| HarnessError::filesystem(format!("writing {}", path.display()), e))?;
        info!("Report written to {}", path.display());
        Ok(path)
    }
}

fn render_section(section: &ReportSection, limits: &ReportLimits) -> String {
    let mut out = String::new();
    let problem = &section.problem;

    match &problem.title {
        Some(title) => {
            let _ = writeln!(out, "## Question {}: {}", problem.number, title);
        }
        None => {
            let _ = writeln!(out, "## Question {}", problem.number);
        }
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "**Problem:** {}", problem.statement.trim());
    if let Some(constraints) = &problem.constraints {
        let _ = writeln!(out);
        let _ = writeln!(out, "**Constraints:** {}", constraints.trim());
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "### Solution Code");
    let _ = writeln!(out);
    out.push_str(&fenced(&truncate_source(&section.source, limits), &section.result.language));

    let result = &section.result;
    let _ = writeln!(out);
    if !section.uses_fallback() {
        let _ = writeln!(out, "### Output");
        let _ = writeln!(out);
        if result.stdout.is_empty() {
            let _ = writeln!(out, "_(program printed nothing)_");
        } else {
            out.push_str(&fenced(&truncate_output(&result.stdout, limits), "text"));
        }
    } else {
        let _ = writeln!(out, "### Output (fallback)");
        let _ = writeln!(out);
        let stage = result
            .stage
            .map(|s| s.to_string())
            .unwrap_or_else(|| "none".to_string());
        let _ = writeln!(
            out,
            "> Execution did not succeed ({}; stage: {}).",
            result.summary(),
            stage
        );
        let _ = writeln!(out);
        match &section.fallback_output {
            Some(expected) => {
                let _ = writeln!(out, "Expected output declared by the solution generator (not verified by execution):");
                let _ = writeln!(out);
                out.push_str(&fenced(&truncate_output(expected, limits), "text"));
            }
            None => {
                let _ = writeln!(out, "_No expected output was declared for this problem._");
            }
        }
        if !result.stdout.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Captured stdout:");
            let _ = writeln!(out);
            out.push_str(&fenced(&truncate_output(&result.stdout, limits), "text"));
        }
        if !result.stderr.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Diagnostics:");
            let _ = writeln!(out);
            out.push_str(&fenced(&truncate_output(&result.stderr, limits), "text"));
        }
    }

    if let Some(explanation) = &section.explanation {
        let _ = writeln!(out);
        let _ = writeln!(out, "### Explanation");
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", explanation.trim());
    }

    out
}

/// Limit source to `max_source_lines` lines of at most `max_line_width` characters
fn truncate_source(source: &str, limits: &ReportLimits) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let mut out = String::new();

    for line in lines.iter().take(limits.max_source_lines) {
        if line.chars().count() > limits.max_line_width {
            let cut: String = line.chars().take(limits.max_line_width).collect();
            let _ = writeln!(out, "{} [truncated]", cut);
        } else {
            let _ = writeln!(out, "{}", line);
        }
    }

    if lines.len() > limits.max_source_lines {
        let _ = writeln!(
            out,
            "... [truncated: {} more lines]",
            lines.len() - limits.max_source_lines
        );
    }
    out
}

/// Limit output to `max_output_chars` characters
fn truncate_output(output: &str, limits: &ReportLimits) -> String {
    let total = output.chars().count();
    if total <= limits.max_output_chars {
        return output.to_string();
    }
    let mut cut: String = output.chars().take(limits.max_output_chars).collect();
    if !cut.ends_with('\n') {
        cut.push('\n');
    }
    let _ = writeln!(
        cut,
        "... [truncated: {} more characters]",
        total - limits.max_output_chars
    );
    cut
}

/// Fenced block whose fence is longer than any backtick run in the content
fn fenced(content: &str, info: &str) -> String {
    let longest_run = content
        .split(|c| c != '`')
        .map(|run| run.len())
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest_run.max(2) + 1);

    let mut out = format!("{}{}\n{}", fence, info, content);
    if !content.ends_with('\n') {
        out.push('\n');
    }
    let _ = writeln!(out, "{}", fence);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Stage;
    use crate::error::ExecutionFailure;

    fn problem(number: u32, statement: &str) -> Problem {
        Problem {
            number,
            title: None,
            statement: statement.into(),
            constraints: None,
        }
    }

    fn solution(code: &str, expected: Option<&str>) -> SolutionCandidate {
        SolutionCandidate {
            code: code.into(),
            expected_output: expected.map(Into::into),
            explanation: None,
        }
    }

    fn success(id: &str, stdout: &str) -> ExecutionResult {
        ExecutionResult {
            identifier: id.into(),
            language: "python".into(),
            stdout: stdout.into(),
            stderr: String::new(),
            succeeded: true,
            stage: Some(Stage::Run),
            failure: None,
            duration_ms: 12,
        }
    }

    fn timeout(id: &str) -> ExecutionResult {
        ExecutionResult {
            identifier: id.into(),
            language: "python".into(),
            stdout: String::new(),
            stderr: "run timed out after 10s".into(),
            succeeded: false,
            stage: Some(Stage::Run),
            failure: Some(ExecutionFailure::Timeout {
                stage: Stage::Run,
                limit_ms: 10_000,
            }),
            duration_ms: 10_004,
        }
    }

    fn entries() -> Vec<ReportEntry> {
        vec![
            ReportEntry {
                problem: problem(1, "print hello"),
                solution: solution("print(\"hello\")\n", Some("hello")),
                result: success("problem-1", "hello\n"),
            },
            ReportEntry {
                problem: problem(2, "loop forever"),
                solution: solution("while True: pass\n", Some("42")),
                result: timeout("problem-2"),
            },
        ]
    }

    #[test]
    fn test_sections_follow_input_order() {
        let doc = assemble("Lab 3", "python", entries());
        let numbers: Vec<u32> = doc.sections.iter().map(|s| s.problem.number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(doc.sections[0].result.stdout, "hello\n");
    }

    #[test]
    fn test_failed_problem_gets_labeled_fallback() {
        let doc = assemble("Lab 3", "python", entries());
        let body = doc.render_body(&ReportLimits::default());

        assert!(doc.sections[1].uses_fallback());
        assert!(body.contains("## Question 2"));
        assert!(body.contains("### Output (fallback)"));
        assert!(body.contains("run timed out after 10s"));
        assert!(body.contains("not verified by execution"));
        assert!(body.contains("```text\n42\n```"));
    }

    #[test]
    fn test_fallback_without_expected_output_is_declared() {
        let doc = assemble(
            "Lab",
            "python",
            vec![ReportEntry {
                problem: problem(1, "x"),
                solution: solution("oops(", None),
                result: timeout("problem-1"),
            }],
        );
        let body = doc.render_body(&ReportLimits::default());
        assert!(body.contains("No expected output was declared"));
    }

    #[test]
    fn test_one_page_per_problem() {
        let doc = assemble("Lab 3", "python", entries());
        let rendered = doc.render(&ReportLimits::default());
        // header page + 2 sections
        assert_eq!(rendered.matches(PAGE_BREAK).count(), 2);
        assert!(rendered.starts_with("# Lab 3\n"));
    }

    #[test]
    fn test_assembly_is_idempotent_apart_from_timestamp() {
        let limits = ReportLimits::default();
        let a = assemble("Lab 3", "python", entries());
        let b = assemble("Lab 3", "python", entries());

        assert_eq!(a.render_body(&limits), b.render_body(&limits));
        assert_eq!(a.content_digest(&limits), b.content_digest(&limits));

        // only the single Generated line may differ
        let strip = |s: String| -> Vec<String> {
            s.lines()
                .filter(|l| !l.starts_with("- Generated: "))
                .map(str::to_string)
                .collect()
        };
        assert_eq!(strip(a.render(&limits)), strip(b.render(&limits)));
    }

    #[test]
    fn test_long_source_is_truncated_with_label() {
        let limits = ReportLimits {
            max_source_lines: 3,
            max_output_chars: 1000,
            max_line_width: 10,
        };
        let source = "a\nb\n0123456789abcdef\nd\ne\n";
        let out = truncate_source(source, &limits);
        assert_eq!(
            out,
            "a\nb\n0123456789 [truncated]\n... [truncated: 2 more lines]\n"
        );
    }

    #[test]
    fn test_long_output_is_truncated_with_label() {
        let limits = ReportLimits {
            max_output_chars: 5,
            ..Default::default()
        };
        assert_eq!(truncate_output("abc", &limits), "abc");
        assert_eq!(
            truncate_output("abcdefgh", &limits),
            "abcde\n... [truncated: 3 more characters]\n"
        );
    }

    #[test]
    fn test_fence_outgrows_backticks_in_content() {
        let block = fenced("x = \"```\"\n", "python");
        assert!(block.starts_with("````python\n"));
        assert!(block.ends_with("````\n"));
    }

    #[test]
    fn test_file_name_sanitized() {
        let mut doc = assemble("Lab 3: Loops/Arrays", "c", Vec::new());
        assert_eq!(doc.file_name(), "Lab_3__Loops_Arrays_SOLUTION.md");
        doc.title = "   ".into();
        assert_eq!(doc.file_name(), "assignment_SOLUTION.md");
    }

    #[test]
    fn test_write_to_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("solutions");
        let doc = assemble("Lab 3", "python", entries());

        let path = doc.write_to(&out_dir, &ReportLimits::default()).unwrap();
        assert_eq!(path, out_dir.join("Lab_3_SOLUTION.md"));
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("hello"));
    }

    #[test]
    fn test_artifact_digest_ignores_timestamp() {
        let limits = ReportLimits::default();
        let mut a = assemble("Lab", "python", entries());
        let b = a.clone();
        a.generated_at = a.generated_at + chrono::Duration::hours(5);

        assert_ne!(a.render(&limits), b.render(&limits));
        assert_eq!(a.to_artifact(&limits).key(), b.to_artifact(&limits).key());
    }
}
