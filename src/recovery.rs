//! Best-effort recovery of generated solutions from free text
//!
//! The solution generator is asked for a JSON object but does not always
//! return one cleanly: the object may be wrapped in a fenced block, the code
//! field may itself be fenced, or the reply may use labeled sections
//! (`CODE:`, `EXPLANATION:`, `EXAMPLE OUTPUT:`). This adapter turns such text
//! into a `SolutionCandidate` or fails with `InvalidInput`. It never invents
//! code, and nothing downstream of it parses text.

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::solution::SolutionCandidate;

const FENCED_JSON: &str = r"(?s)```(?:json)?\s*(\{.*\})\s*```";
const FENCED_CODE: &str = r"(?s)```[\w+#-]*[ \t]*\r?\n?(.*?)\s*```";
const LABELED_CODE: &str = r"(?s)CODE:\s*```[\w+#-]*[ \t]*\r?\n?(.*?)\s*```";
const LABELED_EXPLANATION: &str = r"(?s)EXPLANATION:\s*(.*?)\s*(?:KEY CONCEPTS:|EXAMPLE OUTPUT:|$)";
const LABELED_OUTPUT: &str = r"(?s)EXAMPLE OUTPUT:\s*(.*?)\s*$";

#[derive(Debug, Deserialize)]
struct RawSolution {
    code: String,
    #[serde(default, alias = "example_output", alias = "output")]
    expected_output: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

fn pattern(source: &str) -> HarnessResult<Regex> {
    Regex::new(source).map_err(|e| HarnessError::Config(format!("bad recovery pattern: {}", e)))
}

/// Parse a generator reply into a solution candidate
pub fn recover_solution(text: &str) -> HarnessResult<SolutionCandidate> {
    let text = text.trim();
    if text.is_empty() {
        return Err(HarnessError::InvalidInput("empty generator reply".into()));
    }

    if let Some(json) = extract_json_object(text)? {
        match serde_json::from_str::<RawSolution>(json) {
            Ok(raw) => return candidate_from_raw(raw),
            Err(e) => debug!("Reply is not a solution object ({}), trying labeled sections", e),
        }
    }

    recover_labeled(text)
}

/// JSON object text, unwrapped from a fenced block if present
pub fn extract_json_object(text: &str) -> HarnessResult<Option<&str>> {
    if let Some(caps) = pattern(FENCED_JSON)?.captures(text) {
        return Ok(caps.get(1).map(|m| m.as_str()));
    }
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Ok(Some(trimmed));
    }
    Ok(None)
}

/// Inner code of the first fenced block, or the trimmed text when unfenced
pub fn strip_code_fence(code: &str) -> HarnessResult<String> {
    let stripped = match pattern(FENCED_CODE)?.captures(code) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => code.trim(),
    };
    Ok(stripped.to_string())
}

fn candidate_from_raw(raw: RawSolution) -> HarnessResult<SolutionCandidate> {
    let code = strip_code_fence(&raw.code)?;
    if code.trim().is_empty() {
        return Err(HarnessError::InvalidInput("solution object has empty code".into()));
    }
    Ok(SolutionCandidate {
        code: with_trailing_newline(code),
        expected_output: non_empty(raw.expected_output),
        explanation: non_empty(raw.explanation),
    })
}

fn recover_labeled(text: &str) -> HarnessResult<SolutionCandidate> {
    let code = pattern(LABELED_CODE)?
        .captures(text)
        .or(pattern(FENCED_CODE)?.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| HarnessError::InvalidInput("no code block found in generator reply".into()))?;

    let section = |source: &str| -> HarnessResult<Option<String>> {
        Ok(pattern(source)?
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string()))
    };

    Ok(SolutionCandidate {
        code: with_trailing_newline(code),
        expected_output: non_empty(section(LABELED_OUTPUT)?),
        explanation: non_empty(section(LABELED_EXPLANATION)?),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn with_trailing_newline(mut code: String) -> String {
    if !code.ends_with('\n') {
        code.push('\n');
    }
    code
}
