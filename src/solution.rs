//! Problems, generated solutions and the units handed to the execution engine
//!
//! These types are the boundary with the extraction and generation
//! collaborators. Their output arrives as a structured `AssignmentBundle`;
//! the only structural check applied here is that the problem list is
//! non-empty.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{HarnessError, HarnessResult};

/// One problem extracted from the assignment text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub number: u32,
    #[serde(default)]
    pub title: Option<String>,
    pub statement: String,
    #[serde(default)]
    pub constraints: Option<String>,
}

/// Structured output of the solution generator for one problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionCandidate {
    /// Source code of the solution
    pub code: String,
    /// Output the model claims the program prints; shown when execution fails
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Candidate source for execution. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    /// Stable identity used to associate the result with its problem
    pub identifier: String,
    /// Declared language name as given by the collaborator (resolved later)
    pub language: String,
    pub body: String,
}

impl SourceUnit {
    pub fn new(
        identifier: impl Into<String>,
        language: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            language: language.into(),
            body: body.into(),
        }
    }
}

/// One problem paired with its generated solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvedProblem {
    #[serde(flatten)]
    pub problem: Problem,
    pub solution: SolutionCandidate,
    /// Per-problem language override
    #[serde(default)]
    pub language: Option<String>,
}

/// Everything the external collaborators produced for one assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentBundle {
    pub title: String,
    /// Default language for every problem
    pub language: String,
    pub problems: Vec<SolvedProblem>,
}

impl AssignmentBundle {
    pub fn from_json(content: &str) -> HarnessResult<Self> {
        let bundle: Self = serde_json::from_str(content)
            .map_err(|e| HarnessError::InvalidInput(format!("malformed assignment bundle: {}", e)))?;
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn from_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::filesystem(format!("reading {}", path.display()), e))?;
        Self::from_json(&content)
    }

    /// Problem list must be non-empty; nothing else is re-validated
    pub fn validate(&self) -> HarnessResult<()> {
        if self.problems.is_empty() {
            return Err(HarnessError::InvalidInput(format!(
                "assignment '{}' contains no problems",
                self.title
            )));
        }
        Ok(())
    }

    /// Source units in problem order, one per problem
    pub fn source_units(&self) -> Vec<SourceUnit> {
        self.problems
            .iter()
            .map(|p| {
                SourceUnit::new(
                    format!("problem-{}", p.problem.number),
                    p.language.as_deref().unwrap_or(&self.language),
                    p.solution.code.clone(),
                )
            })
            .collect()
    }
}
