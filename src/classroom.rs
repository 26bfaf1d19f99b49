//! Google Classroom REST client

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use tracing::debug;

use crate::config::ClassroomConfig;
use crate::submission::{ClassroomApi, FileReference, SubmissionRecord};

/// Words that mark an assignment as programming work
const ASSIGNMENT_KEYWORDS: &[&str] = &[
    "assignment",
    "homework",
    "coding",
    "program",
    "exercise",
    "problem",
    "question",
];

/// Language names matched as whole words in title or description
const CODING_LANGUAGES: &[&str] = &["python", "java", "c++", "cpp", "c", "javascript", "js"];

/// Upper bound for `updated_within` windows, one century
const MAX_WINDOW_HOURS: i64 = 24 * 365 * 100;

/// Calendar date as the Classroom API returns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl fmt::Display for DueDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// One assignment of a course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coursework {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub due_date: Option<DueDate>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
}

/// A course the current user belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub course_state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoursePage {
    #[serde(default)]
    courses: Vec<Course>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CourseworkPage {
    #[serde(default)]
    course_work: Vec<Coursework>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionPage {
    #[serde(default)]
    student_submissions: Vec<SubmissionRecord>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Clone)]
pub struct ClassroomClient {
    http: Client,
    api_base: String,
    access_token: String,
}

impl ClassroomClient {
    pub fn new(config: &ClassroomConfig) -> Result<Self> {
        let access_token = config
            .access_token
            .clone()
            .context("CLASSROOM_ACCESS_TOKEN is not set")?;

        Ok(Self {
            http: Client::new(),
            api_base: config.api_base.clone(),
            access_token,
        })
    }

    fn submissions_url(&self, course_id: &str, assignment_id: &str) -> String {
        format!(
            "{}/courses/{}/courseWork/{}/studentSubmissions",
            self.api_base, course_id, assignment_id
        )
    }

    /// Courses visible to the token's user, across all pages
    pub async fn list_courses(&self) -> Result<Vec<Course>> {
        let url = format!("{}/courses", self.api_base);
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", "100".to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: CoursePage = self.get_json(&url, &query).await?;
            items.extend(page.courses);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Fetched {} courses", items.len());
        Ok(items)
    }

    /// Coursework of a course, newest first, across all pages
    pub async fn list_coursework(&self, course_id: &str) -> Result<Vec<Coursework>> {
        let url = format!("{}/courses/{}/courseWork", self.api_base, course_id);
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("pageSize", "100".to_string()),
                ("orderBy", "updateTime desc".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: CourseworkPage = self.get_json(&url, &query).await?;
            items.extend(page.course_work);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Fetched {} coursework items for course {}", items.len(), course_id);
        Ok(items)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        check_status(response, url)
            .await?
            .json()
            .await
            .with_context(|| format!("Invalid response body from {}", url))
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<()> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_status(response, url).await?;
        Ok(())
    }
}

/// Keep coursework updated within the last `hours` before `now`.
///
/// Items without an update time are dropped.
pub fn updated_within(items: Vec<Coursework>, hours: u64, now: DateTime<Utc>) -> Vec<Coursework> {
    let hours = i64::try_from(hours).unwrap_or(i64::MAX).min(MAX_WINDOW_HOURS);
    let cutoff = now - Duration::hours(hours);
    items
        .into_iter()
        .filter(|cw| cw.update_time.is_some_and(|t| t > cutoff))
        .collect()
}

/// Coursework whose title or description looks like a programming task
pub fn detect_coding_assignments(items: &[Coursework]) -> Vec<&Coursework> {
    items.iter().filter(|cw| looks_like_coding(cw)).collect()
}

fn looks_like_coding(cw: &Coursework) -> bool {
    let text = format!(
        "{} {}",
        cw.title,
        cw.description.as_deref().unwrap_or_default()
    )
    .to_lowercase();

    if ASSIGNMENT_KEYWORDS.iter().any(|k| text.contains(k)) {
        return true;
    }
    text.split(|c: char| !(c.is_alphanumeric() || c == '+'))
        .any(|word| CODING_LANGUAGES.contains(&word))
}

async fn check_status(response: Response, url: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("{} returned {}: {}", url, status, body.trim());
}

/// Request body adding one link attachment to a submission
fn attachment_body(file: &FileReference) -> serde_json::Value {
    json!({
        "addAttachments": [
            { "link": { "url": file.url } }
        ]
    })
}

#[async_trait]
impl ClassroomApi for ClassroomClient {
    async fn list_submissions(
        &self,
        course_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<SubmissionRecord>> {
        let url = self.submissions_url(course_id, assignment_id);
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("userId", "me".to_string())];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }
            let page: SubmissionPage = self.get_json(&url, &query).await?;
            records.extend(page.student_submissions);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn attach_file(
        &self,
        course_id: &str,
        assignment_id: &str,
        submission_id: &str,
        file: &FileReference,
    ) -> Result<()> {
        let url = format!(
            "{}/{}:modifyAttachments",
            self.submissions_url(course_id, assignment_id),
            submission_id
        );
        self.post_json(&url, &attachment_body(file)).await
    }

    async fn turn_in(&self, course_id: &str, assignment_id: &str, submission_id: &str) -> Result<()> {
        let url = format!(
            "{}/{}:turnIn",
            self.submissions_url(course_id, assignment_id),
            submission_id
        );
        self.post_json(&url, &json!({})).await
    }
}
