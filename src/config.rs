//! Harness configuration
//!
//! Loaded from environment variables (after `.env`), every value with a
//! default. The resulting struct is passed to constructors explicitly.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use tracing::warn;

use crate::engine::EngineConfig;
use crate::report::ReportLimits;

const DEFAULT_CLASSROOM_API_BASE: &str = "https://classroom.googleapis.com/v1";

/// MinIO/S3 connection settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub port: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub use_ssl: bool,
    /// Base URL the attachment link points at (defaults to the endpoint)
    pub public_url: Option<String>,
}

/// Classroom REST settings
#[derive(Debug, Clone)]
pub struct ClassroomConfig {
    pub api_base: String,
    /// OAuth access token obtained by the (external) authentication step
    pub access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Language table overriding the built-in one
    pub languages_path: Option<PathBuf>,
    pub engine: EngineConfig,
    pub skip_submitted: bool,
    pub report: ReportLimits,
    pub classroom: ClassroomConfig,
    pub storage: StorageConfig,
}

impl HarnessConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment in production)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let defaults = ReportLimits::default();
        let report = ReportLimits {
            max_source_lines: parse_or(&lookup, "REPORT_MAX_SOURCE_LINES", defaults.max_source_lines)?,
            max_output_chars: parse_or(&lookup, "REPORT_MAX_OUTPUT_CHARS", defaults.max_output_chars)?,
            max_line_width: parse_or(&lookup, "REPORT_MAX_LINE_WIDTH", defaults.max_line_width)?,
        };

        let mut max_parallel: usize = parse_or(&lookup, "MAX_PARALLEL_EXECUTIONS", 1)?;
        if max_parallel == 0 {
            warn!("MAX_PARALLEL_EXECUTIONS=0 is invalid, using 1");
            max_parallel = 1;
        }

        Ok(Self {
            languages_path: lookup("LANGUAGES_CONFIG").map(PathBuf::from),
            engine: EngineConfig {
                workspace_root: lookup("WORKSPACE_ROOT").map(PathBuf::from),
                max_parallel,
            },
            skip_submitted: parse_bool(lookup("SKIP_SUBMITTED").as_deref(), true),
            report,
            classroom: ClassroomConfig {
                api_base: var("CLASSROOM_API_BASE", DEFAULT_CLASSROOM_API_BASE)
                    .trim_end_matches('/')
                    .to_string(),
                access_token: lookup("CLASSROOM_ACCESS_TOKEN").filter(|t| !t.is_empty()),
            },
            storage: StorageConfig {
                endpoint: var("MINIO_ENDPOINT", "localhost"),
                port: var("MINIO_PORT", "9000"),
                access_key: var("MINIO_ACCESS_KEY", "minioadmin"),
                secret_key: var("MINIO_SECRET_KEY", "minioadmin"),
                bucket: var("MINIO_BUCKET", "assignment-reports"),
                use_ssl: parse_bool(lookup("MINIO_USE_SSL").as_deref(), false),
                public_url: lookup("MINIO_PUBLIC_URL"),
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        None => Ok(default),
    }
}

fn parse_bool(raw: Option<&str>, default: bool) -> bool {
    match raw {
        Some(v) => v == "true" || v == "1",
        None => default,
    }
}
