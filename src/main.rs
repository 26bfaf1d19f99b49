mod classroom;
mod config;
mod engine;
mod error;
mod languages;
mod pipeline;
mod recovery;
mod report;
mod runner;
mod solution;
mod storage;
mod submission;
mod workspace;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::classroom::ClassroomClient;
use crate::config::HarnessConfig;
use crate::engine::ExecutionEngine;
use crate::languages::LanguageTable;
use crate::pipeline::{Pipeline, SubmissionTarget};
use crate::runner::LocalRunner;
use crate::solution::{AssignmentBundle, SourceUnit};
use crate::storage::StorageClient;
use crate::submission::SubmissionTracker;

#[derive(Parser)]
#[command(name = "assignment-runner")]
#[command(about = "Execute generated assignment solutions, build the report and turn it in", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported languages and their aliases
    Languages,

    /// Compile and run a single source file
    Run {
        /// Declared language (name or alias)
        #[arg(short, long)]
        language: String,

        /// Source file to execute
        file: PathBuf,
    },

    /// Execute every problem of a bundle and write the report
    Report {
        /// Assignment bundle (JSON)
        #[arg(short, long)]
        bundle: PathBuf,

        #[arg(short, long, default_value = "./solutions")]
        output_dir: PathBuf,
    },

    /// Show whether an assignment still needs a submission
    Status {
        #[arg(long)]
        course_id: String,

        #[arg(long)]
        coursework_id: String,
    },

    /// List the courses the token's user belongs to
    Courses,

    /// List coursework of a course
    List {
        #[arg(long)]
        course_id: String,

        /// Only coursework updated within this many hours
        #[arg(long)]
        since_hours: Option<u64>,

        /// Only coursework that looks like a programming task
        #[arg(long, default_value = "false")]
        coding_only: bool,
    },

    /// Recover a solution from a raw generator reply
    Recover {
        /// Text file holding the reply
        file: PathBuf,
    },

    /// Execute, report, upload and turn in one assignment
    Submit {
        #[arg(short, long)]
        bundle: PathBuf,

        #[arg(long)]
        course_id: String,

        #[arg(long)]
        coursework_id: String,

        #[arg(short, long, default_value = "./solutions")]
        output_dir: PathBuf,

        /// Submit even when the work is already turned in or returned
        #[arg(long, default_value = "false")]
        no_skip_submitted: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("assignment_runner=info".parse()?);
    if cli.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    dotenvy::dotenv().ok();

    let config = HarnessConfig::from_env()?;
    let languages = Arc::new(load_languages(&config)?);

    match cli.command {
        Commands::Languages => {
            for (name, aliases) in languages.supported_languages() {
                let kind = match languages.resolve(name) {
                    Ok(recipe) if recipe.is_compiled() => "compiled",
                    _ => "interpreted",
                };
                if aliases.is_empty() {
                    println!("{}\t{}", name, kind);
                } else {
                    println!("{}\t{}\t{}", name, kind, aliases.join(", "));
                }
            }
        }
        Commands::Run { language, file } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let identifier = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "source".to_string());

            let engine = build_engine(&config, languages);
            let result = engine
                .execute(&SourceUnit::new(identifier, language, body))
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Report { bundle, output_dir } => {
            let bundle = load_bundle(&bundle)?;
            let pipeline = Pipeline::new(build_engine(&config, languages), config.report.clone(), output_dir);
            pipeline.report(&bundle).await?;
        }
        Commands::Status {
            course_id,
            coursework_id,
        } => {
            let tracker = SubmissionTracker::new(
                Arc::new(ClassroomClient::new(&config.classroom)?),
                config.skip_submitted,
            );
            let decision = tracker.should_submit(&course_id, &coursework_id).await?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Commands::Courses => {
            let client = ClassroomClient::new(&config.classroom)?;
            let courses = client.list_courses().await?;
            if courses.is_empty() {
                println!("No courses found.");
            }
            for course in courses {
                println!(
                    "{}\t{}\t{}\t{}",
                    course.id,
                    course.course_state.as_deref().unwrap_or("-"),
                    course.section.as_deref().unwrap_or("-"),
                    course.name
                );
            }
        }
        Commands::List {
            course_id,
            since_hours,
            coding_only,
        } => {
            let client = ClassroomClient::new(&config.classroom)?;
            let mut coursework = client.list_coursework(&course_id).await?;
            if let Some(hours) = since_hours {
                coursework = classroom::updated_within(coursework, hours, chrono::Utc::now());
            }
            let coursework: Vec<&classroom::Coursework> = if coding_only {
                classroom::detect_coding_assignments(&coursework)
            } else {
                coursework.iter().collect()
            };
            if coursework.is_empty() {
                println!("No coursework found.");
            }
            for cw in coursework {
                let due = cw
                    .due_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "no due date".to_string());
                println!(
                    "{}\t{}\t{}\t{}",
                    cw.id,
                    cw.state.as_deref().unwrap_or("-"),
                    due,
                    cw.title
                );
            }
        }
        Commands::Recover { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let solution = recovery::recover_solution(&text)?;
            println!("{}", serde_json::to_string_pretty(&solution)?);
        }
        Commands::Submit {
            bundle,
            course_id,
            coursework_id,
            output_dir,
            no_skip_submitted,
        } => {
            let bundle = load_bundle(&bundle)?;
            let tracker = SubmissionTracker::new(
                Arc::new(ClassroomClient::new(&config.classroom)?),
                config.skip_submitted && !no_skip_submitted,
            );
            let store = StorageClient::new(&config.storage);
            let pipeline = Pipeline::new(build_engine(&config, languages), config.report.clone(), output_dir);
            let target = SubmissionTarget {
                course_id,
                assignment_id: coursework_id,
            };

            let summary = pipeline.submit(&bundle, &target, &tracker, &store).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn load_languages(config: &HarnessConfig) -> Result<LanguageTable> {
    let table = match &config.languages_path {
        Some(path) => {
            let table = LanguageTable::from_file(path)?;
            info!("Loaded language configurations from {}", path.display());
            table
        }
        None => LanguageTable::builtin()?,
    };
    Ok(table)
}

fn build_engine(config: &HarnessConfig, languages: Arc<LanguageTable>) -> ExecutionEngine {
    ExecutionEngine::new(languages, Arc::new(LocalRunner::new()), config.engine.clone())
}

fn load_bundle(path: &Path) -> Result<AssignmentBundle> {
    let bundle = AssignmentBundle::from_file(path)?;
    info!(
        "Loaded '{}' with {} problems ({})",
        bundle.title,
        bundle.problems.len(),
        bundle.language
    );
    Ok(bundle)
}
