//! Language adapter table for compilation and execution

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use serde::Deserialize;

use crate::error::ExecutionFailure;

const BUILTIN_LANGUAGES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));

const DEFAULT_STEM: &str = "solution";
const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 10;

/// Build/run recipe for one supported language
#[derive(Debug, Clone)]
pub struct LanguageRecipe {
    /// Canonical language name (table key)
    pub name: String,
    /// Source file extension without the dot (e.g., "cpp")
    pub file_extension: String,
    /// Compile command template (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Run command template
    pub run_command: Vec<String>,
    pub compile_timeout: Duration,
    pub run_timeout: Duration,
    /// Address-space limit for the run stage in MB
    pub memory_limit_mb: Option<u64>,
    /// Required top-level symbol that names the source file (e.g. Java's public class)
    entry_point: Option<Regex>,
    /// Namespace declaration that qualifies the entry point (e.g. Java's package)
    package: Option<Regex>,
    default_stem: String,
}

impl LanguageRecipe {
    pub fn is_compiled(&self) -> bool {
        self.compile_command.is_some()
    }

    /// Base name of the source file for the given body.
    ///
    /// Languages with an entry-point pattern use the first captured identifier,
    /// falling back to the default stem when the body declares none.
    pub fn source_stem(&self, body: &str) -> String {
        self.entry_point
            .as_ref()
            .and_then(|re| re.captures(body))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| self.default_stem.clone())
    }

    /// Name the run command starts: the stem, qualified by the declared package if any
    pub fn qualified_entry(&self, body: &str, stem: &str) -> String {
        let package = self
            .package
            .as_ref()
            .and_then(|re| re.captures(body))
            .and_then(|caps| caps.get(1));
        match package {
            Some(pkg) => format!("{}.{}", pkg.as_str(), stem),
            None => stem.to_string(),
        }
    }

    pub fn source_file_name(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.file_extension)
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLanguageConfig {
    extension: String,
    compile_command: Option<String>,
    run_command: String,
    compile_timeout_secs: Option<u64>,
    run_timeout_secs: Option<u64>,
    memory_limit_mb: Option<u64>,
    entry_point_pattern: Option<String>,
    package_pattern: Option<String>,
    default_stem: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Read-only lookup table from language names and aliases to recipes.
///
/// Built once at startup and shared behind an `Arc`; nothing mutates it afterwards.
#[derive(Debug, Clone)]
pub struct LanguageTable {
    recipes: HashMap<String, Arc<LanguageRecipe>>,
    /// canonical name -> aliases, for listing
    aliases: BTreeMap<String, Vec<String>>,
}

impl LanguageTable {
    /// Load the table embedded in the binary
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml_str(BUILTIN_LANGUAGES).context("Invalid built-in language table")
    }

    /// Load a table from a TOML file on disk
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read language table {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid language table {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw_configs: BTreeMap<String, RawLanguageConfig> = toml::from_str(content)?;

        let mut recipes = HashMap::new();
        let mut aliases = BTreeMap::new();

        for (name, raw) in raw_configs {
            let run_command = into_command(&raw.run_command);
            if run_command.is_empty() {
                anyhow::bail!("Empty run command for {}", name);
            }
            let compile_command = match raw.compile_command {
                Some(cmd) => {
                    let cmd = into_command(&cmd);
                    if cmd.is_empty() {
                        anyhow::bail!("Empty compile command for {}", name);
                    }
                    Some(cmd)
                }
                None => None,
            };

            let compile_timeout_secs = raw
                .compile_timeout_secs
                .unwrap_or(DEFAULT_COMPILE_TIMEOUT_SECS);
            let run_timeout_secs = raw.run_timeout_secs.unwrap_or(DEFAULT_RUN_TIMEOUT_SECS);
            if compile_timeout_secs == 0 || run_timeout_secs == 0 {
                anyhow::bail!("Timeouts for {} must be positive", name);
            }

            let entry_point = raw
                .entry_point_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .with_context(|| format!("Invalid entry point pattern for {}", name))?;
            let package = raw
                .package_pattern
                .as_deref()
                .map(Regex::new)
                .transpose()
                .with_context(|| format!("Invalid package pattern for {}", name))?;

            let canonical = name.to_lowercase();
            let recipe = Arc::new(LanguageRecipe {
                name: canonical.clone(),
                file_extension: raw.extension.trim_start_matches('.').to_string(),
                compile_command,
                run_command,
                compile_timeout: Duration::from_secs(compile_timeout_secs),
                run_timeout: Duration::from_secs(run_timeout_secs),
                memory_limit_mb: raw.memory_limit_mb,
                entry_point,
                package,
                default_stem: raw.default_stem.unwrap_or_else(|| DEFAULT_STEM.to_string()),
            });

            // Add main language name
            insert_unique(&mut recipes, &canonical, &recipe)?;

            // Add aliases
            let mut names = Vec::new();
            for alias in raw.aliases {
                let alias = alias.to_lowercase();
                insert_unique(&mut recipes, &alias, &recipe)?;
                names.push(alias);
            }
            aliases.insert(canonical, names);
        }

        Ok(Self { recipes, aliases })
    }

    /// Resolve a declared language name (case-insensitive, aliases allowed)
    pub fn resolve(&self, language: &str) -> Result<Arc<LanguageRecipe>, ExecutionFailure> {
        self.recipes
            .get(&language.trim().to_lowercase())
            .cloned()
            .ok_or_else(|| ExecutionFailure::UnsupportedLanguage {
                language: language.to_string(),
            })
    }

    /// Canonical language names with their aliases, sorted by name
    pub fn supported_languages(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.aliases
            .iter()
            .map(|(name, aliases)| (name.as_str(), aliases.as_slice()))
    }
}

fn insert_unique(
    recipes: &mut HashMap<String, Arc<LanguageRecipe>>,
    key: &str,
    recipe: &Arc<LanguageRecipe>,
) -> anyhow::Result<()> {
    if recipes.insert(key.to_string(), recipe.clone()).is_some() {
        anyhow::bail!("Language name or alias defined twice: {}", key);
    }
    Ok(())
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}
