#![allow(clippy::result_large_err)]

use crate::core::error::{AppError, ErrorReporter};
use crate::core::task_identity::TaskId;
use crate::core::types::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// First line of every comment that carries a generated patch.
pub const SUCCESS_MARKER: &str = "Patchwright finished analyzing this issue.";

pub const PATCH_FILE: &str = "final_patch.diff";
pub const LOCATIONS_FILE: &str = "fix_locations.json";
pub const COST_FILE: &str = "cost.json";

const DIFF_FENCE_OPEN: &str = "```diff";
const FENCE: &str = "```";

const SETUP_FAILURE_BODY: &str =
    "The analysis engine could not be started for this issue. Please try again later.";
const PATCH_GEN_FAILURE_BODY: &str =
    "The analysis engine finished, but it could not produce a patch for this issue.";
const LOCATIONS_HEADER: &str =
    "No patch was generated, but the following locations were explored:";

/// Terminal artifact of one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub ok: bool,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    /// Failure class behind `diagnostic`; `None` on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,
    pub model: String,
    pub cost: Option<f64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl RunResult {
    pub fn success(body: impl Into<String>, model: impl Into<String>) -> Self {
        RunResult {
            ok: true,
            body: body.into(),
            diagnostic: None,
            category: None,
            model: model.into(),
            cost: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    /// Failed run: `body` is what the user sees, `detail` stays on operator surfaces.
    pub fn failure(
        category: ErrorCategory,
        detail: impl AsRef<str>,
        body: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        RunResult {
            ok: false,
            body: body.into(),
            diagnostic: Some(format!("{}: {}", category, detail.as_ref())),
            category: Some(category),
            model: model.into(),
            cost: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    /// Failure built from an error raised before or during dispatch.
    pub fn from_error(error: &AppError, model: impl Into<String>) -> Self {
        let body = error
            .recovery_suggestions
            .first()
            .cloned()
            .unwrap_or_else(|| default_failure_body(error.category).to_string());
        RunResult::failure(error.category, &error.message, body, model)
    }

    fn with_usage(mut self, usage: Option<CostReport>) -> Self {
        if let Some(usage) = usage {
            self.cost = usage.total_cost;
            self.input_tokens = usage.total_input_tokens;
            self.output_tokens = usage.total_output_tokens;
        }
        self
    }
}

fn default_failure_body(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::PatchGenError => PATCH_GEN_FAILURE_BODY,
        _ => SETUP_FAILURE_BODY,
    }
}

/// Contents of `cost.json`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CostReport {
    pub total_cost: Option<f64>,
    pub total_input_tokens: Option<u64>,
    pub total_output_tokens: Option<u64>,
}

/// One explored code location from `fix_locations.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FixLocation {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub method: String,
}

impl FixLocation {
    fn bullet(&self) -> String {
        let mut line = format!("- `{}`", self.file);
        if !self.class.is_empty() {
            line.push_str(&format!(", class `{}`", self.class));
        }
        if !self.method.is_empty() {
            line.push_str(&format!(", method `{}`", self.method));
        }
        line
    }
}

/// Entries are usually JSON-encoded strings; plain objects are accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawLocation {
    Encoded(String),
    Object(FixLocation),
}

impl RawLocation {
    fn decode(self) -> Result<FixLocation, serde_json::Error> {
        match self {
            RawLocation::Encoded(text) => serde_json::from_str(&text),
            RawLocation::Object(location) => Ok(location),
        }
    }
}

/// Reads an engine output namespace and classifies the run.
pub struct ResultExtractor {
    reporter: Box<dyn ErrorReporter>,
}

impl ResultExtractor {
    pub fn new(reporter: Box<dyn ErrorReporter>) -> Self {
        ResultExtractor { reporter }
    }

    /// Classify the newest run under `output_root`.
    ///
    /// Disk state is the only input: the engine's exit status plays no part.
    pub fn extract(&self, output_root: &Path, task_id: &TaskId, model: &str) -> RunResult {
        let run_dir = match latest_run_dir(output_root, task_id) {
            Some(dir) => dir,
            None => {
                self.reporter.report_warning(
                    &format!("no run directory for {} under {}", task_id, output_root.display()),
                    None,
                );
                return RunResult::failure(
                    ErrorCategory::SetupError,
                    "no output found",
                    SETUP_FAILURE_BODY,
                    model,
                );
            }
        };
        self.reporter
            .report_debug(&format!("extracting results from {}", run_dir.display()));

        let patch_path = run_dir.join(PATCH_FILE);
        if patch_path.is_file() {
            return match fs::read_to_string(&patch_path) {
                Ok(patch) => RunResult::success(fence_patch(&patch), model)
                    .with_usage(self.read_cost(&run_dir)),
                Err(err) => {
                    let error = AppError::from(err).with_context(patch_path.display().to_string());
                    self.reporter.report_error(&error);
                    RunResult::failure(
                        ErrorCategory::PatchGenError,
                        format!("unreadable {}: {}", PATCH_FILE, error.message),
                        PATCH_GEN_FAILURE_BODY,
                        model,
                    )
                }
            };
        }

        let locations_path = run_dir.join(LOCATIONS_FILE);
        if locations_path.is_file() {
            return match read_locations(&locations_path) {
                Ok(locations) => RunResult::success(render_locations(&locations), model)
                    .with_usage(self.read_cost(&run_dir)),
                Err(error) => {
                    self.reporter.report_error(&error);
                    RunResult::failure(
                        ErrorCategory::PatchGenError,
                        error.message,
                        PATCH_GEN_FAILURE_BODY,
                        model,
                    )
                }
            };
        }

        RunResult::failure(
            ErrorCategory::PatchGenError,
            "no patch and no locations found",
            PATCH_GEN_FAILURE_BODY,
            model,
        )
    }

    fn read_cost(&self, run_dir: &Path) -> Option<CostReport> {
        let path = run_dir.join(COST_FILE);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CostReport>(&text) {
            Ok(report) => Some(report),
            Err(err) => {
                self.reporter.report_warning(
                    &format!("ignoring malformed {}: {}", COST_FILE, err),
                    Some(path.display().to_string()),
                );
                None
            }
        }
    }
}

/// Newest run directory: the greatest subdirectory name containing `task_id`.
pub fn latest_run_dir(output_root: &Path, task_id: &TaskId) -> Option<PathBuf> {
    let entries = fs::read_dir(output_root).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            name.contains(task_id.as_str()).then_some(name)
        })
        .max()
        .map(|name| output_root.join(name))
}

/// Wrap a raw diff in a `diff` fence unless it is already fenced.
///
/// The closing fence always sits on its own line after the content, so
/// [`crate::core::conversation::extract_diff`] gives back the input unchanged.
pub fn fence_patch(patch: &str) -> String {
    if patch.trim_start().starts_with(FENCE) {
        return patch.to_string();
    }
    format!("{}\n{}\n{}", DIFF_FENCE_OPEN, patch, FENCE)
}

fn read_locations(path: &Path) -> Result<Vec<FixLocation>, AppError> {
    let malformed = |detail: String| {
        AppError::new(
            ErrorCategory::PatchGenError,
            format!("malformed {}: {}", LOCATIONS_FILE, detail),
        )
        .with_code("EXTRACT-002")
    };
    let text = fs::read_to_string(path).map_err(|err| malformed(err.to_string()))?;
    let raw: Vec<RawLocation> =
        serde_json::from_str(&text).map_err(|err| malformed(err.to_string()))?;
    raw.into_iter()
        .enumerate()
        .map(|(idx, entry)| {
            entry
                .decode()
                .map_err(|err| malformed(format!("entry {}: {}", idx, err)))
        })
        .collect()
}

fn render_locations(locations: &[FixLocation]) -> String {
    let mut body = String::from(LOCATIONS_HEADER);
    body.push_str("\n\n");
    let bullets: Vec<String> = locations.iter().map(FixLocation::bullet).collect();
    body.push_str(&bullets.join("\n"));
    body
}

/// Issue comment for a finished run.
///
/// Successful runs start with [`SUCCESS_MARKER`] so a later publish request can
/// find them again; failures carry only the user-facing body.
pub fn render_comment(result: &RunResult) -> String {
    if !result.ok {
        return result.body.clone();
    }
    let mut comment = format!("{}\n{}", SUCCESS_MARKER, result.body);
    if let Some(cost) = result.cost {
        comment.push_str(&format!("\n\n---\n\nThis run costs {:.2} USD.", cost));
    }
    comment
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    Text,
}

/// Operator-facing rendering of a [`RunResult`].
pub fn render_report(result: &RunResult, format: OutputFormat) -> Result<String, AppError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(result).map_err(|e| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("Failed to generate JSON report: {}", e),
            )
            .with_code("REPORT-JSON-001")
        }),
        OutputFormat::Text => {
            let mut report = String::new();
            report.push_str(&format!(
                "Status: {}\n",
                if result.ok { "ok" } else { "failed" }
            ));
            report.push_str(&format!("Model: {}\n", result.model));
            if let Some(diagnostic) = &result.diagnostic {
                report.push_str(&format!("Diagnostic: {}\n", diagnostic));
            }
            if let Some(cost) = result.cost {
                report.push_str(&format!("Cost: {:.2} USD\n", cost));
            }
            if let (Some(input), Some(output)) = (result.input_tokens, result.output_tokens) {
                report.push_str(&format!("Tokens: {} in / {} out\n", input, output));
            }
            report.push('\n');
            report.push_str(&result.body);
            report.push('\n');
            Ok(report)
        }
    }
}
