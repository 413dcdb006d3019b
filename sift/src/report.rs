use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use core_lib::value::Row;
use crate::matching::MatchOutcome;
use crate::{error::SiftError, Context};

///
/// A typed finding from the validation evaluator.
///
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Issue {
    key_value: String,
    issue_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    business_value: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    finance_value: Option<String>,

    detail: String,
}

impl Issue {
    pub fn new(
        key_value: String,
        issue_type: String,
        business_value: Option<String>,
        finance_value: Option<String>,
        detail: String) -> Self {
        Self { key_value, issue_type, business_value, finance_value, detail }
    }

    pub fn key_value(&self) -> &str {
        &self.key_value
    }

    pub fn issue_type(&self) -> &str {
        &self.issue_type
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Summary {
    total_business_records: usize,
    total_finance_records: usize,
    matched_records: usize,
    unmatched_records: usize,
}

impl Summary {
    pub fn total_business_records(&self) -> usize {
        self.total_business_records
    }

    pub fn total_finance_records(&self) -> usize {
        self.total_finance_records
    }

    pub fn matched_records(&self) -> usize {
        self.matched_records
    }

    pub fn unmatched_records(&self) -> usize {
        self.unmatched_records
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Metadata {
    rule_version: String,
    processed_at: String,
    file_assignments: IndexMap<String, Vec<String>>,
    warnings: Vec<String>,
    duration_ms: u64,
}

///
/// The final reconciliation artifact. This is the only state that outlives the task:
/// it is kept in the registry for the result tool and persisted to
/// `<results>/<task_id>.json`.
///
#[derive(Clone, Debug, Serialize)]
pub struct Artifact {
    task_id: String,
    status: String,
    summary: Summary,
    issues: Vec<Issue>,
    metadata: Metadata,
}

impl Artifact {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    ///
    /// Write the artifact to `<dir>/<task_id>.json`, creating the directory if needed.
    ///
    pub fn write(&self, dir: &Path) -> Result<PathBuf, SiftError> {
        fs::create_dir_all(dir)?;

        let path = dir.join(format!("{}.json", self.task_id));
        let writer = BufWriter::new(File::create(&path)?);

        serde_json::to_writer_pretty(writer, self)
            .map_err(|err| SiftError::WriteFailed { path: path.to_string_lossy().into(), cause: err.to_string() })?;

        Ok(path)
    }
}

///
/// Assemble the artifact for a completed run. Issues keep their emission order.
///
pub fn build(
    ctx: &Context,
    assignments: &IndexMap<String, Vec<PathBuf>>,
    business: &[Row],
    finance: &[Row],
    outcome: &MatchOutcome,
    issues: Vec<Issue>) -> Artifact {

    let file_assignments = assignments.iter()
        .map(|(side, files)| {
            let basenames = files.iter()
                .map(|file| file.file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| file.to_string_lossy().to_string()))
                .collect();
            (side.clone(), basenames)
        })
        .collect();

    Artifact {
        task_id: ctx.task_id().to_string(),
        status: "completed".into(),
        summary: Summary {
            total_business_records: business.len(),
            total_finance_records: finance.len(),
            matched_records: outcome.matched_keys(),
            unmatched_records: outcome.business_only().len() + outcome.finance_only().len(),
        },
        issues,
        metadata: Metadata {
            rule_version: ctx.schema().version().to_string(),
            processed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            file_assignments,
            warnings: ctx.warnings(),
            duration_ms: ctx.started().elapsed().as_millis() as u64,
        },
    }
}
