use crate::model::{generate_id, Id};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Draft,
    Completed,
    /// Statuses minted by clients we do not know about are carried through
    /// untouched rather than rejected.
    #[serde(untagged)]
    Other(String),
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SubmissionStatus::Draft => "draft",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Other(s) => s.as_str(),
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "draft" => SubmissionStatus::Draft,
            "completed" => SubmissionStatus::Completed,
            other => SubmissionStatus::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One filled instance of a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Id,
    pub tree_id: Id,
    pub user_id: Option<Id>,
    pub lead_id: Option<Id>,
    pub status: SubmissionStatus,
    pub summary: Option<Value>,
    /// Raw sanitized form snapshot as received from the client.
    pub export_data: Option<Value>,
    pub completed_at: Option<String>,
    pub created_at: String, // ISO 8601 timestamp
    pub updated_at: String,
}

impl Submission {
    pub fn new(tree_id: Id, user_id: Option<Id>, lead_id: Option<Id>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: generate_id(),
            tree_id,
            user_id,
            lead_id,
            status: SubmissionStatus::Draft,
            summary: None,
            export_data: None,
            completed_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// How a data row's value was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationSource {
    Neutral,
    Formula,
    Condition,
    Table,
    Error,
}

impl OperationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationSource::Neutral => "neutral",
            OperationSource::Formula => "formula",
            OperationSource::Condition => "condition",
            OperationSource::Table => "table",
            OperationSource::Error => "error",
        }
    }

    /// Lower-cases arbitrary interpreter output, defaulting to `Neutral`
    /// for anything unrecognized or missing.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("formula") => OperationSource::Formula,
            Some("condition") => OperationSource::Condition,
            Some("table") => OperationSource::Table,
            Some("error") => OperationSource::Error,
            _ => OperationSource::Neutral,
        }
    }
}

impl std::fmt::Display for OperationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Detail payload for a plain user entry, recording where the value came
/// from and whether it reached the row through a shared-reference alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntryDetail {
    pub input_value: Value,
    /// The formData key the value was submitted under.
    pub source_key: String,
    #[serde(default)]
    pub alias_resolved: bool,
}

/// Structured trace of how a row's value was derived. User entries get a
/// typed payload; interpreter traces keep their own shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationDetail {
    UserEntry(UserEntryDetail),
    Trace(Value),
}

impl OperationDetail {
    pub fn user_entry(input_value: Value, source_key: &str, alias_resolved: bool) -> Self {
        OperationDetail::UserEntry(UserEntryDetail {
            input_value,
            source_key: source_key.to_string(),
            alias_resolved,
        })
    }
}

/// The central mutable unit: one row per `(submission_id, node_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionDataRow {
    pub id: Id,
    pub submission_id: Id,
    pub node_id: Id,
    /// Raw user value, string-serialized; null when nothing was entered.
    pub value: Option<String>,
    /// Copied from the owning node's capacity; null for plain inputs.
    pub source_ref: Option<String>,
    pub operation_source: OperationSource,
    pub operation_detail: Option<OperationDetail>,
    /// Human-readable explanation or structured result of the operation.
    pub operation_result: Option<Value>,
    pub field_label: Option<String>,
    /// Timestamp of the last successful evaluation; null until resolved.
    pub last_resolved: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SubmissionDataRow {
    pub fn new(submission_id: Id, node_id: Id) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: generate_id(),
            submission_id,
            node_id,
            value: None,
            source_ref: None,
            operation_source: OperationSource::Neutral,
            operation_detail: None,
            operation_result: None,
            field_label: None,
            last_resolved: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// A submission re-read with all of its data rows attached, as returned by
/// the evaluation endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionWithData {
    #[serde(flatten)]
    pub submission: Submission,
    pub data: Vec<SubmissionDataRow>,
}
