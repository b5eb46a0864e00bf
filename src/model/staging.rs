use crate::model::Id;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A pre-commit draft of form edits, held only in memory. `form_data` is a
/// flat sanitized key/value map; `submission_id` is set once the stage has
/// been committed so later commits update rather than duplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub id: Id,
    pub organization_id: Id,
    pub user_id: Id,
    pub tree_id: Option<Id>,
    pub submission_id: Option<Id>,
    pub form_data: Map<String, Value>,
    pub updated_at: String, // ISO 8601 timestamp
}

impl StageRecord {
    pub fn new(id: Id, organization_id: Id, user_id: Id) -> Self {
        Self {
            id,
            organization_id,
            user_id,
            tree_id: None,
            submission_id: None,
            form_data: Map::new(),
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Shallow-merges new form entries over the existing ones and refreshes
    /// the activity timestamp.
    pub fn merge_form_data(&mut self, incoming: Map<String, Value>) {
        for (key, value) in incoming {
            self.form_data.insert(key, value);
        }
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}
