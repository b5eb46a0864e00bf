use crate::model::{generate_id, Id};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named form tree. Nodes reference their tree through `tree_id`;
/// the tree row itself is read-only input during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    pub id: Id,
    pub organization_id: Id,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String, // ISO 8601 timestamp
}

impl Tree {
    pub fn new(organization_id: Id, name: String, description: Option<String>) -> Self {
        Self {
            id: generate_id(),
            organization_id,
            name,
            description,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// One select option on a branch/leaf node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

/// Select configuration attached to nodes that render as a choice field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectConfig {
    pub options: Vec<SelectOption>,
    #[serde(default)]
    pub multiple: bool,
}

/// A single node in a form tree. `shared_reference_id` links physical
/// copies of the same logical field across the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: Id,
    pub tree_id: Id,
    pub label: String,
    pub parent_id: Option<Id>,
    pub shared_reference_id: Option<String>,
    pub select_config: Option<SelectConfig>,
    /// Latest cached scalar produced by a capacity evaluation, if any.
    pub calculated_value: Option<String>,
    pub calculated_at: Option<String>,
    pub calculated_by: Option<String>,
}

impl TreeNode {
    pub fn new(tree_id: Id, label: String) -> Self {
        Self {
            id: generate_id(),
            tree_id,
            label,
            parent_id: None,
            shared_reference_id: None,
            select_config: None,
            calculated_value: None,
            calculated_at: None,
            calculated_by: None,
        }
    }

    pub fn with_id(id: Id, tree_id: Id, label: String) -> Self {
        Self {
            id,
            tree_id,
            label,
            parent_id: None,
            shared_reference_id: None,
            select_config: None,
            calculated_value: None,
            calculated_at: None,
            calculated_by: None,
        }
    }

    pub fn with_shared_reference(mut self, shared_reference_id: &str) -> Self {
        self.shared_reference_id = Some(shared_reference_id.to_string());
        self
    }
}

/// Lookup-mode configuration for a two-axis table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableLookupSelectors {
    pub row_field_id: Option<Id>,
    pub column_field_id: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableLookupConfig {
    pub enabled: bool,
    pub mode: String,
    pub row_lookup_enabled: bool,
    pub column_lookup_enabled: bool,
    pub selectors: TableLookupSelectors,
    pub display_row: Option<String>,
    pub display_column: Option<String>,
}

impl Default for TableLookupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: "matrix".to_string(),
            row_lookup_enabled: false,
            column_lookup_enabled: false,
            selectors: TableLookupSelectors {
                row_field_id: None,
                column_field_id: None,
            },
            display_row: None,
            display_column: None,
        }
    }
}

/// A two-axis lookup table: row labels x column labels -> matrix cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupTable {
    pub id: Id,
    pub tree_id: Option<Id>,
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<String>,
    /// Row-major cell matrix; `matrix[r][c]` pairs with `rows[r]` / `columns[c]`.
    pub matrix: Vec<Vec<Value>>,
    #[serde(default)]
    pub config: TableLookupConfig,
}

impl LookupTable {
    /// Cell addressed by row/column label, if both labels exist.
    pub fn cell(&self, row_label: &str, column_label: &str) -> Option<&Value> {
        let row = self.rows.iter().position(|r| r == row_label)?;
        let col = self.columns.iter().position(|c| c == column_label)?;
        self.matrix.get(row)?.get(col)
    }
}
