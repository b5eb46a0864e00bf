use crate::model::Id;
use serde::{Deserialize, Serialize};

/// A capacity: the declaration that a node's value is computed rather than
/// entered. `source_ref` names the stored operation backing it
/// (`formula:<id>`, `condition:<id>`, `table:<id>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVariable {
    pub id: Id,
    pub node_id: Id,
    pub source_ref: String,
    pub display_name: Option<String>,
    pub display_format: Option<String>,
    pub unit: Option<String>,
    pub precision: Option<u8>,
    #[serde(default = "default_visible")]
    pub visible_to_user: bool,
}

fn default_visible() -> bool {
    true
}

impl NodeVariable {
    pub fn new(node_id: Id, source_ref: &str) -> Self {
        Self {
            id: crate::model::generate_id(),
            node_id,
            source_ref: source_ref.to_string(),
            display_name: None,
            display_format: None,
            unit: None,
            precision: None,
            visible_to_user: true,
        }
    }
}
