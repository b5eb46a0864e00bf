use crate::model::{generate_id, Id};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Minimal CRM lead record. Free-form extras live in `data` and are
/// flattened into preview value maps under `lead.<key>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: Id,
    pub organization_id: Id,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub address: Option<String>,
    pub postal_code: Option<String>,
    pub data: Option<Value>,
    pub created_at: String, // ISO 8601 timestamp
}

impl Lead {
    pub fn new(organization_id: Id, name: Option<String>) -> Self {
        Self {
            id: generate_id(),
            organization_id,
            name,
            email: None,
            phone: None,
            company: None,
            address: None,
            postal_code: None,
            data: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Placeholder minted when a submission references a lead id that does
    /// not exist yet.
    pub fn placeholder(id: Id, organization_id: Id) -> Self {
        Self {
            id,
            organization_id,
            name: Some("Imported lead".to_string()),
            email: None,
            phone: None,
            company: None,
            address: None,
            postal_code: None,
            data: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
