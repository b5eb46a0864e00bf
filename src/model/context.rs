use serde::{Deserialize, Serialize};

/// Tenant/user context extracted from request headers by the auth boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub organization_id: String,
    pub user_id: String,
}

impl RequestContext {
    pub fn new(organization_id: String, user_id: String) -> Self {
        Self {
            organization_id,
            user_id,
        }
    }

    /// Sentinel identity used when the boundary supplies no user id.
    /// Evaluation proceeds under it; only the organization is mandatory.
    pub fn anonymous(organization_id: String) -> Self {
        Self {
            organization_id,
            user_id: "unknown-user".to_string(),
        }
    }
}
