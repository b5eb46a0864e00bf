use uuid::Uuid;

pub type Id = String;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Stage ids carry a recognizable prefix so they cannot be mistaken for
/// node or submission ids in logs.
pub fn generate_stage_id() -> Id {
    format!("stage_{}", Uuid::new_v4())
}

pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}
