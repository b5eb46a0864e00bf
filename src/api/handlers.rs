use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::logic::{
    CapacityOutcome, CreateParams, MaterializeError, Materializer, PreviewEvaluator,
    PreviewParams, StoredOperationInterpreter,
};
use crate::model::{Id, LookupTable, RequestContext, SubmissionWithData};
use crate::store::staging::StagingStore;
use crate::store::traits::Store;

/// Legacy evaluator placeholder still present in old rows; the verification
/// endpoint counts these as not-yet-migrated.
pub const LEGACY_PLACEHOLDER: &str = "Évalué dynamiquement par TBL Prisma";

/// Shared handler state: the backing store plus the in-memory staging area.
#[derive(Debug)]
pub struct EngineState<S> {
    pub store: Arc<S>,
    pub staging: Arc<StagingStore>,
}

impl<S> Clone for EngineState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            staging: Arc::clone(&self.staging),
        }
    }
}

impl<S> EngineState<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            staging: Arc::new(StagingStore::new()),
        }
    }

    pub fn with_staging(store: Arc<S>, staging: Arc<StagingStore>) -> Self {
        Self { store, staging }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

pub type HandlerError = (StatusCode, Json<ErrorResponse>);

pub fn map_materialize_error(e: MaterializeError) -> HandlerError {
    match e {
        MaterializeError::NoTreeAvailable => {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(&e.to_string())))
        }
        MaterializeError::SubmissionNotFound(_) => {
            (StatusCode::NOT_FOUND, Json(ErrorResponse::new(&e.to_string())))
        }
        MaterializeError::Storage(e) => {
            log::error!("storage failure: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("internal error")),
            )
        }
    }
}

pub fn internal_error(e: anyhow::Error) -> HandlerError {
    log::error!("storage failure: {:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("internal error")),
    )
}

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateAndEvaluateRequest {
    pub tree_id: Option<Id>,
    /// CRM lead id; kept under its wire name for client compatibility.
    pub client_id: Option<Id>,
    pub form_data: Option<Map<String, Value>>,
    pub status: Option<String>,
    pub provided_name: Option<String>,
    pub reuse_submission_id: Option<Id>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub submission: SubmissionWithData,
}

pub async fn create_and_evaluate<S: Store>(
    ctx: RequestContext,
    State(state): State<EngineState<S>>,
    Json(body): Json<CreateAndEvaluateRequest>,
) -> Result<(StatusCode, Json<SubmissionResponse>), HandlerError> {
    let result = Materializer::create_and_evaluate(
        state.store.as_ref(),
        &StoredOperationInterpreter,
        &ctx,
        CreateParams {
            tree_id: body.tree_id,
            lead_id: body.client_id,
            form_data: body.form_data.unwrap_or_default(),
            status: body.status,
            provided_name: body.provided_name,
            reuse_submission_id: body.reuse_submission_id,
        },
    )
    .await
    .map_err(map_materialize_error)?;

    Ok((
        StatusCode::CREATED,
        Json(SubmissionResponse {
            success: true,
            message: None,
            submission: result.submission,
        }),
    ))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateAndEvaluateRequest {
    pub form_data: Option<Map<String, Value>>,
    pub status: Option<String>,
}

pub async fn update_and_evaluate<S: Store>(
    _ctx: RequestContext,
    State(state): State<EngineState<S>>,
    Path(submission_id): Path<Id>,
    Json(body): Json<UpdateAndEvaluateRequest>,
) -> Result<Json<SubmissionResponse>, HandlerError> {
    let result = Materializer::update_and_evaluate(
        state.store.as_ref(),
        &StoredOperationInterpreter,
        &submission_id,
        body.form_data,
        body.status,
    )
    .await
    .map_err(map_materialize_error)?;

    Ok(Json(SubmissionResponse {
        success: true,
        message: Some(format!(
            "submission updated, {} entries written",
            result.entries_written
        )),
        submission: result.submission,
    }))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluateAllRequest {
    pub force_update: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateAllResponse {
    pub success: bool,
    pub evaluated: usize,
    pub errors: usize,
    pub total: usize,
    pub results: Vec<CapacityOutcome>,
}

pub async fn evaluate_all<S: Store>(
    _ctx: RequestContext,
    State(state): State<EngineState<S>>,
    Path(submission_id): Path<Id>,
    body: Option<Json<EvaluateAllRequest>>,
) -> Result<Json<EvaluateAllResponse>, HandlerError> {
    let force_update = body.map(|Json(b)| b.force_update).unwrap_or(false);

    let (total, batch) = Materializer::evaluate_all(
        state.store.as_ref(),
        &StoredOperationInterpreter,
        &submission_id,
        force_update,
    )
    .await
    .map_err(map_materialize_error)?;

    Ok(Json(EvaluateAllResponse {
        success: true,
        evaluated: batch.stats.evaluated,
        errors: batch.stats.errors,
        total,
        results: batch.results,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRow {
    pub node_id: Id,
    pub field_label: Option<String>,
    pub operation_source: String,
    pub classification: String,
    pub operation_result: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationCounts {
    pub total: usize,
    pub dynamic: usize,
    pub legacy: usize,
    pub unknown: usize,
    pub errors: usize,
    pub success_rate: String,
    pub details: Vec<VerificationRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub success: bool,
    pub submission_id: Id,
    pub verification: VerificationCounts,
    pub status: String,
    pub timestamp: String,
}

fn classify_result(result: Option<&Value>) -> &'static str {
    let Some(text) = result.and_then(|value| value.as_str()) else {
        return "unknown";
    };
    if text == LEGACY_PLACEHOLDER {
        return "legacy";
    }
    if text.contains("If ") || text.contains("(=) Result (") || text.contains("(/)") {
        return "dynamic";
    }
    "unknown"
}

/// Success counts everything that is not a legacy placeholder or an error
/// row, so unknown rows pass; a capacity-free submission reports 100%.
fn success_rate(total: usize, legacy: usize, errors: usize) -> String {
    if total == 0 {
        return "100%".to_string();
    }
    let ok = total.saturating_sub(legacy + errors);
    format!("{}%", (ok as f64 / total as f64 * 100.0).round() as u64)
}

/// Heuristic migration health check: how many capacity rows carry a real
/// evaluator trace versus the legacy placeholder text.
pub async fn get_verification<S: Store>(
    _ctx: RequestContext,
    State(state): State<EngineState<S>>,
    Path(submission_id): Path<Id>,
) -> Result<Json<VerificationResponse>, HandlerError> {
    let store = state.store.as_ref();
    if store
        .get_submission(&submission_id)
        .await
        .map_err(internal_error)?
        .is_none()
    {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("submission not found")),
        ));
    }

    let rows = store
        .list_data_for_submission(&submission_id)
        .await
        .map_err(internal_error)?;

    let mut counts = VerificationCounts {
        total: 0,
        dynamic: 0,
        legacy: 0,
        unknown: 0,
        errors: 0,
        success_rate: "100%".to_string(),
        details: Vec::new(),
    };
    for row in rows {
        if row.source_ref.is_none() {
            continue;
        }
        counts.total += 1;
        let classification = classify_result(row.operation_result.as_ref());
        match classification {
            "dynamic" => counts.dynamic += 1,
            "legacy" => counts.legacy += 1,
            _ => counts.unknown += 1,
        }
        if row.operation_source == crate::model::OperationSource::Error {
            counts.errors += 1;
        }
        counts.details.push(VerificationRow {
            node_id: row.node_id,
            field_label: row.field_label,
            operation_source: row.operation_source.to_string(),
            classification: classification.to_string(),
            operation_result: row.operation_result,
        });
    }
    counts.success_rate = success_rate(counts.total, counts.legacy, counts.errors);
    let status = if counts.legacy == 0 && counts.errors == 0 {
        "perfect"
    } else {
        "needs_improvement"
    };

    Ok(Json(VerificationResponse {
        success: true,
        submission_id,
        verification: counts,
        status: status.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PreviewEvaluateRequest {
    pub tree_id: Option<Id>,
    pub form_data: Option<Map<String, Value>>,
    pub base_submission_id: Option<Id>,
    pub lead_id: Option<Id>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub success: bool,
    pub mode: String,
    pub results: Vec<CapacityOutcome>,
}

pub async fn preview_evaluate<S: Store>(
    _ctx: RequestContext,
    State(state): State<EngineState<S>>,
    Json(body): Json<PreviewEvaluateRequest>,
) -> Result<Json<PreviewResponse>, HandlerError> {
    let batch = PreviewEvaluator::default()
        .evaluate(
            state.store.as_ref(),
            &StoredOperationInterpreter,
            PreviewParams {
                tree_id: body.tree_id,
                lead_id: body.lead_id,
                base_submission_id: body.base_submission_id,
                form_data: body.form_data.unwrap_or_default(),
            },
        )
        .await
        .map_err(map_materialize_error)?;

    Ok(Json(PreviewResponse {
        success: true,
        mode: "preview".to_string(),
        results: batch.results,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupTableResponse {
    pub success: bool,
    pub table: LookupTable,
}

pub async fn get_lookup_table<S: Store>(
    State(state): State<EngineState<S>>,
    Path(table_id): Path<Id>,
) -> Result<Json<LookupTableResponse>, HandlerError> {
    let table = state
        .store
        .get_lookup_table(&table_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("lookup table not found")),
            )
        })?;

    Ok(Json(LookupTableResponse {
        success: true,
        table,
    }))
}
