use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::handlers::{map_materialize_error, EngineState, ErrorResponse, HandlerError};
use crate::logic::{
    CapacityOutcome, EvalStats, StageParams, StagingError, StagingOps, StoredOperationInterpreter,
};
use crate::model::{Id, RequestContext};
use crate::store::traits::Store;

fn map_staging_error(e: StagingError) -> HandlerError {
    match e {
        StagingError::StageNotFound(_) => {
            (StatusCode::NOT_FOUND, Json(ErrorResponse::new(&e.to_string())))
        }
        StagingError::Materialize(e) => map_materialize_error(e),
        StagingError::Storage(e) => {
            log::error!("storage failure: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("internal error")),
            )
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StageRequest {
    pub stage_id: Option<Id>,
    pub tree_id: Option<Id>,
    pub submission_id: Option<Id>,
    pub form_data: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResponse {
    pub success: bool,
    pub stage_id: Id,
    /// Number of keys currently held by the stage after the merge.
    pub keys: usize,
    pub updated_at: String,
}

pub async fn stage<S: Store>(
    ctx: RequestContext,
    State(state): State<EngineState<S>>,
    Json(body): Json<StageRequest>,
) -> Json<StageResponse> {
    let record = StagingOps::stage(
        &state.staging,
        &ctx,
        StageParams {
            stage_id: body.stage_id,
            tree_id: body.tree_id,
            submission_id: body.submission_id,
            form_data: body.form_data.unwrap_or_default(),
        },
    )
    .await;

    Json(StageResponse {
        success: true,
        stage_id: record.id,
        keys: record.form_data.len(),
        updated_at: record.updated_at,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageIdRequest {
    pub stage_id: Id,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StagePreviewResponse {
    pub success: bool,
    pub mode: String,
    pub stage_id: Id,
    pub results: Vec<CapacityOutcome>,
}

pub async fn stage_preview<S: Store>(
    _ctx: RequestContext,
    State(state): State<EngineState<S>>,
    Json(body): Json<StageIdRequest>,
) -> Result<Json<StagePreviewResponse>, HandlerError> {
    let batch = StagingOps::preview_stage(
        state.store.as_ref(),
        &state.staging,
        &StoredOperationInterpreter,
        &body.stage_id,
    )
    .await
    .map_err(map_staging_error)?;

    Ok(Json(StagePreviewResponse {
        success: true,
        mode: "stage-preview".to_string(),
        stage_id: body.stage_id,
        results: batch.results,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCommitRequest {
    pub stage_id: Id,
    #[serde(default)]
    pub as_new: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCommitResponse {
    pub success: bool,
    pub submission_id: Id,
    pub saved: usize,
    pub stats: EvalStats,
}

pub async fn stage_commit<S: Store>(
    ctx: RequestContext,
    State(state): State<EngineState<S>>,
    Json(body): Json<StageCommitRequest>,
) -> Result<Json<StageCommitResponse>, HandlerError> {
    let outcome = StagingOps::commit_stage(
        state.store.as_ref(),
        &state.staging,
        &StoredOperationInterpreter,
        &ctx,
        &body.stage_id,
        body.as_new,
    )
    .await
    .map_err(map_staging_error)?;

    Ok(Json(StageCommitResponse {
        success: true,
        submission_id: outcome.submission_id,
        saved: outcome.saved,
        stats: outcome.stats,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDiscardResponse {
    pub success: bool,
    pub discarded: bool,
}

pub async fn stage_discard<S: Store>(
    _ctx: RequestContext,
    State(state): State<EngineState<S>>,
    Json(body): Json<StageIdRequest>,
) -> Json<StageDiscardResponse> {
    let discarded = StagingOps::discard_stage(&state.staging, &body.stage_id).await;
    Json(StageDiscardResponse {
        success: true,
        discarded,
    })
}
