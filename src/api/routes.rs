use axum::{
    routing::{get, post, put},
    Router,
};

use crate::api::handlers::{self, EngineState};
use crate::api::staging_handlers;
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<EngineState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Submission lifecycle
        .route(
            "/submissions/create-and-evaluate",
            post(handlers::create_and_evaluate::<S>),
        )
        .route(
            "/submissions/:id/update-and-evaluate",
            put(handlers::update_and_evaluate::<S>),
        )
        .route(
            "/submissions/:id/evaluate-all",
            post(handlers::evaluate_all::<S>),
        )
        .route(
            "/submissions/:id/verification",
            get(handlers::get_verification::<S>),
        )
        // Read-only preview
        .route(
            "/submissions/preview-evaluate",
            post(handlers::preview_evaluate::<S>),
        )
        // Staging lifecycle
        .route("/submissions/stage", post(staging_handlers::stage::<S>))
        .route(
            "/submissions/stage/preview",
            post(staging_handlers::stage_preview::<S>),
        )
        .route(
            "/submissions/stage/commit",
            post(staging_handlers::stage_commit::<S>),
        )
        .route(
            "/submissions/stage/discard",
            post(staging_handlers::stage_discard::<S>),
        )
        // Lookup tables
        .route("/tables/:table_id", get(handlers::get_lookup_table::<S>))
}
