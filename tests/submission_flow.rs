use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tbl_engine_rust::api::handlers::EngineState;
use tbl_engine_rust::api::routes::create_router;
use tbl_engine_rust::seed::{
    load_seed_data, NODE_INCLINATION, NODE_ORIENTATION, NODE_PANEL_COUNT, NODE_TOTAL,
    SEED_TABLE_ID, SHARED_REF_ROOF_AREA,
};
use tbl_engine_rust::model::Tree;
use tbl_engine_rust::store::{MemoryStore, StagingStore, TreeStore};
use tower::ServiceExt;

async fn test_app() -> Router {
    let store = MemoryStore::new();
    load_seed_data(&store).await.unwrap();
    create_router().with_state(EngineState::new(Arc::new(store)))
}

async fn test_app_with_ttl(ttl: Duration) -> Router {
    let store = MemoryStore::new();
    load_seed_data(&store).await.unwrap();
    let state = EngineState::with_staging(Arc::new(store), Arc::new(StagingStore::with_ttl(ttl)));
    create_router().with_state(state)
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-organization-id", "org-demo")
        .header(header::CONTENT_TYPE, "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn intake_form() -> Value {
    json!({
        SHARED_REF_ROOF_AREA: "40",
        NODE_INCLINATION: "27",
        NODE_ORIENTATION: "south",
        "__mirror_roof_area": "should vanish",
        "note": ""
    })
}

fn data_row<'a>(body: &'a Value, node_id: &str) -> &'a Value {
    body["submission"]["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|row| row["nodeId"] == node_id)
        .unwrap_or_else(|| panic!("no data row for {}", node_id))
}

#[tokio::test]
async fn test_health_check() {
    let app = test_app().await;
    let (status, body) = send(&app, request(Method::GET, "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_missing_organization_header_is_rejected() {
    let app = test_app().await;
    let req = Request::builder()
        .method(Method::POST)
        .uri("/submissions/create-and-evaluate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"formData": {}}).to_string()))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("x-organization-id"));
}

#[tokio::test]
async fn test_create_and_evaluate_full_chain() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/submissions/create-and-evaluate",
            Some(json!({"treeId": "tree-solar-intake", "formData": intake_form()})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);

    // 40 m2 at 2 m2 per panel, 400 W at 27 degrees.
    let total = data_row(&body, NODE_TOTAL);
    assert_eq!(total["operationSource"], "formula");
    assert!(total["operationResult"]
        .as_str()
        .unwrap()
        .contains("(=) Result (8000)"));
    assert!(total["lastResolved"].is_string());

    let count = data_row(&body, NODE_PANEL_COUNT);
    assert!(count["operationResult"]
        .as_str()
        .unwrap()
        .contains("(=) Result (20)"));

    // Sanitizer: the technical mirror key and the blank entry never land.
    let rows = body["submission"]["data"].as_array().unwrap();
    assert!(rows
        .iter()
        .all(|row| row["nodeId"] != "__mirror_roof_area" && row["nodeId"] != "note"));

    // Alias fan-out: pseudo-key and both physical roof-area copies hold "40".
    let with_area = rows
        .iter()
        .filter(|row| row["value"] == "40")
        .count();
    assert_eq!(with_area, 3);
}

#[tokio::test]
async fn test_evaluate_all_is_idempotent() {
    let app = test_app().await;
    let (_, created) = send(
        &app,
        request(
            Method::POST,
            "/submissions/create-and-evaluate",
            Some(json!({"formData": intake_form()})),
        ),
    )
    .await;
    let submission_id = created["submission"]["id"].as_str().unwrap().to_string();

    // Everything is already resolved: nothing re-evaluates without force.
    let (status, body) = send(
        &app,
        request(
            Method::POST,
            &format!("/submissions/{}/evaluate-all", submission_id),
            Some(json!({})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 4);
    assert_eq!(body["evaluated"], 0);

    // Forced re-evaluation recomputes but the diff suppresses every write.
    let (_, forced) = send(
        &app,
        request(
            Method::POST,
            &format!("/submissions/{}/evaluate-all", submission_id),
            Some(json!({"forceUpdate": true})),
        ),
    )
    .await;
    assert_eq!(forced["evaluated"], 4);
    assert_eq!(forced["errors"], 0);
    assert!(forced["results"]
        .as_array()
        .unwrap()
        .iter()
        .all(|result| result["updated"] == false));
}

#[tokio::test]
async fn test_evaluate_all_unknown_submission_is_404() {
    let app = test_app().await;
    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/submissions/nope/evaluate-all",
            Some(json!({})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_and_evaluate_recomputes_and_completes() {
    let app = test_app().await;
    let (_, created) = send(
        &app,
        request(
            Method::POST,
            "/submissions/create-and-evaluate",
            Some(json!({"formData": intake_form()})),
        ),
    )
    .await;
    let submission_id = created["submission"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        request(
            Method::PUT,
            &format!("/submissions/{}/update-and-evaluate", submission_id),
            Some(json!({
                "formData": { SHARED_REF_ROOF_AREA: "60" },
                "status": "completed"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["submission"]["status"], "completed");
    assert!(body["submission"]["completedAt"].is_string());

    let total = data_row(&body, NODE_TOTAL);
    assert!(total["operationResult"]
        .as_str()
        .unwrap()
        .contains("(=) Result (12000)"));
}

#[tokio::test]
async fn test_verification_classifies_dynamic_rows() {
    let app = test_app().await;
    let (_, created) = send(
        &app,
        request(
            Method::POST,
            "/submissions/create-and-evaluate",
            Some(json!({"formData": intake_form()})),
        ),
    )
    .await;
    let submission_id = created["submission"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        request(
            Method::GET,
            &format!("/submissions/{}/verification", submission_id),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verification"]["total"], 4);
    assert_eq!(body["verification"]["dynamic"], 4);
    assert_eq!(body["verification"]["legacy"], 0);
    assert_eq!(body["verification"]["successRate"], "100%");
    assert_eq!(body["status"], "perfect");

    let (status, _) = send(
        &app,
        request(Method::GET, "/submissions/nope/verification", None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_verification_of_capacity_free_submission_is_fully_healthy() {
    let store = MemoryStore::new();
    store
        .upsert_tree(Tree::new(
            "org-demo".to_string(),
            "Empty intake".to_string(),
            None,
        ))
        .await
        .unwrap();
    let app = create_router().with_state(EngineState::new(Arc::new(store)));

    let (_, created) = send(
        &app,
        request(
            Method::POST,
            "/submissions/create-and-evaluate",
            Some(json!({"formData": {}})),
        ),
    )
    .await;
    let submission_id = created["submission"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        request(
            Method::GET,
            &format!("/submissions/{}/verification", submission_id),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verification"]["total"], 0);
    assert_eq!(body["verification"]["successRate"], "100%");
    assert_eq!(body["status"], "perfect");
}

#[tokio::test]
async fn test_preview_evaluate_never_touches_the_base_submission() {
    let app = test_app().await;
    let (_, created) = send(
        &app,
        request(
            Method::POST,
            "/submissions/create-and-evaluate",
            Some(json!({"formData": intake_form()})),
        ),
    )
    .await;
    let submission_id = created["submission"]["id"].as_str().unwrap().to_string();

    let (status, preview) = send(
        &app,
        request(
            Method::POST,
            "/submissions/preview-evaluate",
            Some(json!({
                "baseSubmissionId": submission_id,
                "formData": { SHARED_REF_ROOF_AREA: "10" }
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["mode"], "preview");
    let total = preview["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|result| result["nodeId"] == NODE_TOTAL)
        .unwrap();
    assert_eq!(total["calculated"], "2000");

    // The stored submission still reflects the original 40 m2.
    let (_, verification) = send(
        &app,
        request(
            Method::GET,
            &format!("/submissions/{}/verification", submission_id),
            None,
        ),
    )
    .await;
    let stored_total = verification["verification"]["details"]
        .as_array()
        .unwrap()
        .iter()
        .find(|row| row["nodeId"] == NODE_TOTAL)
        .unwrap();
    assert!(stored_total["operationResult"]
        .as_str()
        .unwrap()
        .contains("(=) Result (8000)"));
}

#[tokio::test]
async fn test_lookup_table_endpoint() {
    let app = test_app().await;
    let (status, body) = send(
        &app,
        request(Method::GET, &format!("/tables/{}", SEED_TABLE_ID), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["table"]["name"], "Yield factor");
    assert_eq!(body["table"]["matrix"][0][0], "1.00");
    assert_eq!(
        body["table"]["config"]["selectors"]["rowFieldId"],
        NODE_ORIENTATION
    );

    let (status, _) = send(&app, request(Method::GET, "/tables/nope", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_staging_round_trip() {
    let app = test_app().await;

    let (status, staged) = send(
        &app,
        request(
            Method::POST,
            "/submissions/stage",
            Some(json!({
                "treeId": "tree-solar-intake",
                "formData": {
                    SHARED_REF_ROOF_AREA: "20",
                    NODE_INCLINATION: "27",
                    NODE_ORIENTATION: "south"
                }
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stage_id = staged["stageId"].as_str().unwrap().to_string();
    assert!(stage_id.starts_with("stage_"));

    // Preview reflects the staged values without creating a submission.
    let (status, preview) = send(
        &app,
        request(
            Method::POST,
            "/submissions/stage/preview",
            Some(json!({"stageId": stage_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["mode"], "stage-preview");
    let total = preview["results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|result| result["nodeId"] == NODE_TOTAL)
        .unwrap();
    assert_eq!(total["calculated"], "4000");

    // First commit creates; second commit updates the same submission.
    let (status, first) = send(
        &app,
        request(
            Method::POST,
            "/submissions/stage/commit",
            Some(json!({"stageId": stage_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(first["saved"].as_u64().unwrap() > 0);
    let submission_id = first["submissionId"].as_str().unwrap().to_string();

    send(
        &app,
        request(
            Method::POST,
            "/submissions/stage",
            Some(json!({
                "stageId": stage_id,
                "formData": { SHARED_REF_ROOF_AREA: "30" }
            })),
        ),
    )
    .await;
    let (_, second) = send(
        &app,
        request(
            Method::POST,
            "/submissions/stage/commit",
            Some(json!({"stageId": stage_id})),
        ),
    )
    .await;
    assert_eq!(second["submissionId"], submission_id.as_str());

    // Discard succeeds, and a second discard is a safe no-op.
    let (_, discarded) = send(
        &app,
        request(
            Method::POST,
            "/submissions/stage/discard",
            Some(json!({"stageId": stage_id})),
        ),
    )
    .await;
    assert_eq!(discarded["discarded"], true);
    let (_, again) = send(
        &app,
        request(
            Method::POST,
            "/submissions/stage/discard",
            Some(json!({"stageId": stage_id})),
        ),
    )
    .await;
    assert_eq!(again["discarded"], false);
}

#[tokio::test]
async fn test_expired_stage_is_pruned() {
    let app = test_app_with_ttl(Duration::from_secs(0)).await;

    let (_, staged) = send(
        &app,
        request(
            Method::POST,
            "/submissions/stage",
            Some(json!({"formData": { SHARED_REF_ROOF_AREA: "20" }})),
        ),
    )
    .await;
    let stage_id = staged["stageId"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/submissions/stage/preview",
            Some(json!({"stageId": stage_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
