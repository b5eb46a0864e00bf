use crate::logic::capacity::{BatchEvaluation, CapacityEvaluator};
use crate::logic::entries::save_user_entries_neutral;
use crate::logic::interpreter::OperationInterpreter;
use crate::logic::sanitize::sanitize_map;
use crate::model::{
    now_iso, Id, Lead, NodeVariable, RequestContext, Submission, SubmissionStatus,
    SubmissionWithData,
};
use crate::store::traits::{CalculatedValueStore, Store};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("no tree available to attach the submission to")]
    NoTreeAvailable,
    #[error("submission {0} not found")]
    SubmissionNotFound(Id),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Inputs for creating (or re-materializing) a submission from raw form data.
#[derive(Debug, Clone, Default)]
pub struct CreateParams {
    pub tree_id: Option<Id>,
    pub lead_id: Option<Id>,
    pub form_data: Map<String, Value>,
    pub status: Option<String>,
    pub provided_name: Option<String>,
    pub reuse_submission_id: Option<Id>,
}

/// A submission after entry persistence and capacity evaluation, together
/// with what the run actually did.
#[derive(Debug, Clone)]
pub struct MaterializedSubmission {
    pub submission: SubmissionWithData,
    pub entries_written: usize,
    pub batch: BatchEvaluation,
}

/// Outcome summary of a calculated-value cache flush; failures are recorded
/// here rather than propagated.
#[derive(Debug, Clone, Default)]
pub struct CalculatedStoreSummary {
    pub stored: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl CalculatedStoreSummary {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Flushes concrete batch results into the calculated-value cache. Unknown
/// nodes and storage failures are logged and counted, never raised: the
/// cache is an optimization, not part of the evaluation contract.
pub async fn store_calculated_values<S: CalculatedValueStore + ?Sized>(
    store: &S,
    values: &[(Id, String)],
    calculated_by: &str,
) -> CalculatedStoreSummary {
    let mut summary = CalculatedStoreSummary::default();
    for (node_id, value) in values {
        match store.set_calculated_value(node_id, value, calculated_by).await {
            Ok(true) => summary.stored += 1,
            Ok(false) => {
                summary.failed += 1;
                summary.errors.push(format!("unknown node {}", node_id));
            }
            Err(e) => {
                summary.failed += 1;
                summary.errors.push(format!("node {}: {}", node_id, e));
            }
        }
    }
    if summary.failed > 0 {
        log::warn!(
            "calculated-value cache: {} stored, {} failed ({})",
            summary.stored,
            summary.failed,
            summary.errors.join("; ")
        );
    }
    summary
}

/// Orchestrates the submission lifecycle: resolve context, persist entries,
/// evaluate capacities, read the result back.
pub struct Materializer;

impl Materializer {
    /// Creates (or reuses) a submission, saves sanitized entries and runs
    /// every capacity of the tree.
    pub async fn create_and_evaluate<S, I>(
        store: &S,
        interpreter: &I,
        ctx: &RequestContext,
        params: CreateParams,
    ) -> Result<MaterializedSubmission, MaterializeError>
    where
        S: Store,
        I: OperationInterpreter<S>,
    {
        let tree = Self::resolve_tree(store, params.tree_id.as_ref()).await?;
        let lead_id = Self::resolve_lead(store, ctx, params.lead_id).await?;
        let user_id = Self::resolve_user(store, ctx).await?;

        let form_data = sanitize_map(&params.form_data);

        let mut submission = match &params.reuse_submission_id {
            Some(id) => match store.get_submission(id).await? {
                Some(existing) => existing,
                None => {
                    log::warn!("reuse submission {} not found, creating a new one", id);
                    Submission::new(tree.id.clone(), user_id.clone(), lead_id.clone())
                }
            },
            None => Submission::new(tree.id.clone(), user_id.clone(), lead_id.clone()),
        };
        submission.tree_id = tree.id.clone();
        if lead_id.is_some() {
            submission.lead_id = lead_id;
        }
        if let Some(status) = &params.status {
            submission.status = SubmissionStatus::from_str(status);
        }
        if let Some(name) = &params.provided_name {
            submission.summary = Some(json!({ "name": name }));
        }
        submission.export_data = Some(Value::Object(form_data.clone()));
        submission.updated_at = now_iso();
        if submission.status == SubmissionStatus::Completed && submission.completed_at.is_none() {
            submission.completed_at = Some(now_iso());
        }
        store.upsert_submission(submission.clone()).await?;

        Self::persist_and_evaluate(store, interpreter, &submission, &form_data).await
    }

    /// Updates an existing submission in place. `404` semantics: the
    /// submission must already exist.
    pub async fn update_and_evaluate<S, I>(
        store: &S,
        interpreter: &I,
        submission_id: &Id,
        form_data: Option<Map<String, Value>>,
        status: Option<String>,
    ) -> Result<MaterializedSubmission, MaterializeError>
    where
        S: Store,
        I: OperationInterpreter<S>,
    {
        let mut submission = store
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| MaterializeError::SubmissionNotFound(submission_id.clone()))?;

        let sanitized = form_data.as_ref().map(sanitize_map);

        let mut changed = false;
        if let Some(status) = &status {
            let next = SubmissionStatus::from_str(status);
            if submission.status != next {
                if next == SubmissionStatus::Completed {
                    submission.completed_at = Some(now_iso());
                }
                submission.status = next;
                changed = true;
            }
        }
        if let Some(sanitized) = &sanitized {
            let snapshot = Value::Object(sanitized.clone());
            if submission.export_data.as_ref() != Some(&snapshot) {
                submission.export_data = Some(snapshot);
                changed = true;
            }
        }
        if changed {
            submission.updated_at = now_iso();
            store.upsert_submission(submission.clone()).await?;
        }

        let entries = sanitized.unwrap_or_default();
        Self::persist_and_evaluate(store, interpreter, &submission, &entries).await
    }

    /// Re-runs the evaluator over the submission's existing capacity rows
    /// without re-entering any data. Rows that are already resolved are
    /// skipped unless `force_update` is set. Returns the total number of
    /// capacity rows alongside the batch outcome.
    pub async fn evaluate_all<S, I>(
        store: &S,
        interpreter: &I,
        submission_id: &Id,
        force_update: bool,
    ) -> Result<(usize, BatchEvaluation), MaterializeError>
    where
        S: Store,
        I: OperationInterpreter<S>,
    {
        let submission = store
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| MaterializeError::SubmissionNotFound(submission_id.clone()))?;

        let rows = store.list_data_for_submission(submission_id).await?;
        let mut value_map: HashMap<String, Value> = HashMap::new();
        for row in &rows {
            if let Some(value) = &row.value {
                value_map.insert(row.node_id.clone(), Value::String(value.clone()));
            }
        }

        let mut capacities = Vec::new();
        let mut skipped = 0usize;
        let mut total = 0usize;
        for row in &rows {
            let Some(source_ref) = &row.source_ref else {
                continue;
            };
            total += 1;
            if !force_update && row.operation_result.is_some() && row.last_resolved.is_some() {
                skipped += 1;
                continue;
            }
            // A row can outlive its capacity declaration; fall back to an
            // ephemeral one built from the row's own sourceRef.
            let capacity = match store.get_variable_for_node(&row.node_id).await? {
                Some(variable) => variable,
                None => NodeVariable::new(row.node_id.clone(), source_ref),
            };
            capacities.push(capacity);
        }

        let mut batch =
            CapacityEvaluator::evaluate_batch(store, interpreter, capacities, submission_id, &mut value_map)
                .await?;
        batch.stats.skipped = skipped;

        store_calculated_values(
            store,
            &batch.calculated,
            &format!("submission:{}", submission.id),
        )
        .await;

        Ok((total, batch))
    }

    /// Re-reads a submission with all of its data rows.
    pub async fn read_back<S: Store + ?Sized>(
        store: &S,
        submission_id: &Id,
    ) -> Result<SubmissionWithData, MaterializeError> {
        let submission = store
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| MaterializeError::SubmissionNotFound(submission_id.clone()))?;
        let data = store.list_data_for_submission(submission_id).await?;
        Ok(SubmissionWithData { submission, data })
    }

    async fn persist_and_evaluate<S, I>(
        store: &S,
        interpreter: &I,
        submission: &Submission,
        form_data: &Map<String, Value>,
    ) -> Result<MaterializedSubmission, MaterializeError>
    where
        S: Store,
        I: OperationInterpreter<S>,
    {
        let entries_written = save_user_entries_neutral(
            store,
            &submission.id,
            form_data,
            Some(&submission.tree_id),
        )
        .await?;

        // Seed the evaluation value map from everything the submission now
        // holds, then layer the incoming entries with alias expansion on top.
        let mut value_map: HashMap<String, Value> = HashMap::new();
        for row in store.list_data_for_submission(&submission.id).await? {
            if let Some(value) = row.value {
                value_map.insert(row.node_id, Value::String(value));
            }
        }
        crate::logic::aliases::apply_values(
            store,
            &mut value_map,
            form_data,
            Some(&submission.tree_id),
        )
        .await?;

        let capacities = store.list_variables_for_tree(&submission.tree_id).await?;
        let batch = CapacityEvaluator::evaluate_batch(
            store,
            interpreter,
            capacities,
            &submission.id,
            &mut value_map,
        )
        .await?;

        store_calculated_values(
            store,
            &batch.calculated,
            &format!("submission:{}", submission.id),
        )
        .await;

        let submission = Self::read_back(store, &submission.id).await?;
        Ok(MaterializedSubmission {
            submission,
            entries_written,
            batch,
        })
    }

    async fn resolve_tree<S: Store + ?Sized>(
        store: &S,
        tree_id: Option<&Id>,
    ) -> Result<crate::model::Tree, MaterializeError> {
        if let Some(tree_id) = tree_id {
            if let Some(tree) = store.get_tree(tree_id).await? {
                return Ok(tree);
            }
            log::warn!("tree {} not found, falling back to any existing tree", tree_id);
        }
        store
            .first_tree()
            .await?
            .ok_or(MaterializeError::NoTreeAvailable)
    }

    async fn resolve_lead<S: Store + ?Sized>(
        store: &S,
        ctx: &RequestContext,
        lead_id: Option<Id>,
    ) -> Result<Option<Id>, MaterializeError> {
        let Some(lead_id) = lead_id else {
            return Ok(None);
        };
        if store.get_lead(&lead_id).await?.is_none() {
            log::warn!("lead {} not found, creating a placeholder", lead_id);
            store
                .upsert_lead(Lead::placeholder(lead_id.clone(), ctx.organization_id.clone()))
                .await?;
        }
        Ok(Some(lead_id))
    }

    async fn resolve_user<S: Store + ?Sized>(
        store: &S,
        ctx: &RequestContext,
    ) -> Result<Option<Id>, MaterializeError> {
        if store.user_exists(&ctx.user_id).await? {
            Ok(Some(ctx.user_id.clone()))
        } else {
            log::warn!("user {} not registered, storing submission without one", ctx.user_id);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::interpreter::StoredOperationInterpreter;
    use crate::model::{
        ArithmeticOp, FormulaToken, OperationConfig, StoredOperation, Tree, TreeNode,
    };
    use crate::store::memory::MemoryStore;
    use crate::store::traits::{LeadStore, OperationStore, SubmissionStore, TreeStore};
    use serde_json::json;

    async fn seeded() -> (MemoryStore, Id, Id, Id) {
        let store = MemoryStore::new();
        let tree = Tree::new("org-1".to_string(), "Roof audit".to_string(), None);
        store.upsert_tree(tree.clone()).await.unwrap();

        let input = TreeNode::new(tree.id.clone(), "Roof area".to_string());
        let input_id = input.id.clone();
        store.upsert_node(input.clone()).await.unwrap();

        let doubled = TreeNode::new(tree.id.clone(), "Doubled area".to_string());
        let doubled_id = doubled.id.clone();
        store.upsert_node(doubled).await.unwrap();

        store
            .upsert_operation(StoredOperation {
                id: "op-double".to_string(),
                tree_id: Some(tree.id.clone()),
                config: OperationConfig::Formula {
                    tokens: vec![
                        FormulaToken::NodeRef {
                            node_id: input_id.clone(),
                        },
                        FormulaToken::Operator {
                            op: ArithmeticOp::Mul,
                        },
                        FormulaToken::Number { value: 2.0 },
                    ],
                },
            })
            .await
            .unwrap();
        store
            .upsert_variable(NodeVariable::new(doubled_id.clone(), "formula:op-double"))
            .await
            .unwrap();

        (store, tree.id, input_id, doubled_id)
    }

    fn ctx() -> RequestContext {
        RequestContext {
            organization_id: "org-1".to_string(),
            user_id: "unknown-user".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_evaluate_persists_entries_and_results() {
        let (store, tree_id, input_id, doubled_id) = seeded().await;
        let interpreter = StoredOperationInterpreter;

        let mut form_data = Map::new();
        form_data.insert(input_id.clone(), json!("21"));
        form_data.insert("__mirror_input".to_string(), json!("ignored"));

        let result = Materializer::create_and_evaluate(
            &store,
            &interpreter,
            &ctx(),
            CreateParams {
                tree_id: Some(tree_id),
                form_data,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(result.entries_written, 1);
        assert_eq!(result.batch.stats.evaluated, 1);
        assert_eq!(result.batch.stats.errors, 0);

        let computed = store
            .get_data_row(&result.submission.submission.id, &doubled_id)
            .await
            .unwrap()
            .unwrap();
        assert!(computed.last_resolved.is_some());
        let trace = computed.operation_result.unwrap();
        assert!(trace.as_str().unwrap().contains("(=) Result (42)"));

        // The whole result, batch included, is cloneable.
        let copy = result.clone();
        assert_eq!(copy.batch.results.len(), result.batch.results.len());
        assert_eq!(copy.submission.submission.id, result.submission.submission.id);
    }

    #[tokio::test]
    async fn test_missing_tree_falls_back_to_any_tree() {
        let (store, tree_id, _input_id, _doubled_id) = seeded().await;
        let interpreter = StoredOperationInterpreter;

        let result = Materializer::create_and_evaluate(
            &store,
            &interpreter,
            &ctx(),
            CreateParams {
                tree_id: Some("no-such-tree".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(result.submission.submission.tree_id, tree_id);
    }

    #[tokio::test]
    async fn test_no_tree_at_all_is_rejected() {
        let store = MemoryStore::new();
        let interpreter = StoredOperationInterpreter;

        let err = Materializer::create_and_evaluate(
            &store,
            &interpreter,
            &ctx(),
            CreateParams::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MaterializeError::NoTreeAvailable));
    }

    #[tokio::test]
    async fn test_update_requires_existing_submission() {
        let (store, _tree_id, _input_id, _doubled_id) = seeded().await;
        let interpreter = StoredOperationInterpreter;

        let err = Materializer::update_and_evaluate(
            &store,
            &interpreter,
            &"missing".to_string(),
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MaterializeError::SubmissionNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_to_completed_sets_completed_at() {
        let (store, tree_id, input_id, _doubled_id) = seeded().await;
        let interpreter = StoredOperationInterpreter;

        let mut form_data = Map::new();
        form_data.insert(input_id, json!("10"));
        let created = Materializer::create_and_evaluate(
            &store,
            &interpreter,
            &ctx(),
            CreateParams {
                tree_id: Some(tree_id),
                form_data,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let id = created.submission.submission.id.clone();

        let updated = Materializer::update_and_evaluate(
            &store,
            &interpreter,
            &id,
            None,
            Some("completed".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(
            updated.submission.submission.status,
            SubmissionStatus::Completed
        );
        assert!(updated.submission.submission.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_evaluate_all_skips_resolved_rows_without_force() {
        let (store, tree_id, input_id, _doubled_id) = seeded().await;
        let interpreter = StoredOperationInterpreter;

        let mut form_data = Map::new();
        form_data.insert(input_id, json!("10"));
        let created = Materializer::create_and_evaluate(
            &store,
            &interpreter,
            &ctx(),
            CreateParams {
                tree_id: Some(tree_id),
                form_data,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let id = created.submission.submission.id.clone();

        let (total, batch) = Materializer::evaluate_all(&store, &interpreter, &id, false)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(batch.stats.skipped, 1);
        assert_eq!(batch.stats.writes, 0);

        let (_total, forced) = Materializer::evaluate_all(&store, &interpreter, &id, true)
            .await
            .unwrap();
        assert_eq!(forced.stats.evaluated, 1);
        // Same result as before: the diff still suppresses the write.
        assert_eq!(forced.stats.writes, 0);
    }

    #[tokio::test]
    async fn test_unknown_lead_gets_a_placeholder() {
        let (store, tree_id, _input_id, _doubled_id) = seeded().await;
        let interpreter = StoredOperationInterpreter;

        let result = Materializer::create_and_evaluate(
            &store,
            &interpreter,
            &ctx(),
            CreateParams {
                tree_id: Some(tree_id),
                lead_id: Some("lead-77".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(
            result.submission.submission.lead_id.as_deref(),
            Some("lead-77")
        );
        let lead = store
            .get_lead(&"lead-77".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lead.organization_id, "org-1");
    }
}
