use crate::logic::aliases::apply_values;
use crate::logic::capacity::{BatchEvaluation, CapacityEvaluator, EvalStats};
use crate::logic::interpreter::OperationInterpreter;
use crate::logic::materialize::{CreateParams, MaterializeError, Materializer};
use crate::logic::sanitize::sanitize_map;
use crate::model::{generate_stage_id, Id, RequestContext, StageRecord};
use crate::store::staging::StagingStore;
use crate::store::traits::Store;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("stage {0} not found")]
    StageNotFound(Id),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default)]
pub struct StageParams {
    pub stage_id: Option<Id>,
    pub tree_id: Option<Id>,
    pub submission_id: Option<Id>,
    pub form_data: Map<String, Value>,
}

/// What a commit actually did: the submission it landed on, how many entry
/// rows were written, and the evaluation stats.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub submission_id: Id,
    pub saved: usize,
    pub stats: EvalStats,
}

/// Stage lifecycle: merge drafts, preview them without persistence, commit
/// them into real submissions, discard them. Every call starts with a lazy
/// TTL sweep of the staging store.
pub struct StagingOps;

impl StagingOps {
    /// Merges sanitized form data into a stage record, minting a new stage
    /// when no (valid) id is supplied.
    pub async fn stage(
        staging: &StagingStore,
        ctx: &RequestContext,
        params: StageParams,
    ) -> StageRecord {
        staging.prune_expired().await;

        let existing = match &params.stage_id {
            Some(id) => staging.get(id).await,
            None => None,
        };
        let mut record = existing.unwrap_or_else(|| {
            let id = params
                .stage_id
                .clone()
                .unwrap_or_else(generate_stage_id);
            StageRecord::new(id, ctx.organization_id.clone(), ctx.user_id.clone())
        });

        if params.tree_id.is_some() {
            record.tree_id = params.tree_id;
        }
        if params.submission_id.is_some() {
            record.submission_id = params.submission_id;
        }
        record.merge_form_data(sanitize_map(&params.form_data));

        staging.put(record.clone()).await;
        record
    }

    /// Evaluates a stage's draft values without writing anything: stored
    /// rows of the linked submission seed the value map, the stage's own
    /// form data overrides them.
    pub async fn preview_stage<S, I>(
        store: &S,
        staging: &StagingStore,
        interpreter: &I,
        stage_id: &Id,
    ) -> Result<BatchEvaluation, StagingError>
    where
        S: Store,
        I: OperationInterpreter<S>,
    {
        staging.prune_expired().await;
        let record = staging
            .get(stage_id)
            .await
            .ok_or_else(|| StagingError::StageNotFound(stage_id.clone()))?;

        let tree_id = Self::resolve_tree_id(store, &record).await?;

        let mut value_map: HashMap<String, Value> = HashMap::new();
        if let Some(submission_id) = &record.submission_id {
            for row in store.list_data_for_submission(submission_id).await? {
                let Some(value) = row.value else { continue };
                if let Some(node) = store.get_node(&row.node_id).await? {
                    if let Some(shared) = node.shared_reference_id {
                        value_map.insert(shared, Value::String(value.clone()));
                    }
                }
                value_map.insert(row.node_id, Value::String(value));
            }
        }
        apply_values(store, &mut value_map, &record.form_data, Some(&tree_id)).await?;

        let capacities = store.list_variables_for_tree(&tree_id).await?;
        let batch = CapacityEvaluator::evaluate_preview_batch(
            store,
            interpreter,
            capacities,
            record.submission_id.as_ref(),
            &mut value_map,
        )
        .await?;

        Ok(batch)
    }

    /// Turns a stage into a persisted, evaluated submission. When the stage
    /// is already linked to a submission and `as_new` is false the linked
    /// submission is updated; otherwise a fresh one is created and its id is
    /// written back to the stage so later commits update rather than
    /// duplicate.
    pub async fn commit_stage<S, I>(
        store: &S,
        staging: &StagingStore,
        interpreter: &I,
        ctx: &RequestContext,
        stage_id: &Id,
        as_new: bool,
    ) -> Result<CommitOutcome, StagingError>
    where
        S: Store,
        I: OperationInterpreter<S>,
    {
        staging.prune_expired().await;
        let mut record = staging
            .get(stage_id)
            .await
            .ok_or_else(|| StagingError::StageNotFound(stage_id.clone()))?;

        let linked = match (&record.submission_id, as_new) {
            (Some(id), false) => store.get_submission(id).await?.map(|s| s.id),
            _ => None,
        };

        let materialized = match linked {
            Some(submission_id) => {
                Materializer::update_and_evaluate(
                    store,
                    interpreter,
                    &submission_id,
                    Some(record.form_data.clone()),
                    None,
                )
                .await?
            }
            None => {
                let materialized = Materializer::create_and_evaluate(
                    store,
                    interpreter,
                    ctx,
                    CreateParams {
                        tree_id: record.tree_id.clone(),
                        form_data: record.form_data.clone(),
                        ..Default::default()
                    },
                )
                .await?;
                record.submission_id = Some(materialized.submission.submission.id.clone());
                staging.put(record.clone()).await;
                materialized
            }
        };

        Ok(CommitOutcome {
            submission_id: materialized.submission.submission.id,
            saved: materialized.entries_written,
            stats: materialized.batch.stats,
        })
    }

    /// Unconditional removal; returns whether a record was actually dropped.
    pub async fn discard_stage(staging: &StagingStore, stage_id: &Id) -> bool {
        staging.prune_expired().await;
        staging.remove(stage_id).await
    }

    async fn resolve_tree_id<S: Store + ?Sized>(
        store: &S,
        record: &StageRecord,
    ) -> Result<Id, StagingError> {
        if let Some(tree_id) = &record.tree_id {
            if store.get_tree(tree_id).await?.is_some() {
                return Ok(tree_id.clone());
            }
            log::warn!("stage {} names unknown tree {}", record.id, tree_id);
        }
        if let Some(submission_id) = &record.submission_id {
            if let Some(submission) = store.get_submission(submission_id).await? {
                return Ok(submission.tree_id);
            }
        }
        store
            .first_tree()
            .await?
            .map(|tree| tree.id)
            .ok_or_else(|| StagingError::Materialize(MaterializeError::NoTreeAvailable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::interpreter::StoredOperationInterpreter;
    use crate::model::{
        ArithmeticOp, FormulaToken, NodeVariable, OperationConfig, StoredOperation, Tree, TreeNode,
    };
    use crate::store::memory::MemoryStore;
    use crate::store::traits::{OperationStore, SubmissionStore, TreeStore};
    use serde_json::json;
    use std::time::Duration;

    async fn seeded() -> (MemoryStore, Id, Id) {
        let store = MemoryStore::new();
        let tree = Tree::new("org-1".to_string(), "Roof audit".to_string(), None);
        store.upsert_tree(tree.clone()).await.unwrap();

        let input = TreeNode::new(tree.id.clone(), "Roof area".to_string());
        let input_id = input.id.clone();
        store.upsert_node(input).await.unwrap();

        let out = TreeNode::new(tree.id.clone(), "Doubled".to_string());
        let out_id = out.id.clone();
        store.upsert_node(out).await.unwrap();

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
            .upsert_variable(NodeVariable::new(out_id, "formula:op-double"))
            .await
            .unwrap();

        (store, tree.id, input_id)
    }

    fn ctx() -> RequestContext {
        RequestContext::anonymous("org-1".to_string())
    }

    #[tokio::test]
    async fn test_stage_merges_and_keeps_id() {
        let staging = StagingStore::new();

        let mut first = Map::new();
        first.insert("node_1757366229534_aa11bb".to_string(), json!("1"));
        let record = StagingOps::stage(
            &staging,
            &ctx(),
            StageParams {
                form_data: first,
                ..Default::default()
            },
        )
        .await;
        assert!(record.id.starts_with("stage_"));

        let mut second = Map::new();
        second.insert("node_1757366229534_aa11bb".to_string(), json!("2"));
        second.insert("node_1757366229534_cc22dd".to_string(), json!("3"));
        let merged = StagingOps::stage(
            &staging,
            &ctx(),
            StageParams {
                stage_id: Some(record.id.clone()),
                form_data: second,
                ..Default::default()
            },
        )
        .await;

        assert_eq!(merged.id, record.id);
        assert_eq!(merged.form_data.len(), 2);
        assert_eq!(merged.form_data["node_1757366229534_aa11bb"], json!("2"));
    }

    #[tokio::test]
    async fn test_preview_reflects_staged_values_without_writes() {
        let (store, tree_id, input_id) = seeded().await;
        let staging = StagingStore::new();
        let interpreter = StoredOperationInterpreter;

        let mut form_data = Map::new();
        form_data.insert(input_id, json!("5"));
        let record = StagingOps::stage(
            &staging,
            &ctx(),
            StageParams {
                tree_id: Some(tree_id),
                form_data,
                ..Default::default()
            },
        )
        .await;

        let batch = StagingOps::preview_stage(&store, &staging, &interpreter, &record.id)
            .await
            .unwrap();
        assert_eq!(batch.stats.evaluated, 1);
        assert_eq!(batch.results[0].calculated.as_deref(), Some("10"));
        assert_eq!(batch.stats.writes, 0);
    }

    #[tokio::test]
    async fn test_commit_creates_then_updates_the_same_submission() {
        let (store, tree_id, input_id) = seeded().await;
        let staging = StagingStore::new();
        let interpreter = StoredOperationInterpreter;

        let mut form_data = Map::new();
        form_data.insert(input_id.clone(), json!("5"));
        let record = StagingOps::stage(
            &staging,
            &ctx(),
            StageParams {
                tree_id: Some(tree_id),
                form_data,
                ..Default::default()
            },
        )
        .await;

        let first = StagingOps::commit_stage(
            &store,
            &staging,
            &interpreter,
            &ctx(),
            &record.id,
            false,
        )
        .await
        .unwrap();
        assert!(first.saved > 0);

        let mut more = Map::new();
        more.insert(input_id, json!("8"));
        StagingOps::stage(
            &staging,
            &ctx(),
            StageParams {
                stage_id: Some(record.id.clone()),
                form_data: more,
                ..Default::default()
            },
        )
        .await;

        let second = StagingOps::commit_stage(
            &store,
            &staging,
            &interpreter,
            &ctx(),
            &record.id,
            false,
        )
        .await
        .unwrap();
        assert_eq!(second.submission_id, first.submission_id);
        assert!(store
            .get_submission(&first.submission_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_discard_unknown_stage_is_a_safe_no_op() {
        let staging = StagingStore::new();
        assert!(!StagingOps::discard_stage(&staging, &"stage_missing".to_string()).await);
    }

    #[tokio::test]
    async fn test_expired_stage_is_gone_from_preview() {
        let (store, _tree_id, _input_id) = seeded().await;
        let staging = StagingStore::with_ttl(Duration::from_secs(0));
        let interpreter = StoredOperationInterpreter;

        let record = StagingOps::stage(&staging, &ctx(), StageParams::default()).await;
        let err = StagingOps::preview_stage(&store, &staging, &interpreter, &record.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StagingError::StageNotFound(_)));
    }
}
