use crate::logic::interpreter::{is_empty_value, OperationInterpreter};
use crate::model::{
    now_iso, Id, NodeVariable, OperationDetail, OperationOutcome, OperationSource,
    SubmissionDataRow,
};
use crate::store::traits::Store;
use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

/// One capacity's outcome within an evaluation batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityOutcome {
    pub node_id: Id,
    pub node_label: Option<String>,
    pub source_ref: String,
    pub success: bool,
    pub operation_source: OperationSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub operation_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Scalar queued for the calculated-value cache, when one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculated: Option<String>,
    /// True when this evaluation changed the stored row.
    pub updated: bool,
}

/// Write/skip accounting for one evaluation pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalStats {
    pub evaluated: usize,
    pub errors: usize,
    pub writes: usize,
    pub skipped: usize,
}

/// A batch's per-capacity results plus the concrete scalars collected for
/// the calculated-value cache.
#[derive(Debug, Clone, Default)]
pub struct BatchEvaluation {
    pub results: Vec<CapacityOutcome>,
    pub stats: EvalStats,
    pub calculated: Vec<(Id, String)>,
}

/// Runs capacities through the interpreter, normalizes what comes back, and
/// persists only genuine changes.
pub struct CapacityEvaluator;

impl CapacityEvaluator {
    fn is_aggregate(source_ref: &str) -> bool {
        source_ref.contains("sum-formula") || source_ref.contains("sum-total")
    }

    /// Stable-sorts capacities so aggregates (`sum-formula`/`sum-total`)
    /// evaluate last. Aggregates read the outputs of simpler formulas from
    /// the value map, so those must resolve first; within each class the
    /// input order is preserved.
    pub fn order_for_evaluation(capacities: &mut [NodeVariable]) {
        capacities.sort_by_key(|capacity| Self::is_aggregate(&capacity.source_ref));
    }

    /// Detail payloads that arrive as JSON text are parsed; unparseable
    /// strings stay as they are.
    fn normalize_detail(detail: Option<Value>) -> Option<Value> {
        match detail {
            Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
                Ok(parsed) => Some(parsed),
                Err(_) => Some(Value::String(s)),
            },
            other => other,
        }
    }

    /// Stable scalar rendering used by the diff check: strings as-is,
    /// everything else through JSON serialization.
    fn normalize_for_diff(value: Option<&Value>) -> Option<String> {
        match value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => serde_json::to_string(other).ok(),
        }
    }

    fn detail_as_value(detail: &Option<OperationDetail>) -> Option<Value> {
        detail.as_ref().and_then(|d| serde_json::to_value(d).ok())
    }

    /// Picks the scalar worth caching: `value` first, then the detail's
    /// `calculatedResult`, then the human-readable result. Blank and
    /// sentinel values yield nothing.
    fn best_scalar(outcome: &OperationOutcome) -> Option<String> {
        let candidate = [
            outcome.value.as_ref(),
            outcome
                .operation_detail
                .as_ref()
                .and_then(|detail| detail.get("calculatedResult")),
            outcome.operation_result.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find(|value| !value.is_null())?;

        if is_empty_value(Some(candidate)) {
            return None;
        }
        Some(match candidate {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        })
    }

    /// Evaluates one capacity and upserts its submission row. The stored
    /// row is diffed first: an identical, already-resolved row is left
    /// untouched so `lastResolved` never churns on no-op re-evaluations.
    pub async fn evaluate_and_store<S, I>(
        store: &S,
        interpreter: &I,
        capacity: &NodeVariable,
        submission_id: &Id,
        value_map: &mut HashMap<String, Value>,
    ) -> Result<CapacityOutcome>
    where
        S: Store,
        I: OperationInterpreter<S>,
    {
        let raw = interpreter
            .evaluate(&capacity.node_id, Some(submission_id), store, value_map)
            .await;

        let node_label = store
            .get_node(&capacity.node_id)
            .await?
            .map(|node| node.label);

        let (outcome, error) = match raw {
            Ok(outcome) => (outcome, None),
            Err(e) => {
                log::warn!(
                    "capacity {} ({}) failed to evaluate: {}",
                    capacity.node_id,
                    capacity.source_ref,
                    e
                );
                let message = e.to_string();
                let fallback = OperationOutcome {
                    value: None,
                    operation_source: Some("error".to_string()),
                    operation_detail: Some(json!({"type": "error", "message": message})),
                    operation_result: Some(Value::String(format!("Error: {}", message))),
                };
                (fallback, Some(message))
            }
        };

        let success = error.is_none();
        let operation_source = OperationSource::normalize(outcome.operation_source.as_deref());
        let operation_detail = Self::normalize_detail(outcome.operation_detail.clone());
        let operation_result = outcome.operation_result.clone();

        // Concrete results become visible to later capacities in the same
        // batch and are queued for the calculated-value cache.
        let calculated = if success { Self::best_scalar(&outcome) } else { None };
        if let Some(calculated) = &calculated {
            value_map.insert(capacity.node_id.clone(), Value::String(calculated.clone()));
        }

        let existing = store.get_data_row(submission_id, &capacity.node_id).await?;
        let unchanged = match &existing {
            Some(row) => {
                row.source_ref.as_deref() == Some(capacity.source_ref.as_str())
                    && row.operation_source == operation_source
                    && Self::normalize_for_diff(
                        Self::detail_as_value(&row.operation_detail).as_ref(),
                    ) == Self::normalize_for_diff(operation_detail.as_ref())
                    && Self::normalize_for_diff(row.operation_result.as_ref())
                        == Self::normalize_for_diff(operation_result.as_ref())
                    && row.field_label == node_label
                    && (!success || row.last_resolved.is_some())
            }
            None => false,
        };

        let updated = if unchanged {
            false
        } else {
            let now = now_iso();
            let mut row = existing.unwrap_or_else(|| {
                SubmissionDataRow::new(submission_id.clone(), capacity.node_id.clone())
            });
            row.source_ref = Some(capacity.source_ref.clone());
            row.operation_source = operation_source;
            row.operation_detail = operation_detail.map(OperationDetail::Trace);
            row.operation_result = operation_result.clone();
            row.field_label = node_label.clone();
            if success {
                row.last_resolved = Some(now.clone());
            }
            row.updated_at = now;
            store.upsert_data_row(row).await?;
            true
        };

        Ok(CapacityOutcome {
            node_id: capacity.node_id.clone(),
            node_label,
            source_ref: capacity.source_ref.clone(),
            success,
            operation_source,
            value: outcome.value,
            operation_result,
            error,
            calculated,
            updated,
        })
    }

    /// Runs a whole batch sequentially in aggregate-last order, persisting
    /// each outcome. A failing capacity is recorded and the batch moves on.
    pub async fn evaluate_batch<S, I>(
        store: &S,
        interpreter: &I,
        mut capacities: Vec<NodeVariable>,
        submission_id: &Id,
        value_map: &mut HashMap<String, Value>,
    ) -> Result<BatchEvaluation>
    where
        S: Store,
        I: OperationInterpreter<S>,
    {
        Self::order_for_evaluation(&mut capacities);

        let mut batch = BatchEvaluation::default();
        for capacity in &capacities {
            let outcome =
                Self::evaluate_and_store(store, interpreter, capacity, submission_id, value_map)
                    .await?;
            Self::account(&mut batch, outcome);
        }
        Ok(batch)
    }

    /// Read-only batch used by previews: same ordering and value
    /// propagation, but submission rows are never touched.
    pub async fn evaluate_preview_batch<S, I>(
        store: &S,
        interpreter: &I,
        mut capacities: Vec<NodeVariable>,
        base_submission_id: Option<&Id>,
        value_map: &mut HashMap<String, Value>,
    ) -> Result<BatchEvaluation>
    where
        S: Store,
        I: OperationInterpreter<S>,
    {
        Self::order_for_evaluation(&mut capacities);

        let mut batch = BatchEvaluation::default();
        for capacity in &capacities {
            let raw = interpreter
                .evaluate(&capacity.node_id, base_submission_id, store, value_map)
                .await;
            let node_label = store
                .get_node(&capacity.node_id)
                .await?
                .map(|node| node.label);

            let outcome = match raw {
                Ok(outcome) => {
                    let calculated = Self::best_scalar(&outcome);
                    if let Some(calculated) = &calculated {
                        value_map
                            .insert(capacity.node_id.clone(), Value::String(calculated.clone()));
                    }
                    CapacityOutcome {
                        node_id: capacity.node_id.clone(),
                        node_label,
                        source_ref: capacity.source_ref.clone(),
                        success: true,
                        operation_source: OperationSource::normalize(
                            outcome.operation_source.as_deref(),
                        ),
                        value: outcome.value,
                        operation_result: outcome.operation_result,
                        error: None,
                        calculated,
                        updated: false,
                    }
                }
                Err(e) => {
                    log::warn!(
                        "preview capacity {} ({}) failed to evaluate: {}",
                        capacity.node_id,
                        capacity.source_ref,
                        e
                    );
                    CapacityOutcome {
                        node_id: capacity.node_id.clone(),
                        node_label,
                        source_ref: capacity.source_ref.clone(),
                        success: false,
                        operation_source: OperationSource::Error,
                        value: None,
                        operation_result: Some(Value::String(format!("Error: {}", e))),
                        error: Some(e.to_string()),
                        calculated: None,
                        updated: false,
                    }
                }
            };
            Self::account(&mut batch, outcome);
        }
        Ok(batch)
    }

    fn account(batch: &mut BatchEvaluation, outcome: CapacityOutcome) {
        batch.stats.evaluated += 1;
        if !outcome.success {
            batch.stats.errors += 1;
        }
        if outcome.updated {
            batch.stats.writes += 1;
        } else if outcome.success {
            batch.stats.skipped += 1;
        }
        if let Some(calculated) = &outcome.calculated {
            batch
                .calculated
                .push((outcome.node_id.clone(), calculated.clone()));
        }
        batch.results.push(outcome);
    }
}
