use crate::model::{
    ArithmeticOp, ConditionBranch, ConditionOp, ConditionOutcome, FormulaToken, Id, Operand,
    OperationConfig, OperationOutcome,
};
use crate::store::traits::Store;
use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Sentinel the form UI uses for "no value"; treated as empty everywhere.
pub const EMPTY_SENTINEL: &str = "∅";

/// Contract of the capacity interpreter: one variable node in, one raw
/// outcome out. The evaluation pipeline depends only on this seam, so tests
/// can substitute failing or canned interpreters.
#[async_trait::async_trait]
pub trait OperationInterpreter<S: Store>: Send + Sync {
    async fn evaluate(
        &self,
        node_id: &Id,
        submission_id: Option<&Id>,
        store: &S,
        value_map: &HashMap<String, Value>,
    ) -> Result<OperationOutcome>;
}

/// Interpreter backed by stored operation configurations, addressed through
/// a capacity's `source_ref` (`formula:<id>`, `condition:<id>`,
/// `table:<id>`).
pub struct StoredOperationInterpreter;

#[async_trait::async_trait]
impl<S: Store> OperationInterpreter<S> for StoredOperationInterpreter {
    async fn evaluate(
        &self,
        node_id: &Id,
        submission_id: Option<&Id>,
        store: &S,
        value_map: &HashMap<String, Value>,
    ) -> Result<OperationOutcome> {
        let variable = store
            .get_variable_for_node(node_id)
            .await?
            .ok_or_else(|| anyhow!("node {} has no capacity to evaluate", node_id))?;
        Self::evaluate_source_ref(store, &variable.source_ref, submission_id, value_map).await
    }
}

impl StoredOperationInterpreter {
    /// Resolves a `source_ref` to its stored operation and interprets it.
    /// Unknown kinds and missing operations are hard errors; the caller's
    /// error isolation turns them into `error` rows.
    pub async fn evaluate_source_ref<S: Store>(
        store: &S,
        source_ref: &str,
        submission_id: Option<&Id>,
        value_map: &HashMap<String, Value>,
    ) -> Result<OperationOutcome> {
        let (kind, operation_id) = source_ref
            .split_once(':')
            .ok_or_else(|| anyhow!("malformed source_ref '{}'", source_ref))?;

        let operation = store.get_operation(&operation_id.to_string()).await?.ok_or_else(|| {
            anyhow!(
                "operation '{}' not found for source_ref '{}'",
                operation_id,
                source_ref
            )
        })?;

        match kind.trim().to_ascii_lowercase().as_str() {
            "formula" => match &operation.config {
                OperationConfig::Formula { tokens } => {
                    interpret_formula(store, &operation.id, tokens, submission_id, value_map).await
                }
                _ => Err(anyhow!("source_ref '{}' does not name a formula", source_ref)),
            },
            "condition" => match &operation.config {
                OperationConfig::Condition { branches, fallback } => {
                    interpret_condition(
                        store,
                        &operation.id,
                        branches,
                        fallback.as_ref(),
                        submission_id,
                        value_map,
                    )
                    .await
                }
                _ => Err(anyhow!(
                    "source_ref '{}' does not name a condition",
                    source_ref
                )),
            },
            "table" => match &operation.config {
                OperationConfig::Table { table_id } => {
                    interpret_table(store, table_id, submission_id, value_map).await
                }
                _ => Err(anyhow!("source_ref '{}' does not name a table", source_ref)),
            },
            other => Err(anyhow!("unsupported source_ref kind '{}'", other)),
        }
    }
}

/// Parses a loosely formatted numeric value. Accepts decimal commas and
/// embedded spaces ("1 234,56"), plain numbers, and booleans as 1/0.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !c.is_whitespace())
                .map(|c| if c == ',' { '.' } else { c })
                .collect();
            if cleaned.is_empty() || cleaned == EMPTY_SENTINEL {
                return None;
            }
            cleaned.parse::<f64>().ok()
        }
        _ => None,
    }
}

/// True when a resolved value carries no usable content (missing, null,
/// blank, or the empty sentinel).
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            trimmed.is_empty() || trimmed == EMPTY_SENTINEL
        }
        Some(_) => false,
    }
}

/// Formats a computed number the way traces show it: integers without a
/// decimal point, everything else in plain decimal notation.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{:.6}", n)
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => EMPTY_SENTINEL.to_string(),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                EMPTY_SENTINEL.to_string()
            } else {
                trimmed.to_string()
            }
        }
        Some(other) => other.to_string(),
    }
}

fn normalize_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_lowercase(),
        Some(other) => other.to_string(),
    }
}

/// Resolves the current value of a node reference: the in-flight value map
/// wins, then the submission's stored row, then the node's cached
/// calculated value.
async fn resolve_node_value<S: Store>(
    store: &S,
    node_id: &Id,
    submission_id: Option<&Id>,
    value_map: &HashMap<String, Value>,
) -> Result<Option<Value>> {
    if let Some(value) = value_map.get(node_id) {
        if !value.is_null() {
            return Ok(Some(value.clone()));
        }
    }

    if let Some(submission_id) = submission_id {
        if let Some(row) = store.get_data_row(submission_id, node_id).await? {
            if let Some(value) = row.value {
                return Ok(Some(Value::String(value)));
            }
        }
    }

    if let Some(node) = store.get_node(node_id).await? {
        if let Some(cached) = node.calculated_value {
            return Ok(Some(Value::String(cached)));
        }
    }

    Ok(None)
}

async fn node_label<S: Store>(store: &S, node_id: &Id) -> Result<String> {
    Ok(store
        .get_node(node_id)
        .await?
        .map(|node| node.label)
        .unwrap_or_else(|| node_id.clone()))
}

#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Number(f64),
    Operator(ArithmeticOp),
    Open,
    Close,
}

/// Evaluates a resolved token sequence with standard operator precedence
/// (shunting-yard into reverse polish, then a stack fold). Division by zero
/// and malformed sequences are errors.
fn evaluate_expression(tokens: &[ExprToken]) -> Result<f64> {
    let mut output: Vec<ExprToken> = Vec::with_capacity(tokens.len());
    let mut ops: Vec<ExprToken> = Vec::new();

    for token in tokens {
        match token {
            ExprToken::Number(_) => output.push(token.clone()),
            ExprToken::Operator(op) => {
                while matches!(ops.last(), Some(ExprToken::Operator(top)) if top.precedence() >= op.precedence())
                {
                    if let Some(top) = ops.pop() {
                        output.push(top);
                    }
                }
                ops.push(token.clone());
            }
            ExprToken::Open => ops.push(token.clone()),
            ExprToken::Close => loop {
                match ops.pop() {
                    Some(ExprToken::Open) => break,
                    Some(op @ ExprToken::Operator(_)) => output.push(op),
                    _ => return Err(anyhow!("unbalanced parentheses in formula")),
                }
            },
        }
    }
    while let Some(op) = ops.pop() {
        match op {
            ExprToken::Open | ExprToken::Close => {
                return Err(anyhow!("unbalanced parentheses in formula"))
            }
            other => output.push(other),
        }
    }

    let mut stack: Vec<f64> = Vec::new();
    for token in output {
        match token {
            ExprToken::Number(n) => stack.push(n),
            ExprToken::Operator(op) => {
                let right = stack
                    .pop()
                    .ok_or_else(|| anyhow!("malformed formula expression"))?;
                let left = stack
                    .pop()
                    .ok_or_else(|| anyhow!("malformed formula expression"))?;
                let value = match op {
                    ArithmeticOp::Add => left + right,
                    ArithmeticOp::Sub => left - right,
                    ArithmeticOp::Mul => left * right,
                    ArithmeticOp::Div => {
                        if right == 0.0 {
                            return Err(anyhow!("division by zero in formula"));
                        }
                        left / right
                    }
                };
                stack.push(value);
            }
            ExprToken::Open | ExprToken::Close => {
                return Err(anyhow!("unbalanced parentheses in formula"))
            }
        }
    }

    if stack.len() != 1 {
        return Err(anyhow!("malformed formula expression"));
    }
    Ok(stack[0])
}

async fn interpret_formula<S: Store>(
    store: &S,
    operation_id: &Id,
    tokens: &[FormulaToken],
    submission_id: Option<&Id>,
    value_map: &HashMap<String, Value>,
) -> Result<OperationOutcome> {
    let mut expr: Vec<ExprToken> = Vec::with_capacity(tokens.len());
    let mut machine = String::new();
    let mut human = String::new();

    for token in tokens {
        match token {
            FormulaToken::Number { value } => {
                expr.push(ExprToken::Number(*value));
                machine.push_str(&format_number(*value));
                human.push_str(&format_number(*value));
            }
            FormulaToken::Operator { op } => {
                expr.push(ExprToken::Operator(*op));
                machine.push_str(op.symbol());
                human.push_str(&format!(" {} ", op.symbol()));
            }
            FormulaToken::OpenParen => {
                expr.push(ExprToken::Open);
                machine.push('(');
                human.push('(');
            }
            FormulaToken::CloseParen => {
                expr.push(ExprToken::Close);
                machine.push(')');
                human.push(')');
            }
            FormulaToken::NodeRef { node_id } => {
                let resolved =
                    resolve_node_value(store, node_id, submission_id, value_map).await?;
                // Unresolvable references count as zero; the trace still
                // shows the empty sentinel so the gap is visible.
                let number = resolved.as_ref().and_then(coerce_number).unwrap_or(0.0);
                let label = node_label(store, node_id).await?;
                expr.push(ExprToken::Number(number));
                machine.push_str(&format_number(number));
                human.push_str(&format!("{}({})", label, display_value(resolved.as_ref())));
            }
        }
    }

    let result = evaluate_expression(&expr)?;
    let result_text = format_number(result);
    let human_text = format!("{} (=) Result ({})", human, result_text);

    Ok(OperationOutcome {
        value: Some(Value::String(result_text)),
        operation_source: Some("formula".to_string()),
        operation_detail: Some(json!({
            "type": "formula",
            "operationId": operation_id,
            "expression": machine,
            "humanExpression": human,
            "calculatedResult": result,
        })),
        operation_result: Some(Value::String(human_text)),
    })
}

struct ResolvedOperand {
    label: Option<String>,
    value: Option<Value>,
}

impl ResolvedOperand {
    fn describe(&self) -> String {
        match &self.label {
            Some(label) => format!("{} ({})", label, display_value(self.value.as_ref())),
            None => display_value(self.value.as_ref()),
        }
    }
}

async fn resolve_operand<S: Store>(
    store: &S,
    operand: &Operand,
    submission_id: Option<&Id>,
    value_map: &HashMap<String, Value>,
) -> Result<ResolvedOperand> {
    match operand {
        Operand::Constant { value } => Ok(ResolvedOperand {
            label: None,
            value: Some(value.clone()),
        }),
        Operand::NodeRef { node_id } => Ok(ResolvedOperand {
            label: Some(node_label(store, node_id).await?),
            value: resolve_node_value(store, node_id, submission_id, value_map).await?,
        }),
    }
}

async fn resolve_outcome<S: Store>(
    store: &S,
    outcome: &ConditionOutcome,
    submission_id: Option<&Id>,
    value_map: &HashMap<String, Value>,
) -> Result<Option<Value>> {
    match outcome {
        ConditionOutcome::Constant { value } => Ok(Some(value.clone())),
        ConditionOutcome::NodeRef { node_id } => {
            resolve_node_value(store, node_id, submission_id, value_map).await
        }
    }
}

fn loose_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    if is_empty_value(left) && is_empty_value(right) {
        return true;
    }
    if let (Some(a), Some(b)) = (left.and_then(coerce_number), right.and_then(coerce_number)) {
        return a == b;
    }
    normalize_text(left) == normalize_text(right)
}

fn compare(op: ConditionOp, left: Option<&Value>, right: Option<&Value>) -> bool {
    match op {
        ConditionOp::IsEmpty => is_empty_value(left),
        ConditionOp::IsFilled => !is_empty_value(left),
        ConditionOp::Eq => loose_equal(left, right),
        ConditionOp::Ne => !loose_equal(left, right),
        ConditionOp::Gt | ConditionOp::Gte | ConditionOp::Lt | ConditionOp::Lte => {
            let (Some(a), Some(b)) = (left.and_then(coerce_number), right.and_then(coerce_number))
            else {
                return false;
            };
            match op {
                ConditionOp::Gt => a > b,
                ConditionOp::Gte => a >= b,
                ConditionOp::Lt => a < b,
                _ => a <= b,
            }
        }
    }
}

async fn interpret_condition<S: Store>(
    store: &S,
    operation_id: &Id,
    branches: &[ConditionBranch],
    fallback: Option<&ConditionOutcome>,
    submission_id: Option<&Id>,
    value_map: &HashMap<String, Value>,
) -> Result<OperationOutcome> {
    for (index, branch) in branches.iter().enumerate() {
        let left = resolve_operand(store, &branch.left, submission_id, value_map).await?;
        let right = match &branch.right {
            Some(operand) => {
                Some(resolve_operand(store, operand, submission_id, value_map).await?)
            }
            None => None,
        };

        let matched = compare(
            branch.op,
            left.value.as_ref(),
            right.as_ref().and_then(|r| r.value.as_ref()),
        );
        if !matched {
            continue;
        }

        let outcome = resolve_outcome(store, &branch.then, submission_id, value_map).await?;
        let right_text = right
            .as_ref()
            .map(|r| format!(" {}", r.describe()))
            .unwrap_or_default();
        let human_text = format!(
            "If {} {}{} then {}",
            left.describe(),
            branch.op.symbol(),
            right_text,
            display_value(outcome.as_ref()),
        );

        return Ok(OperationOutcome {
            value: outcome,
            operation_source: Some("condition".to_string()),
            operation_detail: Some(json!({
                "type": "condition",
                "operationId": operation_id,
                "matchedBranch": index,
                "usedFallback": false,
            })),
            operation_result: Some(Value::String(human_text)),
        });
    }

    let outcome = match fallback {
        Some(fallback) => resolve_outcome(store, fallback, submission_id, value_map).await?,
        None => None,
    };
    let human_text = format!(
        "If no branch matched then {}",
        display_value(outcome.as_ref())
    );

    Ok(OperationOutcome {
        value: outcome,
        operation_source: Some("condition".to_string()),
        operation_detail: Some(json!({
            "type": "condition",
            "operationId": operation_id,
            "matchedBranch": Value::Null,
            "usedFallback": fallback.is_some(),
        })),
        operation_result: Some(Value::String(human_text)),
    })
}

/// Matches a selected value against axis labels with trimmed,
/// case-insensitive comparison.
fn find_axis_index(labels: &[String], selected: Option<&Value>) -> Option<usize> {
    let needle = normalize_text(selected);
    if needle.is_empty() {
        return None;
    }
    labels
        .iter()
        .position(|label| label.trim().to_lowercase() == needle)
}

async fn interpret_table<S: Store>(
    store: &S,
    table_id: &Id,
    submission_id: Option<&Id>,
    value_map: &HashMap<String, Value>,
) -> Result<OperationOutcome> {
    let table = store
        .get_lookup_table(table_id)
        .await?
        .ok_or_else(|| anyhow!("lookup table {} not found", table_id))?;

    let selectors = &table.config.selectors;
    let row_value = match &selectors.row_field_id {
        Some(field) => resolve_node_value(store, field, submission_id, value_map).await?,
        None => None,
    };
    let column_value = match &selectors.column_field_id {
        Some(field) => resolve_node_value(store, field, submission_id, value_map).await?,
        None => None,
    };

    let row_index = find_axis_index(&table.rows, row_value.as_ref());
    let column_index = find_axis_index(&table.columns, column_value.as_ref());

    let detail = json!({
        "type": "table",
        "tableId": table.id,
        "row": row_value,
        "column": column_value,
    });

    let cell = match (row_index, column_index) {
        (Some(r), Some(c)) => table.matrix.get(r).and_then(|row| row.get(c)).cloned(),
        _ => None,
    };

    match cell {
        Some(cell) if !cell.is_null() => {
            let human_text = format!(
                "Table {} [{} x {}] (=) Result ({})",
                table.name,
                display_value(row_value.as_ref()),
                display_value(column_value.as_ref()),
                display_value(Some(&cell)),
            );
            Ok(OperationOutcome {
                value: Some(cell),
                operation_source: Some("table".to_string()),
                operation_detail: Some(detail),
                operation_result: Some(Value::String(human_text)),
            })
        }
        // Unmatched keys are an explained null, not an error.
        _ => Ok(OperationOutcome {
            value: None,
            operation_source: Some("table".to_string()),
            operation_detail: Some(detail),
            operation_result: Some(Value::String(format!(
                "No table match for row '{}' and column '{}' in {}",
                display_value(row_value.as_ref()),
                display_value(column_value.as_ref()),
                table.name,
            ))),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        LookupTable, NodeVariable, StoredOperation, TableLookupConfig, TableLookupSelectors, Tree,
        TreeNode,
    };
    use crate::store::memory::MemoryStore;
    use crate::store::traits::{OperationStore, TreeStore};
    use serde_json::json;

    fn num(value: f64) -> FormulaToken {
        FormulaToken::Number { value }
    }

    fn op(op: ArithmeticOp) -> FormulaToken {
        FormulaToken::Operator { op }
    }

    #[test]
    fn test_coerce_number_accepts_loose_formats() {
        assert_eq!(coerce_number(&json!("1 234,56")), Some(1234.56));
        assert_eq!(coerce_number(&json!("42")), Some(42.0));
        assert_eq!(coerce_number(&json!(1.5)), Some(1.5));
        assert_eq!(coerce_number(&json!(true)), Some(1.0));
        assert_eq!(coerce_number(&json!("∅")), None);
        assert_eq!(coerce_number(&json!("")), None);
        assert_eq!(coerce_number(&json!("abc")), None);
    }

    #[test]
    fn test_empty_value_detection() {
        assert!(is_empty_value(None));
        assert!(is_empty_value(Some(&Value::Null)));
        assert!(is_empty_value(Some(&json!("  "))));
        assert!(is_empty_value(Some(&json!("∅"))));
        assert!(!is_empty_value(Some(&json!("0"))));
        assert!(!is_empty_value(Some(&json!(0))));
    }

    #[test]
    fn test_expression_precedence_and_parentheses() {
        let tokens = vec![
            ExprToken::Number(2.0),
            ExprToken::Operator(ArithmeticOp::Add),
            ExprToken::Number(3.0),
            ExprToken::Operator(ArithmeticOp::Mul),
            ExprToken::Number(4.0),
        ];
        assert_eq!(evaluate_expression(&tokens).unwrap(), 14.0);

        let tokens = vec![
            ExprToken::Open,
            ExprToken::Number(2.0),
            ExprToken::Operator(ArithmeticOp::Add),
            ExprToken::Number(3.0),
            ExprToken::Close,
            ExprToken::Operator(ArithmeticOp::Mul),
            ExprToken::Number(4.0),
        ];
        assert_eq!(evaluate_expression(&tokens).unwrap(), 20.0);
    }

    #[test]
    fn test_expression_rejects_division_by_zero() {
        let tokens = vec![
            ExprToken::Number(1.0),
            ExprToken::Operator(ArithmeticOp::Div),
            ExprToken::Number(0.0),
        ];
        assert!(evaluate_expression(&tokens).is_err());
    }

    async fn store_with_tree() -> (MemoryStore, Tree) {
        let store = MemoryStore::new();
        let tree = Tree::new("org-1".to_string(), "Demo".to_string(), None);
        store.upsert_tree(tree.clone()).await.unwrap();
        (store, tree)
    }

    #[tokio::test]
    async fn test_formula_uses_value_map_and_traces() {
        let (store, tree) = store_with_tree().await;
        let area = TreeNode::new(tree.id.clone(), "Roof area".to_string());
        let area_id = area.id.clone();
        store.upsert_node(area).await.unwrap();

        store
            .upsert_operation(StoredOperation {
                id: "power-formula".to_string(),
                tree_id: Some(tree.id.clone()),
                config: OperationConfig::Formula {
                    tokens: vec![
                        FormulaToken::NodeRef {
                            node_id: area_id.clone(),
                        },
                        op(ArithmeticOp::Mul),
                        num(0.5),
                    ],
                },
            })
            .await
            .unwrap();

        let mut value_map = HashMap::new();
        value_map.insert(area_id.clone(), json!("42"));

        let outcome = StoredOperationInterpreter::evaluate_source_ref(
            &store,
            "formula:power-formula",
            None,
            &value_map,
        )
        .await
        .unwrap();

        assert_eq!(outcome.value, Some(json!("21")));
        assert_eq!(outcome.operation_source.as_deref(), Some("formula"));
        let text = outcome.operation_result.unwrap();
        let text = text.as_str().unwrap();
        assert!(text.contains("Roof area(42)"));
        assert!(text.ends_with("(=) Result (21)"));
    }

    #[tokio::test]
    async fn test_condition_first_match_wins_and_explains() {
        let (store, tree) = store_with_tree().await;
        let choice = TreeNode::new(tree.id.clone(), "Orientation".to_string());
        let choice_id = choice.id.clone();
        store.upsert_node(choice).await.unwrap();

        store
            .upsert_operation(StoredOperation {
                id: "orientation-bonus".to_string(),
                tree_id: Some(tree.id.clone()),
                config: OperationConfig::Condition {
                    branches: vec![
                        ConditionBranch {
                            left: Operand::NodeRef {
                                node_id: choice_id.clone(),
                            },
                            op: ConditionOp::Eq,
                            right: Some(Operand::Constant {
                                value: json!("south"),
                            }),
                            then: ConditionOutcome::Constant { value: json!(125) },
                        },
                        ConditionBranch {
                            left: Operand::NodeRef {
                                node_id: choice_id.clone(),
                            },
                            op: ConditionOp::IsFilled,
                            right: None,
                            then: ConditionOutcome::Constant { value: json!(100) },
                        },
                    ],
                    fallback: Some(ConditionOutcome::Constant { value: json!(0) }),
                },
            })
            .await
            .unwrap();

        let mut value_map = HashMap::new();
        value_map.insert(choice_id.clone(), json!("South"));

        let outcome = StoredOperationInterpreter::evaluate_source_ref(
            &store,
            "condition:orientation-bonus",
            None,
            &value_map,
        )
        .await
        .unwrap();

        assert_eq!(outcome.value, Some(json!(125)));
        let text = outcome.operation_result.unwrap();
        let text = text.as_str().unwrap();
        assert!(text.starts_with("If Orientation (South) ="));

        // No value at all falls through to the fallback branch.
        let outcome = StoredOperationInterpreter::evaluate_source_ref(
            &store,
            "condition:orientation-bonus",
            None,
            &HashMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, Some(json!(0)));
    }

    #[tokio::test]
    async fn test_table_lookup_matches_case_insensitively() {
        let (store, tree) = store_with_tree().await;
        let orientation = TreeNode::new(tree.id.clone(), "Orientation".to_string());
        let pitch = TreeNode::new(tree.id.clone(), "Pitch".to_string());
        let orientation_id = orientation.id.clone();
        let pitch_id = pitch.id.clone();
        store.upsert_node(orientation).await.unwrap();
        store.upsert_node(pitch).await.unwrap();

        store
            .upsert_lookup_table(LookupTable {
                id: "yield-table".to_string(),
                tree_id: Some(tree.id.clone()),
                name: "Yield factor".to_string(),
                columns: vec!["0".to_string(), "35".to_string()],
                rows: vec!["North".to_string(), "South".to_string()],
                matrix: vec![vec![json!(86), json!(73)], vec![json!(93), json!(100)]],
                config: TableLookupConfig {
                    enabled: true,
                    selectors: TableLookupSelectors {
                        row_field_id: Some(orientation_id.clone()),
                        column_field_id: Some(pitch_id.clone()),
                    },
                    ..TableLookupConfig::default()
                },
            })
            .await
            .unwrap();
        store
            .upsert_operation(StoredOperation {
                id: "yield-lookup".to_string(),
                tree_id: Some(tree.id.clone()),
                config: OperationConfig::Table {
                    table_id: "yield-table".to_string(),
                },
            })
            .await
            .unwrap();

        let mut value_map = HashMap::new();
        value_map.insert(orientation_id.clone(), json!(" south "));
        value_map.insert(pitch_id.clone(), json!("35"));

        let outcome = StoredOperationInterpreter::evaluate_source_ref(
            &store,
            "table:yield-lookup",
            None,
            &value_map,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, Some(json!(100)));

        // An unmatched key explains itself instead of failing.
        let mut value_map = HashMap::new();
        value_map.insert(orientation_id.clone(), json!("West"));
        value_map.insert(pitch_id.clone(), json!("35"));
        let outcome = StoredOperationInterpreter::evaluate_source_ref(
            &store,
            "table:yield-lookup",
            None,
            &value_map,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, None);
        let text = outcome.operation_result.unwrap();
        assert!(text.as_str().unwrap().contains("No table match"));
    }

    #[tokio::test]
    async fn test_unknown_source_ref_is_an_error() {
        let (store, tree) = store_with_tree().await;
        store
            .upsert_operation(StoredOperation {
                id: "x".to_string(),
                tree_id: Some(tree.id),
                config: OperationConfig::Formula { tokens: vec![num(1.0)] },
            })
            .await
            .unwrap();

        let value_map = HashMap::new();
        assert!(StoredOperationInterpreter::evaluate_source_ref(
            &store,
            "mystery:x",
            None,
            &value_map
        )
        .await
        .is_err());
        assert!(StoredOperationInterpreter::evaluate_source_ref(
            &store,
            "no-colon-here",
            None,
            &value_map
        )
        .await
        .is_err());
        assert!(StoredOperationInterpreter::evaluate_source_ref(
            &store,
            "condition:x",
            None,
            &value_map
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn test_interpreter_reads_capacity_through_node() {
        let (store, tree) = store_with_tree().await;
        let node = TreeNode::new(tree.id.clone(), "Computed".to_string());
        let node_id = node.id.clone();
        store.upsert_node(node).await.unwrap();
        store
            .upsert_operation(StoredOperation {
                id: "double".to_string(),
                tree_id: Some(tree.id.clone()),
                config: OperationConfig::Formula {
                    tokens: vec![num(2.0), op(ArithmeticOp::Mul), num(3.0)],
                },
            })
            .await
            .unwrap();
        store
            .upsert_variable(NodeVariable::new(node_id.clone(), "formula:double"))
            .await
            .unwrap();

        let outcome = StoredOperationInterpreter
            .evaluate(&node_id, None, &store, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.value, Some(json!("6")));
    }
}
