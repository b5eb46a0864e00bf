use crate::model::Id;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One token of a stored formula. Formulas are kept as token sequences,
/// not parsed text; `+ - * /` with standard precedence and parentheses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormulaToken {
    Number { value: f64 },
    NodeRef { node_id: Id },
    Operator { op: ArithmeticOp },
    OpenParen,
    CloseParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithmeticOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
        }
    }

    pub fn precedence(&self) -> u8 {
        match self {
            ArithmeticOp::Add | ArithmeticOp::Sub => 1,
            ArithmeticOp::Mul | ArithmeticOp::Div => 2,
        }
    }
}

/// An operand in a condition comparison: a constant or another node's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operand {
    Constant { value: Value },
    NodeRef { node_id: Id },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Operand has no usable value (null, empty string, "∅").
    IsEmpty,
    /// Operand has a concrete value.
    IsFilled,
}

impl ConditionOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ConditionOp::Eq => "=",
            ConditionOp::Ne => "≠",
            ConditionOp::Gt => ">",
            ConditionOp::Gte => "≥",
            ConditionOp::Lt => "<",
            ConditionOp::Lte => "≤",
            ConditionOp::IsEmpty => "is empty",
            ConditionOp::IsFilled => "is filled",
        }
    }
}

/// What a condition branch yields when it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionOutcome {
    Constant { value: Value },
    NodeRef { node_id: Id },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionBranch {
    pub left: Operand,
    pub op: ConditionOp,
    /// Unused for the unary blank/filled tests.
    pub right: Option<Operand>,
    pub then: ConditionOutcome,
}

/// The stored backing of a capacity's `source_ref`. First matching branch
/// wins for conditions; tables resolve through their lookup selectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationConfig {
    Formula {
        tokens: Vec<FormulaToken>,
    },
    Condition {
        branches: Vec<ConditionBranch>,
        fallback: Option<ConditionOutcome>,
    },
    Table {
        table_id: Id,
    },
}

/// A stored operation, addressable by the `<kind>:<id>` shape of a
/// capacity's `source_ref`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredOperation {
    pub id: Id,
    pub tree_id: Option<Id>,
    pub config: OperationConfig,
}

/// Raw interpreter output for one capacity, before normalization by the
/// capacity evaluator. `operation_source` is whatever string the
/// interpreter reports; `operation_detail` may arrive as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub value: Option<Value>,
    pub operation_source: Option<String>,
    pub operation_detail: Option<Value>,
    pub operation_result: Option<Value>,
}

impl OperationOutcome {
    pub fn empty() -> Self {
        Self {
            value: None,
            operation_source: None,
            operation_detail: None,
            operation_result: None,
        }
    }
}
