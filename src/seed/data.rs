use crate::model::{
    ArithmeticOp, ConditionBranch, ConditionOp, ConditionOutcome, FormulaToken, Lead, LookupTable,
    NodeVariable, Operand, OperationConfig, SelectConfig, SelectOption, StoredOperation,
    TableLookupConfig, TableLookupSelectors, Tree, TreeNode,
};
use crate::store::traits::Store;
use anyhow::Result;
use serde_json::json;

// Fixed ids so demos and integration tests can address the seeded records.
pub const SEED_ORG_ID: &str = "org-demo";
pub const SEED_TREE_ID: &str = "tree-solar-intake";
pub const SEED_LEAD_ID: &str = "lead-demo-1";
pub const SEED_TABLE_ID: &str = "table-yield";

pub const NODE_ROOF_AREA: &str = "node_1757366229534_roofarea";
pub const NODE_ROOF_AREA_RECAP: &str = "node_1757366229534_rooframt";
pub const NODE_ROOF_PLANE: &str = "node_1757366229534_roofplane";
pub const NODE_INCLINATION: &str = "node_1757366229534_incline";
pub const NODE_ORIENTATION: &str = "node_1757366229534_orient";
pub const NODE_PANEL_COUNT: &str = "node_1757366229534_panels";
pub const NODE_PANEL_POWER: &str = "node_1757366229534_power";
pub const NODE_YIELD: &str = "node_1757366229534_yield";
pub const NODE_TOTAL: &str = "node_1757366229534_total";

pub const SHARED_REF_ROOF_AREA: &str = "shared-ref-roof-area";
pub const SHARED_REF_ROOF_PLANE: &str = "shared-ref-roof-plane";
pub const SHARED_REF_INCLINATION: &str = "shared-ref-inclination";

fn select(options: &[(&str, &str)]) -> SelectConfig {
    SelectConfig {
        options: options
            .iter()
            .map(|(label, value)| SelectOption {
                label: label.to_string(),
                value: value.to_string(),
            })
            .collect(),
        multiple: false,
    }
}

fn node(id: &str, label: &str) -> TreeNode {
    TreeNode::with_id(id.to_string(), SEED_TREE_ID.to_string(), label.to_string())
}

/// Loads a demonstration solar-intake tree: entry nodes with shared
/// references and selects, formula/condition/table capacities, an aggregate
/// total, a yield lookup table and a sample lead. Works against either store
/// implementation.
pub async fn load_seed_data<S: Store>(store: &S) -> Result<()> {
    let tree = Tree {
        id: SEED_TREE_ID.to_string(),
        organization_id: SEED_ORG_ID.to_string(),
        name: "Solar roof intake".to_string(),
        description: Some("Demonstration form for roof solar sizing".to_string()),
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    store.upsert_tree(tree).await?;

    // Entry nodes. Roof area appears twice (intake page and recap page),
    // joined by a shared reference.
    store
        .upsert_node(node(NODE_ROOF_AREA, "Roof area (m²)").with_shared_reference(SHARED_REF_ROOF_AREA))
        .await?;
    store
        .upsert_node(
            node(NODE_ROOF_AREA_RECAP, "Roof area (recap)")
                .with_shared_reference(SHARED_REF_ROOF_AREA),
        )
        .await?;

    let mut plane =
        node(NODE_ROOF_PLANE, "Roof planes").with_shared_reference(SHARED_REF_ROOF_PLANE);
    plane.select_config = Some(select(&[("One plane", "1"), ("Two planes", "2")]));
    store.upsert_node(plane).await?;

    let mut inclination =
        node(NODE_INCLINATION, "Inclination").with_shared_reference(SHARED_REF_INCLINATION);
    inclination.select_config = Some(select(&[("27°", "27"), ("45°", "45")]));
    store.upsert_node(inclination).await?;

    let mut orientation = node(NODE_ORIENTATION, "Orientation");
    orientation.select_config = Some(select(&[
        ("South", "south"),
        ("West", "west"),
        ("East", "east"),
    ]));
    store.upsert_node(orientation).await?;

    // Computed nodes.
    store.upsert_node(node(NODE_PANEL_COUNT, "Panel count")).await?;
    store.upsert_node(node(NODE_PANEL_POWER, "Panel output (W)")).await?;
    store.upsert_node(node(NODE_YIELD, "Yield factor")).await?;
    store.upsert_node(node(NODE_TOTAL, "Total capacity (W)")).await?;

    // Panel count = roof area / 2.
    store
        .upsert_operation(StoredOperation {
            id: "op-panel-count".to_string(),
            tree_id: Some(SEED_TREE_ID.to_string()),
            config: OperationConfig::Formula {
                tokens: vec![
                    FormulaToken::NodeRef {
                        node_id: NODE_ROOF_AREA.to_string(),
                    },
                    FormulaToken::Operator {
                        op: ArithmeticOp::Div,
                    },
                    FormulaToken::Number { value: 2.0 },
                ],
            },
        })
        .await?;

    // Panel output depends on the inclination choice.
    store
        .upsert_operation(StoredOperation {
            id: "op-panel-power".to_string(),
            tree_id: Some(SEED_TREE_ID.to_string()),
            config: OperationConfig::Condition {
                branches: vec![ConditionBranch {
                    left: Operand::NodeRef {
                        node_id: NODE_INCLINATION.to_string(),
                    },
                    op: ConditionOp::Eq,
                    right: Some(Operand::Constant { value: json!("27") }),
                    then: ConditionOutcome::Constant { value: json!(400) },
                }],
                fallback: Some(ConditionOutcome::Constant { value: json!(380) }),
            },
        })
        .await?;

    // Yield factor from the orientation x inclination lookup table.
    store
        .upsert_operation(StoredOperation {
            id: "op-yield".to_string(),
            tree_id: Some(SEED_TREE_ID.to_string()),
            config: OperationConfig::Table {
                table_id: SEED_TABLE_ID.to_string(),
            },
        })
        .await?;

    // Aggregate: total capacity = panel count * panel output. Evaluated
    // last so both inputs are already in the value map.
    store
        .upsert_operation(StoredOperation {
            id: "sum-total-capacity".to_string(),
            tree_id: Some(SEED_TREE_ID.to_string()),
            config: OperationConfig::Formula {
                tokens: vec![
                    FormulaToken::NodeRef {
                        node_id: NODE_PANEL_COUNT.to_string(),
                    },
                    FormulaToken::Operator {
                        op: ArithmeticOp::Mul,
                    },
                    FormulaToken::NodeRef {
                        node_id: NODE_PANEL_POWER.to_string(),
                    },
                ],
            },
        })
        .await?;

    store
        .upsert_variable(NodeVariable::new(
            NODE_PANEL_COUNT.to_string(),
            "formula:op-panel-count",
        ))
        .await?;
    store
        .upsert_variable(NodeVariable::new(
            NODE_PANEL_POWER.to_string(),
            "condition:op-panel-power",
        ))
        .await?;
    store
        .upsert_variable(NodeVariable::new(NODE_YIELD.to_string(), "table:op-yield"))
        .await?;
    store
        .upsert_variable(NodeVariable::new(
            NODE_TOTAL.to_string(),
            "formula:sum-total-capacity",
        ))
        .await?;

    store
        .upsert_lookup_table(LookupTable {
            id: SEED_TABLE_ID.to_string(),
            tree_id: Some(SEED_TREE_ID.to_string()),
            name: "Yield factor".to_string(),
            columns: vec!["27".to_string(), "45".to_string()],
            rows: vec!["south".to_string(), "west".to_string(), "east".to_string()],
            matrix: vec![
                vec![json!("1.00"), json!("0.95")],
                vec![json!("0.85"), json!("0.80")],
                vec![json!("0.83"), json!("0.78")],
            ],
            config: TableLookupConfig {
                enabled: true,
                mode: "matrix".to_string(),
                row_lookup_enabled: true,
                column_lookup_enabled: true,
                selectors: TableLookupSelectors {
                    row_field_id: Some(NODE_ORIENTATION.to_string()),
                    column_field_id: Some(NODE_INCLINATION.to_string()),
                },
                display_row: Some("Orientation".to_string()),
                display_column: Some("Inclination".to_string()),
            },
        })
        .await?;

    let mut lead = Lead::new(SEED_ORG_ID.to_string(), Some("Demo Customer".to_string()));
    lead.id = SEED_LEAD_ID.to_string();
    lead.email = Some("demo@example.com".to_string());
    lead.address = Some("Solbergveien 12, 1151 Oslo".to_string());
    lead.data = Some(json!({ "segment": "villa" }));
    store.upsert_lead(lead).await?;

    Ok(())
}
