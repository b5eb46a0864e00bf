use crate::model::{
    Id, Lead, LookupTable, NodeVariable, StoredOperation, Submission, SubmissionDataRow, Tree,
    TreeNode,
};
use anyhow::Result;
use std::collections::HashMap;

#[async_trait::async_trait]
pub trait TreeStore: Send + Sync {
    async fn get_tree(&self, id: &Id) -> Result<Option<Tree>>;
    /// Any existing tree, used as the fallback when a client supplies no
    /// tree id or a stale one.
    async fn first_tree(&self) -> Result<Option<Tree>>;
    async fn list_trees(&self) -> Result<Vec<Tree>>;
    async fn upsert_tree(&self, tree: Tree) -> Result<()>;

    async fn get_node(&self, id: &Id) -> Result<Option<TreeNode>>;
    async fn list_nodes_for_tree(&self, tree_id: &Id) -> Result<Vec<TreeNode>>;
    /// All nodes whose `shared_reference_id` is one of the given ids,
    /// optionally scoped to a single tree.
    async fn find_nodes_by_shared_refs(
        &self,
        shared_refs: &[String],
        tree_id: Option<&Id>,
    ) -> Result<Vec<TreeNode>>;
    async fn upsert_node(&self, node: TreeNode) -> Result<()>;
}

#[async_trait::async_trait]
pub trait OperationStore: Send + Sync {
    /// Capacities whose owning node belongs to the given tree.
    async fn list_variables_for_tree(&self, tree_id: &Id) -> Result<Vec<NodeVariable>>;
    async fn get_variable_for_node(&self, node_id: &Id) -> Result<Option<NodeVariable>>;
    async fn upsert_variable(&self, variable: NodeVariable) -> Result<()>;

    async fn get_operation(&self, id: &Id) -> Result<Option<StoredOperation>>;
    async fn upsert_operation(&self, operation: StoredOperation) -> Result<()>;

    async fn get_lookup_table(&self, id: &Id) -> Result<Option<LookupTable>>;
    async fn upsert_lookup_table(&self, table: LookupTable) -> Result<()>;
}

#[async_trait::async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn get_submission(&self, id: &Id) -> Result<Option<Submission>>;
    async fn upsert_submission(&self, submission: Submission) -> Result<()>;

    async fn list_data_for_submission(&self, submission_id: &Id)
        -> Result<Vec<SubmissionDataRow>>;
    /// The unique row for `(submission_id, node_id)`, if it exists.
    async fn get_data_row(
        &self,
        submission_id: &Id,
        node_id: &Id,
    ) -> Result<Option<SubmissionDataRow>>;
    async fn upsert_data_row(&self, row: SubmissionDataRow) -> Result<()>;
}

#[async_trait::async_trait]
pub trait LeadStore: Send + Sync {
    async fn get_lead(&self, id: &Id) -> Result<Option<Lead>>;
    async fn upsert_lead(&self, lead: Lead) -> Result<()>;
}

#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    async fn user_exists(&self, id: &Id) -> Result<bool>;
    async fn register_user(&self, id: &Id) -> Result<()>;
}

/// Node-keyed cache of the latest concrete capacity results, shared across
/// submissions and previews; last write wins.
#[async_trait::async_trait]
pub trait CalculatedValueStore: Send + Sync {
    /// Stores a value on the node; `Ok(false)` when the node is unknown.
    async fn set_calculated_value(
        &self,
        node_id: &Id,
        value: &str,
        calculated_by: &str,
    ) -> Result<bool>;
    async fn get_calculated_values(
        &self,
        node_ids: &[Id],
    ) -> Result<HashMap<Id, Option<String>>>;
    async fn clear_calculated_values(&self, node_ids: &[Id]) -> Result<u64>;
}

pub trait Store:
    TreeStore
    + OperationStore
    + SubmissionStore
    + LeadStore
    + UserStore
    + CalculatedValueStore
    + Send
    + Sync
{
}
