use crate::model::{
    now_iso, Id, Lead, LookupTable, NodeVariable, StoredOperation, Submission, SubmissionDataRow,
    Tree, TreeNode,
};
use crate::store::traits::{
    CalculatedValueStore, LeadStore, OperationStore, Store, SubmissionStore, TreeStore, UserStore,
};
use anyhow::Result;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// In-memory `Store` backed by RwLock'd maps. Backs the test suites, the
/// seed demos, and runs without a configured database. Locks are never held
/// across an await point.
#[derive(Debug, Default)]
pub struct MemoryStore {
    trees: RwLock<HashMap<Id, Tree>>,
    nodes: RwLock<HashMap<Id, TreeNode>>,
    /// Keyed by node id; a node has at most one capacity.
    variables: RwLock<HashMap<Id, NodeVariable>>,
    operations: RwLock<HashMap<Id, StoredOperation>>,
    tables: RwLock<HashMap<Id, LookupTable>>,
    submissions: RwLock<HashMap<Id, Submission>>,
    /// Compound key enforces the one-row-per-(submission, node) invariant.
    data_rows: RwLock<HashMap<(Id, Id), SubmissionDataRow>>,
    leads: RwLock<HashMap<Id, Lead>>,
    users: RwLock<HashSet<Id>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl TreeStore for MemoryStore {
    async fn get_tree(&self, id: &Id) -> Result<Option<Tree>> {
        Ok(self.trees.read().get(id).cloned())
    }

    async fn first_tree(&self) -> Result<Option<Tree>> {
        // Oldest tree wins so the fallback choice is deterministic.
        Ok(self
            .trees
            .read()
            .values()
            .min_by(|a, b| (&a.created_at, &a.id).cmp(&(&b.created_at, &b.id)))
            .cloned())
    }

    async fn list_trees(&self) -> Result<Vec<Tree>> {
        let mut trees: Vec<Tree> = self.trees.read().values().cloned().collect();
        trees.sort_by(|a, b| (&a.created_at, &a.id).cmp(&(&b.created_at, &b.id)));
        Ok(trees)
    }

    async fn upsert_tree(&self, tree: Tree) -> Result<()> {
        self.trees.write().insert(tree.id.clone(), tree);
        Ok(())
    }

    async fn get_node(&self, id: &Id) -> Result<Option<TreeNode>> {
        Ok(self.nodes.read().get(id).cloned())
    }

    async fn list_nodes_for_tree(&self, tree_id: &Id) -> Result<Vec<TreeNode>> {
        let mut nodes: Vec<TreeNode> = self
            .nodes
            .read()
            .values()
            .filter(|node| &node.tree_id == tree_id)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn find_nodes_by_shared_refs(
        &self,
        shared_refs: &[String],
        tree_id: Option<&Id>,
    ) -> Result<Vec<TreeNode>> {
        let wanted: HashSet<&String> = shared_refs.iter().collect();
        let mut nodes: Vec<TreeNode> = self
            .nodes
            .read()
            .values()
            .filter(|node| {
                node.shared_reference_id
                    .as_ref()
                    .map_or(false, |shared| wanted.contains(shared))
                    && tree_id.map_or(true, |tree| &node.tree_id == tree)
            })
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn upsert_node(&self, node: TreeNode) -> Result<()> {
        self.nodes.write().insert(node.id.clone(), node);
        Ok(())
    }
}

#[async_trait::async_trait]
impl OperationStore for MemoryStore {
    async fn list_variables_for_tree(&self, tree_id: &Id) -> Result<Vec<NodeVariable>> {
        let node_ids: HashSet<Id> = self
            .nodes
            .read()
            .values()
            .filter(|node| &node.tree_id == tree_id)
            .map(|node| node.id.clone())
            .collect();
        let mut variables: Vec<NodeVariable> = self
            .variables
            .read()
            .values()
            .filter(|variable| node_ids.contains(&variable.node_id))
            .cloned()
            .collect();
        variables.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(variables)
    }

    async fn get_variable_for_node(&self, node_id: &Id) -> Result<Option<NodeVariable>> {
        Ok(self.variables.read().get(node_id).cloned())
    }

    async fn upsert_variable(&self, variable: NodeVariable) -> Result<()> {
        self.variables
            .write()
            .insert(variable.node_id.clone(), variable);
        Ok(())
    }

    async fn get_operation(&self, id: &Id) -> Result<Option<StoredOperation>> {
        Ok(self.operations.read().get(id).cloned())
    }

    async fn upsert_operation(&self, operation: StoredOperation) -> Result<()> {
        self.operations
            .write()
            .insert(operation.id.clone(), operation);
        Ok(())
    }

    async fn get_lookup_table(&self, id: &Id) -> Result<Option<LookupTable>> {
        Ok(self.tables.read().get(id).cloned())
    }

    async fn upsert_lookup_table(&self, table: LookupTable) -> Result<()> {
        self.tables.write().insert(table.id.clone(), table);
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubmissionStore for MemoryStore {
    async fn get_submission(&self, id: &Id) -> Result<Option<Submission>> {
        Ok(self.submissions.read().get(id).cloned())
    }

    async fn upsert_submission(&self, submission: Submission) -> Result<()> {
        self.submissions
            .write()
            .insert(submission.id.clone(), submission);
        Ok(())
    }

    async fn list_data_for_submission(
        &self,
        submission_id: &Id,
    ) -> Result<Vec<SubmissionDataRow>> {
        let mut rows: Vec<SubmissionDataRow> = self
            .data_rows
            .read()
            .values()
            .filter(|row| &row.submission_id == submission_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Ok(rows)
    }

    async fn get_data_row(
        &self,
        submission_id: &Id,
        node_id: &Id,
    ) -> Result<Option<SubmissionDataRow>> {
        Ok(self
            .data_rows
            .read()
            .get(&(submission_id.clone(), node_id.clone()))
            .cloned())
    }

    async fn upsert_data_row(&self, row: SubmissionDataRow) -> Result<()> {
        self.data_rows
            .write()
            .insert((row.submission_id.clone(), row.node_id.clone()), row);
        Ok(())
    }
}

#[async_trait::async_trait]
impl LeadStore for MemoryStore {
    async fn get_lead(&self, id: &Id) -> Result<Option<Lead>> {
        Ok(self.leads.read().get(id).cloned())
    }

    async fn upsert_lead(&self, lead: Lead) -> Result<()> {
        self.leads.write().insert(lead.id.clone(), lead);
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserStore for MemoryStore {
    async fn user_exists(&self, id: &Id) -> Result<bool> {
        Ok(self.users.read().contains(id))
    }

    async fn register_user(&self, id: &Id) -> Result<()> {
        self.users.write().insert(id.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl CalculatedValueStore for MemoryStore {
    async fn set_calculated_value(
        &self,
        node_id: &Id,
        value: &str,
        calculated_by: &str,
    ) -> Result<bool> {
        let mut nodes = self.nodes.write();
        let Some(node) = nodes.get_mut(node_id) else {
            return Ok(false);
        };
        node.calculated_value = Some(value.to_string());
        node.calculated_at = Some(now_iso());
        node.calculated_by = Some(calculated_by.to_string());
        Ok(true)
    }

    async fn get_calculated_values(
        &self,
        node_ids: &[Id],
    ) -> Result<HashMap<Id, Option<String>>> {
        let nodes = self.nodes.read();
        Ok(node_ids
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    nodes.get(id).and_then(|node| node.calculated_value.clone()),
                )
            })
            .collect())
    }

    async fn clear_calculated_values(&self, node_ids: &[Id]) -> Result<u64> {
        let mut nodes = self.nodes.write();
        let mut cleared = 0;
        for id in node_ids {
            if let Some(node) = nodes.get_mut(id) {
                if node.calculated_value.take().is_some() {
                    node.calculated_at = None;
                    node.calculated_by = None;
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }
}

impl Store for MemoryStore {}
