use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::collections::HashMap;

use crate::model::{
    now_iso, Id, Lead, LookupTable, NodeVariable, OperationDetail, OperationSource,
    StoredOperation, Submission, SubmissionDataRow, SubmissionStatus, Tree, TreeNode,
};
use crate::store::traits::{
    CalculatedValueStore, LeadStore, OperationStore, Store, SubmissionStore, TreeStore, UserStore,
};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Bootstrap the relational layout. Plain idempotent DDL at runtime, so
    /// no live database is needed at compile time.
    pub async fn ensure_schema(&self) -> Result<()> {
        for ddl in SCHEMA_DDL {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .context("Failed to bootstrap schema")?;
        }
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const SCHEMA_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS trees (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tree_nodes (
        id TEXT PRIMARY KEY,
        tree_id TEXT NOT NULL REFERENCES trees(id),
        label TEXT NOT NULL,
        parent_id TEXT,
        shared_reference_id TEXT,
        select_config JSONB,
        calculated_value TEXT,
        calculated_at TEXT,
        calculated_by TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tree_nodes_shared_ref
    ON tree_nodes(shared_reference_id) WHERE shared_reference_id IS NOT NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS node_variables (
        id TEXT PRIMARY KEY,
        node_id TEXT NOT NULL UNIQUE REFERENCES tree_nodes(id),
        source_ref TEXT NOT NULL,
        display_name TEXT,
        display_format TEXT,
        unit TEXT,
        value_precision SMALLINT,
        visible_to_user BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS operations (
        id TEXT PRIMARY KEY,
        tree_id TEXT,
        config JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS lookup_tables (
        id TEXT PRIMARY KEY,
        tree_id TEXT,
        name TEXT NOT NULL,
        columns JSONB NOT NULL,
        rows JSONB NOT NULL,
        matrix JSONB NOT NULL,
        config JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS submissions (
        id TEXT PRIMARY KEY,
        tree_id TEXT NOT NULL,
        user_id TEXT,
        lead_id TEXT,
        status TEXT NOT NULL,
        summary JSONB,
        export_data JSONB,
        completed_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS submission_data (
        id TEXT PRIMARY KEY,
        submission_id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        value TEXT,
        source_ref TEXT,
        operation_source TEXT NOT NULL,
        operation_detail JSONB,
        operation_result JSONB,
        field_label TEXT,
        last_resolved TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE(submission_id, node_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS leads (
        id TEXT PRIMARY KEY,
        organization_id TEXT NOT NULL,
        name TEXT,
        email TEXT,
        phone TEXT,
        company TEXT,
        address TEXT,
        postal_code TEXT,
        data JSONB,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS app_users (
        id TEXT PRIMARY KEY
    )
    "#,
];

fn tree_from_row(row: &sqlx::postgres::PgRow) -> Tree {
    Tree {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        name: row.get("name"),
        description: row.get("description"),
        created_at: row.get("created_at"),
    }
}

fn node_from_row(row: &sqlx::postgres::PgRow) -> Result<TreeNode> {
    let select_config: Option<Value> = row.get("select_config");
    Ok(TreeNode {
        id: row.get("id"),
        tree_id: row.get("tree_id"),
        label: row.get("label"),
        parent_id: row.get("parent_id"),
        shared_reference_id: row.get("shared_reference_id"),
        select_config: select_config
            .map(serde_json::from_value)
            .transpose()
            .context("Failed to deserialize select config")?,
        calculated_value: row.get("calculated_value"),
        calculated_at: row.get("calculated_at"),
        calculated_by: row.get("calculated_by"),
    })
}

fn variable_from_row(row: &sqlx::postgres::PgRow) -> NodeVariable {
    let precision: Option<i16> = row.get("value_precision");
    NodeVariable {
        id: row.get("id"),
        node_id: row.get("node_id"),
        source_ref: row.get("source_ref"),
        display_name: row.get("display_name"),
        display_format: row.get("display_format"),
        unit: row.get("unit"),
        precision: precision.map(|p| p as u8),
        visible_to_user: row.get("visible_to_user"),
    }
}

fn submission_from_row(row: &sqlx::postgres::PgRow) -> Submission {
    let status: String = row.get("status");
    Submission {
        id: row.get("id"),
        tree_id: row.get("tree_id"),
        user_id: row.get("user_id"),
        lead_id: row.get("lead_id"),
        status: SubmissionStatus::from_str(&status),
        summary: row.get("summary"),
        export_data: row.get("export_data"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn data_row_from_row(row: &sqlx::postgres::PgRow) -> Result<SubmissionDataRow> {
    let operation_source: String = row.get("operation_source");
    let operation_detail: Option<Value> = row.get("operation_detail");
    Ok(SubmissionDataRow {
        id: row.get("id"),
        submission_id: row.get("submission_id"),
        node_id: row.get("node_id"),
        value: row.get("value"),
        source_ref: row.get("source_ref"),
        operation_source: OperationSource::normalize(Some(&operation_source)),
        operation_detail: operation_detail
            .map(serde_json::from_value::<OperationDetail>)
            .transpose()
            .context("Failed to deserialize operation detail")?,
        operation_result: row.get("operation_result"),
        field_label: row.get("field_label"),
        last_resolved: row.get("last_resolved"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn lead_from_row(row: &sqlx::postgres::PgRow) -> Lead {
    Lead {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        name: row.get("name"),
        email: row.get("email"),
        phone: row.get("phone"),
        company: row.get("company"),
        address: row.get("address"),
        postal_code: row.get("postal_code"),
        data: row.get("data"),
        created_at: row.get("created_at"),
    }
}

#[async_trait::async_trait]
impl TreeStore for PostgresStore {
    async fn get_tree(&self, id: &Id) -> Result<Option<Tree>> {
        let row = sqlx::query(
            "SELECT id, organization_id, name, description, created_at FROM trees WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch tree")?;

        Ok(row.as_ref().map(tree_from_row))
    }

    async fn first_tree(&self) -> Result<Option<Tree>> {
        let row = sqlx::query(
            "SELECT id, organization_id, name, description, created_at FROM trees ORDER BY created_at, id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch first tree")?;

        Ok(row.as_ref().map(tree_from_row))
    }

    async fn list_trees(&self) -> Result<Vec<Tree>> {
        let rows = sqlx::query(
            "SELECT id, organization_id, name, description, created_at FROM trees ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list trees")?;

        Ok(rows.iter().map(tree_from_row).collect())
    }

    async fn upsert_tree(&self, tree: Tree) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trees (id, organization_id, name, description, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                organization_id = EXCLUDED.organization_id,
                name = EXCLUDED.name,
                description = EXCLUDED.description
            "#,
        )
        .bind(&tree.id)
        .bind(&tree.organization_id)
        .bind(&tree.name)
        .bind(&tree.description)
        .bind(&tree.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert tree")?;

        Ok(())
    }

    async fn get_node(&self, id: &Id) -> Result<Option<TreeNode>> {
        let row = sqlx::query(
            r#"
            SELECT id, tree_id, label, parent_id, shared_reference_id, select_config,
                   calculated_value, calculated_at, calculated_by
            FROM tree_nodes WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch node")?;

        row.as_ref().map(node_from_row).transpose()
    }

    async fn list_nodes_for_tree(&self, tree_id: &Id) -> Result<Vec<TreeNode>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tree_id, label, parent_id, shared_reference_id, select_config,
                   calculated_value, calculated_at, calculated_by
            FROM tree_nodes WHERE tree_id = $1 ORDER BY id
            "#,
        )
        .bind(tree_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list nodes")?;

        rows.iter().map(node_from_row).collect()
    }

    async fn find_nodes_by_shared_refs(
        &self,
        shared_refs: &[String],
        tree_id: Option<&Id>,
    ) -> Result<Vec<TreeNode>> {
        let rows = match tree_id {
            Some(tree_id) => {
                sqlx::query(
                    r#"
                    SELECT id, tree_id, label, parent_id, shared_reference_id, select_config,
                           calculated_value, calculated_at, calculated_by
                    FROM tree_nodes
                    WHERE shared_reference_id = ANY($1) AND tree_id = $2
                    ORDER BY id
                    "#,
                )
                .bind(shared_refs)
                .bind(tree_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, tree_id, label, parent_id, shared_reference_id, select_config,
                           calculated_value, calculated_at, calculated_by
                    FROM tree_nodes
                    WHERE shared_reference_id = ANY($1)
                    ORDER BY id
                    "#,
                )
                .bind(shared_refs)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to find nodes by shared references")?;

        rows.iter().map(node_from_row).collect()
    }

    async fn upsert_node(&self, node: TreeNode) -> Result<()> {
        let select_config = node
            .select_config
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("Failed to serialize select config")?;

        sqlx::query(
            r#"
            INSERT INTO tree_nodes (id, tree_id, label, parent_id, shared_reference_id,
                                    select_config, calculated_value, calculated_at, calculated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                tree_id = EXCLUDED.tree_id,
                label = EXCLUDED.label,
                parent_id = EXCLUDED.parent_id,
                shared_reference_id = EXCLUDED.shared_reference_id,
                select_config = EXCLUDED.select_config,
                calculated_value = EXCLUDED.calculated_value,
                calculated_at = EXCLUDED.calculated_at,
                calculated_by = EXCLUDED.calculated_by
            "#,
        )
        .bind(&node.id)
        .bind(&node.tree_id)
        .bind(&node.label)
        .bind(&node.parent_id)
        .bind(&node.shared_reference_id)
        .bind(select_config)
        .bind(&node.calculated_value)
        .bind(&node.calculated_at)
        .bind(&node.calculated_by)
        .execute(&self.pool)
        .await
        .context("Failed to upsert node")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl OperationStore for PostgresStore {
    async fn list_variables_for_tree(&self, tree_id: &Id) -> Result<Vec<NodeVariable>> {
        let rows = sqlx::query(
            r#"
            SELECT v.id, v.node_id, v.source_ref, v.display_name, v.display_format,
                   v.unit, v.value_precision, v.visible_to_user
            FROM node_variables v
            JOIN tree_nodes n ON n.id = v.node_id
            WHERE n.tree_id = $1
            ORDER BY v.node_id
            "#,
        )
        .bind(tree_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list variables for tree")?;

        Ok(rows.iter().map(variable_from_row).collect())
    }

    async fn get_variable_for_node(&self, node_id: &Id) -> Result<Option<NodeVariable>> {
        let row = sqlx::query(
            r#"
            SELECT id, node_id, source_ref, display_name, display_format,
                   unit, value_precision, visible_to_user
            FROM node_variables WHERE node_id = $1
            "#,
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch variable")?;

        Ok(row.as_ref().map(variable_from_row))
    }

    async fn upsert_variable(&self, variable: NodeVariable) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO node_variables (id, node_id, source_ref, display_name, display_format,
                                        unit, value_precision, visible_to_user)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (node_id) DO UPDATE SET
                source_ref = EXCLUDED.source_ref,
                display_name = EXCLUDED.display_name,
                display_format = EXCLUDED.display_format,
                unit = EXCLUDED.unit,
                value_precision = EXCLUDED.value_precision,
                visible_to_user = EXCLUDED.visible_to_user
            "#,
        )
        .bind(&variable.id)
        .bind(&variable.node_id)
        .bind(&variable.source_ref)
        .bind(&variable.display_name)
        .bind(&variable.display_format)
        .bind(&variable.unit)
        .bind(variable.precision.map(|p| p as i16))
        .bind(variable.visible_to_user)
        .execute(&self.pool)
        .await
        .context("Failed to upsert variable")?;

        Ok(())
    }

    async fn get_operation(&self, id: &Id) -> Result<Option<StoredOperation>> {
        let row = sqlx::query("SELECT id, tree_id, config FROM operations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch operation")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let config: Value = row.get("config");
        Ok(Some(StoredOperation {
            id: row.get("id"),
            tree_id: row.get("tree_id"),
            config: serde_json::from_value(config)
                .context("Failed to deserialize operation config")?,
        }))
    }

    async fn upsert_operation(&self, operation: StoredOperation) -> Result<()> {
        let config = serde_json::to_value(&operation.config)
            .context("Failed to serialize operation config")?;

        sqlx::query(
            r#"
            INSERT INTO operations (id, tree_id, config)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                tree_id = EXCLUDED.tree_id,
                config = EXCLUDED.config
            "#,
        )
        .bind(&operation.id)
        .bind(&operation.tree_id)
        .bind(config)
        .execute(&self.pool)
        .await
        .context("Failed to upsert operation")?;

        Ok(())
    }

    async fn get_lookup_table(&self, id: &Id) -> Result<Option<LookupTable>> {
        let row = sqlx::query(
            "SELECT id, tree_id, name, columns, rows, matrix, config FROM lookup_tables WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch lookup table")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let columns: Value = row.get("columns");
        let table_rows: Value = row.get("rows");
        let matrix: Value = row.get("matrix");
        let config: Value = row.get("config");
        Ok(Some(LookupTable {
            id: row.get("id"),
            tree_id: row.get("tree_id"),
            name: row.get("name"),
            columns: serde_json::from_value(columns)
                .context("Failed to deserialize table columns")?,
            rows: serde_json::from_value(table_rows)
                .context("Failed to deserialize table rows")?,
            matrix: serde_json::from_value(matrix)
                .context("Failed to deserialize table matrix")?,
            config: serde_json::from_value(config)
                .context("Failed to deserialize table config")?,
        }))
    }

    async fn upsert_lookup_table(&self, table: LookupTable) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lookup_tables (id, tree_id, name, columns, rows, matrix, config)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                tree_id = EXCLUDED.tree_id,
                name = EXCLUDED.name,
                columns = EXCLUDED.columns,
                rows = EXCLUDED.rows,
                matrix = EXCLUDED.matrix,
                config = EXCLUDED.config
            "#,
        )
        .bind(&table.id)
        .bind(&table.tree_id)
        .bind(&table.name)
        .bind(serde_json::to_value(&table.columns).context("Failed to serialize columns")?)
        .bind(serde_json::to_value(&table.rows).context("Failed to serialize rows")?)
        .bind(serde_json::to_value(&table.matrix).context("Failed to serialize matrix")?)
        .bind(serde_json::to_value(&table.config).context("Failed to serialize config")?)
        .execute(&self.pool)
        .await
        .context("Failed to upsert lookup table")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SubmissionStore for PostgresStore {
    async fn get_submission(&self, id: &Id) -> Result<Option<Submission>> {
        let row = sqlx::query(
            r#"
            SELECT id, tree_id, user_id, lead_id, status, summary, export_data,
                   completed_at, created_at, updated_at
            FROM submissions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch submission")?;

        Ok(row.as_ref().map(submission_from_row))
    }

    async fn upsert_submission(&self, submission: Submission) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO submissions (id, tree_id, user_id, lead_id, status, summary,
                                     export_data, completed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                tree_id = EXCLUDED.tree_id,
                user_id = EXCLUDED.user_id,
                lead_id = EXCLUDED.lead_id,
                status = EXCLUDED.status,
                summary = EXCLUDED.summary,
                export_data = EXCLUDED.export_data,
                completed_at = EXCLUDED.completed_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&submission.id)
        .bind(&submission.tree_id)
        .bind(&submission.user_id)
        .bind(&submission.lead_id)
        .bind(submission.status.as_str())
        .bind(&submission.summary)
        .bind(&submission.export_data)
        .bind(&submission.completed_at)
        .bind(&submission.created_at)
        .bind(&submission.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert submission")?;

        Ok(())
    }

    async fn list_data_for_submission(
        &self,
        submission_id: &Id,
    ) -> Result<Vec<SubmissionDataRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, submission_id, node_id, value, source_ref, operation_source,
                   operation_detail, operation_result, field_label, last_resolved,
                   created_at, updated_at
            FROM submission_data WHERE submission_id = $1 ORDER BY node_id
            "#,
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list submission data")?;

        rows.iter().map(data_row_from_row).collect()
    }

    async fn get_data_row(
        &self,
        submission_id: &Id,
        node_id: &Id,
    ) -> Result<Option<SubmissionDataRow>> {
        let row = sqlx::query(
            r#"
            SELECT id, submission_id, node_id, value, source_ref, operation_source,
                   operation_detail, operation_result, field_label, last_resolved,
                   created_at, updated_at
            FROM submission_data WHERE submission_id = $1 AND node_id = $2
            "#,
        )
        .bind(submission_id)
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch submission data row")?;

        row.as_ref().map(data_row_from_row).transpose()
    }

    async fn upsert_data_row(&self, row: SubmissionDataRow) -> Result<()> {
        let operation_detail = row
            .operation_detail
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("Failed to serialize operation detail")?;

        sqlx::query(
            r#"
            INSERT INTO submission_data (id, submission_id, node_id, value, source_ref,
                                         operation_source, operation_detail, operation_result,
                                         field_label, last_resolved, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (submission_id, node_id) DO UPDATE SET
                value = EXCLUDED.value,
                source_ref = EXCLUDED.source_ref,
                operation_source = EXCLUDED.operation_source,
                operation_detail = EXCLUDED.operation_detail,
                operation_result = EXCLUDED.operation_result,
                field_label = EXCLUDED.field_label,
                last_resolved = EXCLUDED.last_resolved,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&row.id)
        .bind(&row.submission_id)
        .bind(&row.node_id)
        .bind(&row.value)
        .bind(&row.source_ref)
        .bind(row.operation_source.as_str())
        .bind(operation_detail)
        .bind(&row.operation_result)
        .bind(&row.field_label)
        .bind(&row.last_resolved)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert submission data row")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl LeadStore for PostgresStore {
    async fn get_lead(&self, id: &Id) -> Result<Option<Lead>> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, name, email, phone, company, address,
                   postal_code, data, created_at
            FROM leads WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch lead")?;

        Ok(row.as_ref().map(lead_from_row))
    }

    async fn upsert_lead(&self, lead: Lead) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leads (id, organization_id, name, email, phone, company,
                               address, postal_code, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                organization_id = EXCLUDED.organization_id,
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                phone = EXCLUDED.phone,
                company = EXCLUDED.company,
                address = EXCLUDED.address,
                postal_code = EXCLUDED.postal_code,
                data = EXCLUDED.data
            "#,
        )
        .bind(&lead.id)
        .bind(&lead.organization_id)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.phone)
        .bind(&lead.company)
        .bind(&lead.address)
        .bind(&lead.postal_code)
        .bind(&lead.data)
        .bind(&lead.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert lead")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl UserStore for PostgresStore {
    async fn user_exists(&self, id: &Id) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM app_users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to check user")?;

        Ok(row.is_some())
    }

    async fn register_user(&self, id: &Id) -> Result<()> {
        sqlx::query("INSERT INTO app_users (id) VALUES ($1) ON CONFLICT (id) DO NOTHING")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to register user")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl CalculatedValueStore for PostgresStore {
    async fn set_calculated_value(
        &self,
        node_id: &Id,
        value: &str,
        calculated_by: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tree_nodes
            SET calculated_value = $2, calculated_at = $3, calculated_by = $4
            WHERE id = $1
            "#,
        )
        .bind(node_id)
        .bind(value)
        .bind(now_iso())
        .bind(calculated_by)
        .execute(&self.pool)
        .await
        .context("Failed to store calculated value")?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_calculated_values(
        &self,
        node_ids: &[Id],
    ) -> Result<HashMap<Id, Option<String>>> {
        let rows = sqlx::query("SELECT id, calculated_value FROM tree_nodes WHERE id = ANY($1)")
            .bind(node_ids)
            .fetch_all(&self.pool)
            .await
            .context("Failed to read calculated values")?;

        let mut values: HashMap<Id, Option<String>> =
            node_ids.iter().map(|id| (id.clone(), None)).collect();
        for row in rows {
            values.insert(row.get("id"), row.get("calculated_value"));
        }
        Ok(values)
    }

    async fn clear_calculated_values(&self, node_ids: &[Id]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tree_nodes
            SET calculated_value = NULL, calculated_at = NULL, calculated_by = NULL
            WHERE id = ANY($1) AND calculated_value IS NOT NULL
            "#,
        )
        .bind(node_ids)
        .execute(&self.pool)
        .await
        .context("Failed to clear calculated values")?;

        Ok(result.rows_affected())
    }
}

impl Store for PostgresStore {}
