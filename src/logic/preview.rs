use crate::logic::aliases::{apply_values, resolve_aliases};
use crate::logic::capacity::{BatchEvaluation, CapacityEvaluator};
use crate::logic::interpreter::OperationInterpreter;
use crate::logic::materialize::{store_calculated_values, MaterializeError};
use crate::logic::sanitize::sanitize_map;
use crate::model::{Id, Lead};
use crate::store::traits::Store;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

/// Four-digit postal codes embedded in free-text addresses.
static POSTAL_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})\b").expect("postal code pattern"));

#[derive(Debug, Clone, Default)]
pub struct PreviewParams {
    pub tree_id: Option<Id>,
    pub lead_id: Option<Id>,
    pub base_submission_id: Option<Id>,
    pub form_data: Map<String, Value>,
}

/// Read-only evaluation over a value map assembled from lead fields, an
/// optional base submission, and request overrides. Never writes submission
/// rows; only the calculated-value cache is (best-effort) refreshed.
pub struct PreviewEvaluator {
    /// Mutually exclusive shared-reference groups: selecting a key from one
    /// group purges the value-map entries of every other group.
    exclusion_groups: HashMap<String, BTreeSet<String>>,
}

impl Default for PreviewEvaluator {
    fn default() -> Self {
        let mut groups = HashMap::new();
        groups.insert(
            "roof-plane".to_string(),
            BTreeSet::from([
                "shared-ref-roof-plane".to_string(),
                "shared-ref-roof-plane-count".to_string(),
            ]),
        );
        groups.insert(
            "inclination".to_string(),
            BTreeSet::from([
                "shared-ref-inclination".to_string(),
                "shared-ref-inclination-angle".to_string(),
            ]),
        );
        Self {
            exclusion_groups: groups,
        }
    }
}

impl PreviewEvaluator {
    pub fn with_groups(exclusion_groups: HashMap<String, BTreeSet<String>>) -> Self {
        Self { exclusion_groups }
    }

    pub async fn evaluate<S, I>(
        &self,
        store: &S,
        interpreter: &I,
        params: PreviewParams,
    ) -> Result<BatchEvaluation, MaterializeError>
    where
        S: Store,
        I: OperationInterpreter<S>,
    {
        let tree = match params.tree_id.as_ref() {
            Some(tree_id) => match store.get_tree(tree_id).await? {
                Some(tree) => Some(tree),
                None => {
                    log::warn!("preview tree {} not found, falling back", tree_id);
                    store.first_tree().await?
                }
            },
            None => store.first_tree().await?,
        }
        .ok_or(MaterializeError::NoTreeAvailable)?;

        let mut value_map: HashMap<String, Value> = HashMap::new();

        if let Some(lead_id) = &params.lead_id {
            if let Some(lead) = store.get_lead(lead_id).await? {
                flatten_lead(&lead, &mut value_map);
            } else {
                log::warn!("preview lead {} not found, skipping lead fields", lead_id);
            }
        }

        if let Some(base_id) = &params.base_submission_id {
            for row in store.list_data_for_submission(base_id).await? {
                let Some(value) = row.value else { continue };
                // Rows stored under a concrete node also surface under the
                // node's shared-reference id so formulas can use either key.
                if let Some(node) = store.get_node(&row.node_id).await? {
                    if let Some(shared) = node.shared_reference_id {
                        value_map.insert(shared, Value::String(value.clone()));
                    }
                }
                value_map.insert(row.node_id, Value::String(value));
            }
        }

        let form_data = sanitize_map(&params.form_data);
        apply_values(store, &mut value_map, &form_data, Some(&tree.id)).await?;

        self.purge_excluded_groups(store, &mut value_map, &form_data, &tree.id)
            .await?;

        let capacities = store.list_variables_for_tree(&tree.id).await?;
        let batch = CapacityEvaluator::evaluate_preview_batch(
            store,
            interpreter,
            capacities,
            params.base_submission_id.as_ref(),
            &mut value_map,
        )
        .await?;

        store_calculated_values(store, &batch.calculated, "preview").await;

        Ok(batch)
    }

    /// When the incoming form data selects a key from one group, drop every
    /// other group's keys (and their resolved aliases) from the value map so
    /// stale cross-group values never feed the evaluation.
    async fn purge_excluded_groups<S: Store + ?Sized>(
        &self,
        store: &S,
        value_map: &mut HashMap<String, Value>,
        form_data: &Map<String, Value>,
        tree_id: &Id,
    ) -> Result<(), MaterializeError> {
        let selected: BTreeSet<&String> = self
            .exclusion_groups
            .iter()
            .filter(|(_, members)| members.iter().any(|key| form_data.contains_key(key)))
            .map(|(name, _)| name)
            .collect();
        if selected.is_empty() {
            return Ok(());
        }

        let mut purge_keys: Vec<String> = Vec::new();
        for (name, members) in &self.exclusion_groups {
            if !selected.contains(name) {
                purge_keys.extend(members.iter().cloned());
            }
        }
        if purge_keys.is_empty() {
            return Ok(());
        }

        let aliases = resolve_aliases(store, &purge_keys, Some(tree_id)).await?;
        for key in &purge_keys {
            value_map.remove(key);
            if let Some(node_ids) = aliases.get(key) {
                for node_id in node_ids {
                    value_map.remove(node_id);
                }
            }
        }
        Ok(())
    }
}

/// Flattens a lead's fields into `lead.<field>` value-map entries, with a
/// best-effort postal-code extraction from the address when no structured
/// postal code exists.
fn flatten_lead(lead: &Lead, value_map: &mut HashMap<String, Value>) {
    let mut put = |key: &str, value: &Option<String>| {
        if let Some(value) = value {
            value_map.insert(format!("lead.{}", key), Value::String(value.clone()));
        }
    };
    put("name", &lead.name);
    put("email", &lead.email);
    put("phone", &lead.phone);
    put("company", &lead.company);
    put("address", &lead.address);

    let postal = lead.postal_code.clone().or_else(|| {
        lead.address.as_deref().and_then(|address| {
            POSTAL_CODE
                .captures(address)
                .map(|captures| captures[1].to_string())
        })
    });
    put("postalCode", &postal);

    if let Some(Value::Object(data)) = &lead.data {
        for (key, value) in data {
            value_map.insert(format!("lead.{}", key), value.clone());
        }
    }
}
