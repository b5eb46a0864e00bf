use crate::logic::aliases::{is_accepted_node_id, is_shared_reference_id, resolve_aliases};
use crate::model::{now_iso, Id, OperationDetail, OperationSource, SubmissionDataRow};
use crate::store::traits::Store;
use anyhow::Result;
use serde_json::{Map, Value};

/// Persists plain form entries as neutral data rows, one per storage id.
///
/// Keys that are not an accepted node id shape are dropped. Shared-reference
/// keys fan out: the pseudo-key itself gets a row, and so does every concrete
/// node that aliases it. Each row is diffed against the stored one first;
/// only rows whose value or source actually changed are written. Returns the
/// number of rows written.
pub async fn save_user_entries_neutral<S: Store + ?Sized>(
    store: &S,
    submission_id: &Id,
    entries: &Map<String, Value>,
    tree_id: Option<&Id>,
) -> Result<usize> {
    let accepted: Vec<(&String, &Value)> = entries
        .iter()
        .filter(|(key, _)| is_accepted_node_id(key))
        .collect();
    if accepted.is_empty() {
        return Ok(0);
    }

    let shared_keys: Vec<String> = accepted
        .iter()
        .filter(|(key, _)| is_shared_reference_id(key))
        .map(|(key, _)| (*key).clone())
        .collect();
    let aliases = resolve_aliases(store, &shared_keys, tree_id).await?;

    let mut written = 0usize;
    for (key, value) in accepted {
        let stored_value = match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other)?,
        };

        // The submitted key always gets a row of its own; shared-reference
        // keys additionally land on every aliased node.
        let mut targets: Vec<Id> = vec![key.clone()];
        if let Some(node_ids) = aliases.get(key) {
            targets.extend(node_ids.iter().cloned());
        }

        for target in targets {
            let existing = store.get_data_row(submission_id, &target).await?;
            let unchanged = existing.as_ref().map_or(false, |row| {
                row.value.as_deref() == Some(stored_value.as_str())
                    && row.operation_source == OperationSource::Neutral
            });
            if unchanged {
                continue;
            }

            let alias_resolved = target != *key;
            let now = now_iso();
            let mut row = existing
                .unwrap_or_else(|| SubmissionDataRow::new(submission_id.clone(), target.clone()));
            row.value = Some(stored_value.clone());
            row.operation_source = OperationSource::Neutral;
            row.operation_detail =
                Some(OperationDetail::user_entry(value.clone(), key, alias_resolved));
            row.updated_at = now;
            store.upsert_data_row(row).await?;
            written += 1;
        }
    }

    Ok(written)
}
