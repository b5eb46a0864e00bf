use crate::model::Id;
use crate::store::traits::TreeStore;
use anyhow::Result;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

static UUID_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("uuid key pattern")
});
static GENERATED_NODE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^node_[0-9]+_[a-z0-9]+$").expect("generated node key pattern"));
static SHARED_REF_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^shared-ref-[a-z0-9-]+$").expect("shared ref key pattern"));

/// True when `key` names a shared-reference pseudo-node rather than a
/// physical tree node.
pub fn is_shared_reference_id(key: &str) -> bool {
    SHARED_REF_KEY.is_match(key)
}

/// True when `key` is one of the three shapes we accept as a storage key:
/// a UUID, a generated `node_<digits>_<alphanum>` id, or a shared-reference
/// id. Everything else is silently dropped at the persistence boundary.
pub fn is_accepted_node_id(key: &str) -> bool {
    UUID_KEY.is_match(key) || GENERATED_NODE_KEY.is_match(key) || SHARED_REF_KEY.is_match(key)
}

/// Expands shared-reference pseudo-ids into the concrete node ids that alias
/// them, optionally scoped to one tree. Empty input short-circuits without
/// touching storage.
pub async fn resolve_aliases<S: TreeStore + ?Sized>(
    store: &S,
    shared_ref_ids: &[String],
    tree_id: Option<&Id>,
) -> Result<HashMap<String, Vec<Id>>> {
    if shared_ref_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let nodes = store
        .find_nodes_by_shared_refs(shared_ref_ids, tree_id)
        .await?;

    Ok(nodes
        .into_iter()
        .filter_map(|node| node.shared_reference_id.clone().map(|shared| (shared, node.id)))
        .into_group_map())
}

/// Applies `(key, value)` entries onto `target`. Every key is written as-is;
/// shared-reference keys additionally fan out to every concrete alias node,
/// so a value entered once populates each physical copy of the field.
pub async fn apply_values<S: TreeStore + ?Sized>(
    store: &S,
    target: &mut HashMap<String, Value>,
    entries: &Map<String, Value>,
    tree_id: Option<&Id>,
) -> Result<()> {
    let shared_keys: Vec<String> = entries
        .keys()
        .filter(|key| is_shared_reference_id(key))
        .cloned()
        .collect();
    let aliases = resolve_aliases(store, &shared_keys, tree_id).await?;

    for (key, value) in entries {
        target.insert(key.clone(), value.clone());
        if let Some(node_ids) = aliases.get(key) {
            for node_id in node_ids {
                target.insert(node_id.clone(), value.clone());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Tree, TreeNode};
    use crate::store::memory::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_key_classification() {
        assert!(is_accepted_node_id("6a3b24c1-9f2e-4d0a-8b1c-2e3f4a5b6c7d"));
        assert!(is_accepted_node_id("6A3B24C1-9F2E-4D0A-8B1C-2E3F4A5B6C7D"));
        assert!(is_accepted_node_id("node_1757366229534_ab12cd"));
        assert!(is_accepted_node_id("shared-ref-roof-area"));
        assert!(!is_accepted_node_id("lead.email"));
        assert!(!is_accepted_node_id("random-key"));
        assert!(!is_accepted_node_id("node_abc_123"));

        assert!(is_shared_reference_id("shared-ref-roof-area"));
        assert!(!is_shared_reference_id("node_1757366229534_ab12cd"));
    }

    async fn seeded_store() -> (MemoryStore, Tree) {
        let store = MemoryStore::new();
        let tree = Tree::new("org-1".to_string(), "Roof audit".to_string(), None);
        store.upsert_tree(tree.clone()).await.unwrap();

        let area_a = TreeNode::new(tree.id.clone(), "Roof area (south)".to_string())
            .with_shared_reference("shared-ref-roof-area");
        let area_b = TreeNode::new(tree.id.clone(), "Roof area (recap)".to_string())
            .with_shared_reference("shared-ref-roof-area");
        let plain = TreeNode::new(tree.id.clone(), "Owner name".to_string());
        store.upsert_node(area_a).await.unwrap();
        store.upsert_node(area_b).await.unwrap();
        store.upsert_node(plain).await.unwrap();

        (store, tree)
    }

    #[tokio::test]
    async fn test_resolve_aliases_groups_by_shared_ref() {
        let (store, tree) = seeded_store().await;

        let resolved = resolve_aliases(
            &store,
            &["shared-ref-roof-area".to_string()],
            Some(&tree.id),
        )
        .await
        .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved["shared-ref-roof-area"].len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_aliases_empty_input_is_a_no_op() {
        let (store, _tree) = seeded_store().await;
        let resolved = resolve_aliases(&store, &[], None).await.unwrap();
        assert!(resolved.is_empty());
    }

    #[tokio::test]
    async fn test_apply_values_fans_out_shared_references() {
        let (store, tree) = seeded_store().await;

        let mut entries = Map::new();
        entries.insert("shared-ref-roof-area".to_string(), json!("42.5"));

        let mut value_map = HashMap::new();
        apply_values(&store, &mut value_map, &entries, Some(&tree.id))
            .await
            .unwrap();

        // Pseudo-key plus both aliases must all read back the same value.
        assert_eq!(value_map.len(), 3);
        assert!(value_map.values().all(|v| v == &json!("42.5")));
        assert_eq!(value_map["shared-ref-roof-area"], json!("42.5"));
    }

    #[tokio::test]
    async fn test_apply_values_writes_plain_keys_untouched() {
        let (store, tree) = seeded_store().await;

        let mut entries = Map::new();
        entries.insert("node_1757366229534_ab12cd".to_string(), json!(7));

        let mut value_map = HashMap::new();
        apply_values(&store, &mut value_map, &entries, Some(&tree.id))
            .await
            .unwrap();

        assert_eq!(value_map.len(), 1);
        assert_eq!(value_map["node_1757366229534_ab12cd"], json!(7));
    }
}
