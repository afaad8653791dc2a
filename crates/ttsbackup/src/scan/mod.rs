//! Asset discovery across the included subset of the save
//!
//! Scanning re-walks the raw document rather than the node tree: asset URLs
//! sit at arbitrary depth inside each object's subtree, and real-world saves
//! carry vendor fields no schema lists. Known high-value fields are scanned
//! first from a static table, then a generic recursive walk picks up any
//! remaining URL-shaped strings.

use crate::save::{JsonPath, ObjectNode, SaveDocument, SaveError};
use crate::selection::SelectionSnapshot;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Cooperative cancellation. Partial scan results are discarded.
    #[error("scan cancelled")]
    Cancelled,

    #[error(transparent)]
    Save(#[from] SaveError),
}

/// Classification of a discovered asset, inferred from the field it sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssetKind {
    Unknown,
    Image,
    Mesh,
    AssetBundle,
    DeckFace,
    DeckBack,
    Decal,
    UiAsset,
    Table,
}

/// One discovered asset field. `(source_guid, field_path)` pairs are unique
/// across a scan; the field path is the join key for rewriting.
#[derive(Debug, Clone, Serialize)]
pub struct AssetReference {
    pub original_url: String,
    pub kind: AssetKind,
    pub inferred_extension: Option<String>,
    pub source_guid: String,
    pub source_name: String,
    pub field_path: JsonPath,
}

/// Field paths known to carry assets, scanned ahead of the generic walk.
static KNOWN_FIELDS: &[(&[&str], AssetKind)] = &[
    (&["CustomMesh", "MeshURL"], AssetKind::Mesh),
    (&["CustomMesh", "TextureURL"], AssetKind::Image),
    (&["CustomMesh", "NormalURL"], AssetKind::Image),
    (&["CustomMesh", "ColliderURL"], AssetKind::Mesh),
    (&["CustomImage", "ImageURL"], AssetKind::Image),
    (&["CustomAssetbundle", "AssetbundleURL"], AssetKind::AssetBundle),
    (&["CustomAssetbundle", "AssetbundleSecondaryURL"], AssetKind::AssetBundle),
    (&["CustomPlaymat", "ImageURL"], AssetKind::Table),
    (&["CustomDecal", "ImageURL"], AssetKind::Decal),
    (&["CustomUI", "AssetURL"], AssetKind::UiAsset),
    (&["CardCustom", "AssetURL"], AssetKind::UiAsset),
];

/// Per-deck-definition fields inside the keyed `CustomDeck` map.
static DECK_FIELDS: &[(&str, AssetKind)] = &[
    ("FaceURL", AssetKind::DeckFace),
    ("BackURL", AssetKind::DeckBack),
    ("UniqueBackURL", AssetKind::DeckBack),
];

/// Permissive test for values the download engine can actually fetch.
pub fn is_http_url(value: &str) -> bool {
    let prefix: String = value.trim_start().chars().take(8).collect();
    let prefix = prefix.to_ascii_lowercase();
    prefix.starts_with("http://") || prefix.starts_with("https://")
}

/// Scan the included subset of the document for asset references.
///
/// An empty snapshot means "scan everything" (whole-document analysis).
/// Nodes whose recorded path no longer resolves are silently skipped.
pub fn scan_assets(
    document: &SaveDocument,
    snapshot: &SelectionSnapshot,
    cancel: &CancellationToken,
) -> Result<Vec<AssetReference>, ScanError> {
    let root: Value = serde_json::from_str(&document.raw_json)
        .map_err(|e| SaveError::MalformedDocument(e.to_string()))?;

    let mut included = Vec::new();
    let explicit: HashMap<&str, bool> = snapshot
        .selected
        .iter()
        .map(|s| (s.guid.as_str(), s.include_children))
        .collect();
    let scan_all = snapshot.is_empty();
    for node in &document.roots {
        collect_included(node, &explicit, false, scan_all, &mut included);
    }

    let mut results = Vec::new();
    for node in included {
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        let Some(subtree) = node.json_path.resolve(&root) else {
            continue;
        };
        scan_object(node, subtree, &mut results);
    }

    debug!(assets = results.len(), "asset scan complete");
    Ok(results)
}

fn collect_included<'a>(
    node: &'a ObjectNode,
    explicit: &HashMap<&str, bool>,
    inherited: bool,
    scan_all: bool,
    out: &mut Vec<&'a ObjectNode>,
) {
    let self_included = scan_all || inherited || explicit.contains_key(node.guid.as_str());
    if self_included {
        out.push(node);
    }

    let include_children = explicit.get(node.guid.as_str()).copied().unwrap_or(false);
    for child in &node.children {
        // State variants ride along with their owner unconditionally.
        let child_inherited =
            inherited || include_children || (self_included && child.is_state);
        collect_included(child, explicit, child_inherited, scan_all, out);
    }
}

fn scan_object(node: &ObjectNode, subtree: &Value, results: &mut Vec<AssetReference>) {
    let mut seen = HashSet::new();

    for (segments, kind) in KNOWN_FIELDS {
        let mut value = subtree;
        let mut path = node.json_path.clone();
        let mut found = true;
        for key in *segments {
            match value.get(key) {
                Some(next) => {
                    value = next;
                    path = path.key(*key);
                }
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found {
            if let Some(s) = value.as_str() {
                try_add(node, path, s, *kind, results, &mut seen);
            }
        }
    }

    scan_custom_deck(node, subtree, results, &mut seen);

    // Generic walk over the node's own fields. Child containers belong to
    // descendant nodes and get scanned when their own node comes up.
    if let Some(map) = subtree.as_object() {
        for (key, child) in map {
            if crate::save::CHILD_CONTAINERS
                .iter()
                .any(|c| c.eq_ignore_ascii_case(key))
            {
                continue;
            }
            walk_strings(child, node.json_path.key(key), &mut |path, s| {
                // The in-game tablet points at a website, not a game asset.
                if path.ends_with_keys(&["Tablet", "URL"]) {
                    return;
                }
                if is_http_url(s) {
                    try_add(node, path, s, AssetKind::Unknown, results, &mut seen);
                }
            });
        }
    }
}

/// `CustomDeck` is a keyed dictionary of deck definitions, each carrying its
/// own face/back fields.
fn scan_custom_deck(
    node: &ObjectNode,
    subtree: &Value,
    results: &mut Vec<AssetReference>,
    seen: &mut HashSet<JsonPath>,
) {
    let Some(decks) = subtree.get("CustomDeck").and_then(Value::as_object) else {
        return;
    };
    let deck_base = node.json_path.key("CustomDeck");
    for (deck_id, deck_def) in decks {
        if !deck_def.is_object() {
            continue;
        }
        for (field, kind) in DECK_FIELDS {
            if let Some(s) = deck_def.get(*field).and_then(Value::as_str) {
                try_add(node, deck_base.key(deck_id).key(*field), s, *kind, results, seen);
            }
        }
    }
}

fn walk_strings(value: &Value, path: JsonPath, on_string: &mut impl FnMut(JsonPath, &str)) {
    match value {
        Value::String(s) => on_string(path, s),
        Value::Object(map) => {
            for (key, child) in map {
                walk_strings(child, path.key(key), on_string);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk_strings(item, path.index(i), on_string);
            }
        }
        _ => {}
    }
}

fn try_add(
    node: &ObjectNode,
    field_path: JsonPath,
    value: &str,
    kind: AssetKind,
    results: &mut Vec<AssetReference>,
    seen: &mut HashSet<JsonPath>,
) {
    if value.trim().is_empty() {
        return;
    }
    if !seen.insert(field_path.clone()) {
        return;
    }
    results.push(AssetReference {
        original_url: value.to_string(),
        kind,
        inferred_extension: infer_extension(value),
        source_guid: node.guid.clone(),
        source_name: node.name.clone(),
        field_path,
    });
}

/// Infer a file extension from the URL path segment. Local-path-looking
/// values are left alone; those get flagged at download time instead.
fn infer_extension(value: &str) -> Option<String> {
    if !is_http_url(value) {
        return None;
    }

    let mut cut = value;
    if let Some(q) = cut.find(['?', '#']) {
        cut = &cut[..q];
    }
    if let Some(slash) = cut.rfind('/') {
        cut = &cut[slash + 1..];
    }
    let dot = cut.rfind('.')?;
    if dot == cut.len() - 1 {
        return None;
    }
    let ext = &cut[dot..];
    (ext.len() <= 10).then(|| ext.to_string())
}
