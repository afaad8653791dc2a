//! Save document parsing and the addressable object tree
//!
//! A save is kept as the original raw JSON text plus a tree of [`ObjectNode`]s
//! addressing into it. We deliberately do not model every field of the save
//! format; the tree only carries what selection and scanning need, and every
//! node records the [`JsonPath`] of its subtree so later stages can locate it
//! in the untouched original.

pub mod path;

pub use path::{JsonPath, PathSegment};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Parse-time failures. Both are fatal to the run.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("save document is empty")]
    EmptyInput,

    #[error("malformed save document: {0}")]
    MalformedDocument(String),
}

/// A loaded save: the original text, the object tree, and the save's own name.
#[derive(Debug, Clone)]
pub struct SaveDocument {
    pub raw_json: String,
    pub roots: Vec<ObjectNode>,
    pub original_name: Option<String>,
}

impl SaveDocument {
    /// Total number of nodes in the tree, states included.
    pub fn node_count(&self) -> usize {
        fn count(node: &ObjectNode) -> usize {
            1 + node.children.iter().map(count).sum::<usize>()
        }
        self.roots.iter().map(count).sum()
    }
}

/// One save object or nested state variant.
///
/// Children are owned exclusively by their parent. GUIDs come straight from
/// the save and may repeat across the tree.
#[derive(Debug, Clone)]
pub struct ObjectNode {
    pub guid: String,
    pub name: String,
    pub object_type: String,
    pub json_path: JsonPath,
    /// State variants are shown in the tree but never independently selectable.
    pub is_state: bool,
    pub has_states: bool,
    /// Whether this node carries asset URLs of its own, children aside.
    pub has_own_assets: bool,
    pub children: Vec<ObjectNode>,
}

impl ObjectNode {
    /// Human-readable label for tree listings.
    pub fn display_name(&self) -> String {
        let name = if self.name.trim().is_empty() {
            "(unnamed object)"
        } else {
            &self.name
        };
        let mut label = name.to_string();
        if !self.object_type.is_empty() {
            label.push_str(&format!(" [{}]", self.object_type));
        }
        if self.has_states {
            label.push_str(" (states)");
        }
        label
    }
}

/// Child containers that belong to descendants, not to the node itself.
pub(crate) const CHILD_CONTAINERS: [&str; 3] = ["ContainedObjects", "States", "ObjectStates"];

/// Parse raw save JSON into a [`SaveDocument`].
///
/// Missing optional fields mean "no children of that kind" and never raise.
pub fn parse(raw_json: &str) -> Result<SaveDocument, SaveError> {
    if raw_json.trim().is_empty() {
        return Err(SaveError::EmptyInput);
    }

    let root: Value = serde_json::from_str(raw_json)
        .map_err(|e| SaveError::MalformedDocument(e.to_string()))?;
    let Some(root_obj) = root.as_object() else {
        return Err(SaveError::MalformedDocument(
            "top-level value is not an object".to_string(),
        ));
    };

    let mut roots = Vec::new();
    if let Some(object_states) = root_obj.get("ObjectStates").and_then(Value::as_array) {
        let base = JsonPath::root().key("ObjectStates");
        for (i, obj) in object_states.iter().enumerate() {
            if obj.is_object() {
                roots.push(build_node(obj, base.index(i), false));
            }
        }
    }

    let original_name = root_obj
        .get("SaveName")
        .and_then(Value::as_str)
        .map(str::to_string);

    let document = SaveDocument {
        raw_json: raw_json.to_string(),
        roots,
        original_name,
    };
    debug!(
        objects = document.node_count(),
        name = document.original_name.as_deref().unwrap_or(""),
        "parsed save document"
    );
    Ok(document)
}

fn build_node(obj: &Value, json_path: JsonPath, is_state: bool) -> ObjectNode {
    let guid = str_field(obj, "GUID");
    let nickname = str_field(obj, "Nickname");
    let type_name = str_field(obj, "Name");
    let name = if nickname.trim().is_empty() {
        type_name.clone()
    } else {
        nickname
    };

    let mut children = Vec::new();

    if let Some(contained) = obj.get("ContainedObjects").and_then(Value::as_array) {
        let base = json_path.key("ContainedObjects");
        for (i, child) in contained.iter().enumerate() {
            if child.is_object() {
                children.push(build_node(child, base.index(i), false));
            }
        }
    }

    let has_states = obj.get("States").is_some_and(|s| s.is_object() || s.is_array());
    if let Some(states) = obj.get("States").and_then(Value::as_object) {
        let base = json_path.key("States");
        for (key, state) in states {
            if state.is_object() {
                children.push(build_node(state, base.key(key), true));
            }
        }
    }

    // Some saves nest further ObjectStates arrays inside objects.
    if let Some(nested) = obj.get("ObjectStates").and_then(Value::as_array) {
        let base = json_path.key("ObjectStates");
        for (i, child) in nested.iter().enumerate() {
            if child.is_object() {
                children.push(build_node(child, base.index(i), false));
            }
        }
    }

    ObjectNode {
        guid,
        name,
        object_type: type_name,
        json_path,
        is_state,
        has_states,
        has_own_assets: has_own_urls(obj),
        children,
    }
}

fn str_field(obj: &Value, key: &str) -> String {
    obj.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Whether the object carries URL-shaped strings in its own fields,
/// child containers excluded so parents don't light up for their children.
fn has_own_urls(obj: &Value) -> bool {
    match obj {
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| !CHILD_CONTAINERS.iter().any(|c| c.eq_ignore_ascii_case(key)))
            .any(|(_, value)| has_own_urls(value)),
        Value::Array(items) => items.iter().any(has_own_urls),
        Value::String(s) => crate::scan::is_http_url(s),
        _ => false,
    }
}
