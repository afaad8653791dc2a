//! Tri-state selection over the object tree
//!
//! Each node resolves to included, excluded, or partial. The tree is stored
//! as an arena: child slots are owned, the parent link is a plain index used
//! only to trigger bottom-up recompute, never for traversal from the root.
//!
//! Two distinct rule sets live here and are kept apart on purpose:
//! - the lattice rules (`set_included` cascade + ancestor recompute), and
//! - the click coercion applied only at the point of direct interaction,
//!   which skips the partial stop of the usual checkbox cycle.

use crate::save::ObjectNode;
use serde::Serialize;
use tracing::debug;

/// Resolved selection value of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionValue {
    Excluded,
    Included,
    /// Some but not all descendants included. Never assigned to a leaf.
    Partial,
}

pub type NodeId = usize;

#[derive(Debug)]
pub struct SelectionNode {
    pub guid: String,
    pub name: String,
    /// State variants mirror their nearest selectable ancestor and cannot
    /// be toggled on their own.
    pub locked: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    value: SelectionValue,
    dirty_fields: bool,
}

/// Selection state for one loaded document.
#[derive(Debug, Default)]
pub struct SelectionTree {
    nodes: Vec<SelectionNode>,
    roots: Vec<NodeId>,
}

impl SelectionTree {
    /// Build the selection arena over a parsed object tree.
    /// Everything starts excluded; the caller opts nodes in.
    pub fn build(roots: &[ObjectNode]) -> Self {
        let mut tree = Self::default();
        for root in roots {
            let id = tree.add_node(root, None, false);
            tree.roots.push(id);
        }
        tree
    }

    fn add_node(&mut self, node: &ObjectNode, parent: Option<NodeId>, ancestor_locked: bool) -> NodeId {
        let locked = ancestor_locked || node.is_state;
        let id = self.nodes.len();
        self.nodes.push(SelectionNode {
            guid: node.guid.clone(),
            name: node.name.clone(),
            locked,
            parent,
            children: Vec::new(),
            value: SelectionValue::Excluded,
            dirty_fields: false,
        });
        for child in &node.children {
            let child_id = self.add_node(child, Some(id), locked);
            self.nodes[id].children.push(child_id);
        }
        id
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &SelectionNode {
        &self.nodes[id]
    }

    pub fn value(&self, id: NodeId) -> SelectionValue {
        self.nodes[id].value
    }

    /// First node carrying the given GUID, in tree order.
    pub fn find_by_guid(&self, guid: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.guid == guid)
    }

    /// Flag pending unsaved field edits on a node. An exclude cascading over
    /// a dirty subtree asks the caller for confirmation first.
    pub fn mark_fields_dirty(&mut self, id: NodeId, dirty: bool) {
        self.nodes[id].dirty_fields = dirty;
    }

    /// Set a node included or excluded, cascading the exact value over the
    /// whole subtree and recomputing ancestors bottom-up.
    ///
    /// Locked nodes reject the call. Excluding a subtree with pending field
    /// edits consults `confirm`; declining leaves all state unchanged.
    /// Returns whether anything changed.
    pub fn set_included(
        &mut self,
        id: NodeId,
        included: bool,
        confirm: &mut dyn FnMut(&SelectionNode) -> bool,
    ) -> bool {
        if self.nodes[id].locked {
            return false;
        }
        if !included && self.subtree_has_dirty_fields(id) && !confirm(&self.nodes[id]) {
            debug!(guid = %self.nodes[id].guid, "exclude declined over dirty subtree");
            return false;
        }

        let value = if included {
            SelectionValue::Included
        } else {
            SelectionValue::Excluded
        };
        self.cascade(id, value);
        self.recompute_ancestors(id);
        true
    }

    /// Direct-interaction toggle: an included node becomes excluded, a
    /// partial node becomes fully included, an excluded node included.
    /// The cycle never stops on partial.
    pub fn click(&mut self, id: NodeId, confirm: &mut dyn FnMut(&SelectionNode) -> bool) -> bool {
        match self.nodes[id].value {
            SelectionValue::Included => self.set_included(id, false, confirm),
            SelectionValue::Partial | SelectionValue::Excluded => self.set_included(id, true, confirm),
        }
    }

    fn cascade(&mut self, id: NodeId, value: SelectionValue) {
        self.nodes[id].value = value;
        let children = self.nodes[id].children.clone();
        for child in children {
            self.cascade(child, value);
        }
    }

    fn recompute_ancestors(&mut self, id: NodeId) {
        let mut current = self.nodes[id].parent;
        while let Some(parent) = current {
            let mut all_included = true;
            let mut all_excluded = true;
            for &child in &self.nodes[parent].children {
                match self.nodes[child].value {
                    SelectionValue::Included => all_excluded = false,
                    SelectionValue::Excluded => all_included = false,
                    SelectionValue::Partial => {
                        all_included = false;
                        all_excluded = false;
                    }
                }
            }
            self.nodes[parent].value = if all_included {
                SelectionValue::Included
            } else if all_excluded {
                SelectionValue::Excluded
            } else {
                SelectionValue::Partial
            };
            current = self.nodes[parent].parent;
        }
    }

    fn subtree_has_dirty_fields(&self, id: NodeId) -> bool {
        self.nodes[id].dirty_fields
            || self.nodes[id]
                .children
                .iter()
                .any(|&child| self.subtree_has_dirty_fields(child))
    }

    /// Derive the flat snapshot: only top-most included nodes are listed,
    /// their descendants are implied.
    pub fn snapshot(&self) -> SelectionSnapshot {
        let mut selected = Vec::new();
        for &root in &self.roots {
            self.collect_topmost(root, &mut selected);
        }
        SelectionSnapshot { selected }
    }

    fn collect_topmost(&self, id: NodeId, out: &mut Vec<SelectedObject>) {
        let node = &self.nodes[id];
        if node.value == SelectionValue::Included {
            out.push(SelectedObject {
                guid: node.guid.clone(),
                name: node.name.clone(),
                include_children: true,
                include_states: true,
            });
            return;
        }
        for &child in &node.children {
            self.collect_topmost(child, out);
        }
    }
}

/// Flat, shareable record of the user's top-level choices.
///
/// An empty snapshot is the distinguished "everything included" value used
/// by whole-document analysis scans.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SelectionSnapshot {
    pub selected: Vec<SelectedObject>,
}

impl SelectionSnapshot {
    /// The distinguished treat-everything-as-included snapshot.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectedObject {
    pub guid: String,
    pub name: String,
    pub include_children: bool,
    // Always true in the current design; kept explicit for extension.
    pub include_states: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save;

    fn accept(_: &SelectionNode) -> bool {
        true
    }

    fn sample_tree() -> SelectionTree {
        let document = save::parse(
            r#"{
                "ObjectStates": [
                    {
                        "GUID": "bag", "Name": "Bag",
                        "ContainedObjects": [
                            { "GUID": "c1", "Name": "Card" },
                            { "GUID": "c2", "Name": "Token" }
                        ],
                        "States": { "2": { "GUID": "s1", "Name": "Alt" } }
                    },
                    { "GUID": "solo", "Name": "Figurine" }
                ]
            }"#,
        )
        .unwrap();
        SelectionTree::build(&document.roots)
    }

    #[test]
    fn include_cascades_to_descendants_and_states() {
        let mut tree = sample_tree();
        let bag = tree.find_by_guid("bag").unwrap();
        assert!(tree.set_included(bag, true, &mut accept));

        for guid in ["bag", "c1", "c2", "s1"] {
            let id = tree.find_by_guid(guid).unwrap();
            assert_eq!(tree.value(id), SelectionValue::Included, "{guid}");
        }
        let solo = tree.find_by_guid("solo").unwrap();
        assert_eq!(tree.value(solo), SelectionValue::Excluded);
    }

    #[test]
    fn state_nodes_cannot_be_toggled_directly() {
        let mut tree = sample_tree();
        let state = tree.find_by_guid("s1").unwrap();
        assert!(tree.node(state).locked);
        assert!(!tree.set_included(state, true, &mut accept));
        assert_eq!(tree.value(state), SelectionValue::Excluded);

        // It mirrors the owning node instead.
        let bag = tree.find_by_guid("bag").unwrap();
        tree.set_included(bag, true, &mut accept);
        assert_eq!(tree.value(state), SelectionValue::Included);
    }

    #[test]
    fn mixed_children_make_parent_partial() {
        let mut tree = sample_tree();
        let c1 = tree.find_by_guid("c1").unwrap();
        tree.set_included(c1, true, &mut accept);

        let bag = tree.find_by_guid("bag").unwrap();
        assert_eq!(tree.value(bag), SelectionValue::Partial);
    }

    #[test]
    fn all_children_included_resolves_parent_included() {
        let mut tree = sample_tree();
        for guid in ["c1", "c2"] {
            let id = tree.find_by_guid(guid).unwrap();
            tree.set_included(id, true, &mut accept);
        }
        // The state variant is still excluded, so the bag stays partial.
        let bag = tree.find_by_guid("bag").unwrap();
        assert_eq!(tree.value(bag), SelectionValue::Partial);

        tree.set_included(bag, true, &mut accept);
        assert_eq!(tree.value(bag), SelectionValue::Included);
    }

    #[test]
    fn leaf_is_never_partial() {
        let mut tree = sample_tree();
        let solo = tree.find_by_guid("solo").unwrap();
        tree.set_included(solo, true, &mut accept);
        assert_eq!(tree.value(solo), SelectionValue::Included);
        tree.set_included(solo, false, &mut accept);
        assert_eq!(tree.value(solo), SelectionValue::Excluded);
    }

    #[test]
    fn click_skips_partial() {
        let mut tree = sample_tree();
        let bag = tree.find_by_guid("bag").unwrap();
        let c1 = tree.find_by_guid("c1").unwrap();

        tree.set_included(c1, true, &mut accept);
        assert_eq!(tree.value(bag), SelectionValue::Partial);

        // Clicking a partial node selects it fully.
        tree.click(bag, &mut accept);
        assert_eq!(tree.value(bag), SelectionValue::Included);

        // Clicking an included node excludes it outright.
        tree.click(bag, &mut accept);
        assert_eq!(tree.value(bag), SelectionValue::Excluded);
        assert_eq!(tree.value(c1), SelectionValue::Excluded);
    }

    #[test]
    fn exclude_over_dirty_subtree_asks_for_confirmation() {
        let mut tree = sample_tree();
        let bag = tree.find_by_guid("bag").unwrap();
        let c1 = tree.find_by_guid("c1").unwrap();
        tree.set_included(bag, true, &mut accept);
        tree.mark_fields_dirty(c1, true);

        let mut asked = 0;
        let mut decline = |_: &SelectionNode| {
            asked += 1;
            false
        };
        assert!(!tree.set_included(bag, false, &mut decline));
        assert_eq!(asked, 1);
        assert_eq!(tree.value(bag), SelectionValue::Included);
        assert_eq!(tree.value(c1), SelectionValue::Included);

        assert!(tree.set_included(bag, false, &mut |_| true));
        assert_eq!(tree.value(bag), SelectionValue::Excluded);
    }

    #[test]
    fn snapshot_lists_only_topmost_included() {
        let mut tree = sample_tree();
        let bag = tree.find_by_guid("bag").unwrap();
        let solo = tree.find_by_guid("solo").unwrap();
        tree.set_included(bag, true, &mut accept);
        tree.set_included(solo, true, &mut accept);

        let snapshot = tree.snapshot();
        let guids: Vec<_> = snapshot.selected.iter().map(|s| s.guid.as_str()).collect();
        assert_eq!(guids, vec!["bag", "solo"]);
        assert!(snapshot.selected.iter().all(|s| s.include_children && s.include_states));
    }

    #[test]
    fn snapshot_descends_through_partial_branches() {
        let mut tree = sample_tree();
        let c2 = tree.find_by_guid("c2").unwrap();
        tree.set_included(c2, true, &mut accept);

        let snapshot = tree.snapshot();
        let guids: Vec<_> = snapshot.selected.iter().map(|s| s.guid.as_str()).collect();
        assert_eq!(guids, vec!["c2"]);
    }

    #[test]
    fn untouched_tree_snapshot_is_the_select_all_value() {
        let tree = sample_tree();
        assert!(tree.snapshot().is_empty());
        assert!(SelectionSnapshot::all().is_empty());
    }
}
