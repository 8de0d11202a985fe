use chrono::{DateTime, Utc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::NodeId;

/// A persisted location.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// Caller-supplied location number. Not required to be unique.
    pub code: String,
    pub area: f64,
    pub parent_id: Option<NodeId>,
    /// Depth from the root, `0` for roots.
    pub level: u32,
    /// Ancestor ids from the root down to this node, joined by [`crate::PATH_DELIMITER`].
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn link(&self) -> NodeLink {
        NodeLink {
            id: self.id,
            parent_id: self.parent_id,
        }
    }

    /// Apply a field update in memory, the way stores apply it on disk.
    pub fn apply(&mut self, update: &NodeUpdate) {
        if let Some(name) = &update.name {
            self.name = name.clone();
        }
        if let Some(code) = &update.code {
            self.code = code.clone();
        }
        if let Some(area) = update.area {
            self.area = area;
        }
        if let Some(parent_id) = update.parent_id {
            self.parent_id = parent_id;
        }
        if let Some(level) = update.level {
            self.level = level;
        }
        if let Some(path) = &update.path {
            self.path = path.clone();
        }
    }
}

/// Narrow `id`/`parent_id` projection used by ancestry walks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeLink {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
}

/// Input to [`crate::TreeManager::create`].
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct NewNode {
    pub name: String,
    pub code: String,
    pub area: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub parent_id: Option<NodeId>,
}

impl NewNode {
    pub fn new(name: impl Into<String>, code: impl Into<String>, area: f64) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            area,
            parent_id: None,
        }
    }

    pub fn under(mut self, parent: NodeId) -> Self {
        self.parent_id = Some(parent);
        self
    }
}

/// Partial change set for [`crate::TreeManager::update`].
///
/// `parent_id: Some(None)` detaches the node into a root; `None` leaves the parent alone.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct NodePatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub area: Option<f64>,
    #[cfg_attr(
        feature = "serde",
        serde(
            deserialize_with = "double_option::deserialize",
            skip_serializing_if = "Option::is_none"
        )
    )]
    pub parent_id: Option<Option<NodeId>>,
}

impl NodePatch {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn area(mut self, area: f64) -> Self {
        self.area = Some(area);
        self
    }

    pub fn parent(mut self, parent: Option<NodeId>) -> Self {
        self.parent_id = Some(parent);
        self
    }
}

/// Fields handed to [`crate::NodeStore::insert`]. The store assigns `id` and timestamps.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRecord {
    pub name: String,
    pub code: String,
    pub area: f64,
    pub parent_id: Option<NodeId>,
    pub level: u32,
    /// Placeholder until the id is known; see [`crate::path`].
    pub path: String,
}

/// Field set for [`crate::NodeStore::update_fields`]. `None` leaves a column untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub code: Option<String>,
    pub area: Option<f64>,
    pub parent_id: Option<Option<NodeId>>,
    pub level: Option<u32>,
    pub path: Option<String>,
}

impl NodeUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.code.is_none()
            && self.area.is_none()
            && self.parent_id.is_none()
            && self.level.is_none()
            && self.path.is_none()
    }
}

/// Response-side projection: a node plus its assembled children. Never persisted.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TreeNode {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub node: Node,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn leaf(node: Node) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including the root.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(current) = stack.pop() {
            count += 1;
            stack.extend(current.children.iter());
        }
        count
    }

    /// Height of the subtree; a leaf has depth 0.
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 0usize)];
        while let Some((current, d)) = stack.pop() {
            max = max.max(d);
            stack.extend(current.children.iter().map(|c| (c, d + 1)));
        }
        max
    }

    /// Nodes in pre-order (parent before its subtree, children in stored order).
    pub fn flatten_preorder(&self) -> Vec<&Node> {
        let mut out = Vec::with_capacity(self.size());
        let mut stack = vec![self];
        while let Some(current) = stack.pop() {
            out.push(&current.node);
            stack.extend(current.children.iter().rev());
        }
        out
    }
}

/// Reject areas that are not a non-negative finite number.
pub(crate) fn validate_area(area: f64) -> Result<()> {
    if area.is_finite() && area >= 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidOperation(format!(
            "area must be a non-negative number, got {area}"
        )))
    }
}

#[cfg(feature = "serde")]
mod double_option {
    use serde::{Deserialize, Deserializer};

    /// Distinguish an explicit `null` (`Some(None)`) from an absent field (`None`).
    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: u128, parent: Option<u128>) -> Node {
        let now = Utc::now();
        Node {
            id: NodeId(id),
            name: format!("n{id}"),
            code: format!("LOC-{id}"),
            area: 1.0,
            parent_id: parent.map(NodeId),
            level: 0,
            path: NodeId(id).to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn apply_only_touches_supplied_fields() {
        let mut node = sample(1, None);
        node.apply(&NodeUpdate {
            name: Some("Warehouse A".into()),
            parent_id: Some(Some(NodeId(9))),
            ..NodeUpdate::default()
        });
        assert_eq!(node.name, "Warehouse A");
        assert_eq!(node.code, "LOC-1");
        assert_eq!(node.parent_id, Some(NodeId(9)));
        assert_eq!(node.level, 0);
    }

    #[test]
    fn preorder_visits_parent_before_children() {
        let tree = TreeNode {
            node: sample(1, None),
            children: vec![
                TreeNode {
                    node: sample(2, Some(1)),
                    children: vec![TreeNode::leaf(sample(4, Some(2)))],
                },
                TreeNode::leaf(sample(3, Some(1))),
            ],
        };
        let ids: Vec<u128> = tree.flatten_preorder().iter().map(|n| n.id.0).collect();
        assert_eq!(ids, vec![1, 2, 4, 3]);
        assert_eq!(tree.size(), 4);
        assert_eq!(tree.depth(), 2);
    }

    #[test]
    fn area_validation() {
        assert!(validate_area(0.0).is_ok());
        assert!(validate_area(1500.75).is_ok());
        assert!(validate_area(-1.0).is_err());
        assert!(validate_area(f64::NAN).is_err());
        assert!(validate_area(f64::INFINITY).is_err());
    }
}
