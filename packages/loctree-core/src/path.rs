//! Level and materialized-path derivation.
//!
//! A node's path embeds its own id, so placement can only be computed once the id exists.

use crate::ids::NodeId;
use crate::node::Node;

pub const PATH_DELIMITER: char = '.';

/// Derived `level`/`path` pair for a node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Placement {
    pub level: u32,
    pub path: String,
}

pub fn root_placement(id: NodeId) -> Placement {
    Placement {
        level: 0,
        path: id.to_string(),
    }
}

pub fn child_placement(parent_level: u32, parent_path: &str, id: NodeId) -> Placement {
    Placement {
        level: parent_level + 1,
        path: format!("{parent_path}{PATH_DELIMITER}{id}"),
    }
}

pub fn placement_under(parent: Option<&Node>, id: NodeId) -> Placement {
    match parent {
        Some(p) => child_placement(p.level, &p.path, id),
        None => root_placement(id),
    }
}

/// Prefix shared by every strict descendant of the node at `path`.
pub fn descendant_prefix(path: &str) -> String {
    format!("{path}{PATH_DELIMITER}")
}

/// Whether `candidate` lies strictly below `ancestor`.
pub fn is_descendant_path(candidate: &str, ancestor: &str) -> bool {
    candidate.len() > ancestor.len() + 1
        && candidate.starts_with(ancestor)
        && candidate[ancestor.len()..].starts_with(PATH_DELIMITER)
}

/// Rewrite a single path that sits at or below `old_prefix`; `None` if it does not.
pub fn rebase_path(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    if path == old_prefix {
        return Some(new_prefix.to_string());
    }
    if is_descendant_path(path, old_prefix) {
        return Some(format!("{new_prefix}{}", &path[old_prefix.len()..]));
    }
    None
}

/// Signed level delta for moving a node at `current_level` under a parent at
/// `new_parent_level`, or to the root when there is no new parent.
pub fn level_diff(new_parent_level: Option<u32>, current_level: u32) -> i64 {
    let target = new_parent_level.map(|l| i64::from(l) + 1).unwrap_or(0);
    target - i64::from(current_level)
}

/// Apply a signed delta to a level, saturating at zero.
pub fn shift_level(level: u32, diff: i64) -> u32 {
    (i64::from(level) + diff).clamp(0, i64::from(u32::MAX)) as u32
}
