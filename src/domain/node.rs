use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-entry override of the cadence-based tier assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckFrequency {
    #[default]
    Auto,
    High,
    Low,
    Never,
}

/// A node of the subscription tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SubscriptionNode {
    Category(Category),
    Entry(Entry),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub title: String,
    #[serde(default)]
    pub expanded: bool,
    #[serde(default)]
    pub children: Vec<SubscriptionNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    pub uri: String,
    #[serde(default)]
    pub frequency: CheckFrequency,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skip_content: bool,
}

impl Category {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            expanded: false,
            children: Vec::new(),
        }
    }
}

impl Entry {
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            title: uri.clone(),
            uri,
            frequency: CheckFrequency::Auto,
            last_checked: None,
            skip_content: false,
        }
    }
}

impl SubscriptionNode {
    pub fn title(&self) -> &str {
        match self {
            SubscriptionNode::Category(c) => &c.title,
            SubscriptionNode::Entry(e) => &e.title,
        }
    }

    pub fn as_entry(&self) -> Option<&Entry> {
        match self {
            SubscriptionNode::Entry(e) => Some(e),
            SubscriptionNode::Category(_) => None,
        }
    }

    pub fn as_category(&self) -> Option<&Category> {
        match self {
            SubscriptionNode::Category(c) => Some(c),
            SubscriptionNode::Entry(_) => None,
        }
    }

    /// All entries at or below this node, depth first.
    pub fn entries(&self) -> Vec<&Entry> {
        let mut out = Vec::new();
        collect_entries(std::slice::from_ref(self), &mut out);
        out
    }
}

/// All entries below `nodes`, depth first in tree order.
pub fn collect_entries<'a>(nodes: &'a [SubscriptionNode], out: &mut Vec<&'a Entry>) {
    for node in nodes {
        match node {
            SubscriptionNode::Entry(e) => out.push(e),
            SubscriptionNode::Category(c) => collect_entries(&c.children, out),
        }
    }
}

/// Find the entry for `uri` anywhere below `nodes`.
pub fn find_entry_mut<'a>(nodes: &'a mut [SubscriptionNode], uri: &str) -> Option<&'a mut Entry> {
    for node in nodes {
        match node {
            SubscriptionNode::Entry(e) if e.uri == uri => return Some(e),
            SubscriptionNode::Entry(_) => {}
            SubscriptionNode::Category(c) => {
                if let Some(found) = find_entry_mut(&mut c.children, uri) {
                    return Some(found);
                }
            }
        }
    }
    None
}

/// The node at `path`, each step indexing into a category's children.
pub fn node_at<'a>(nodes: &'a [SubscriptionNode], path: &[usize]) -> Option<&'a SubscriptionNode> {
    let (&last, parents) = path.split_last()?;
    let mut level = nodes;
    for &i in parents {
        level = &level.get(i)?.as_category()?.children;
    }
    level.get(last)
}

/// The child list addressed by `path`; the empty path is the root list.
pub fn children_mut<'a>(
    nodes: &'a mut Vec<SubscriptionNode>,
    path: &[usize],
) -> Option<&'a mut Vec<SubscriptionNode>> {
    let mut level = nodes;
    for &i in path {
        level = match level.get_mut(i)? {
            SubscriptionNode::Category(c) => &mut c.children,
            SubscriptionNode::Entry(_) => return None,
        };
    }
    Some(level)
}

/// Detach the node at `path`.
pub fn remove_at(nodes: &mut Vec<SubscriptionNode>, path: &[usize]) -> Option<SubscriptionNode> {
    let (&last, parent) = path.split_last()?;
    let level = children_mut(nodes, parent)?;
    if last < level.len() {
        Some(level.remove(last))
    } else {
        None
    }
}

/// Detach the entry for `uri` wherever it sits.
pub fn remove_entry(nodes: &mut Vec<SubscriptionNode>, uri: &str) -> Option<Entry> {
    if let Some(i) = nodes
        .iter()
        .position(|n| matches!(n, SubscriptionNode::Entry(e) if e.uri == uri))
    {
        return match nodes.remove(i) {
            SubscriptionNode::Entry(e) => Some(e),
            SubscriptionNode::Category(_) => None,
        };
    }
    nodes.iter_mut().find_map(|node| match node {
        SubscriptionNode::Category(c) => remove_entry(&mut c.children, uri),
        SubscriptionNode::Entry(_) => None,
    })
}
