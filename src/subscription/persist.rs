//! Subscription list document.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::app::Result;
use crate::domain::SubscriptionNode;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SubscriptionDocument {
    version: u32,
    #[serde(default)]
    nodes: Vec<SubscriptionNode>,
}

/// Read the root nodes stored at `path`. A missing file is an empty list.
pub fn load(path: &Path) -> Result<Vec<SubscriptionNode>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let document: SubscriptionDocument = serde_json::from_str(&content)?;
    Ok(document.nodes)
}

/// Write `nodes` to `path` through a temporary sibling file.
pub fn save(nodes: &[SubscriptionNode], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let document = SubscriptionDocument {
        version: FORMAT_VERSION,
        nodes: nodes.to_vec(),
    };
    let json = serde_json::to_string_pretty(&document)?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
