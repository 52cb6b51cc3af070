use std::collections::HashSet;

use reqwest::Method;
use serde_json::Value;

use super::client::FamlyApi;
use super::error::FamlyError;

const ME_PATH: &str = "/api/me/me/me";
const PREVIOUS_CHILDREN_BEHAVIOR: &str = "ShowPreviousChildren";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Child {
    pub id: String,
    /// Display name; historical children sometimes have none.
    pub label: Option<String>,
}

impl Child {
    /// Label used in filenames when the child has no resolved name.
    pub fn label_or_default(&self) -> &str {
        self.label.as_deref().unwrap_or("child")
    }
}

/// Discover the account's children: current ones from `roles2`, then former
/// ones from the `ShowPreviousChildren` behavior. First occurrence of an id
/// wins.
pub async fn discover_children(api: &dyn FamlyApi) -> Result<Vec<Child>, FamlyError> {
    let me = api.request(Method::GET, ME_PATH, &[]).await?;
    let children = children_from_me(&me);
    if children.is_empty() {
        return Err(FamlyError::NoChildrenFound);
    }
    tracing::debug!("Discovered {} children", children.len());
    Ok(children)
}

fn children_from_me(me: &Value) -> Vec<Child> {
    let current = me
        .get("roles2")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(|role| Child {
            id: string_at(role, "/targetId").unwrap_or_default(),
            label: string_at(role, "/title"),
        });

    let previous = me
        .get("behaviors")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|b| b.get("id").and_then(Value::as_str) == Some(PREVIOUS_CHILDREN_BEHAVIOR))
        .filter_map(|b| b.pointer("/payload/children").and_then(Value::as_array))
        .flatten()
        .map(|child| Child {
            id: string_at(child, "/childId").unwrap_or_default(),
            label: string_at(child, "/name/firstName"),
        });

    let mut seen = HashSet::new();
    current
        .chain(previous)
        .filter(|child| !child.id.is_empty() && seen.insert(child.id.clone()))
        .collect()
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Narrow `children` to those labelled `label`, or return them all when no
/// label is given.
pub fn select_children(children: &[Child], label: Option<&str>) -> Result<Vec<Child>, FamlyError> {
    let Some(label) = label else {
        return Ok(children.to_vec());
    };
    let selected: Vec<Child> = children
        .iter()
        .filter(|c| c.label.as_deref() == Some(label))
        .cloned()
        .collect();
    if selected.is_empty() {
        return Err(FamlyError::ChildNotFound(label.to_string()));
    }
    Ok(selected)
}
