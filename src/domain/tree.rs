//! Category → datasource catalog tree

use serde::Serialize;
use std::collections::HashMap;

use super::datasource::{DatasourceCategory, DatasourceConfig};

/// Categories order before datasources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Category,
    Datasource,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceTreeNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub children: Vec<DatasourceTreeNode>,
}

impl DatasourceTreeNode {
    fn category(category: &DatasourceCategory) -> Self {
        Self {
            id: format!("category_{}", category.id),
            label: category.name.clone(),
            kind: NodeKind::Category,
            code: category.code.clone(),
            sort_order: category.sort_order,
            db_type: None,
            description: category.description.clone(),
            children: Vec::new(),
        }
    }

    fn datasource(datasource: &DatasourceConfig) -> Self {
        Self {
            id: format!("datasource_{}", datasource.node_key()),
            label: datasource.name.clone(),
            kind: NodeKind::Datasource,
            code: datasource.code.clone(),
            sort_order: None,
            db_type: datasource
                .driver_kind()
                .ok()
                .map(|kind| kind.name().to_string()),
            description: datasource.description.clone(),
            children: Vec::new(),
        }
    }
}

/// Build the enabled part of the catalog as a forest rooted at parentless categories.
///
/// Datasources without a reachable category and categories whose parent is
/// missing or disabled are left out.
pub fn build_tree(
    categories: &[DatasourceCategory],
    datasources: &[DatasourceConfig],
) -> Vec<DatasourceTreeNode> {
    let mut sub_categories: HashMap<i64, Vec<&DatasourceCategory>> = HashMap::new();
    let mut roots = Vec::new();
    for category in categories.iter().filter(|c| c.enabled) {
        match category.parent_id {
            Some(parent) => sub_categories.entry(parent).or_default().push(category),
            None => roots.push(category),
        }
    }

    let mut members: HashMap<i64, Vec<&DatasourceConfig>> = HashMap::new();
    for datasource in datasources.iter().filter(|d| d.enabled) {
        if let Some(category_id) = datasource.category_id {
            members.entry(category_id).or_default().push(datasource);
        }
    }

    let mut tree: Vec<DatasourceTreeNode> = roots
        .into_iter()
        .map(|root| expand(root, &sub_categories, &members))
        .collect();
    sort_tree(&mut tree);
    tree
}

fn expand(
    category: &DatasourceCategory,
    sub_categories: &HashMap<i64, Vec<&DatasourceCategory>>,
    members: &HashMap<i64, Vec<&DatasourceConfig>>,
) -> DatasourceTreeNode {
    let mut node = DatasourceTreeNode::category(category);
    if let Some(children) = sub_categories.get(&category.id) {
        node.children.extend(
            children
                .iter()
                .map(|child| expand(child, sub_categories, members)),
        );
    }
    if let Some(datasources) = members.get(&category.id) {
        node.children
            .extend(datasources.iter().map(|d| DatasourceTreeNode::datasource(d)));
    }
    node
}

/// Stable recursive sort: kind, then sort order (missing last), then label.
pub fn sort_tree(nodes: &mut [DatasourceTreeNode]) {
    nodes.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| {
                a.sort_order
                    .unwrap_or(i32::MAX)
                    .cmp(&b.sort_order.unwrap_or(i32::MAX))
            })
            .then_with(|| a.label.cmp(&b.label))
    });
    for node in nodes.iter_mut() {
        sort_tree(&mut node.children);
    }
}
