// tree.rs - Externally supplied rooted binary trees

use crate::error::{BapsError, Result};
use newick::{Newick, NewickTree};
use std::collections::HashMap;
use std::path::Path;

/// One node of an external tree; leaves carry a label and no children
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub label: Option<String>,
    pub children: Vec<usize>,
}

/// Arena-backed rooted tree, unvalidated until `validate` is called
#[derive(Debug, Clone, Default)]
pub struct ExternalTree {
    nodes: Vec<TreeNode>,
    root: Option<usize>,
}

impl ExternalTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_leaf(&mut self, label: &str) -> usize {
        self.nodes.push(TreeNode {
            label: Some(label.to_string()),
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn add_internal(&mut self, children: Vec<usize>) -> usize {
        self.nodes.push(TreeNode {
            label: None,
            children,
        });
        self.nodes.len() - 1
    }

    pub fn set_root(&mut self, root: usize) {
        self.root = Some(root);
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn root(&self) -> Option<usize> {
        self.root
    }

    pub fn from_newick_str(text: &str) -> Result<Self> {
        let parsed: NewickTree = newick::one_from_string(text.trim())
            .map_err(|e| BapsError::parse(format!("Failed to parse Newick tree: {}", e)))?;

        let mut tree = ExternalTree::new();
        // (newick node, parent arena slot)
        let mut stack = vec![(parsed.root(), None::<usize>)];
        while let Some((id, parent)) = stack.pop() {
            let children = parsed[id].children();
            let slot = if children.is_empty() {
                let label = parsed
                    .name(id)
                    .map(|name| name.to_string())
                    .unwrap_or_default();
                tree.add_leaf(&label)
            } else {
                tree.add_internal(Vec::with_capacity(children.len()))
            };
            match parent {
                Some(p) => tree.nodes[p].children.push(slot),
                None => tree.set_root(slot),
            }
            for &child in children.iter().rev() {
                stack.push((child, Some(slot)));
            }
        }
        Ok(tree)
    }

    pub fn from_newick_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BapsError::parse(format!("Failed to read tree file {}: {}", path.display(), e))
        })?;
        let tree = Self::from_newick_str(&text)?;
        log::info!(
            "Loaded tree with {} nodes from {}",
            tree.nodes.len(),
            path.display()
        );
        Ok(tree)
    }

    /// Check the tree is rooted, strictly bifurcating and acyclic, with every
    /// node reachable from the root. Returns the nodes in post-order.
    pub fn validate(&self) -> Result<Vec<usize>> {
        let root = self
            .root
            .ok_or_else(|| BapsError::invalid_tree("tree has no root"))?;
        if root >= self.nodes.len() {
            return Err(BapsError::invalid_tree(format!(
                "root {} is not a node of the tree",
                root
            )));
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            if std::mem::replace(&mut visited[node], true) {
                return Err(BapsError::invalid_tree(format!(
                    "node {} is reachable more than once",
                    node
                )));
            }
            let entry = &self.nodes[node];
            match entry.children.len() {
                0 => {
                    if entry.label.as_deref().map_or(true, str::is_empty) {
                        return Err(BapsError::invalid_tree(format!(
                            "leaf {} has no label",
                            node
                        )));
                    }
                }
                2 => {}
                k => {
                    return Err(BapsError::invalid_tree(format!(
                        "node {} has {} children, expected 2",
                        node, k
                    )))
                }
            }
            stack.push((node, true));
            for &child in entry.children.iter().rev() {
                if child >= self.nodes.len() {
                    return Err(BapsError::invalid_tree(format!(
                        "node {} points at missing child {}",
                        node, child
                    )));
                }
                stack.push((child, false));
            }
        }

        if let Some(orphan) = visited.iter().position(|&v| !v) {
            return Err(BapsError::invalid_tree(format!(
                "node {} is not reachable from the root",
                orphan
            )));
        }
        Ok(order)
    }

    /// Map each leaf to its sequence index in `names`.
    ///
    /// The leaf label set must equal the name set exactly.
    pub fn leaf_indices(&self, names: &[String]) -> Result<HashMap<usize, usize>> {
        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut mapping = HashMap::new();
        let mut seen = vec![false; names.len()];
        for (node, entry) in self.nodes.iter().enumerate() {
            if !entry.children.is_empty() {
                continue;
            }
            let label = entry.label.as_deref().unwrap_or_default();
            let seq = *index.get(label).ok_or_else(|| {
                BapsError::invalid_tree(format!("leaf '{}' is not a sequence in the store", label))
            })?;
            if std::mem::replace(&mut seen[seq], true) {
                return Err(BapsError::invalid_tree(format!(
                    "leaf label '{}' appears more than once",
                    label
                )));
            }
            mapping.insert(node, seq);
        }

        if let Some(missing) = seen.iter().position(|&s| !s) {
            return Err(BapsError::invalid_tree(format!(
                "sequence '{}' has no leaf in the tree",
                names[missing]
            )));
        }
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_builder_and_validation() {
        let mut t = ExternalTree::new();
        let a = t.add_leaf("a");
        let b = t.add_leaf("b");
        let c = t.add_leaf("c");
        let ab = t.add_internal(vec![a, b]);
        let root = t.add_internal(vec![ab, c]);
        t.set_root(root);

        let order = t.validate().unwrap();
        assert_eq!(order.len(), 5);
        assert_eq!(*order.last().unwrap(), root);
        let pos = |n: usize| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(a) < pos(ab) && pos(b) < pos(ab));

        let mapping = t.leaf_indices(&names(&["c", "b", "a"])).unwrap();
        assert_eq!(mapping[&a], 2);
        assert_eq!(mapping[&c], 0);
    }

    #[test]
    fn test_invalid_trees() {
        let mut t = ExternalTree::new();
        let a = t.add_leaf("a");
        let b = t.add_leaf("b");
        let c = t.add_leaf("c");
        let root = t.add_internal(vec![a, b, c]);
        t.set_root(root);
        assert!(matches!(t.validate(), Err(BapsError::InvalidTree { .. })));

        let mut cyclic = ExternalTree::new();
        let a = cyclic.add_leaf("a");
        let root = cyclic.add_internal(vec![a, 1]);
        cyclic.set_root(root);
        assert!(matches!(cyclic.validate(), Err(BapsError::InvalidTree { .. })));

        let mut unrooted = ExternalTree::new();
        unrooted.add_leaf("a");
        assert!(matches!(unrooted.validate(), Err(BapsError::InvalidTree { .. })));
    }

    #[test]
    fn test_leaf_set_must_match_names() {
        let mut t = ExternalTree::new();
        let a = t.add_leaf("a");
        let b = t.add_leaf("a");
        let root = t.add_internal(vec![a, b]);
        t.set_root(root);
        assert!(t.leaf_indices(&names(&["a", "b"])).is_err());

        let mut t = ExternalTree::new();
        let a = t.add_leaf("a");
        let b = t.add_leaf("b");
        let root = t.add_internal(vec![a, b]);
        t.set_root(root);
        assert!(t.leaf_indices(&names(&["a", "b", "c"])).is_err());
        assert!(t.leaf_indices(&names(&["a", "x"])).is_err());
    }

    #[test]
    fn test_from_newick() {
        let t = ExternalTree::from_newick_str("((a:0.1,b:0.2):0.5,c:0.3);").unwrap();
        let order = t.validate().unwrap();
        assert_eq!(order.len(), 5);
        let mapping = t.leaf_indices(&names(&["a", "b", "c"])).unwrap();
        assert_eq!(mapping.len(), 3);

        let polytomy = ExternalTree::from_newick_str("(a,b,c);").unwrap();
        assert!(polytomy.validate().is_err());
    }
}
