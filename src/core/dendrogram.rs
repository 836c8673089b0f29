// dendrogram.rs - Binary merge tree produced by the clustering engine

use crate::core::likelihood::{sigmoid, ClusterState, MergeLikelihood};
use crate::core::prior::{Prior, PriorType};
use crate::data::{ClusterCounts, ExternalTree, SparseCountStore};
use crate::error::{BapsError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Starting cluster: one sequence, or a seed cluster of several
    Leaf { members: Vec<usize> },
    Internal { left: usize, right: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    pub kind: NodeKind,
    pub size: usize,
    /// Smallest member sequence index
    pub key: usize,
    pub log_likelihood: f64,
    pub log_d: f64,
    pub log_tree: f64,
    /// log(r / (1 - r)) of the merge that created this node
    pub log_odds: Option<f64>,
}

impl ClusterNode {
    fn from_state(kind: NodeKind, state: &ClusterState, log_odds: Option<f64>) -> Self {
        Self {
            kind,
            size: state.counts.size(),
            key: state.key,
            log_likelihood: state.log_likelihood,
            log_d: state.log_d,
            log_tree: state.log_tree,
            log_odds,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    /// Posterior probability r that this node's members form one cluster
    pub fn merge_probability(&self) -> Option<f64> {
        self.log_odds.map(sigmoid)
    }

    pub fn children(&self) -> Option<(usize, usize)> {
        match self.kind {
            NodeKind::Internal { left, right } => Some((left, right)),
            NodeKind::Leaf { .. } => None,
        }
    }
}

/// One row of an hclust-style merge table
#[derive(Debug, Clone, PartialEq)]
pub struct LinkageRow {
    pub step: usize,
    /// Negative ids are starting clusters (-1-based), positive ids earlier steps
    pub left: i64,
    pub right: i64,
    pub size: usize,
    pub merge_probability: f64,
}

/// Arena of cluster nodes; children always precede their parent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dendrogram {
    nodes: Vec<ClusterNode>,
    root: usize,
    n_sequences: usize,
    prior_type: PriorType,
    mixture_concentration: f64,
    fingerprint: u32,
}

impl Dendrogram {
    pub(crate) fn from_parts(
        nodes: Vec<ClusterNode>,
        n_sequences: usize,
        prior_type: PriorType,
        mixture_concentration: f64,
        fingerprint: u32,
    ) -> Result<Self> {
        let root = nodes
            .len()
            .checked_sub(1)
            .ok_or_else(|| BapsError::empty_input("dendrogram has no nodes"))?;
        Ok(Self {
            nodes,
            root,
            n_sequences,
            prior_type,
            mixture_concentration,
            fingerprint,
        })
    }

    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> &ClusterNode {
        &self.nodes[index]
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn n_sequences(&self) -> usize {
        self.n_sequences
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn n_internal(&self) -> usize {
        self.nodes.len() - self.n_leaves()
    }

    pub fn prior_type(&self) -> PriorType {
        self.prior_type
    }

    pub fn mixture_concentration(&self) -> f64 {
        self.mixture_concentration
    }

    /// Fingerprint of the store the dendrogram was built from
    pub fn fingerprint(&self) -> u32 {
        self.fingerprint
    }

    /// Sorted member sequence indices under a node
    pub fn members(&self, node: usize) -> Vec<usize> {
        let mut members = Vec::with_capacity(self.nodes[node].size);
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            match &self.nodes[current].kind {
                NodeKind::Leaf { members: m } => members.extend_from_slice(m),
                NodeKind::Internal { left, right } => {
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }
        members.sort_unstable();
        members
    }

    /// Aggregated counts of a node, recomputed from the store
    pub fn node_counts(&self, store: &SparseCountStore, node: usize) -> Result<ClusterCounts> {
        store.aggregate(&self.members(node))
    }

    /// The sub-dendrogram rooted at `node`, keeping global sequence indices
    pub fn subtree(&self, node: usize) -> Dendrogram {
        let mut order = Vec::new();
        let mut stack = vec![(node, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            stack.push((current, true));
            if let Some((left, right)) = self.nodes[current].children() {
                stack.push((right, false));
                stack.push((left, false));
            }
        }

        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut nodes = Vec::with_capacity(order.len());
        for old in order {
            let mut copy = self.nodes[old].clone();
            if let NodeKind::Internal { left, right } = copy.kind {
                copy.kind = NodeKind::Internal {
                    left: remap[left],
                    right: remap[right],
                };
            }
            remap[old] = nodes.len();
            nodes.push(copy);
        }
        let root = nodes.len() - 1;
        Dendrogram {
            nodes,
            root,
            n_sequences: self.n_sequences,
            prior_type: self.prior_type,
            mixture_concentration: self.mixture_concentration,
            fingerprint: self.fingerprint,
        }
    }

    /// Merge table in creation order
    pub fn linkage(&self) -> Vec<LinkageRow> {
        let mut ids = vec![0i64; self.nodes.len()];
        let mut leaf = 0i64;
        let mut rows = Vec::with_capacity(self.n_internal());
        for (index, node) in self.nodes.iter().enumerate() {
            match node.kind {
                NodeKind::Leaf { .. } => {
                    leaf += 1;
                    ids[index] = -leaf;
                }
                NodeKind::Internal { left, right } => {
                    let step = rows.len() + 1;
                    ids[index] = step as i64;
                    rows.push(LinkageRow {
                        step,
                        left: ids[left],
                        right: ids[right],
                        size: node.size,
                        merge_probability: node.merge_probability().unwrap_or(1.0),
                    });
                }
            }
        }
        rows
    }

    /// Newick text; internal nodes are labelled with their merge probability
    /// and seed clusters become polytomies
    pub fn to_newick(&self, names: &[String]) -> String {
        let mut text: Vec<String> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let rendered = match &node.kind {
                NodeKind::Leaf { members } if members.len() == 1 => newick_label(&names[members[0]]),
                NodeKind::Leaf { members } => format!(
                    "({})",
                    members
                        .iter()
                        .map(|&m| newick_label(&names[m]))
                        .collect::<Vec<_>>()
                        .join(",")
                ),
                NodeKind::Internal { left, right } => format!(
                    "({},{}){:.4}",
                    text[*left],
                    text[*right],
                    node.merge_probability().unwrap_or(1.0)
                ),
            };
            text.push(rendered);
        }
        format!("{};", text[self.root])
    }

    /// Score an externally supplied tree under the BHC model.
    ///
    /// The tree is validated against the store before any likelihood is
    /// computed.
    pub fn from_tree(
        store: &SparseCountStore,
        prior: &Prior,
        tree: &ExternalTree,
        mixture_concentration: Option<f64>,
    ) -> Result<Self> {
        let order = tree.validate()?;
        let leaf_of = tree.leaf_indices(store.names())?;
        prior.check_store(store)?;

        let n = store.n_sequences();
        if n < 2 {
            return Err(BapsError::empty_input("need at least two sequences"));
        }
        let alpha = mixture_concentration.unwrap_or(1.0 / n as f64);
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(BapsError::config(format!(
                "mixture concentration must be positive, got {}",
                alpha
            )));
        }

        let model = MergeLikelihood::new(prior, alpha, n);
        let mut slot_of = vec![usize::MAX; tree.nodes().len()];
        let mut states: Vec<Option<ClusterState>> = Vec::with_capacity(order.len());
        let mut nodes = Vec::with_capacity(order.len());

        for tree_node in order {
            let entry = &tree.nodes()[tree_node];
            let (node, state) = match entry.children.as_slice() {
                [a, b] => {
                    let (sa, sb) = (slot_of[*a], slot_of[*b]);
                    let (left, right) = match (states[sa].take(), states[sb].take()) {
                        (Some(left), Some(right)) => (left, right),
                        _ => return Err(BapsError::invalid_tree("child scored twice")),
                    };
                    // Lower key goes left, as in engine-built trees
                    let (sl, sr, left, right) = if left.key <= right.key {
                        (sa, sb, left, right)
                    } else {
                        (sb, sa, right, left)
                    };
                    let score = model.score(&left, &right);
                    let state = model.merge(left, right, &score);
                    let kind = NodeKind::Internal { left: sl, right: sr };
                    (ClusterNode::from_state(kind, &state, Some(score.log_odds)), state)
                }
                _ => {
                    let seq = leaf_of[&tree_node];
                    let state = model.leaf(store.leaf_counts(seq), seq);
                    let kind = NodeKind::Leaf { members: vec![seq] };
                    (ClusterNode::from_state(kind, &state, None), state)
                }
            };
            slot_of[tree_node] = nodes.len();
            nodes.push(node);
            states.push(Some(state));
        }

        Self::from_parts(nodes, n, prior.policy(), alpha, store.fingerprint())
    }

    /// Used by the engine to record a finished node
    pub(crate) fn leaf_node(state: &ClusterState, members: Vec<usize>) -> ClusterNode {
        ClusterNode::from_state(NodeKind::Leaf { members }, state, None)
    }

    pub(crate) fn internal_node(
        state: &ClusterState,
        left: usize,
        right: usize,
        log_odds: f64,
    ) -> ClusterNode {
        ClusterNode::from_state(NodeKind::Internal { left, right }, state, Some(log_odds))
    }
}

fn newick_label(name: &str) -> String {
    if name
        .chars()
        .any(|c| matches!(c, '(' | ')' | ',' | ':' | ';' | ' ' | '[' | ']' | '\''))
    {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.to_string()
    }
}
